#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]

use modkit_uow::{
    CreateMixin, DeleteMixin, EntityRepository, FieldMap, Instance, ReadMixin, SessionConfig,
    SessionFactory, UowConfig, UpdateMixin,
};
use sea_orm::{ConnectionTrait, EntityTrait, PaginatorTrait};
use tempfile::TempDir;

pub mod user {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "users")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        #[sea_orm(unique)]
        pub name: String,
        pub position: Option<String>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(has_one = "super::profile::Entity")]
        Profile,
    }

    impl Related<super::profile::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Profile.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod profile {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "profiles")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub user_id: i32,
        pub bio: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::user::Entity",
            from = "Column::UserId",
            to = "super::user::Column::Id"
        )]
        User,
    }

    impl Related<super::user::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::User.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

/// Rows whose foreign key is only checked at commit.
pub mod note {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "notes")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub user_id: i32,
        pub body: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

/// Binary payloads; the column type has no coercion of its own.
pub mod blob {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "blobs")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub data: Vec<u8>,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

const SCHEMA: [&str; 4] = [
    "CREATE TABLE users (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        position TEXT NULL
    )",
    "CREATE TABLE profiles (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL UNIQUE REFERENCES users(id),
        bio TEXT NOT NULL
    )",
    "CREATE TABLE notes (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id INTEGER NOT NULL REFERENCES users(id) DEFERRABLE INITIALLY DEFERRED,
        body TEXT NOT NULL
    )",
    "CREATE TABLE blobs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        data BLOB NOT NULL
    )",
];

pub struct UserRepository;

impl EntityRepository for UserRepository {
    type Entity = user::Entity;
}

impl CreateMixin for UserRepository {}
impl ReadMixin for UserRepository {}
impl UpdateMixin for UserRepository {}
impl DeleteMixin for UserRepository {}

pub struct ProfileRepository;

impl EntityRepository for ProfileRepository {
    type Entity = profile::Entity;
}

impl CreateMixin for ProfileRepository {}
impl ReadMixin for ProfileRepository {}

pub struct NoteRepository;

impl EntityRepository for NoteRepository {
    type Entity = note::Entity;
}

impl CreateMixin for NoteRepository {}

pub struct BlobRepository;

impl EntityRepository for BlobRepository {
    type Entity = blob::Entity;
}

impl CreateMixin for BlobRepository {}
impl ReadMixin for BlobRepository {}
impl UpdateMixin for BlobRepository {}

/// Factory over a fresh in-memory database with the test schema.
pub async fn setup() -> SessionFactory {
    setup_with(SessionConfig::default()).await
}

pub async fn setup_with(session: SessionConfig) -> SessionFactory {
    let cfg = UowConfig {
        session,
        ..UowConfig::default()
    };
    let factory = SessionFactory::connect(&cfg)
        .await
        .expect("Failed to connect to database");
    create_schema(&factory).await;
    factory
}

/// Factory over a file-backed database, for tests that hold several scopes open.
/// Keep the returned directory alive for the duration of the test.
pub async fn setup_file(max_conns: u32) -> (SessionFactory, TempDir) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("uow.db");
    let mut cfg = UowConfig {
        dsn: format!("sqlite://{}?mode=rwc", path.display()),
        ..UowConfig::default()
    };
    cfg.pool.max_conns = Some(max_conns);
    let factory = SessionFactory::connect(&cfg)
        .await
        .expect("Failed to connect to database");
    create_schema(&factory).await;
    (factory, dir)
}

async fn create_schema(factory: &SessionFactory) {
    for stmt in SCHEMA {
        factory
            .connection()
            .execute_unprepared(stmt)
            .await
            .expect("Failed to create table");
    }
}

pub fn user_data(name: &str, position: &str) -> FieldMap {
    FieldMap::new().with("name", name).with("position", position)
}

pub fn by_name(name: &str) -> FieldMap {
    FieldMap::new().with("name", name)
}

/// Database-generated key of a flushed instance.
pub fn id_of(obj: &Instance<user::Entity>) -> i32 {
    obj.model().expect("instance has not been flushed").id
}

pub fn position_of(obj: &Instance<user::Entity>) -> Option<String> {
    match obj.get(user::Column::Position) {
        Some(sea_orm::Value::String(v)) => v.map(|s| *s),
        other => panic!("unexpected position value: {other:?}"),
    }
}

/// Committed row count, read outside any scope.
pub async fn committed_users(factory: &SessionFactory) -> u64 {
    user::Entity::find()
        .count(factory.connection())
        .await
        .expect("Failed to count users")
}

/// Create and commit users named after `names`, all with the same position.
pub async fn seed(factory: &SessionFactory, names: &[&str], position: &str) {
    let uow = factory.begin().await.unwrap();
    for name in names {
        UserRepository::create(uow.session(), &user_data(name, position)).unwrap();
    }
    uow.commit().await.unwrap();
}

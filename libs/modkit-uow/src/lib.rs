#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! `ModKit` unit of work.
//!
//! Transaction scopes and generic CRUD repository mixins over `SeaORM`.
//!
//! - [`SessionFactory`] owns the connection pool and opens scopes.
//! - [`UnitOfWork`] is one scope: it commits on success, rolls back on failure and
//!   rolls back when dropped while still open.
//! - [`Session`] is what repository operations receive. Writes are staged on it and
//!   sent to the database on flush, before reads (autoflush) and at commit.
//! - [`Instance`] is a shared handle to one tracked row.
//! - [`CreateMixin`], [`ReadMixin`], [`UpdateMixin`] and [`DeleteMixin`] provide the
//!   generic operations for any repository implementing [`EntityRepository`].
//!
//! # Example
//! ```ignore
//! use modkit_uow::{CreateMixin, FieldMap, ReadMixin, SessionFactory, UowConfig};
//!
//! let factory = SessionFactory::connect(&UowConfig::default()).await?;
//!
//! let uow = factory.begin().await?;
//! let alice = UserRepository::create(
//!     uow.session(),
//!     &FieldMap::new().with("name", "Alice").with("position", "Engineer"),
//! )?;
//! uow.flush().await?;
//! assert!(alice.get(user::Column::Id).is_some());
//! uow.commit().await?;
//!
//! let uow = factory.begin().await?;
//! let found = UserRepository::get_one(uow.session(), &FieldMap::new().with("name", "Alice")).await?;
//! uow.rollback().await?;
//! ```

#![cfg_attr(
    not(any(feature = "pg", feature = "mysql", feature = "sqlite")),
    allow(unused_imports, dead_code, clippy::unused_async)
)]

pub mod config;
pub mod error;
pub mod fields;
pub mod query;
pub mod repo;

mod factory;
mod instance;
mod session;
mod staging;
mod uow;

pub use config::{ConfigError, PoolCfg, SessionConfig, UowConfig};
pub use error::{
    RepoError, Result, TransactionError, TxErrorKind, TxStage, ValidationError, classify,
};
pub use factory::SessionFactory;
pub use fields::FieldMap;
pub use instance::{Instance, InstanceState};
pub use query::{Direction, ListQuery, OrderBy};
pub use repo::{CreateMixin, DeleteMixin, EntityRepository, ReadMixin, UpdateMixin};
pub use session::{ScopeState, Session};
pub use uow::UnitOfWork;

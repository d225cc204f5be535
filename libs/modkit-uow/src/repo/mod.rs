//! Generic repository mixins.
//!
//! A repository names its entity once through [`EntityRepository`] and opts into the
//! operations it needs:
//!
//! ```ignore
//! pub struct UserRepository;
//!
//! impl EntityRepository for UserRepository {
//!     type Entity = user::Entity;
//! }
//!
//! impl CreateMixin for UserRepository {}
//! impl ReadMixin for UserRepository {}
//! impl UpdateMixin for UserRepository {}
//! impl DeleteMixin for UserRepository {}
//! ```
//!
//! Every operation takes the [`Session`](crate::Session) of the enclosing scope and
//! never commits, rolls back or closes it.

mod create;
mod delete;
mod read;
mod update;

pub use create::CreateMixin;
pub use delete::DeleteMixin;
pub use read::ReadMixin;
pub use update::UpdateMixin;

use sea_orm::EntityTrait;

/// Binds a repository type to the entity it manages.
pub trait EntityRepository: Send + Sync {
    type Entity: EntityTrait;
}

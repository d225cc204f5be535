use sea_orm::{ActiveModelBehavior, ActiveModelTrait, EntityTrait, IntoActiveModel};
use tracing::debug;

use super::EntityRepository;
use crate::error::{RepoError, Result};
use crate::fields;
use crate::instance::{Instance, InstanceState};
use crate::session::Session;
use crate::staging::{OpKind, Pending};

/// Stage removal of rows.
pub trait DeleteMixin: EntityRepository
where
    <Self::Entity as EntityTrait>::Model:
        IntoActiveModel<<Self::Entity as EntityTrait>::ActiveModel> + Send + Sync,
    <Self::Entity as EntityTrait>::ActiveModel:
        ActiveModelTrait<Entity = Self::Entity> + ActiveModelBehavior + Send + Sync,
{
    /// Stage the delete of `obj`; the row goes away at the next flush or commit.
    ///
    /// Deleting a pending instance cancels its insert. A detached instance is
    /// re-attached to `session` first. Deleting twice is a no-op.
    ///
    /// # Errors
    /// `ForeignSession` when `obj` is bound to another open session,
    /// `DetachedInstance` for an instance that never had a row, `SessionClosed` when
    /// the scope has ended.
    fn delete(session: &Session, obj: &Instance<Self::Entity>) -> Result<()> {
        let entity = fields::entity_name::<Self::Entity>();
        if !session.claim(obj)? {
            match obj.state() {
                InstanceState::Detached | InstanceState::Persistent => {
                    session.add(obj)?;
                }
                _ => return Err(RepoError::DetachedInstance { entity }),
            }
        }

        let status = obj.state();
        match status {
            InstanceState::Pending => {
                obj.detach_transient();
                debug!(session = session.id(), entity = %entity, "cancelled pending insert");
            }
            InstanceState::Persistent => {
                obj.lock().status = InstanceState::Deleted;
                session
                    .shared()
                    .stage(Pending::new(OpKind::Delete, obj));
            }
            InstanceState::Deleted | InstanceState::Transient | InstanceState::Detached => {}
        }
        Ok(())
    }
}

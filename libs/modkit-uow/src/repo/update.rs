use sea_orm::{ActiveModelBehavior, ActiveModelTrait, EntityTrait, IntoActiveModel};
use tracing::debug;

use super::EntityRepository;
use crate::error::{RepoError, Result};
use crate::fields::{self, FieldMap};
use crate::instance::{Instance, InstanceState};
use crate::staging::{OpKind, Pending};

/// Modify loaded instances in place.
pub trait UpdateMixin: EntityRepository
where
    <Self::Entity as EntityTrait>::Model:
        IntoActiveModel<<Self::Entity as EntityTrait>::ActiveModel> + Send + Sync,
    <Self::Entity as EntityTrait>::ActiveModel:
        ActiveModelTrait<Entity = Self::Entity> + ActiveModelBehavior + Send + Sync,
{
    /// Assign `data` onto `obj` and stage the update in its session.
    ///
    /// The write happens at the next flush (explicit, autoflush before a read, or
    /// commit); `update` itself never touches the database.
    ///
    /// # Errors
    /// `DetachedInstance` when `obj` is not bound to an open session,
    /// `DeletedInstance` when it was deleted there, `ValidationError` for unknown
    /// fields, bad values or primary-key assignments.
    fn update(obj: &Instance<Self::Entity>, data: &FieldMap) -> Result<()> {
        let entity = fields::entity_name::<Self::Entity>();
        let Some(owner) = obj.owner() else {
            return Err(RepoError::DetachedInstance { entity });
        };
        let resolved = fields::resolve::<Self::Entity>(data, false)?;

        let status = {
            let mut state = obj.lock();
            match state.status {
                InstanceState::Deleted => return Err(RepoError::DeletedInstance { entity }),
                InstanceState::Transient | InstanceState::Detached => {
                    return Err(RepoError::DetachedInstance { entity });
                }
                InstanceState::Pending | InstanceState::Persistent => {}
            }
            fields::assign::<Self::Entity>(&mut state.active, resolved)?;
            state.status
        };

        // A pending insert already carries the new values.
        if status == InstanceState::Persistent {
            owner.stage(Pending::new(OpKind::Update, obj));
        } else {
            debug!(session = owner.id(), entity = %entity, "updated pending instance");
        }
        Ok(())
    }
}

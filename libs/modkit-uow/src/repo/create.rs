use sea_orm::{ActiveModelBehavior, ActiveModelTrait, EntityTrait, IntoActiveModel};

use super::EntityRepository;
use crate::error::Result;
use crate::fields::{self, FieldMap};
use crate::instance::Instance;
use crate::session::Session;

/// Stage new rows.
pub trait CreateMixin: EntityRepository
where
    <Self::Entity as EntityTrait>::Model:
        IntoActiveModel<<Self::Entity as EntityTrait>::ActiveModel> + Send + Sync,
    <Self::Entity as EntityTrait>::ActiveModel:
        ActiveModelTrait<Entity = Self::Entity> + ActiveModelBehavior + Send + Sync,
{
    /// Build a new instance from `data` and add it to `session` as pending.
    ///
    /// Nothing is written until the next flush or commit; generated keys stay unset
    /// until then.
    ///
    /// # Errors
    /// `ValidationError` for unknown fields or values that do not fit their column,
    /// `SessionClosed` when the scope has ended.
    fn create(session: &Session, data: &FieldMap) -> Result<Instance<Self::Entity>> {
        let resolved = fields::resolve::<Self::Entity>(data, true)?;
        let mut active = <<Self::Entity as EntityTrait>::ActiveModel as ActiveModelBehavior>::new();
        fields::assign::<Self::Entity>(&mut active, resolved)?;
        let obj = Instance::new(active);
        session.add(&obj)?;
        Ok(obj)
    }
}

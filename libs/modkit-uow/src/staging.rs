//! Staged writes, applied in FIFO order on flush.

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, DatabaseTransaction, DbErr, EntityTrait,
    IntoActiveModel,
};

use crate::fields;
use crate::instance::{Instance, InstanceState, Tracked};

/// One deferred write against the session's transaction.
#[async_trait]
pub(crate) trait PendingOp: Send + Sync {
    async fn apply(&self, txn: &DatabaseTransaction) -> Result<(), DbErr>;

    /// Entity table name, for logs.
    fn entity(&self) -> String;

    fn kind(&self) -> OpKind;

    /// The instance the write belongs to.
    fn target(&self) -> Arc<dyn Tracked>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OpKind {
    Insert,
    Update,
    Delete,
}

pub(crate) struct Pending<E: EntityTrait> {
    kind: OpKind,
    generation: u64,
    instance: Instance<E>,
}

impl<E> Pending<E>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<E::ActiveModel> + Send + Sync,
    E::ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send + Sync,
{
    pub(crate) fn new(kind: OpKind, instance: &Instance<E>) -> Box<Self> {
        let generation = instance.lock().generation;
        Box::new(Self {
            kind,
            generation,
            instance: instance.clone(),
        })
    }

    async fn insert(&self, txn: &DatabaseTransaction) -> Result<(), DbErr> {
        let active = {
            let data = self.instance.lock();
            if data.status != InstanceState::Pending || data.generation != self.generation {
                return Ok(());
            }
            data.active.clone()
        };
        let model = active.insert(txn).await?;
        self.instance.lock().persisted(model);
        Ok(())
    }

    async fn update(&self, txn: &DatabaseTransaction) -> Result<(), DbErr> {
        let active = {
            let data = self.instance.lock();
            if data.status != InstanceState::Persistent || !data.active.is_changed() {
                return Ok(());
            }
            data.active.clone()
        };
        let model = active.update(txn).await?;
        self.instance.lock().persisted(model);
        Ok(())
    }

    async fn delete(&self, txn: &DatabaseTransaction) -> Result<(), DbErr> {
        let active = {
            let data = self.instance.lock();
            if data.status != InstanceState::Deleted || !data.in_db {
                return Ok(());
            }
            data.active.clone()
        };
        active.delete(txn).await?;
        self.instance.lock().in_db = false;
        Ok(())
    }
}

#[async_trait]
impl<E> PendingOp for Pending<E>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<E::ActiveModel> + Send + Sync,
    E::ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send + Sync,
{
    async fn apply(&self, txn: &DatabaseTransaction) -> Result<(), DbErr> {
        match self.kind {
            OpKind::Insert => self.insert(txn).await,
            OpKind::Update => self.update(txn).await,
            OpKind::Delete => self.delete(txn).await,
        }
    }

    fn entity(&self) -> String {
        fields::entity_name::<E>()
    }

    fn kind(&self) -> OpKind {
        self.kind
    }

    fn target(&self) -> Arc<dyn Tracked> {
        self.instance.tracked()
    }
}

//! The unit-of-work session exposed inside a scope.
//!
//! A [`Session`] owns the scope's `DatabaseTransaction` and the staging state: a FIFO
//! queue of deferred writes and the list of instances it tracks. Repository
//! operations receive `&Session`; only the owning [`UnitOfWork`](crate::UnitOfWork)
//! can end it.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, DatabaseTransaction, EntityTrait, IntoActiveModel,
};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{RepoError, Result, TransactionError, TxStage};
use crate::fields;
use crate::instance::{self, IdentityKey, Instance, InstanceCell, InstanceState, Tracked};
use crate::staging::{OpKind, Pending, PendingOp};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of a scope. No transition leads back to `Open`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    Open,
    Committed,
    RolledBack,
}

/// State shared between a session and the instances bound to it.
pub(crate) struct SessionShared {
    id: u64,
    state: Mutex<SharedState>,
}

struct SharedState {
    status: ScopeState,
    failed: bool,
    pending: VecDeque<Box<dyn PendingOp>>,
    tracked: Vec<Arc<dyn Tracked>>,
    /// Row-backed tracked instances by entity and primary key.
    identities: HashMap<IdentityKey, Arc<dyn Tracked>>,
}

impl SessionShared {
    /// Make a row-backed instance findable by primary key.
    fn index(&self, entry: Arc<dyn Tracked>) {
        // Instance locks never nest inside the session lock.
        if let Some(key) = entry.identity_key() {
            self.state.lock().identities.insert(key, entry);
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_open(&self) -> bool {
        self.state.lock().status == ScopeState::Open
    }

    /// Queue a write behind everything already staged.
    pub(crate) fn stage(&self, op: Box<dyn PendingOp>) {
        debug!(
            session = self.id,
            entity = %op.entity(),
            op = ?op.kind(),
            "staged write"
        );
        self.state.lock().pending.push_back(op);
    }
}

/// Unit-of-work handle for one open transaction.
pub struct Session {
    txn: Option<DatabaseTransaction>,
    shared: Arc<SessionShared>,
    config: SessionConfig,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("Session")
            .field("id", &self.shared.id)
            .field("status", &state.status)
            .field("failed", &state.failed)
            .field("pending", &state.pending.len())
            .field("tracked", &state.tracked.len())
            .finish_non_exhaustive()
    }
}

impl Session {
    pub(crate) fn new(txn: DatabaseTransaction, config: SessionConfig) -> Self {
        Self {
            txn: Some(txn),
            shared: Arc::new(SessionShared {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                state: Mutex::new(SharedState {
                    status: ScopeState::Open,
                    failed: false,
                    pending: VecDeque::new(),
                    tracked: Vec::new(),
                    identities: HashMap::new(),
                }),
            }),
            config,
        }
    }

    /// Process-unique session id, as used in log fields and errors.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    #[must_use]
    pub fn state(&self) -> ScopeState {
        self.shared.state.lock().status
    }

    /// `true` once a flush has failed; only a rollback is possible from here.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.shared.state.lock().failed
    }

    /// Number of writes staged and not yet flushed.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.state.lock().pending.len()
    }

    /// Number of instances bound to this session.
    #[must_use]
    pub fn tracked_count(&self) -> usize {
        self.shared.state.lock().tracked.len()
    }

    /// The open transaction.
    ///
    /// Use it for raw statements that must run in the same scope as the staged writes.
    ///
    /// # Errors
    /// `SessionClosed` once the scope has ended, `SessionFailed` after a failed flush.
    pub fn transaction(&self) -> Result<&DatabaseTransaction> {
        self.ensure_usable()?;
        self.txn.as_ref().ok_or(RepoError::SessionClosed {
            session: self.shared.id,
        })
    }

    fn ensure_usable(&self) -> Result<()> {
        let state = self.shared.state.lock();
        if state.status != ScopeState::Open {
            return Err(RepoError::SessionClosed {
                session: self.shared.id,
            });
        }
        if state.failed {
            return Err(RepoError::SessionFailed {
                session: self.shared.id,
            });
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.shared.is_open() {
            Ok(())
        } else {
            Err(RepoError::SessionClosed {
                session: self.shared.id,
            })
        }
    }

    /// Send every staged write to the database, in staging order.
    ///
    /// The transaction stays open. Inserted instances receive their generated keys.
    ///
    /// # Errors
    /// `RepoError::Transaction` with stage `Flush` when the database rejects a write;
    /// the session is then marked failed.
    pub async fn flush(&self) -> Result<()> {
        let txn = self.transaction()?;
        let mut applied = 0usize;
        loop {
            let op = self.shared.state.lock().pending.pop_front();
            let Some(op) = op else { break };
            if let Err(e) = op.apply(txn).await {
                let err = TransactionError::new(TxStage::Flush, e);
                self.shared.state.lock().failed = true;
                warn!(
                    session = self.shared.id,
                    entity = %op.entity(),
                    op = ?op.kind(),
                    kind = %err.kind,
                    "flush failed: {}", err.source
                );
                return Err(err.into());
            }
            if op.kind() == OpKind::Insert {
                self.shared.index(op.target());
            }
            applied += 1;
        }
        if applied > 0 {
            debug!(session = self.shared.id, applied, "flushed staged writes");
        }
        Ok(())
    }

    /// The transaction to read from, flushing first when autoflush is on.
    pub(crate) async fn reader(&self) -> Result<&DatabaseTransaction> {
        if self.config.autoflush && self.pending_count() > 0 {
            self.flush().await?;
        }
        self.transaction()
    }

    /// Bind `obj` to this session.
    ///
    /// A transient instance becomes pending with its insert staged; a detached one is
    /// re-attached as persistent; an instance already bound here is left alone.
    ///
    /// # Errors
    /// `ForeignSession` if `obj` is bound to another open session, `SessionClosed` if
    /// this session has ended.
    pub fn add<E>(&self, obj: &Instance<E>) -> Result<()>
    where
        E: EntityTrait,
        E::Model: IntoActiveModel<E::ActiveModel> + Send + Sync,
        E::ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send + Sync,
    {
        self.ensure_open()?;
        if self.claim(obj)? {
            return Ok(());
        }
        match obj.state() {
            InstanceState::Transient | InstanceState::Pending => self.stage_insert(obj),
            InstanceState::Persistent | InstanceState::Detached => {
                self.track(obj, InstanceState::Persistent);
            }
            InstanceState::Deleted => {
                return Err(RepoError::DeletedInstance {
                    entity: fields::entity_name::<E>(),
                });
            }
        }
        Ok(())
    }

    /// Stage the insert of a transient instance.
    fn stage_insert<E>(&self, obj: &Instance<E>)
    where
        E: EntityTrait,
        E::Model: IntoActiveModel<E::ActiveModel> + Send + Sync,
        E::ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send + Sync,
    {
        self.track(obj, InstanceState::Pending);
        self.shared.stage(Pending::new(OpKind::Insert, obj));
    }

    /// `Ok(true)` when `obj` is already bound here, `ForeignSession` when it is bound
    /// to another open session.
    pub(crate) fn claim<E>(&self, obj: &Instance<E>) -> Result<bool>
    where
        E: EntityTrait,
        E::Model: IntoActiveModel<E::ActiveModel> + Send + Sync,
        E::ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send + Sync,
    {
        match obj.owner() {
            Some(owner) if Arc::ptr_eq(&owner, &self.shared) => Ok(true),
            Some(_) => Err(RepoError::ForeignSession {
                entity: fields::entity_name::<E>(),
            }),
            None => Ok(false),
        }
    }

    fn track<E>(&self, obj: &Instance<E>, status: InstanceState)
    where
        E: EntityTrait,
        E::Model: IntoActiveModel<E::ActiveModel> + Send + Sync,
        E::ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send + Sync,
    {
        obj.attach(&self.shared, status);
        let entry = obj.tracked();
        self.shared.state.lock().tracked.push(Arc::clone(&entry));
        self.shared.index(entry);
    }

    pub(crate) fn shared(&self) -> &Arc<SessionShared> {
        &self.shared
    }

    /// Map a loaded row to its tracked instance, tracking a new one if needed.
    pub(crate) fn identity<E>(&self, model: E::Model) -> Instance<E>
    where
        E: EntityTrait,
        E::Model: IntoActiveModel<E::ActiveModel> + Send + Sync,
        E::ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send + Sync,
    {
        let key = instance::row_key::<E>(&model);
        let entry = self.shared.state.lock().identities.get(&key).cloned();
        if let Some(Ok(cell)) = entry.map(|e| e.into_any().downcast::<InstanceCell<E>>()) {
            let existing = Instance::from_cell(cell);
            let hit = {
                let data = existing.lock();
                data.status != InstanceState::Transient && instance::same_row(&model, &data)
            };
            if hit && self.claim(&existing).unwrap_or(false) {
                return existing;
            }
        }
        let obj = Instance::loaded(model);
        self.track(&obj, InstanceState::Persistent);
        obj
    }

    /// Take the transaction out for commit or rollback.
    pub(crate) fn take_txn(&mut self) -> Result<DatabaseTransaction> {
        self.txn.take().ok_or(RepoError::SessionClosed {
            session: self.shared.id,
        })
    }

    /// End the session: drop staged writes and settle every tracked instance.
    pub(crate) fn close(&mut self, outcome: ScopeState) {
        let (tracked, dropped) = {
            let mut state = self.shared.state.lock();
            if state.status != ScopeState::Open {
                return;
            }
            state.status = outcome;
            let dropped = state.pending.len();
            state.pending.clear();
            state.identities.clear();
            (std::mem::take(&mut state.tracked), dropped)
        };
        let owner: Weak<SessionShared> = Arc::downgrade(&self.shared);
        for entry in &tracked {
            entry.close(&owner, outcome);
        }
        debug!(
            session = self.shared.id,
            outcome = ?outcome,
            detached = tracked.len(),
            dropped,
            "session closed"
        );
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.state() == ScopeState::Open {
            warn!(
                session = self.shared.id,
                "scope dropped without exit; rolling back"
            );
            self.close(ScopeState::RolledBack);
        }
    }
}

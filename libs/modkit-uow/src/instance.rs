//! Tracked entity instances.
//!
//! An [`Instance`] is a shared handle to the in-memory state of one row (or
//! row-to-be). Sessions hold the same handle in their identity list, so an update
//! made through any clone is what the next flush writes.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use sea_orm::sea_query::Value;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ActiveValue, EntityTrait, IntoActiveModel,
    Iterable, ModelTrait, PrimaryKeyToColumn, PrimaryKeyTrait,
};

use crate::fields;
use crate::session::{ScopeState, SessionShared};

/// Object state of a tracked instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Never added to a session.
    Transient,
    /// Added to a session; the insert is staged.
    Pending,
    /// Backed by a row and attached to an open session.
    Persistent,
    /// Delete staged or flushed in the owning session.
    Deleted,
    /// Backed by a row when its session closed. Readable, not writable until re-added.
    Detached,
}

/// Shared handle to one tracked entity.
///
/// Cloning is cheap and every clone observes the same state.
pub struct Instance<E: EntityTrait> {
    cell: Arc<InstanceCell<E>>,
}

impl<E: EntityTrait> Clone for Instance<E> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

pub(crate) struct InstanceCell<E: EntityTrait> {
    data: Mutex<InstanceData<E>>,
}

pub(crate) struct InstanceData<E: EntityTrait> {
    pub(crate) active: E::ActiveModel,
    pub(crate) model: Option<E::Model>,
    pub(crate) status: InstanceState,
    pub(crate) in_db: bool,
    /// Bumped whenever a staged insert is cancelled; stale inserts compare against it.
    pub(crate) generation: u64,
    in_db_at_attach: bool,
    /// Row snapshot when bound; a rollback returns the field state to it.
    model_at_attach: Option<E::Model>,
    session: Option<Weak<SessionShared>>,
}

/// Entity type plus the rendered primary key values.
pub(crate) type IdentityKey = (TypeId, String);

fn key_of<E: EntityTrait>(pk: &[Value]) -> IdentityKey {
    (TypeId::of::<E>(), format!("{pk:?}"))
}

/// Identity-map key of a loaded row.
pub(crate) fn row_key<E: EntityTrait>(model: &E::Model) -> IdentityKey {
    let pk: Vec<Value> = E::PrimaryKey::iter()
        .map(|pk| model.get(pk.into_column()))
        .collect();
    key_of::<E>(&pk)
}

/// Type-erased view a session keeps of every instance it tracks.
pub(crate) trait Tracked: Send + Sync {
    /// Settle the instance after its session `owner` ended with `outcome`.
    fn close(&self, owner: &Weak<SessionShared>, outcome: ScopeState);

    /// Identity-map key, once the instance is backed by a row.
    fn identity_key(&self) -> Option<IdentityKey>;

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<E> InstanceData<E>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<E::ActiveModel> + Send + Sync,
    E::ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send + Sync,
{
    /// Record a row returned by the database as the current state.
    pub(crate) fn persisted(&mut self, model: E::Model) {
        self.active = model.clone().into_active_model();
        self.model = Some(model);
        self.status = InstanceState::Persistent;
        self.in_db = true;
    }

    /// Primary key values from the current field state, if every part is known.
    pub(crate) fn primary_key(&self) -> Option<Vec<Value>> {
        E::PrimaryKey::iter()
            .map(|pk| self.active.get(pk.into_column()).into_value())
            .collect()
    }

    /// Turn every loaded value back into an assignment so the row can be inserted
    /// again. Generated keys are cleared.
    fn make_insertable(&mut self) {
        let auto = <E::PrimaryKey as PrimaryKeyTrait>::auto_increment();
        for column in E::Column::iter() {
            if auto && fields::is_primary_key::<E>(column) {
                self.active.not_set(column);
            } else if let ActiveValue::Unchanged(value) = self.active.get(column) {
                self.active.set(column, value);
            }
        }
        self.model = None;
    }

    fn owned_by(&self, owner: &Weak<SessionShared>) -> bool {
        self.session.as_ref().is_some_and(|s| Weak::ptr_eq(s, owner))
    }
}

impl<E> Tracked for InstanceCell<E>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<E::ActiveModel> + Send + Sync,
    E::ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send + Sync,
{
    fn close(&self, owner: &Weak<SessionShared>, outcome: ScopeState) {
        let mut data = self.data.lock();
        if !data.owned_by(owner) {
            return;
        }
        data.session = None;
        match outcome {
            ScopeState::Committed => {
                data.model_at_attach = None;
                if data.status == InstanceState::Pending {
                    // Commit flushes first; a pending instance here never reached the row.
                    data.status = InstanceState::Transient;
                } else {
                    data.status = InstanceState::Detached;
                }
            }
            ScopeState::RolledBack | ScopeState::Open => {
                data.in_db = data.in_db_at_attach;
                if data.in_db {
                    data.status = InstanceState::Detached;
                    if let Some(model) = data.model_at_attach.take() {
                        data.active = model.clone().into_active_model();
                        data.model = Some(model);
                    }
                } else {
                    data.status = InstanceState::Transient;
                    data.make_insertable();
                }
            }
        }
    }

    fn identity_key(&self) -> Option<IdentityKey> {
        let data = self.data.lock();
        if !data.in_db {
            return None;
        }
        data.primary_key().map(|pk| key_of::<E>(&pk))
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<E> Instance<E>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<E::ActiveModel> + Send + Sync,
    E::ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send + Sync,
{
    /// Wrap an active model as a new transient instance.
    ///
    /// Hand it to [`Session::add`](crate::Session::add) to stage its insert.
    #[must_use]
    pub fn new(active: E::ActiveModel) -> Self {
        Self::from_data(InstanceData {
            active,
            model: None,
            status: InstanceState::Transient,
            in_db: false,
            generation: 0,
            in_db_at_attach: false,
            model_at_attach: None,
            session: None,
        })
    }

    /// A row freshly loaded from the database; the caller attaches it.
    pub(crate) fn loaded(model: E::Model) -> Self {
        Self::from_data(InstanceData {
            active: model.clone().into_active_model(),
            model: Some(model),
            status: InstanceState::Persistent,
            in_db: true,
            generation: 0,
            in_db_at_attach: true,
            model_at_attach: None,
            session: None,
        })
    }

    fn from_data(data: InstanceData<E>) -> Self {
        Self {
            cell: Arc::new(InstanceCell {
                data: Mutex::new(data),
            }),
        }
    }

    pub(crate) fn from_cell(cell: Arc<InstanceCell<E>>) -> Self {
        Self { cell }
    }

    pub(crate) fn tracked(&self) -> Arc<dyn Tracked> {
        self.cell.clone()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, InstanceData<E>> {
        self.cell.data.lock()
    }

    /// Bind to `session`, remembering whether the row existed at that point.
    pub(crate) fn attach(&self, session: &Arc<SessionShared>, status: InstanceState) {
        let mut data = self.lock();
        data.session = Some(Arc::downgrade(session));
        data.in_db_at_attach = data.in_db;
        data.model_at_attach = if data.in_db { data.model.clone() } else { None };
        data.status = status;
    }

    /// Unbind without waiting for the session to close (cancelled insert).
    pub(crate) fn detach_transient(&self) {
        let mut data = self.lock();
        data.session = None;
        data.status = InstanceState::Transient;
        data.generation += 1;
    }

    /// The open session this instance is bound to, if any.
    pub(crate) fn owner(&self) -> Option<Arc<SessionShared>> {
        let weak = self.lock().session.clone()?;
        weak.upgrade().filter(|s| s.is_open())
    }

    #[must_use]
    pub fn state(&self) -> InstanceState {
        self.lock().status
    }

    /// Current value of a column, including unflushed assignments.
    ///
    /// `None` when the column was never assigned (e.g. a generated key before flush).
    #[must_use]
    pub fn get(&self, column: E::Column) -> Option<Value> {
        self.lock().active.get(column).into_value()
    }

    /// Like [`Instance::get`], looking the column up by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<Value> {
        let column = fields::find_column::<E>(name)?;
        self.get(column)
    }

    /// Snapshot of the row as last read from or written to the database.
    #[must_use]
    pub fn model(&self) -> Option<E::Model> {
        self.lock().model.clone()
    }

    /// Current field state.
    #[must_use]
    pub fn active_model(&self) -> E::ActiveModel {
        self.lock().active.clone()
    }

    /// `true` while bound to an open session.
    #[must_use]
    pub fn is_attached(&self) -> bool {
        self.owner().is_some()
    }

    /// `true` when there are assignments the database has not seen yet.
    #[must_use]
    pub fn is_modified(&self) -> bool {
        let data = self.lock();
        data.status == InstanceState::Pending || data.active.is_changed()
    }

    /// Whether both handles point at the same tracked instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

/// Compare a loaded row against a tracked instance by primary key.
pub(crate) fn same_row<E>(model: &E::Model, data: &InstanceData<E>) -> bool
where
    E: EntityTrait,
    E::Model: IntoActiveModel<E::ActiveModel> + Send + Sync,
    E::ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send + Sync,
{
    let Some(key) = data.primary_key() else {
        return false;
    };
    E::PrimaryKey::iter()
        .map(|pk| model.get(pk.into_column()))
        .eq(key)
}

impl<E: EntityTrait> fmt::Debug for Instance<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let data = self.cell.data.lock();
        f.debug_struct("Instance")
            .field("entity", &E::default().table_name())
            .field("state", &data.status)
            .field("active", &data.active)
            .finish_non_exhaustive()
    }
}

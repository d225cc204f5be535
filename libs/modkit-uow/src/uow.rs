//! Transaction scope: commit on success, roll back on failure.

use tracing::{debug, warn};

use crate::error::{RepoError, Result, TransactionError, TxStage};
use crate::session::{ScopeState, Session};

/// One transaction scope.
///
/// Obtained from [`SessionFactory::begin`](crate::SessionFactory::begin). The scope
/// ends through [`commit`](Self::commit), [`rollback`](Self::rollback) or
/// [`exit`](Self::exit), all of which consume it. Dropping an open scope rolls it back.
///
/// ```ignore
/// let uow = factory.begin().await?;
/// let outcome = async {
///     let user = UserRepository::create(uow.session(), &data)?;
///     uow.flush().await?;
///     Ok::<_, RepoError>(user)
/// }
/// .await;
/// let user = uow.exit(outcome).await?;
/// ```
#[derive(Debug)]
pub struct UnitOfWork {
    session: Session,
}

impl UnitOfWork {
    pub(crate) fn new(session: Session) -> Self {
        Self { session }
    }

    /// The session to pass into repository operations.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn state(&self) -> ScopeState {
        self.session.state()
    }

    /// Send staged writes without ending the transaction.
    ///
    /// # Errors
    /// See [`Session::flush`].
    pub async fn flush(&self) -> Result<()> {
        self.session.flush().await
    }

    /// Flush and commit.
    ///
    /// A failure while flushing or committing rolls the transaction back; the error
    /// that caused it is returned. After a flush failure the rollback is awaited. After
    /// a commit failure it is queued on the connection and runs before the connection
    /// serves anything else.
    ///
    /// # Errors
    /// `SessionFailed` if an earlier flush failed, `RepoError::Transaction` when the
    /// flush or the commit is rejected.
    pub async fn commit(self) -> Result<()> {
        let mut session = self.session;
        if let Err(e) = session.flush().await {
            Self::abort(&mut session).await;
            return Err(e);
        }
        let id = session.id();
        let txn = session.take_txn()?;
        match txn.commit().await {
            Ok(()) => {
                session.close(ScopeState::Committed);
                debug!(session = id, "scope committed");
                Ok(())
            }
            Err(e) => {
                // `commit` consumed the transaction while it is still open on the server
                // (SQLite keeps it open after a deferred-constraint failure). Its drop only
                // queues the rollback; sqlx runs it before the connection is used again,
                // so it is not awaited here.
                session.close(ScopeState::RolledBack);
                let err = TransactionError::new(TxStage::Commit, e);
                warn!(
                    session = id,
                    kind = %err.kind,
                    "commit failed, rollback deferred to connection release: {}", err.source
                );
                Err(err.into())
            }
        }
    }

    /// Discard every staged and flushed write.
    ///
    /// # Errors
    /// `RepoError::Transaction` with stage `Rollback` when the database rejects the
    /// rollback. The session is closed either way.
    pub async fn rollback(self) -> Result<()> {
        let mut session = self.session;
        let id = session.id();
        let txn = session.take_txn()?;
        let result = txn.rollback().await;
        session.close(ScopeState::RolledBack);
        match result {
            Ok(()) => {
                debug!(session = id, "scope rolled back");
                Ok(())
            }
            Err(e) => Err(TransactionError::new(TxStage::Rollback, e).into()),
        }
    }

    /// End the scope according to the outcome of the work done in it.
    ///
    /// `Ok` commits, `Err` rolls back and hands the original error back. A failed
    /// rollback is logged and does not replace that error.
    ///
    /// # Errors
    /// The block's own error, or the commit failure converted into `E`.
    pub async fn exit<T, E>(self, outcome: std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<RepoError>,
    {
        match outcome {
            Ok(value) => {
                self.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = self.rollback().await {
                    warn!(error = %rb, "rollback after failed scope did not complete");
                }
                Err(e)
            }
        }
    }

    async fn abort(session: &mut Session) {
        let id = session.id();
        let Ok(txn) = session.take_txn() else {
            return;
        };
        if let Err(e) = txn.rollback().await {
            warn!(session = id, error = %e, "rollback after failed flush did not complete");
        }
        session.close(ScopeState::RolledBack);
        debug!(session = id, "scope rolled back after flush failure");
    }
}

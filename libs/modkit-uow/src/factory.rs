//! Session factory: the pooled connection every scope begins from.

use std::future::Future;
use std::pin::Pin;

use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbBackend, TransactionTrait,
};
use tracing::debug;

use crate::config::{SessionConfig, UowConfig};
use crate::error::{RepoError, Result, TransactionError, TxStage};
use crate::session::Session;
use crate::uow::UnitOfWork;

/// Opens transaction scopes over one connection pool.
///
/// Cheap to clone; clones share the pool.
#[derive(Clone, Debug)]
pub struct SessionFactory {
    conn: DatabaseConnection,
    session: SessionConfig,
}

impl SessionFactory {
    /// Connect a pool as described by `cfg`.
    ///
    /// In-memory `SQLite` databases live inside a single connection, so the pool is
    /// pinned to exactly one for them.
    ///
    /// # Errors
    /// `RepoError::Connect` when the pool cannot be established.
    pub async fn connect(cfg: &UowConfig) -> Result<Self> {
        let mut opts = ConnectOptions::new(cfg.dsn.clone());
        if is_memory_dsn(&cfg.dsn) {
            opts.max_connections(1).min_connections(1);
        } else {
            if let Some(n) = cfg.pool.max_conns {
                opts.max_connections(n);
            }
            if let Some(n) = cfg.pool.min_conns {
                opts.min_connections(n);
            }
        }
        if let Some(t) = cfg.pool.acquire_timeout {
            opts.acquire_timeout(t);
        }
        if let Some(t) = cfg.pool.idle_timeout {
            opts.idle_timeout(t);
        }
        if let Some(t) = cfg.pool.max_lifetime {
            opts.max_lifetime(t);
        }
        opts.sqlx_logging(cfg.sqlx_logging);

        let conn = Database::connect(opts).await.map_err(RepoError::Connect)?;
        debug!(
            backend = ?conn.get_database_backend(),
            autoflush = cfg.session.autoflush,
            "session factory connected"
        );
        Ok(Self::from_connection(conn, cfg.session))
    }

    /// Wrap an existing connection.
    #[must_use]
    pub fn from_connection(conn: DatabaseConnection, session: SessionConfig) -> Self {
        Self { conn, session }
    }

    /// The underlying pool, e.g. for schema setup outside any scope.
    #[must_use]
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    #[must_use]
    pub fn db_engine(&self) -> DbBackend {
        self.conn.get_database_backend()
    }

    #[must_use]
    pub fn session_config(&self) -> SessionConfig {
        self.session
    }

    /// Open a scope: begin a transaction on a pooled connection.
    ///
    /// # Errors
    /// `RepoError::Transaction` with stage `Begin` when no transaction can be started.
    pub async fn begin(&self) -> Result<UnitOfWork> {
        let txn = self
            .conn
            .begin()
            .await
            .map_err(|e| TransactionError::new(TxStage::Begin, e))?;
        let session = Session::new(txn, self.session);
        debug!(session = session.id(), "scope opened");
        Ok(UnitOfWork::new(session))
    }

    /// Run `f` inside a scope; `Ok` commits, `Err` rolls back.
    ///
    /// ```ignore
    /// let id = factory
    ///     .scope(|session| {
    ///         Box::pin(async move {
    ///             let user = UserRepository::create(session, &data)?;
    ///             session.flush().await?;
    ///             Ok::<_, RepoError>(user.get(user::Column::Id))
    ///         })
    ///     })
    ///     .await?;
    /// ```
    ///
    /// # Errors
    /// The closure's error, or a begin/commit failure converted into `E`.
    pub async fn scope<F, T, E>(&self, f: F) -> std::result::Result<T, E>
    where
        F: for<'a> FnOnce(
                &'a Session,
            )
                -> Pin<Box<dyn Future<Output = std::result::Result<T, E>> + Send + 'a>>
            + Send,
        T: Send,
        E: From<RepoError> + Send,
    {
        let uow = self.begin().await?;
        let outcome = f(uow.session()).await;
        uow.exit(outcome).await
    }
}

/// `true` for DSNs that name a private in-memory `SQLite` database.
fn is_memory_dsn(dsn: &str) -> bool {
    let dsn = dsn.trim();
    dsn.starts_with("sqlite::memory:") || (dsn.starts_with("sqlite:") && dsn.contains("mode=memory"))
}

//! Error taxonomy for scopes, sessions and repository operations.
//!
//! Every failure surfaces to the caller as a [`RepoError`]. Database errors raised
//! while writing (flush, commit) are classified into a [`TransactionError`] so that
//! callers can react to constraint violations without parsing driver messages.

use std::fmt;

use sea_orm::{DbErr, SqlErr};
use thiserror::Error;

/// Library-local result type.
pub type Result<T> = std::result::Result<T, RepoError>;

/// Typed error for every operation of this crate.
#[derive(Debug, Error)]
pub enum RepoError {
    /// A filter, data or ordering mapping does not fit the entity.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The connection pool could not be opened.
    #[error("failed to connect to the database: {0}")]
    Connect(#[source] DbErr),

    /// A single-row read matched nothing.
    #[error("model '{entity}': no row matches the given filters")]
    NotFound { entity: String },

    /// A single-row read matched more than one row.
    #[error("model '{entity}': expected exactly one row, found several")]
    MultipleResults { entity: String },

    /// The instance is not bound to an open session.
    #[error("model '{entity}': instance is not attached to an active session")]
    DetachedInstance { entity: String },

    /// The instance was deleted in its session and can no longer be changed.
    #[error("model '{entity}': instance has been deleted in its session")]
    DeletedInstance { entity: String },

    /// The instance belongs to a different open session.
    #[error("model '{entity}': instance is attached to another open session")]
    ForeignSession { entity: String },

    /// The database rejected a read.
    #[error("model '{entity}': query execution error: {source}")]
    QueryExecution {
        entity: String,
        #[source]
        source: DbErr,
    },

    /// Begin, flush, commit or rollback failed.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// An earlier flush failed; the scope can only be rolled back.
    #[error("session {session} has a failed flush and must be rolled back")]
    SessionFailed { session: u64 },

    /// The session has already been committed or rolled back.
    #[error("session {session} is closed")]
    SessionClosed { session: u64 },
}

impl RepoError {
    /// `true` for the validation family (unknown field, bad value, ...).
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// `true` for `NotFound`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Classification of a transaction failure, if this is one.
    #[must_use]
    pub fn tx_kind(&self) -> Option<TxErrorKind> {
        match self {
            Self::Transaction(e) => Some(e.kind),
            _ => None,
        }
    }

    pub(crate) fn query(entity: &str, source: DbErr) -> Self {
        Self::QueryExecution {
            entity: entity.to_owned(),
            source,
        }
    }
}

/// Mapping did not match the entity's declared columns.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("model '{entity}': field '{field}' not found")]
    UnknownField { entity: String, field: String },

    #[error("model '{entity}': invalid value for field '{field}': {reason}")]
    InvalidValue {
        entity: String,
        field: String,
        reason: String,
    },

    #[error("model '{entity}': primary key field '{field}' cannot be updated")]
    ImmutablePrimaryKey { entity: String, field: String },

    #[error("model '{entity}': order_by field '{field}' does not exist")]
    UnknownOrderField { entity: String, field: String },

    #[error("model '{entity}': invalid pagination parameter '{param}': {reason}")]
    Pagination {
        entity: String,
        param: &'static str,
        reason: String,
    },
}

/// Phase of the transaction lifecycle in which a write failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStage {
    Begin,
    Flush,
    Commit,
    Rollback,
}

impl fmt::Display for TxStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Begin => "begin",
            Self::Flush => "flush",
            Self::Commit => "commit",
            Self::Rollback => "rollback",
        })
    }
}

/// What kind of database failure a write ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxErrorKind {
    UniqueViolation,
    ForeignKeyViolation,
    /// Wrong type, length or encoding of a value.
    Data,
    Other,
}

impl fmt::Display for TxErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::UniqueViolation => "unique constraint violation",
            Self::ForeignKeyViolation => "foreign key constraint violation",
            Self::Data => "invalid data",
            Self::Other => "transaction failed",
        })
    }
}

/// Classified database failure raised while writing.
#[derive(Debug, Error)]
#[error("{kind} during {stage}: {source}")]
pub struct TransactionError {
    pub stage: TxStage,
    pub kind: TxErrorKind,
    #[source]
    pub source: DbErr,
}

impl TransactionError {
    #[must_use]
    pub fn new(stage: TxStage, source: DbErr) -> Self {
        Self {
            stage,
            kind: classify(&source),
            source,
        }
    }
}

/// Classify a `SeaORM` error.
///
/// Driver-reported SQL errors win; otherwise fall back to the message text, which is
/// what drivers without structured codes leave us with.
#[must_use]
pub fn classify(err: &DbErr) -> TxErrorKind {
    match err.sql_err() {
        Some(SqlErr::UniqueConstraintViolation(_)) => return TxErrorKind::UniqueViolation,
        Some(SqlErr::ForeignKeyConstraintViolation(_)) => {
            return TxErrorKind::ForeignKeyViolation;
        }
        _ => {}
    }

    if matches!(err, DbErr::Type(_) | DbErr::Json(_) | DbErr::TryIntoErr { .. }) {
        return TxErrorKind::Data;
    }

    let msg = err.to_string().to_lowercase();
    if msg.contains("unique") {
        TxErrorKind::UniqueViolation
    } else if msg.contains("foreign key") {
        TxErrorKind::ForeignKeyViolation
    } else {
        TxErrorKind::Other
    }
}

// Storage error taxonomy

use iptv_core::error::AppError;
use std::fmt;
use thiserror::Error;

/// Which constraint rejected a write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    Unique,
    ForeignKey,
    Other,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstraintKind::Unique => write!(f, "unique"),
            ConstraintKind::ForeignKey => write!(f, "foreign key"),
            ConstraintKind::Other => write!(f, "check"),
        }
    }
}

/// Errors surfaced by the pool and storage facade
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error [{code}]: {message}")]
    Database { code: String, message: String },

    #[error("{kind} constraint violation: {message}")]
    Constraint { kind: ConstraintKind, message: String },

    #[error("Database locked (SQLITE_BUSY): {0}")]
    Busy(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Connection pool is closed")]
    PoolClosed,

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Row decode failed: {0}")]
    Decode(String),
}

impl StorageError {
    pub fn is_constraint(&self, kind: ConstraintKind) -> bool {
        matches!(self, StorageError::Constraint { kind: k, .. } if *k == kind)
    }
}

/// Classify sqlx errors by SQLite result code
///
/// See <https://www.sqlite.org/rescode.html>
pub(crate) fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    match &err {
        sqlx::Error::Database(db_err) => {
            let message = db_err.message().to_string();
            let code = db_err
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());

            match code.as_str() {
                // SQLITE_CONSTRAINT_UNIQUE / SQLITE_CONSTRAINT_PRIMARYKEY
                "2067" | "1555" => StorageError::Constraint {
                    kind: ConstraintKind::Unique,
                    message,
                },
                // SQLITE_CONSTRAINT_FOREIGNKEY / SQLITE_CONSTRAINT_TRIGGER on FK
                "787" | "3850" => StorageError::Constraint {
                    kind: ConstraintKind::ForeignKey,
                    message,
                },
                // SQLITE_CONSTRAINT and its NOT NULL / CHECK variants
                "19" | "1299" | "275" => StorageError::Constraint {
                    kind: ConstraintKind::Other,
                    message,
                },
                // SQLITE_BUSY / SQLITE_LOCKED
                "5" | "6" => StorageError::Busy(message),
                _ => StorageError::Database { code, message },
            }
        }
        sqlx::Error::PoolClosed => StorageError::PoolClosed,
        sqlx::Error::Io(e) => StorageError::Connect(e.to_string()),
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::ColumnNotFound(_) | sqlx::Error::Decode(_) => {
            StorageError::Decode(err.to_string())
        }
        _ => StorageError::Database {
            code: "sqlx".to_string(),
            message: err.to_string(),
        },
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        map_sqlx_error(err)
    }
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        AppError::Storage(err.to_string())
    }
}

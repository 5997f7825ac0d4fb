//! Typed errors at the database and file boundary

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::ingestion::types::FileKind;

#[derive(Debug, Error)]
pub enum LoadError {
    /// The transport went away; the session must reconnect before retrying.
    #[error("database connection dropped: {0}")]
    ConnectionDropped(#[source] sqlx::Error),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("CSV error in {path:?}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("no {kind} files found in {dir:?}")]
    NoInputFiles { kind: FileKind, dir: PathBuf },

    #[error("configuration error: {0}")]
    Config(String),
}

impl LoadError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        LoadError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn csv(path: impl Into<PathBuf>, source: csv::Error) -> Self {
        LoadError::Csv {
            path: path.into(),
            source,
        }
    }

    pub fn is_connection_dropped(&self) -> bool {
        matches!(self, LoadError::ConnectionDropped(_))
    }
}

impl From<sqlx::Error> for LoadError {
    fn from(err: sqlx::Error) -> Self {
        if is_transport_failure(&err) {
            LoadError::ConnectionDropped(err)
        } else {
            LoadError::Database(err)
        }
    }
}

/// SQLSTATE class 08 is "connection exception"; 57P01..57P03 are
/// admin/crash shutdown and "cannot connect now".
fn is_transport_failure(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => db
            .code()
            .map(|code| is_connection_sqlstate(&code))
            .unwrap_or(false),
        _ => false,
    }
}

fn is_connection_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_is_connection_dropped() {
        let err = sqlx::Error::Io(io::Error::new(
            io::ErrorKind::ConnectionReset,
            "connection reset by peer",
        ));
        assert!(LoadError::from(err).is_connection_dropped());
    }

    #[test]
    fn test_pool_closed_is_connection_dropped() {
        assert!(LoadError::from(sqlx::Error::PoolClosed).is_connection_dropped());
    }

    #[test]
    fn test_row_not_found_is_database_error() {
        let err = LoadError::from(sqlx::Error::RowNotFound);
        assert!(!err.is_connection_dropped());
        assert!(matches!(err, LoadError::Database(_)));
    }

    #[test]
    fn test_connection_sqlstates() {
        assert!(is_connection_sqlstate("08006"));
        assert!(is_connection_sqlstate("08003"));
        assert!(is_connection_sqlstate("57P01"));
        assert!(!is_connection_sqlstate("22003")); // numeric out of range
        assert!(!is_connection_sqlstate("23505")); // unique violation
    }
}

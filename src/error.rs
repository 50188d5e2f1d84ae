use rusqlite::Error as RusqliteError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum VmSqlError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError),

    #[error("Connection pool error: {0}")]
    PoolError(#[from] r2d2::Error),

    #[error("Failed to parse: {0}")]
    ParseError(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Error: {0}")]
    Error(String), // Allows custom application errors
}

impl VmSqlError {
    /// Wraps this error so it can be returned from a SQL function callback.
    pub fn into_sql(self) -> RusqliteError {
        match self {
            VmSqlError::DatabaseError(e) => e,
            other => RusqliteError::UserFunctionError(Box::new(other)),
        }
    }
}

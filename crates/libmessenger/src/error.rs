use thiserror::Error;

/// Failures raised by the persistence gateway.
///
/// Store errors are logged by the caller and degrade the triggering command;
/// they are never fatal to a session or to the daemon.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("password hashing failed: {0}")]
    Hash(String),

    #[error("store worker unavailable: {0}")]
    Worker(String),
}

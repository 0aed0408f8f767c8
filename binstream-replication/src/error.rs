use thiserror::Error;

/// Errors surfaced by the replication client, catalog and decoder.
#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error("mysql error: {0}")]
    MySql(#[from] mysql_async::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// A frame that could not be translated into the crate's frame model.
    /// Skippable: the reader may log it and keep pulling frames.
    #[error("binlog decode failed: {0}")]
    Decode(String),

    #[error("position store is already attached")]
    StoreAttached,

    #[error("position store backend error: {0}")]
    Store(String),
}

pub type ReplicationResult<T> = Result<T, ReplicationError>;

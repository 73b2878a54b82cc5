use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the store and the query engine.
///
/// The split between `CorruptFile` and `CorruptBlock` matters for readers:
/// a corrupt file (bad magic, truncated or inconsistent header) is fatal for
/// that file, while a corrupt block only invalidates one block — scanners
/// log it and continue with the next block.
#[derive(Debug, Error)]
pub enum Error {
    #[error("corrupt file {}: {reason}", path.display())]
    CorruptFile { path: PathBuf, reason: String },

    #[error("corrupt block: {0}")]
    CorruptBlock(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("block with timestamp {0} already exists")]
    AlreadyExists(i64),

    #[error("all {slots} block slots of {} are in use", path.display())]
    SlotsExhausted { path: PathBuf, slots: usize },

    #[error("cancelled")]
    Cancelled,

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

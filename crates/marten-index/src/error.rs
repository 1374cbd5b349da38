//! Error and Result types for index registry operations.
use thiserror::Error;

/// A convenience `Result` type.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for index registry and driver operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An index with the same identifier is already registered in the database.
    #[error("an index with id {0:?} has already been registered")]
    IdAlreadyRegistered(String),

    /// An index over the same expressions is already registered in the database.
    #[error("there is already an index registered for the expressions: {0}")]
    ExpressionAlreadyRegistered(String),

    /// The requested index was not found.
    #[error("index {0:?} was not found")]
    NotFound(String),

    /// The index cannot be deleted in its current status.
    #[error("can't delete index {0:?} because it's not ready for usage")]
    DeleteInvalidStatus(String),

    /// The index build was canceled before completion.
    #[error("index build canceled")]
    Canceled,

    /// An index file failed to decode.
    #[error("corrupted index file: {0}")]
    Corrupted(String),

    /// An underlying I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

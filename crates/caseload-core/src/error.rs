//! Error types for caseload-core

use thiserror::Error;

/// Result type alias using caseload-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in caseload-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// The push subscription failed to establish or deliver
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// A create/update/delete call was rejected by the remote store
    #[error("Mutation rejected: {0}")]
    Mutation(String),

    /// An asset upload or attachment persist failed
    #[error("Attachment error: {0}")]
    Attachment(String),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

use std::time::Duration;

/// Error carrier for every fallible kernel operation.
///
/// Control-surface callers receive these verbatim; the supervisor loop
/// converts them into state transitions and log entries instead of
/// propagating.
#[derive(thiserror::Error, Debug)]
pub enum KernelError {
    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    #[error("No tool named '{0}' is registered")]
    NotFound(String),

    #[error("Tool '{0}' is already registered")]
    AlreadyExists(String),

    #[error("Failed to spawn '{command}': {source}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    #[error("Failed to set up pipes: {0}")]
    PipeFailed(std::io::Error),

    #[error("Queue full: {0}")]
    QueueFull(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("Malformed event line: {0}")]
    ParseFailed(String),
}

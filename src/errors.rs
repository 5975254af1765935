use crate::runtime::SetupFault;

/// All error types that can occur while running the bulb endpoint.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failed to serialize data to JSON.
    #[error("failed to dump json: {0:?}")]
    JsonDump(serde_json::Error),

    /// Failed to deserialize JSON data.
    #[error("failed to load json: {0:?}")]
    JsonLoad(serde_json::Error),

    /// A network socket operation failed.
    #[error("socket {action} error: {err:?}")]
    Socket { action: String, err: std::io::Error },

    /// A color code outside the supported palette.
    #[error("invalid color code: {0}")]
    InvalidColor(i64),

    /// An inbound message that is not a command record.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// A background worker panicked before it could be stopped.
    #[error("{0} worker panicked")]
    WorkerPanicked(&'static str),
}

impl Error {
    /// Create a new socket error
    pub fn socket(action: &str, err: std::io::Error) -> Self {
        Error::Socket {
            action: action.to_string(),
            err,
        }
    }
}

impl From<SetupFault> for Error {
    fn from(fault: SetupFault) -> Self {
        Error::socket(fault.step.as_str(), fault.source)
    }
}

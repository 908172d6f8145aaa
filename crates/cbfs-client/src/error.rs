use cbfs_ipc::{FaultKind, FrameError, Response};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// The server answered with a fault
    #[error("{kind}: {message}")]
    Remote { kind: FaultKind, message: String },

    #[error("Server closed the connection")]
    Disconnected,

    #[error("Unexpected response: {0:?}")]
    UnexpectedResponse(Response),
}

impl ClientError {
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            ClientError::Remote { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

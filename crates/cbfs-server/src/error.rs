use cbfs_ipc::FaultKind;
use thiserror::Error;

/// Errors raised by the store, the client registry and the cache index
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("No file with name [{name}] exists")]
    NotFound { name: String },

    #[error("File with name [{name}] already exists")]
    AlreadyExists { name: String },

    #[error("File [{name}] no longer exists")]
    Deleted { name: String },

    #[error("Client is already registered with ID \"{id}\"")]
    RegistrationConflict { id: String },

    #[error("ID \"{id}\" is not currently registered with the server")]
    UnknownClient { id: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Protocol version {client} is not supported (server speaks {server})")]
    UnsupportedProtocol { client: u32, server: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Wire category reported to the remote caller
    pub fn fault_kind(&self) -> FaultKind {
        match self {
            ServerError::NotFound { .. } | ServerError::UnknownClient { .. } => FaultKind::NotFound,
            ServerError::AlreadyExists { .. } => FaultKind::AlreadyExists,
            ServerError::Deleted { .. } => FaultKind::Deleted,
            ServerError::RegistrationConflict { .. } => FaultKind::RegistrationConflict,
            ServerError::InvalidArgument(_) => FaultKind::InvalidArgument,
            ServerError::UnsupportedProtocol { .. } => FaultKind::Protocol,
            ServerError::Io(_) => FaultKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;

pub(crate) fn require(value: &str, what: &str) -> Result<()> {
    if value.is_empty() {
        return Err(ServerError::InvalidArgument(format!("{what} is required")));
    }
    Ok(())
}

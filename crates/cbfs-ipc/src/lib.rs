//! # cbfs-ipc
//!
//! Wire protocol shared by `cbfsd` and its clients.
//!
//! A client session is a single Unix stream. Requests flow client → server;
//! the server answers each request with a [`ServerFrame::Response`] and may at
//! any time push a [`ServerFrame::Notice`] telling the client that a cached
//! file is stale. Every message is wrapped in a [`FrameHeader`] frame.

pub mod frame;

pub use frame::{FrameError, FrameHeader};

use serde::{Deserialize, Serialize};

/// Protocol version, bumped on incompatible message changes
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    Handshake {
        client_version: String,
        protocol_version: u32,
    },
    Register {
        client_id: String,
    },
    Unregister {
        client_id: String,
    },
    ListFiles,
    CreateFile {
        client_id: String,
        name: String,
        data: Vec<u8>,
    },
    OpenFile {
        client_id: String,
        name: String,
    },
    RemoveFile {
        name: String,
    },
    EditFile {
        name: String,
        data: Vec<u8>,
    },
    RenameFile {
        name: String,
        new_name: String,
    },
}

impl Request {
    /// Short operation name for logging
    pub fn op(&self) -> &'static str {
        match self {
            Request::Handshake { .. } => "handshake",
            Request::Register { .. } => "register",
            Request::Unregister { .. } => "unregister",
            Request::ListFiles => "list_files",
            Request::CreateFile { .. } => "create_file",
            Request::OpenFile { .. } => "open_file",
            Request::RemoveFile { .. } => "remove_file",
            Request::EditFile { .. } => "edit_file",
            Request::RenameFile { .. } => "rename_file",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    HandshakeAck {
        server_version: String,
        protocol_version: u32,
    },
    Ack,
    Files { names: Vec<String> },
    Contents { data: Vec<u8> },
    Fault { kind: FaultKind, message: String },
}

impl Response {
    pub fn fault(kind: FaultKind, message: impl Into<String>) -> Self {
        Response::Fault {
            kind,
            message: message.into(),
        }
    }
}

/// Server-initiated messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notice {
    /// The client's cached copy of `name` is stale
    Invalidate { name: String },
}

/// Everything the server writes to a client connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    Response(Response),
    Notice(Notice),
}

/// Remote fault categories carried in [`Response::Fault`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    NotFound,
    AlreadyExists,
    Deleted,
    RegistrationConflict,
    InvalidArgument,
    /// Malformed or unexpected message
    Protocol,
    Internal,
}

impl std::fmt::Display for FaultKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FaultKind::NotFound => "not found",
            FaultKind::AlreadyExists => "already exists",
            FaultKind::Deleted => "deleted",
            FaultKind::RegistrationConflict => "registration conflict",
            FaultKind::InvalidArgument => "invalid argument",
            FaultKind::Protocol => "protocol error",
            FaultKind::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// Default server socket path
pub fn default_socket_path() -> &'static str {
    "/tmp/cbfs.sock"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::CreateFile {
            client_id: "client-1".to_string(),
            name: "notes.txt".to_string(),
            data: b"hello".to_vec(),
        };
        let bytes = bincode::serialize(&req).unwrap();
        let decoded: Request = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, req);
        assert_eq!(decoded.op(), "create_file");
    }

    #[test]
    fn test_notice_frame_serialization() {
        let frame = ServerFrame::Notice(Notice::Invalidate {
            name: "f".to_string(),
        });
        let bytes = bincode::serialize(&frame).unwrap();
        let decoded: ServerFrame = bincode::deserialize(&bytes).unwrap();
        assert!(matches!(
            decoded,
            ServerFrame::Notice(Notice::Invalidate { ref name }) if name == "f"
        ));
    }

    #[test]
    fn test_fault_display() {
        let resp = Response::fault(FaultKind::AlreadyExists, "file [a] already exists");
        match resp {
            Response::Fault { kind, message } => {
                assert_eq!(kind.to_string(), "already exists");
                assert!(message.contains("[a]"));
            }
            _ => panic!("Expected Fault"),
        }
    }

    #[test]
    fn test_default_socket_path() {
        let path = default_socket_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".sock"));
    }
}

//! Error taxonomy shared by both transfer backends

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::config::Protocol;

/// Session operation during which an error surfaced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Connect,
    Login,
    Pwd,
    Cwd,
    Get,
    Put,
    Disconnect,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Connect => "connect",
            Operation::Login => "login",
            Operation::Pwd => "pwd",
            Operation::Cwd => "cwd",
            Operation::Get => "get",
            Operation::Put => "put",
            Operation::Disconnect => "disconnect",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("[{protocol}] {operation}: cannot connect to {address}: {detail}")]
    Connection {
        protocol: Protocol,
        operation: Operation,
        address: String,
        detail: String,
    },

    #[error("[{protocol}] authentication failed for user '{user}': {detail}")]
    Authentication {
        protocol: Protocol,
        user: String,
        detail: String,
    },

    #[error("[{protocol}] {operation}: remote path '{path}' not found: {detail}")]
    RemoteNotFound {
        protocol: Protocol,
        operation: Operation,
        path: String,
        detail: String,
    },

    #[error("{operation}: local file '{}': {source}", path.display())]
    LocalIo {
        operation: Operation,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("[{protocol}] {operation}: connection lost: {detail}")]
    ConnectionLost {
        protocol: Protocol,
        operation: Operation,
        detail: String,
    },

    #[error("[{protocol}] {operation}: session already disconnected")]
    AlreadyDisconnected {
        protocol: Protocol,
        operation: Operation,
    },

    #[error("[{protocol}] {operation}: request rejected by server: {detail}")]
    Remote {
        protocol: Protocol,
        operation: Operation,
        detail: String,
    },

    #[error("{source}; remote directory '{directory}' was not restored: {detail}")]
    DirectoryNotRestored {
        directory: String,
        detail: String,
        #[source]
        source: Box<TransferError>,
    },

    #[error("invalid session configuration: {0}")]
    InvalidConfig(String),
}

impl TransferError {
    /// Protocol the failing session was using, if the error is tied to one
    pub fn protocol(&self) -> Option<Protocol> {
        match self {
            TransferError::Connection { protocol, .. }
            | TransferError::Authentication { protocol, .. }
            | TransferError::RemoteNotFound { protocol, .. }
            | TransferError::ConnectionLost { protocol, .. }
            | TransferError::AlreadyDisconnected { protocol, .. }
            | TransferError::Remote { protocol, .. } => Some(*protocol),
            TransferError::DirectoryNotRestored { source, .. } => source.protocol(),
            TransferError::LocalIo { .. } | TransferError::InvalidConfig(_) => None,
        }
    }

    /// The error that caused a transfer to fail, looking through a failed
    /// directory restore
    pub fn root(&self) -> &TransferError {
        match self {
            TransferError::DirectoryNotRestored { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_remote_not_found(&self) -> bool {
        matches!(self.root(), TransferError::RemoteNotFound { .. })
    }

    pub fn is_connection_lost(&self) -> bool {
        matches!(self.root(), TransferError::ConnectionLost { .. })
    }
}

pub type TransferResult<T> = Result<T, TransferError>;

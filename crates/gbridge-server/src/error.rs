//! Server error types.

use std::io;

use gbridge_core::StoreError;
use gbridge_google::GoogleError;
use thiserror::Error;

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] gbridge_protocol::ProtocolError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Google error: {0}")]
    Google(#[from] GoogleError),

    #[error("Socket path already in use: {path}")]
    SocketInUse { path: String },

    #[error("Socket path parent directory does not exist: {path}")]
    SocketPathInvalid { path: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Server shutdown requested")]
    Shutdown,
}

impl ServerError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn socket_in_use(path: impl Into<String>) -> Self {
        Self::SocketInUse { path: path.into() }
    }

    pub fn socket_path_invalid(path: impl Into<String>) -> Self {
        Self::SocketPathInvalid { path: path.into() }
    }
}

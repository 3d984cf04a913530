//! Client error types.

use std::fmt;

use gbridge_protocol::ErrorResponse;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug)]
pub enum ClientError {
    Config(String),
    Io(std::io::Error),
    /// Connection to the controller failed.
    Connection(String),
    /// Protocol/framing error.
    Protocol(String),
    Timeout(String),
    /// The controller answered with an error.
    Server(ErrorResponse),
    /// Starting the controller failed.
    Startup(String),
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "configuration error: {}", msg),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Connection(msg) => write!(f, "connection error: {}", msg),
            Self::Protocol(msg) => write!(f, "protocol error: {}", msg),
            Self::Timeout(msg) => write!(f, "timeout: {}", msg),
            Self::Server(err) => write!(f, "controller error: {}", err),
            Self::Startup(msg) => write!(f, "failed to start controller: {}", msg),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Server(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<gbridge_protocol::ProtocolError> for ClientError {
    fn from(err: gbridge_protocol::ProtocolError) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<gbridge_server::ServerError> for ClientError {
    fn from(err: gbridge_server::ServerError) -> Self {
        Self::Startup(err.to_string())
    }
}

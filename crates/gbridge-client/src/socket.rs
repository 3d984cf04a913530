//! Unix socket client for the gbridge controller.
//!
//! A [`Session`] is one connection, and therefore one attached context on
//! the controller side. [`SocketClient::send`] opens a short-lived session
//! for a single request.

use std::path::{Path, PathBuf};
use std::time::Duration;

use gbridge_protocol::{
    BusMessage, ContextKind, Envelope, Request, Response, ServiceInfo, read_frame, write_frame,
};
use tokio::net::UnixStream;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone)]
pub struct SocketClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl SocketClient {
    pub fn new(socket_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_path: socket_path.into(),
            timeout,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(gbridge_server::default_socket_path(), Duration::from_secs(5))
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Opens a connection that stays attached until dropped.
    pub async fn connect(&self) -> ClientResult<Session> {
        debug!(socket = %self.socket_path.display(), "connecting to controller");

        let stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .map_err(|_| {
                ClientError::Connection(format!(
                    "connection timed out after {}s",
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|e| {
                ClientError::Connection(format!(
                    "failed to connect to {}: {}",
                    self.socket_path.display(),
                    e
                ))
            })?;

        Ok(Session {
            stream,
            timeout: self.timeout,
        })
    }

    /// Sends one request on a fresh connection.
    pub async fn send(&self, request: Request) -> ClientResult<Response> {
        self.connect().await?.request(request).await
    }

    /// Like [`send`](Self::send), but turns an error response into `Err`.
    pub async fn call(&self, request: Request) -> ClientResult<Response> {
        match self.send(request).await? {
            Response::Error { error } => Err(ClientError::Server(error)),
            response => Ok(response),
        }
    }

    pub async fn ping(&self) -> bool {
        matches!(self.send(Request::Ping).await, Ok(Response::Pong))
    }
}

/// An open connection to the controller.
#[derive(Debug)]
pub struct Session {
    stream: UnixStream,
    timeout: Duration,
}

impl Session {
    pub async fn request(&mut self, request: Request) -> ClientResult<Response> {
        let request_id = Uuid::new_v4().to_string();
        let path = request.path();
        let envelope = Envelope::new(request_id.as_str(), request);

        tokio::time::timeout(self.timeout, write_frame(&mut self.stream, &envelope))
            .await
            .map_err(|_| ClientError::Timeout("sending request".into()))??;
        debug!(%request_id, path, "request sent, waiting for response");

        let response: Envelope<Response> =
            tokio::time::timeout(self.timeout, read_frame(&mut self.stream))
                .await
                .map_err(|_| ClientError::Timeout("reading response".into()))??
                .ok_or_else(|| ClientError::Connection("controller closed the connection".into()))?;

        if response.request_id != request_id {
            warn!(
                expected = %request_id,
                received = %response.request_id,
                "response request_id mismatch"
            );
        }
        Ok(response.payload)
    }

    /// Registration handshake.
    pub async fn register(&mut self, context: ContextKind) -> ClientResult<ServiceInfo> {
        match self.request(Request::Register { context }).await? {
            Response::Registered { service } => Ok(service),
            Response::Error { error } => Err(ClientError::Server(error)),
            other => Err(ClientError::Protocol(format!("unexpected response: {other:?}"))),
        }
    }

    /// Registers as `context` and asks for that context's bus messages.
    /// Read them with [`listen`](Self::listen).
    pub async fn subscribe(&mut self, context: ContextKind) -> ClientResult<ServiceInfo> {
        match self.request(Request::Subscribe { context }).await? {
            Response::Registered { service } => Ok(service),
            Response::Error { error } => Err(ClientError::Server(error)),
            other => Err(ClientError::Protocol(format!("unexpected response: {other:?}"))),
        }
    }

    /// Next bus message pushed to a subscribed session, or `None` once the
    /// controller goes away. Waits as long as it takes.
    pub async fn listen(&mut self) -> ClientResult<Option<BusMessage>> {
        loop {
            let Some(frame) = read_frame::<_, Envelope<Response>>(&mut self.stream).await? else {
                return Ok(None);
            };
            match frame.payload {
                Response::Bus { message } => return Ok(Some(message)),
                other => debug!(request_id = %frame.request_id, ?other, "skipping non-bus frame"),
            }
        }
    }

    /// Whether this page may inject the widget.
    pub async fn should_inject(&mut self) -> ClientResult<bool> {
        match self.request(Request::ShouldInject).await? {
            Response::Injection { allowed } => Ok(allowed),
            Response::Error { error } => Err(ClientError::Server(error)),
            other => Err(ClientError::Protocol(format!("unexpected response: {other:?}"))),
        }
    }
}

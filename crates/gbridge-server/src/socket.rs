//! Unix socket transport.
//!
//! Each accepted connection gets a process-unique id. The connection's
//! lifetime is the lifetime of the context on the other end.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use gbridge_protocol::{
    Envelope, PROTOCOL_VERSION, ProtocolError, Request, Response, read_frame, write_frame,
};

use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};

pub struct SocketServer {
    config: ServerConfig,
    listener: UnixListener,
    connection_semaphore: Arc<Semaphore>,
    next_id: AtomicU64,
}

impl SocketServer {
    /// Binds the configured socket path.
    ///
    /// A leftover socket file nobody answers on is removed first when
    /// `cleanup_stale_socket` is set.
    pub async fn new(config: ServerConfig) -> ServerResult<Self> {
        let socket_path = &config.socket_path;

        if let Some(parent) = socket_path.parent()
            && !parent.exists()
        {
            return Err(ServerError::socket_path_invalid(
                parent.to_string_lossy().to_string(),
            ));
        }

        if config.cleanup_stale_socket && socket_path.exists() {
            match UnixStream::connect(socket_path).await {
                Ok(_) => {
                    return Err(ServerError::socket_in_use(
                        socket_path.to_string_lossy().to_string(),
                    ));
                }
                Err(_) => {
                    info!(path = %socket_path.display(), "Removing stale socket");
                    std::fs::remove_file(socket_path)?;
                }
            }
        } else if socket_path.exists() {
            return Err(ServerError::socket_in_use(
                socket_path.to_string_lossy().to_string(),
            ));
        }

        let listener = UnixListener::bind(socket_path)?;
        info!(path = %socket_path.display(), "Socket server listening");

        let connection_semaphore = Arc::new(Semaphore::new(config.max_connections));

        Ok(Self {
            config,
            listener,
            connection_semaphore,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.config.socket_path
    }

    pub async fn accept(&self) -> ServerResult<Connection> {
        let permit = Arc::clone(&self.connection_semaphore)
            .acquire_owned()
            .await
            .map_err(|_| ServerError::Shutdown)?;

        let (stream, _addr) = self.listener.accept().await?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(connection = id, "Accepted new connection");

        Ok(Connection {
            id,
            stream: BufReader::new(stream),
            timeout: self.config.connection_timeout,
            _permit: permit,
        })
    }

    /// Accepts connections forever, spawning `handler` for each.
    pub async fn run<F, Fut>(&self, handler: F) -> ServerResult<()>
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        loop {
            match self.accept().await {
                Ok(connection) => {
                    tokio::spawn(handler(connection));
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    pub async fn run_until_shutdown<F, Fut, S>(&self, handler: F, shutdown: S) -> ServerResult<()>
    where
        F: Fn(Connection) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
        S: std::future::Future<Output = ()> + Send,
    {
        tokio::select! {
            result = self.run(handler) => result,
            _ = shutdown => {
                info!("Shutdown signal received");
                Ok(())
            }
        }
    }
}

impl Drop for SocketServer {
    fn drop(&mut self) {
        if self.config.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.config.socket_path) {
                warn!(
                    path = %self.config.socket_path.display(),
                    error = %e,
                    "Failed to remove socket file"
                );
            } else {
                debug!(path = %self.config.socket_path.display(), "Removed socket file");
            }
        }
    }
}

/// A client connection to the server.
pub struct Connection {
    id: u64,
    stream: BufReader<UnixStream>,
    timeout: Duration,
    _permit: OwnedSemaphorePermit,
}

impl Connection {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Waits until the client has sent something, or closed.
    ///
    /// Cancel safe: bytes already read stay buffered for the next call.
    pub async fn readable(&mut self) -> ServerResult<()> {
        self.stream.fill_buf().await?;
        Ok(())
    }

    /// Reads the next request.
    ///
    /// Waiting for a request is unbounded, since an idle connection is an
    /// attached context. Once bytes arrive the frame must complete within
    /// the connection timeout. Returns `Ok(None)` on clean close.
    pub async fn read_request(&mut self) -> ServerResult<Option<Envelope<Request>>> {
        self.readable().await?;

        let envelope: Option<Envelope<Request>> =
            match tokio::time::timeout(self.timeout, read_frame(&mut self.stream)).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(ServerError::Protocol(ProtocolError::Timeout {
                        operation: "read request".to_string(),
                    }));
                }
            };

        if let Some(envelope) = &envelope
            && !envelope.is_compatible()
        {
            warn!(
                version = %envelope.protocol_version,
                expected = %PROTOCOL_VERSION,
                "Incompatible protocol version"
            );
        }

        Ok(envelope)
    }

    pub async fn write_response(&mut self, envelope: &Envelope<Response>) -> ServerResult<()> {
        match tokio::time::timeout(self.timeout, write_frame(&mut self.stream, envelope)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ServerError::Protocol(ProtocolError::Timeout {
                operation: "write response".to_string(),
            })),
        }
    }

    pub async fn respond(
        &mut self,
        request_id: impl Into<String>,
        response: Response,
    ) -> ServerResult<()> {
        let envelope = Envelope::new(request_id, response);
        self.write_response(&envelope).await
    }
}

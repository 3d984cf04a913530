//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Page for the standalone receiver window.
pub const DEFAULT_POPUP_URL: &str = "https://apps.ringcentral.com/integration/ringcentral-embeddable/latest/app.html";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Path to the Unix socket.
    pub socket_path: PathBuf,

    /// Bounds reading one request and writing one response.
    pub connection_timeout: Duration,

    /// Maximum concurrent connections.
    pub max_connections: usize,

    /// Whether to remove stale socket on startup.
    pub cleanup_stale_socket: bool,

    /// Page contexts allowed to inject the widget at once.
    pub max_injected_contexts: usize,

    /// Opened when a message targets a receiver that does not exist yet.
    pub popup_url: String,

    /// Backing file of the shared store. In memory when `None`.
    pub store_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            connection_timeout: Duration::from_secs(30),
            max_connections: 100,
            cleanup_stale_socket: true,
            max_injected_contexts: 3,
            popup_url: DEFAULT_POPUP_URL.to_string(),
            store_path: None,
        }
    }
}

impl ServerConfig {
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
            ..Default::default()
        }
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_cleanup_stale_socket(mut self, cleanup: bool) -> Self {
        self.cleanup_stale_socket = cleanup;
        self
    }

    pub fn with_max_injected_contexts(mut self, max: usize) -> Self {
        self.max_injected_contexts = max;
        self
    }

    pub fn with_popup_url(mut self, url: impl Into<String>) -> Self {
        self.popup_url = url.into();
        self
    }

    pub fn with_store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.store_path = Some(path.into());
        self
    }
}

/// Returns the default socket path.
///
/// Uses `$XDG_RUNTIME_DIR/gbridge.sock` if available,
/// otherwise falls back to `/tmp/gbridge-$UID.sock`.
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("gbridge.sock")
    } else {
        #[cfg(unix)]
        let uid = unsafe { libc::getuid() };
        #[cfg(not(unix))]
        let uid = 0;
        PathBuf::from(format!("/tmp/gbridge-{}.sock", uid))
    }
}

//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/gbridge/config.toml` by default. Every section and key is
//! optional.
//!
//! ```toml
//! [google]
//! client_id = "1234.apps.googleusercontent.com"
//!
//! [server]
//! timeout = 5
//!
//! [sync]
//! personal_staleness_secs = 30
//! directory_staleness_secs = 300
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use gbridge_google::GoogleConfig;
use gbridge_server::ServerConfig;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, ClientResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub google: GoogleSettings,
    pub server: ServerSettings,
    pub sync: SyncSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleSettings {
    /// OAuth client id. Falls back to `$GBRIDGE_CLIENT_ID`.
    pub client_id: Option<String>,

    /// Replaces the default scope set.
    pub scopes: Option<Vec<String>>,

    pub http_timeout_secs: u64,

    /// How long to wait for the user to finish signing in.
    pub flow_timeout_secs: u64,

    /// First and last loopback port tried for the sign-in redirect.
    pub loopback_ports: (u16, u16),
}

impl Default for GoogleSettings {
    fn default() -> Self {
        Self {
            client_id: None,
            scopes: None,
            http_timeout_secs: 30,
            flow_timeout_secs: 300,
            loopback_ports: (8765, 8775),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub socket_path: Option<PathBuf>,

    /// Client connection timeout in seconds.
    pub timeout: u64,

    /// Defaults to `store.json` in the data directory.
    pub store_path: Option<PathBuf>,

    pub popup_url: Option<String>,

    pub max_injected_contexts: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            socket_path: None,
            timeout: 5,
            store_path: None,
            popup_url: None,
            max_injected_contexts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub personal_staleness_secs: u64,
    pub directory_staleness_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            personal_staleness_secs: 30,
            directory_staleness_secs: 300,
        }
    }
}

impl ClientConfig {
    /// Loads the default file, or defaults when it does not exist.
    pub fn load() -> ClientResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> ClientResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| ClientError::Config(format!("failed to parse {}: {}", path.display(), e)))
    }

    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gbridge")
    }

    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("gbridge")
    }

    pub fn socket_path(&self, cli_override: Option<&Path>) -> PathBuf {
        cli_override
            .map(Path::to_path_buf)
            .or_else(|| self.server.socket_path.clone())
            .unwrap_or_else(gbridge_server::default_socket_path)
    }

    /// Builds the Google adapter configuration.
    ///
    /// # Errors
    ///
    /// Fails when no client id is configured.
    pub fn google_config(&self) -> ClientResult<GoogleConfig> {
        let client_id = self
            .google
            .client_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| std::env::var("GBRIDGE_CLIENT_ID").ok())
            .ok_or_else(|| {
                ClientError::Config(
                    "no Google client id; set [google].client_id or GBRIDGE_CLIENT_ID".into(),
                )
            })?;

        let mut config = GoogleConfig::new(client_id)
            .with_http_timeout(Duration::from_secs(self.google.http_timeout_secs))
            .with_flow_timeout(Duration::from_secs(self.google.flow_timeout_secs))
            .with_staleness(
                Duration::from_secs(self.sync.personal_staleness_secs),
                Duration::from_secs(self.sync.directory_staleness_secs),
            )
            .with_loopback_ports(self.google.loopback_ports.0, self.google.loopback_ports.1);
        if let Some(scopes) = &self.google.scopes {
            config.scopes = scopes.clone();
        }
        Ok(config)
    }

    pub fn server_config(&self, socket_override: Option<&Path>) -> ServerConfig {
        let store_path = self
            .server
            .store_path
            .clone()
            .unwrap_or_else(|| Self::default_data_dir().join("store.json"));

        let mut config = ServerConfig::new(self.socket_path(socket_override))
            .with_max_injected_contexts(self.server.max_injected_contexts)
            .with_store_path(store_path);
        if let Some(url) = &self.server.popup_url {
            config = config.with_popup_url(url.clone());
        }
        config
    }
}

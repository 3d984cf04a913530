//! The gbridge controller daemon.
//!
//! The controller is the only process holding Google credentials and the
//! synced contact collections. Pages and the receiver window talk to it
//! over a Unix socket:
//! - requests are dispatched by [`RequestHandler`] onto the [`Controller`]
//! - the controller pushes messages back through the [`MessageBus`], and
//!   connections that sent `/subscribe` receive them as pushed frames
//! - [`ContextRegistry`] tracks open connections for admission control
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gbridge_core::LocalStore;
//! use gbridge_google::{GoogleClient, GoogleConfig, LoopbackLauncher};
//! use gbridge_server::{
//!     Controller, DesktopNotifier, ServerConfig, SocketServer, SystemOpener,
//!     make_connection_handler,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let google_config = GoogleConfig::new("client-id");
//!     let launcher = LoopbackLauncher::bind(google_config.loopback_ports, google_config.flow_timeout)?;
//!     let store = LocalStore::in_memory();
//!     let google = GoogleClient::new(google_config, store.clone(), Arc::new(launcher))?;
//!     let controller = Arc::new(Controller::new(
//!         &config,
//!         google,
//!         store,
//!         Arc::new(DesktopNotifier::default()),
//!         Arc::new(SystemOpener),
//!     ));
//!     controller.start().await;
//!
//!     let server = SocketServer::new(config).await?;
//!     server.run(make_connection_handler(controller)).await?;
//!     Ok(())
//! }
//! ```

mod bus;
mod config;
mod controller;
mod error;
mod handler;
mod notify;
mod registry;
mod signals;
mod socket;
mod window;

pub use bus::MessageBus;
pub use config::{DEFAULT_POPUP_URL, ServerConfig, default_socket_path};
pub use controller::Controller;
pub use error::{ServerError, ServerResult};
pub use handler::{RequestHandler, make_connection_handler};
pub use notify::{DesktopNotifier, Notifier, RingingNotifier};
pub use registry::ContextRegistry;
pub use signals::{ShutdownSignal, SignalHandler};
pub use socket::{Connection, SocketServer};
pub use window::{SystemOpener, WindowOpener};

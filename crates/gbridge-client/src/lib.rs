//! CLI, socket client, bus listener, configuration
//!
//! This crate provides the `gbridge` command-line interface and the client
//! side of the controller socket and message bus.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod listener;
pub mod socket;

pub use cli::Cli;
pub use error::{ClientError, ClientResult};
pub use listener::BusListener;
pub use socket::{Session, SocketClient};

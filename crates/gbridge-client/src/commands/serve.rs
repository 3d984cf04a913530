//! Serve command: runs the controller in the foreground.
//!
//! Wires the store, the Google client, the controller and the socket
//! server together, then blocks until SIGTERM/SIGINT.

use std::sync::Arc;

use gbridge_core::LocalStore;
use gbridge_google::{GoogleClient, LoopbackLauncher};
use gbridge_protocol::{BusMessage, ContextKind};
use gbridge_server::{
    Controller, DesktopNotifier, SignalHandler, SocketServer, SystemOpener,
    make_connection_handler,
};
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};
use crate::listener::BusListener;

pub async fn run(config: &ClientConfig, socket_override: Option<&std::path::Path>) -> ClientResult<()> {
    let google_config = config.google_config()?;
    let server_config = config.server_config(socket_override);

    let store = match &server_config.store_path {
        Some(path) => LocalStore::open(path)
            .map_err(|e| ClientError::Config(format!("failed to open store: {}", e)))?,
        None => LocalStore::in_memory(),
    };

    let launcher = LoopbackLauncher::bind(google_config.loopback_ports, google_config.flow_timeout)
        .map_err(|e| ClientError::Startup(e.to_string()))?;
    info!(port = launcher.port(), "sign-in redirect listener ready");

    let google = GoogleClient::new(google_config, store.clone(), Arc::new(launcher))
        .map_err(|e| ClientError::Startup(e.to_string()))?;

    let controller = Arc::new(Controller::new(
        &server_config,
        google,
        store.clone(),
        Arc::new(DesktopNotifier::default()),
        Arc::new(SystemOpener),
    ));

    let signal_handler = SignalHandler::new();
    signal_handler.spawn_listener();

    // Page-side view of the bus, for visibility into what the controller sends.
    let mut page = BusListener::new(&store, ContextKind::Page);
    let bus_task = tokio::spawn(async move {
        while let Some(message) = page.recv().await {
            log_bus_message(&message);
        }
    });

    controller.start().await;

    let server = SocketServer::new(server_config).await?;
    info!(path = %server.socket_path().display(), "controller listening");

    let handler = make_connection_handler(Arc::clone(&controller));
    server
        .run_until_shutdown(handler, signal_handler.shutdown().wait())
        .await?;

    bus_task.abort();
    info!("controller stopped");
    Ok(())
}

fn log_bus_message(message: &BusMessage) {
    match serde_json::to_string(message) {
        Ok(json) => debug!(message = %json, "bus traffic"),
        Err(e) => debug!(error = %e, "unserializable bus message"),
    }
}

//! Acting as a page or popup context from the command line.

use gbridge_protocol::ContextKind;
use serde_json::json;
use tracing::info;

use crate::commands::request::{ensure_running, print_json};
use crate::error::{ClientError, ClientResult};
use crate::socket::SocketClient;

/// Subscribes as `context` and prints every bus message as one JSON line
/// until the controller goes away.
pub async fn listen(client: &SocketClient, context: ContextKind) -> ClientResult<()> {
    ensure_running(client)?;
    let mut session = client.connect().await?;
    let service = session.subscribe(context).await?;
    info!(?context, authorized = service.authorized, "listening for bus messages");

    let mut received = 0usize;
    while let Some(message) = session.listen().await? {
        let line =
            serde_json::to_string(&message).map_err(|e| ClientError::Protocol(e.to_string()))?;
        println!("{}", line);
        received += 1;
    }
    info!(received, "controller closed the connection");
    Ok(())
}

/// Registers as a page and asks whether it may inject the widget.
///
/// The answer counts this page too, so it reflects what a newly opened
/// page would be told.
pub async fn inject(client: &SocketClient) -> ClientResult<()> {
    ensure_running(client)?;
    let mut session = client.connect().await?;
    session.register(ContextKind::Page).await?;
    let allowed = session.should_inject().await?;
    print_json(&json!({"allowed": allowed}))
}

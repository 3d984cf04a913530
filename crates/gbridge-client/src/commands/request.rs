//! One-shot requests against a running controller.

use gbridge_protocol::{ActivityRef, Request, Response};
use serde::Serialize;

use crate::error::{ClientError, ClientResult};
use crate::socket::SocketClient;

/// Fails early, with a hint, when no controller is listening.
pub(crate) fn ensure_running(client: &SocketClient) -> ClientResult<()> {
    if client.socket_exists() {
        return Ok(());
    }
    Err(ClientError::Connection(format!(
        "no controller at {}; start one with `gbridge serve`",
        client.socket_path().display()
    )))
}

/// Sends `request` and prints the response payload as JSON.
pub async fn send(client: &SocketClient, request: Request) -> ClientResult<()> {
    ensure_running(client)?;
    let response = client.call(request).await?;
    print_json(&payload(response))
}

pub fn open_activity(id: String) -> Request {
    Request::Activity {
        activity: ActivityRef { id },
    }
}

/// Strips the response tag so scripts see just the data.
fn payload(response: Response) -> serde_json::Value {
    match response {
        Response::Registered { service } => serde_json::json!(service),
        Response::Ok | Response::Pong => serde_json::json!({"data": "ok"}),
        Response::Contacts {
            data,
            sync_timestamp,
        } => serde_json::json!({"data": data, "syncTimestamp": sync_timestamp}),
        Response::Event { event } => serde_json::json!(event),
        Response::Activities { data } => serde_json::json!({"data": data}),
        Response::Injection { allowed } => serde_json::json!({"allowed": allowed}),
        Response::Status { info } => serde_json::json!(info),
        Response::Error { error } => serde_json::json!({"error": error}),
        Response::Bus { message } => serde_json::json!(message),
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> ClientResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| ClientError::Protocol(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

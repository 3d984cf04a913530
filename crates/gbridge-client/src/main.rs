//! gbridge CLI entry point.

use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use gbridge_core::{TracingConfig, init_tracing};
use gbridge_protocol::{ContextKind, Request};
use tracing::Level;

use gbridge_client::cli::{Cli, Command};
use gbridge_client::commands::{context, request, serve};
use gbridge_client::config::ClientConfig;
use gbridge_client::error::ClientResult;
use gbridge_client::socket::SocketClient;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let tracing_config = if cli.debug {
        TracingConfig::cli_debug()
    } else if matches!(cli.command, Command::Serve) {
        TracingConfig::daemon()
    } else {
        TracingConfig::default().with_level(Level::WARN)
    };
    if let Err(e) = init_tracing(tracing_config) {
        eprintln!("warning: {}", e);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> ClientResult<()> {
    let config = match &cli.config {
        Some(path) => ClientConfig::load_from(path)?,
        None => ClientConfig::load()?,
    };

    let socket_override = cli.socket_path.as_deref();
    let timeout = Duration::from_secs(cli.timeout.unwrap_or(config.server.timeout));
    let client = SocketClient::new(config.socket_path(socket_override), timeout);

    let req = match cli.command {
        Command::Serve => return serve::run(&config, socket_override).await,
        Command::Status => Request::Status,
        Command::Contacts { since } => Request::contacts(since),
        Command::Search { query } => Request::search(query),
        Command::Match { numbers } => Request::match_numbers(numbers),
        Command::Authorize { revoke } => Request::Authorize { authorized: revoke },
        Command::Invite { text } => Request::conference_invite(text),
        Command::Activities { emails } => Request::activities(emails),
        Command::OpenActivity { id } => request::open_activity(id),
        Command::Dial { number } => Request::Dial {
            phone_number: number,
        },
        Command::Sms { number } => Request::Sms {
            phone_number: number,
        },
        Command::Open => Request::OpenWindow,
        Command::Listen { popup } => {
            let kind = if popup {
                ContextKind::Popup
            } else {
                ContextKind::Page
            };
            return context::listen(&client, kind).await;
        }
        Command::Inject => return context::inject(&client).await,
    };
    request::send(&client, req).await
}

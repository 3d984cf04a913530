//! Command-line interface definition.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// gbridge - Google contacts, calendar and mail for the phone widget
#[derive(Debug, Parser)]
#[command(name = "gbridge")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "GBRIDGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Path to the controller socket
    #[arg(long, env = "GBRIDGE_SOCKET")]
    pub socket_path: Option<PathBuf>,

    /// Connection timeout in seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the controller in the foreground
    Serve,

    /// Show controller status
    Status,

    /// List contacts, optionally only those changed since a timestamp
    Contacts {
        /// Epoch milliseconds returned by a previous call
        #[arg(long)]
        since: Option<i64>,
    },

    /// Search contacts by name, phone or email
    Search { query: String },

    /// Find contacts owning any of the given phone numbers
    Match {
        #[arg(required = true)]
        numbers: Vec<String>,
    },

    /// Sign in to Google, or sign out with --revoke
    Authorize {
        #[arg(long)]
        revoke: bool,
    },

    /// Create a one-hour calendar event carrying a conference invite
    Invite { text: String },

    /// Recent mail threads with the given addresses
    Activities {
        #[arg(required = true)]
        emails: Vec<String>,
    },

    /// Open a mail thread in the browser
    OpenActivity { id: String },

    /// Dial a number from the widget
    Dial { number: String },

    /// Compose an SMS in the widget
    Sms { number: String },

    /// Bring the widget window to the front
    Open,

    /// Attach as a page, or the popup with --popup, and print bus messages
    Listen {
        #[arg(long)]
        popup: bool,
    },

    /// Attach as a page and ask whether it may inject the widget
    Inject,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_match_numbers() {
        let cli = Cli::try_parse_from(["gbridge", "match", "+1 650 555 0100", "5550101"]).unwrap();
        match cli.command {
            Command::Match { numbers } => assert_eq!(numbers.len(), 2),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_global_flags() {
        let cli = Cli::try_parse_from([
            "gbridge",
            "--debug",
            "--socket-path",
            "/tmp/x.sock",
            "--timeout",
            "9",
            "authorize",
            "--revoke",
        ])
        .unwrap();
        assert!(cli.debug);
        assert_eq!(cli.socket_path, Some(PathBuf::from("/tmp/x.sock")));
        assert_eq!(cli.timeout, Some(9));
        assert!(matches!(cli.command, Command::Authorize { revoke: true }));
    }

    #[test]
    fn match_requires_a_number() {
        assert!(Cli::try_parse_from(["gbridge", "match"]).is_err());
    }

    #[test]
    fn parses_context_commands() {
        let cli = Cli::try_parse_from(["gbridge", "listen", "--popup"]).unwrap();
        assert!(matches!(cli.command, Command::Listen { popup: true }));

        let cli = Cli::try_parse_from(["gbridge", "listen"]).unwrap();
        assert!(matches!(cli.command, Command::Listen { popup: false }));

        let cli = Cli::try_parse_from(["gbridge", "inject"]).unwrap();
        assert!(matches!(cli.command, Command::Inject));
    }
}

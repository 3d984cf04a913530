//! Requests sent by page and popup clients to the controller.

use serde::{Deserialize, Serialize};

use crate::PROTOCOL_VERSION;
use crate::bus::ContextKind;

/// Socket envelope adding versioning and request correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub protocol_version: String,
    pub request_id: String,
    pub payload: T,
}

impl<T> Envelope<T> {
    pub fn new(request_id: impl Into<String>, payload: T) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            request_id: request_id.into(),
            payload,
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.protocol_version == PROTOCOL_VERSION
    }
}

/// Body of a conference invite request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conference {
    pub invite_text: String,
}

/// The contact whose mail activity is requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactRef {
    #[serde(default)]
    pub emails: Vec<String>,
}

/// A mail thread to open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRef {
    pub id: String,
}

/// A request, tagged by its logical path.
///
/// On the wire: `{"path": "/contacts/search", "body": {"searchString": "ann"}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "path", content = "body")]
pub enum Request {
    /// Registration handshake; answered with the service metadata.
    #[serde(rename = "/register")]
    Register { context: ContextKind },

    /// Registers like `/register`, then keeps the connection open and
    /// pushes every bus message for `context` as a [`Response::Bus`]
    /// frame carrying this request's id.
    ///
    /// [`Response::Bus`]: crate::Response::Bus
    #[serde(rename = "/subscribe")]
    Subscribe { context: ContextKind },

    /// Toggle authorization. `authorized` is the state the client believes
    /// is current.
    #[serde(rename = "/authorize")]
    Authorize { authorized: bool },

    /// Contacts changed since `syncTimestamp` (epoch milliseconds), or all
    /// contacts when absent.
    #[serde(rename = "/contacts", rename_all = "camelCase")]
    Contacts {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sync_timestamp: Option<i64>,
    },

    #[serde(rename = "/contacts/search", rename_all = "camelCase")]
    ContactsSearch { search_string: String },

    #[serde(rename = "/contacts/match", rename_all = "camelCase")]
    ContactsMatch { phone_numbers: Vec<String> },

    #[serde(rename = "/conference/invite")]
    ConferenceInvite { conference: Conference },

    #[serde(rename = "/activities")]
    Activities { contact: ContactRef },

    #[serde(rename = "/activity")]
    Activity { activity: ActivityRef },

    /// Admission check before a page injects the widget.
    #[serde(rename = "/inject")]
    ShouldInject,

    /// An inbound call started ringing in the widget.
    #[serde(rename = "/call/ringing", rename_all = "camelCase")]
    CallRinging {
        session_id: String,
        phone_number: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caller_name: Option<String>,
    },

    /// The ringing notification for a session went away.
    #[serde(rename = "/call/dismissed", rename_all = "camelCase")]
    CallDismissed { session_id: String },

    /// Place an outbound call from the standalone window.
    #[serde(rename = "/call/dial", rename_all = "camelCase")]
    Dial { phone_number: String },

    /// Compose an SMS in the standalone window.
    #[serde(rename = "/sms/new", rename_all = "camelCase")]
    Sms { phone_number: String },

    /// Bring the floating widget window to the front.
    #[serde(rename = "/window/open")]
    OpenWindow,

    #[serde(rename = "/status")]
    Status,

    #[serde(rename = "/ping")]
    Ping,
}

impl Request {
    pub fn contacts(sync_timestamp: Option<i64>) -> Self {
        Self::Contacts { sync_timestamp }
    }

    pub fn search(query: impl Into<String>) -> Self {
        Self::ContactsSearch {
            search_string: query.into(),
        }
    }

    pub fn match_numbers(numbers: Vec<String>) -> Self {
        Self::ContactsMatch {
            phone_numbers: numbers,
        }
    }

    pub fn conference_invite(invite_text: impl Into<String>) -> Self {
        Self::ConferenceInvite {
            conference: Conference {
                invite_text: invite_text.into(),
            },
        }
    }

    pub fn activities(emails: Vec<String>) -> Self {
        Self::Activities {
            contact: ContactRef { emails },
        }
    }

    /// Logical path, for logging.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Register { .. } => "/register",
            Self::Subscribe { .. } => "/subscribe",
            Self::Authorize { .. } => "/authorize",
            Self::Contacts { .. } => "/contacts",
            Self::ContactsSearch { .. } => "/contacts/search",
            Self::ContactsMatch { .. } => "/contacts/match",
            Self::ConferenceInvite { .. } => "/conference/invite",
            Self::Activities { .. } => "/activities",
            Self::Activity { .. } => "/activity",
            Self::ShouldInject => "/inject",
            Self::CallRinging { .. } => "/call/ringing",
            Self::CallDismissed { .. } => "/call/dismissed",
            Self::Dial { .. } => "/call/dial",
            Self::Sms { .. } => "/sms/new",
            Self::OpenWindow => "/window/open",
            Self::Status => "/status",
            Self::Ping => "/ping",
        }
    }
}

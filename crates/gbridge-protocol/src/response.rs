//! Responses sent by the controller.

use gbridge_core::{Activity, Contact, CreatedEvent};
use serde::{Deserialize, Serialize};

use crate::bus::BusMessage;

/// Service metadata returned by the registration handshake.
///
/// Tells a client which paths the controller serves and how to label the
/// authorization toggle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceInfo {
    pub name: String,
    pub authorization_path: String,
    pub authorized_title: String,
    pub unauthorized_title: String,
    pub authorized: bool,
    pub contacts_path: String,
    pub contact_search_path: String,
    pub contact_match_path: String,
    pub conference_invite_path: String,
    pub conference_invite_title: String,
    pub activities_path: String,
    pub activity_path: String,
}

impl ServiceInfo {
    /// Metadata for the Google service in the given authorization state.
    pub fn google(authorized: bool) -> Self {
        Self {
            name: "Google".to_string(),
            authorization_path: "/authorize".to_string(),
            authorized_title: "Unauthorize".to_string(),
            unauthorized_title: "Authorize".to_string(),
            authorized,
            contacts_path: "/contacts".to_string(),
            contact_search_path: "/contacts/search".to_string(),
            contact_match_path: "/contacts/match".to_string(),
            conference_invite_path: "/conference/invite".to_string(),
            conference_invite_title: "Invite with Google Calendar".to_string(),
            activities_path: "/activities".to_string(),
            activity_path: "/activity".to_string(),
        }
    }
}

/// Controller state summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInfo {
    pub authorized: bool,
    pub attached_contexts: usize,
    pub receiver_ready: bool,
    pub queued_messages: usize,
    /// Epoch milliseconds of the last personal contacts sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personal_synced_at: Option<i64>,
    /// Epoch milliseconds of the last directory sync.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_synced_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Registered {
        service: ServiceInfo,
    },

    /// `{data: "ok"}` for requests without a payload.
    Ok,

    /// Contacts. `sync_timestamp` is set for `/contacts` and is the value the
    /// caller should present next time.
    Contacts {
        data: Vec<Contact>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sync_timestamp: Option<i64>,
    },

    Event {
        event: CreatedEvent,
    },

    Activities {
        data: Vec<Activity>,
    },

    Injection {
        allowed: bool,
    },

    Status {
        #[serde(flatten)]
        info: StatusInfo,
    },

    Error {
        #[serde(flatten)]
        error: ErrorResponse,
    },

    Pong,

    /// A bus message pushed to a subscribed connection.
    Bus {
        message: BusMessage,
    },
}

impl Response {
    pub fn contacts(data: Vec<Contact>) -> Self {
        Self::Contacts {
            data,
            sync_timestamp: None,
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            error: ErrorResponse::new(code, message),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Error { .. })
    }

    pub fn as_error(&self) -> Option<&ErrorResponse> {
        match self {
            Self::Error { error } => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InternalError,
    InvalidRequest,
    Timeout,
    /// No usable token; the user has to authorize first.
    Unauthorized,
    /// A Google API call failed.
    UpstreamError,
    RateLimited,
    NotFound,
    ShuttingDown,
}

impl ErrorCode {
    pub fn description(&self) -> &'static str {
        match self {
            Self::InternalError => "internal error",
            Self::InvalidRequest => "invalid request",
            Self::Timeout => "request timed out",
            Self::Unauthorized => "not authorized",
            Self::UpstreamError => "Google API error",
            Self::RateLimited => "rate limited by Google",
            Self::NotFound => "not found",
            Self::ShuttingDown => "controller is shutting down",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

impl std::error::Error for ErrorResponse {}

#[cfg(test)]
mod tests {
    use super::*;
    use gbridge_core::ContactSource;
    use serde_json::json;

    #[test]
    fn service_info_wire_names() {
        let json = serde_json::to_value(ServiceInfo::google(true)).unwrap();
        assert_eq!(json["name"], "Google");
        assert_eq!(json["authorized"], true);
        assert_eq!(json["contactMatchPath"], "/contacts/match");
        assert_eq!(json["conferenceInviteTitle"], "Invite with Google Calendar");
    }

    #[test]
    fn contacts_response_omits_missing_timestamp() {
        let contact = Contact::new("1", "Ann", ContactSource::Personal);
        let json = serde_json::to_value(Response::contacts(vec![contact])).unwrap();
        assert_eq!(json["type"], "contacts");
        assert!(json.get("sync_timestamp").is_none());
    }

    #[test]
    fn pushed_bus_message_shape() {
        let response = Response::Bus {
            message: BusMessage::NewSms {
                phone_number: "+1".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({"type": "bus", "message": {"action": "newSms", "phoneNumber": "+1"}})
        );
    }

    #[test]
    fn error_response_is_flattened() {
        let response = Response::error(ErrorCode::Unauthorized, "sign in first");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(
            json,
            json!({"type": "error", "code": "unauthorized", "message": "sign in first"})
        );
        assert!(!response.is_success());
        assert_eq!(response.as_error().unwrap().code, ErrorCode::Unauthorized);
    }

    #[test]
    fn status_roundtrip() {
        let response = Response::Status {
            info: StatusInfo {
                authorized: false,
                attached_contexts: 2,
                receiver_ready: true,
                queued_messages: 0,
                personal_synced_at: Some(5),
                directory_synced_at: None,
            },
        };
        let json = serde_json::to_string(&response).unwrap();
        let parsed: Response = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, response);
    }
}

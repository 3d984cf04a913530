//! Mail and calendar results handed back to clients.

use serde::{Deserialize, Serialize};

/// A recent mail thread involving a contact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Thread id, used to open the thread later.
    pub id: String,
    pub subject: String,
    /// Raw `Date` header of the last message in the thread.
    pub time: String,
}

/// The calendar event created for a conference invite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedEvent {
    pub id: String,
    #[serde(default)]
    pub summary: Option<String>,
    /// Link to the event in the calendar web UI.
    pub html_link: String,
}

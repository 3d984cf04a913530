//! Conference invites as calendar events.

use chrono::{DateTime, Duration, Utc};
use gbridge_core::CreatedEvent;
use serde_json::json;
use tracing::info;

use crate::api::{ApiRequest, GoogleApi};
use crate::error::GoogleResult;

pub const CONFERENCE_TITLE: &str = "New Conference";

fn event_body(invite_text: &str, start: DateTime<Utc>) -> serde_json::Value {
    let end = start + Duration::hours(1);
    json!({
        "start": { "dateTime": start.to_rfc3339() },
        "end": { "dateTime": end.to_rfc3339() },
        "summary": CONFERENCE_TITLE,
        "description": invite_text,
    })
}

impl GoogleApi {
    /// Creates a one hour event on the primary calendar, starting now, with
    /// `invite_text` as its description.
    ///
    /// Prompts the user to sign in first when no valid token is held.
    pub async fn create_conference(&self, invite_text: &str) -> GoogleResult<Option<CreatedEvent>> {
        if !self.tokens().is_valid().await {
            self.tokens().authorize(true).await?;
        }

        let url = format!("{}/calendars/primary/events", self.endpoints().calendar);
        let event: Option<CreatedEvent> = self
            .fetch_as(ApiRequest::post(url, event_body(invite_text, Utc::now())))
            .await?;
        if let Some(event) = &event {
            info!(event_id = %event.id, "created conference event");
        }
        Ok(event)
    }
}

//! Desktop notifications for ringing calls.
//!
//! The widget reports a ringing call every time its state changes, so the
//! same session is usually reported several times. [`RingingNotifier`]
//! keeps one entry per open session and shows a notification only for the
//! first report; dismissing the session clears the entry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use notify_rust::Notification;
#[cfg(target_os = "linux")]
use notify_rust::Urgency;
use tracing::{debug, error, info};

/// Shows a notification.
pub trait Notifier: Send + Sync {
    fn notify(&self, summary: &str, body: &str) -> Result<(), String>;
}

#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    app_name: String,
    timeout: Duration,
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self {
            app_name: "gbridge".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl DesktopNotifier {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Default::default()
        }
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, summary: &str, body: &str) -> Result<(), String> {
        let mut notification = Notification::new();
        notification
            .appname(&self.app_name)
            .summary(summary)
            .body(body)
            .timeout(self.timeout);

        #[cfg(target_os = "linux")]
        notification.urgency(Urgency::Critical);

        notification.show().map(|_| ()).map_err(|e| e.to_string())
    }
}

/// One notification per ringing session.
pub struct RingingNotifier {
    notifier: Arc<dyn Notifier>,
    open: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl std::fmt::Debug for RingingNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingingNotifier")
            .field("open", &self.open_sessions())
            .finish_non_exhaustive()
    }
}

impl RingingNotifier {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            notifier,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Notifies about `session_id` unless it is already showing.
    ///
    /// Returns whether a notification was shown.
    pub fn ringing(&self, session_id: &str, phone_number: &str, caller_name: Option<&str>) -> bool {
        {
            let mut open = self.open.lock().unwrap_or_else(|e| e.into_inner());
            if open.contains_key(session_id) {
                debug!(session_id, "call already notified");
                return false;
            }
            open.insert(session_id.to_string(), Utc::now());
        }

        let summary = match caller_name {
            Some(name) if !name.is_empty() => format!("Incoming call from {name}"),
            _ => "Incoming call".to_string(),
        };
        match self.notifier.notify(&summary, phone_number) {
            Ok(()) => {
                info!(session_id, "ringing notification shown");
                true
            }
            Err(e) => {
                error!(session_id, error = %e, "failed to show ringing notification");
                // Not shown, so a later report may try again.
                self.dismiss(session_id);
                false
            }
        }
    }

    /// Forgets `session_id`. Returns whether it was open.
    pub fn dismiss(&self, session_id: &str) -> bool {
        self.open
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(session_id)
            .is_some()
    }

    pub fn open_sessions(&self) -> usize {
        self.open.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

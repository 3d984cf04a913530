//! Configuration for the Google adapter.

use std::time::Duration;

/// Scopes requested on every authorization.
pub const DEFAULT_SCOPES: &[&str] = &[
    "openid",
    "email",
    "profile",
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/calendar",
    "https://www.googleapis.com/auth/contacts.readonly",
    "https://www.googleapis.com/auth/admin.directory.user.readonly",
    "https://www.googleapis.com/auth/user.emails.read",
];

/// Base URLs of every Google endpoint the adapter talks to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoogleEndpoints {
    pub auth: String,
    pub revoke: String,
    pub userinfo: String,
    pub people: String,
    pub directory: String,
    pub calendar: String,
    pub gmail: String,
    /// Web UI link prefix for mail threads.
    pub mail_web: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            auth: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            revoke: "https://accounts.google.com/o/oauth2/revoke".to_string(),
            userinfo: "https://www.googleapis.com/userinfo/v2/me".to_string(),
            people: "https://people.googleapis.com/v1".to_string(),
            directory: "https://www.googleapis.com/admin/directory/v1".to_string(),
            calendar: "https://www.googleapis.com/calendar/v3".to_string(),
            gmail: "https://www.googleapis.com/gmail/v1".to_string(),
            mail_web: "https://mail.google.com/mail/u".to_string(),
        }
    }
}

impl GoogleEndpoints {
    /// Re-roots every endpoint under `base`, keeping Google's paths.
    ///
    /// Used to point the adapter at a local mock server.
    pub fn with_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            auth: format!("{base}/o/oauth2/v2/auth"),
            revoke: format!("{base}/o/oauth2/revoke"),
            userinfo: format!("{base}/userinfo/v2/me"),
            people: format!("{base}/v1"),
            directory: format!("{base}/admin/directory/v1"),
            calendar: format!("{base}/calendar/v3"),
            gmail: format!("{base}/gmail/v1"),
            mail_web: format!("{base}/mail/u"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    /// OAuth client id of the registered application.
    pub client_id: String,
    pub scopes: Vec<String>,
    pub endpoints: GoogleEndpoints,
    /// Timeout applied to every HTTP request.
    pub http_timeout: Duration,
    /// How long an authorization flow may wait for its redirect.
    pub flow_timeout: Duration,
    /// Tokens expiring within this window are refreshed before use.
    pub refresh_lookahead: Duration,
    pub personal_staleness: Duration,
    pub directory_staleness: Duration,
    /// Ports tried, in order, for the loopback redirect listener.
    pub loopback_ports: (u16, u16),
}

impl GoogleConfig {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            endpoints: GoogleEndpoints::default(),
            http_timeout: Duration::from_secs(30),
            flow_timeout: Duration::from_secs(300),
            refresh_lookahead: Duration::from_secs(5 * 60),
            personal_staleness: Duration::from_secs(30),
            directory_staleness: Duration::from_secs(5 * 60),
            loopback_ports: (8765, 8775),
        }
    }

    #[must_use]
    pub fn with_endpoints(mut self, endpoints: GoogleEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_flow_timeout(mut self, timeout: Duration) -> Self {
        self.flow_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_staleness(mut self, personal: Duration, directory: Duration) -> Self {
        self.personal_staleness = personal;
        self.directory_staleness = directory;
        self
    }

    #[must_use]
    pub fn with_loopback_ports(mut self, first: u16, last: u16) -> Self {
        self.loopback_ports = (first, last);
        self
    }

    /// Builds the HTTP client used for API calls.
    pub fn http_client(&self) -> reqwest::Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(self.http_timeout)
            .build()
    }
}

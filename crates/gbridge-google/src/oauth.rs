//! OAuth 2.0 implicit flow for Google.
//!
//! The adapter never sees a refresh token: both the first authorization and
//! every later refresh run the same flow, interactively or silently, and
//! read the new access token from the redirect URI fragment.
//!
//! # Flow
//!
//! 1. Build the consent URL with a random `state`
//! 2. Hand it to an [`AuthFlowLauncher`], which returns the final redirect URI
//! 3. Parse `access_token`, `expires_in`, `token_type` and `scope` out of the
//!    fragment and check `state`
//!
//! [`LoopbackLauncher`] implements the launcher for desktop use: it opens the
//! system browser and listens on a loopback port for the redirect.

use std::net::TcpListener as StdTcpListener;
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use futures_util::future::BoxFuture;
use rand::Rng as _;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::GoogleConfig;
use crate::error::AuthError;
use crate::tokens::Token;

/// One authorization attempt: the consent URL and the state it carries.
#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub url: String,
    pub state: String,
}

impl AuthRequest {
    pub fn new(config: &GoogleConfig, redirect_uri: &str, interactive: bool) -> Self {
        let state = generate_state();
        let mut url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=token&scope={}&state={}",
            config.endpoints.auth,
            urlencoding::encode(&config.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode(&config.scopes.join(" ")),
            urlencoding::encode(&state),
        );
        if !interactive {
            url.push_str("&prompt=none");
        }
        Self { url, state }
    }
}

fn generate_state() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Extracts a token from the redirect URI returned by the flow.
///
/// Parameters are read from the fragment, falling back to the query string.
/// When `expected_state` is given, the redirect must echo it.
pub fn parse_redirect(redirect_uri: &str, expected_state: Option<&str>) -> Result<Token, AuthError> {
    let url = Url::parse(redirect_uri).map_err(|e| AuthError::InvalidRedirect(e.to_string()))?;
    let params = url.fragment().or_else(|| url.query()).unwrap_or_default();

    let mut access_token = None;
    let mut expires_in = None;
    let mut token_type = None;
    let mut scope = None;
    let mut state = None;
    for (key, value) in url::form_urlencoded::parse(params.as_bytes()) {
        match key.as_ref() {
            "access_token" => access_token = Some(value.into_owned()),
            "expires_in" => expires_in = Some(value.into_owned()),
            "token_type" => token_type = Some(value.into_owned()),
            "scope" => scope = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Err(AuthError::Denied(value.into_owned())),
            _ => {}
        }
    }

    if let Some(expected) = expected_state
        && state.as_deref() != Some(expected)
    {
        return Err(AuthError::StateMismatch);
    }

    let access_token = access_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::InvalidRedirect("missing access_token".to_string()))?;
    let expires_in: i64 = expires_in
        .as_deref()
        .ok_or_else(|| AuthError::InvalidRedirect("missing expires_in".to_string()))?
        .parse()
        .map_err(|_| AuthError::InvalidRedirect("expires_in is not a number".to_string()))?;

    Token::try_new(
        access_token,
        token_type.unwrap_or_else(|| "Bearer".to_string()),
        scope.unwrap_or_default(),
        expires_in,
    )
    .ok_or_else(|| AuthError::InvalidRedirect("expires_in out of range".to_string()))
}

/// Runs an authorization flow and returns the final redirect URI.
pub trait AuthFlowLauncher: Send + Sync {
    /// Where Google should send the browser back to.
    fn redirect_uri(&self) -> String;

    /// Shows `url` to the user (or loads it without UI when `interactive` is
    /// false) and resolves with the URI Google redirected to.
    fn launch<'a>(&'a self, url: &'a str, interactive: bool) -> BoxFuture<'a, Result<String, AuthError>>;
}

/// Opens a URL in a browser.
pub type BrowserOpener = Arc<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// Page served at the redirect URI. The fragment never reaches the server,
/// so the page forwards it to `/token` as a query string.
const RELAY_PAGE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n\
<html><body><p>Completing sign-in&hellip;</p><script>\
location.replace('/token?' + location.hash.substring(1));\
</script></body></html>";

const DONE_PAGE: &str = "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n\
<html><body><h1>Signed in</h1><p>You can close this window.</p></body></html>";

const NOT_FOUND: &str = "HTTP/1.1 404 Not Found\r\nConnection: close\r\n\r\n";

/// Desktop launcher: system browser plus a loopback redirect listener.
pub struct LoopbackLauncher {
    listener: Mutex<TcpListener>,
    port: u16,
    timeout: Duration,
    browser: BrowserOpener,
}

impl std::fmt::Debug for LoopbackLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopbackLauncher")
            .field("port", &self.port)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl LoopbackLauncher {
    /// Binds the first free port in `ports` (inclusive). A range of `(0, 0)`
    /// lets the OS pick.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(ports: (u16, u16), timeout: Duration) -> Result<Self, AuthError> {
        let std_listener = (ports.0..=ports.1)
            .find_map(|port| StdTcpListener::bind(("127.0.0.1", port)).ok())
            .ok_or_else(|| {
                AuthError::Launcher(format!("no free port in {}-{}", ports.0, ports.1))
            })?;
        std_listener
            .set_nonblocking(true)
            .map_err(|e| AuthError::Launcher(e.to_string()))?;
        let port = std_listener
            .local_addr()
            .map_err(|e| AuthError::Launcher(e.to_string()))?
            .port();
        let listener =
            TcpListener::from_std(std_listener).map_err(|e| AuthError::Launcher(e.to_string()))?;
        debug!(port, "bound loopback redirect listener");

        Ok(Self {
            listener: Mutex::new(listener),
            port,
            timeout,
            browser: Arc::new(|url: &str| open::that(url)),
        })
    }

    /// Replaces the browser used to open consent URLs.
    #[must_use]
    pub fn with_browser(mut self, browser: BrowserOpener) -> Self {
        self.browser = browser;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    async fn wait_for_redirect(&self) -> Result<String, AuthError> {
        let listener = self.listener.lock().await;
        loop {
            let (stream, _) = listener
                .accept()
                .await
                .map_err(|e| AuthError::Launcher(e.to_string()))?;
            if let Some(params) = self.serve(stream).await {
                return Ok(format!("{}#{}", self.redirect_uri(), params));
            }
        }
    }

    /// Answers one browser request. Returns the forwarded parameters once
    /// the relay page has called back.
    async fn serve(&self, mut stream: TcpStream) -> Option<String> {
        let mut request_line = String::new();
        {
            let mut reader = BufReader::new(&mut stream);
            if reader.read_line(&mut request_line).await.is_err() {
                return None;
            }
            // Drain headers so closing the socket does not reset it.
            let mut header = String::new();
            while reader.read_line(&mut header).await.is_ok_and(|n| n > 2) {
                header.clear();
            }
        }

        let mut parts = request_line.split_whitespace();
        let (Some("GET"), Some(target)) = (parts.next(), parts.next()) else {
            let _ = stream.write_all(NOT_FOUND.as_bytes()).await;
            return None;
        };
        let (path, query) = target.split_once('?').unwrap_or((target, ""));

        let (page, forwarded) = match path {
            "/callback" => (RELAY_PAGE, None),
            "/token" => (DONE_PAGE, Some(query.to_string())),
            _ => (NOT_FOUND, None),
        };
        let _ = stream.write_all(page.as_bytes()).await;
        let _ = stream.shutdown().await;
        forwarded
    }
}

impl AuthFlowLauncher for LoopbackLauncher {
    fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}/callback", self.port)
    }

    fn launch<'a>(&'a self, url: &'a str, interactive: bool) -> BoxFuture<'a, Result<String, AuthError>> {
        Box::pin(async move {
            info!(interactive, "opening browser for Google sign-in");
            if let Err(e) = (self.browser)(url) {
                warn!(error = %e, "failed to open browser");
                if !interactive {
                    return Err(AuthError::Launcher(e.to_string()));
                }
                eprintln!("\nOpen this URL in your browser to sign in:\n\n{url}\n");
            }

            tokio::time::timeout(self.timeout, self.wait_for_redirect())
                .await
                .map_err(|_| AuthError::Timeout(self.timeout))?
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> GoogleConfig {
        GoogleConfig::new("client.apps.googleusercontent.com")
    }

    fn query_param(url: &str, name: &str) -> Option<String> {
        Url::parse(url)
            .ok()?
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn auth_url_requests_token_response() {
        let request = AuthRequest::new(&config(), "http://127.0.0.1:1/callback", true);
        assert!(request.url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert_eq!(query_param(&request.url, "response_type").as_deref(), Some("token"));
        assert_eq!(
            query_param(&request.url, "redirect_uri").as_deref(),
            Some("http://127.0.0.1:1/callback")
        );
        assert_eq!(query_param(&request.url, "state"), Some(request.state.clone()));
        assert!(query_param(&request.url, "scope").unwrap().contains("contacts.readonly"));
        assert!(query_param(&request.url, "prompt").is_none());
    }

    #[test]
    fn silent_request_suppresses_prompt() {
        let request = AuthRequest::new(&config(), "http://127.0.0.1:1/callback", false);
        assert_eq!(query_param(&request.url, "prompt").as_deref(), Some("none"));
    }

    #[test]
    fn states_differ() {
        let a = AuthRequest::new(&config(), "r", true);
        let b = AuthRequest::new(&config(), "r", true);
        assert_ne!(a.state, b.state);
    }

    #[test]
    fn parses_fragment() {
        let token = parse_redirect(
            "https://app.example/redirect#access_token=ya29.abc&expires_in=3599&token_type=Bearer&scope=email%20profile&state=s1",
            Some("s1"),
        )
        .unwrap();
        assert_eq!(token.access_token, "ya29.abc");
        assert_eq!(token.token_type, "Bearer");
        assert_eq!(token.scope, "email profile");
        assert!(token.is_valid());
        assert!(!token.needs_refresh(Duration::from_secs(300)));
    }

    #[test]
    fn redirect_errors() {
        assert_eq!(
            parse_redirect("https://x/#error=access_denied&state=s", Some("s")),
            Err(AuthError::Denied("access_denied".to_string()))
        );
        assert_eq!(
            parse_redirect("https://x/#access_token=a&expires_in=10&state=other", Some("s")),
            Err(AuthError::StateMismatch)
        );
        assert!(matches!(
            parse_redirect("https://x/#expires_in=10", None),
            Err(AuthError::InvalidRedirect(_))
        ));
        assert!(matches!(
            parse_redirect("https://x/#access_token=a&expires_in=soon", None),
            Err(AuthError::InvalidRedirect(_))
        ));
        for huge in ["9223372036854775807", "-9223372036854775808"] {
            assert_eq!(
                parse_redirect(&format!("https://x/#access_token=a&expires_in={huge}"), None),
                Err(AuthError::InvalidRedirect("expires_in out of range".to_string()))
            );
        }
        assert!(matches!(
            parse_redirect("not a uri", None),
            Err(AuthError::InvalidRedirect(_))
        ));
    }

    async fn http_get(port: u16, target: &str) -> String {
        use tokio::io::AsyncReadExt;

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream
            .write_all(format!("GET {target} HTTP/1.1\r\nHost: localhost\r\n\r\n").as_bytes())
            .await
            .unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();
        body
    }

    #[tokio::test]
    async fn loopback_relays_fragment() {
        let launcher = LoopbackLauncher::bind((0, 0), Duration::from_secs(5))
            .unwrap()
            .with_browser(Arc::new(|_url: &str| Ok(())));
        let port = launcher.port();
        let request = AuthRequest::new(&config(), &launcher.redirect_uri(), true);

        let state = request.state.clone();
        let browser = tokio::spawn(async move {
            let relay = http_get(port, "/callback").await;
            assert!(relay.contains("location.replace"));
            let done = http_get(
                port,
                &format!("/token?access_token=tok&expires_in=3600&token_type=Bearer&state={state}"),
            )
            .await;
            assert!(done.contains("Signed in"));
        });

        let redirect = launcher.launch(&request.url, true).await.unwrap();
        browser.await.unwrap();

        let token = parse_redirect(&redirect, Some(&request.state)).unwrap();
        assert_eq!(token.access_token, "tok");
    }

    #[tokio::test(start_paused = true)]
    async fn loopback_times_out() {
        let launcher = LoopbackLauncher::bind((0, 0), Duration::from_secs(1))
            .unwrap()
            .with_browser(Arc::new(|_url: &str| Ok(())));
        let result = launcher.launch("http://unused", true).await;
        assert_eq!(result, Err(AuthError::Timeout(Duration::from_secs(1))));
    }
}

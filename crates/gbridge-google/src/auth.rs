//! Authorization state and the token lifecycle.
//!
//! [`TokenManager`] is the only owner of the bearer token. Every
//! acquisition, interactive or silent, goes through one shared in-flight
//! handle, so concurrent callers never start a second browser flow and
//! nobody reads a token while it is being replaced.

use std::sync::Arc;

use gbridge_core::{LocalStore, SingleFlight};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::GoogleConfig;
use crate::error::AuthError;
use crate::oauth::{AuthFlowLauncher, AuthRequest, parse_redirect};
use crate::tokens::{Token, TokenStore};

type AuthOutcome = Result<Token, AuthError>;

struct Inner {
    config: GoogleConfig,
    store: TokenStore,
    launcher: Arc<dyn AuthFlowLauncher>,
    http: reqwest::Client,
    token: RwLock<Option<Token>>,
    flight: SingleFlight<AuthOutcome>,
}

/// Owns the token. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("client_id", &self.inner.config.client_id)
            .field("flight", &self.inner.flight)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    pub fn new(
        config: GoogleConfig,
        store: LocalStore,
        launcher: Arc<dyn AuthFlowLauncher>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                store: TokenStore::new(store),
                launcher,
                http,
                token: RwLock::new(None),
                flight: SingleFlight::new(),
            }),
        }
    }

    /// Loads the persisted token, refreshing it silently when it is about
    /// to expire. Returns whether a usable token is held afterwards.
    pub async fn restore(&self) -> bool {
        let stored = match self.inner.store.load().await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(error = %e, "ignoring unreadable stored token");
                None
            }
        };
        let Some(token) = stored else {
            debug!("no stored token");
            return false;
        };

        debug!(expires_at = %token.expires_at, "restored token");
        *self.inner.token.write().await = Some(token);
        self.ensure_valid().await.is_some()
    }

    /// Acquires a new token, joining any acquisition already in flight.
    ///
    /// On failure the in-memory token is dropped; the stored copy is left
    /// for the next restore.
    pub async fn authorize(&self, interactive: bool) -> Result<Token, AuthError> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .flight
            .run(move || async move { inner.acquire(interactive).await })
            .await
    }

    /// Forgets the token locally, then tells Google to revoke it.
    ///
    /// A failed remote call is logged and otherwise ignored.
    pub async fn revoke(&self) {
        self.inner.flight.wait().await;

        let token = self.inner.token.write().await.take();
        if let Err(e) = self.inner.store.clear().await {
            warn!(error = %e, "failed to clear stored token");
        }
        info!("revoked local authorization");

        let Some(token) = token else {
            return;
        };
        let result = self
            .inner
            .http
            .post(&self.inner.config.endpoints.revoke)
            .query(&[("token", token.access_token.as_str())])
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => debug!("remote revoke accepted"),
            Ok(response) => warn!(status = %response.status(), "remote revoke rejected"),
            Err(e) => warn!(error = %e, "remote revoke failed"),
        }
    }

    /// Returns a token that is good beyond the refresh lookahead.
    ///
    /// Waits for any acquisition in flight, refreshes silently when the
    /// current token is close to expiry, and returns `None` when there is no
    /// token to refresh or the refresh fails.
    pub async fn ensure_valid(&self) -> Option<Token> {
        self.inner.flight.wait().await;

        let current = self.inner.token.read().await.clone()?;
        if !current.needs_refresh(self.inner.config.refresh_lookahead) {
            return Some(current);
        }

        debug!(expires_at = %current.expires_at, "token near expiry, refreshing");
        match self.authorize(false).await {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, "silent token refresh failed");
                None
            }
        }
    }

    /// True if a token is held and has not expired as of now.
    pub async fn is_valid(&self) -> bool {
        self.inner.flight.wait().await;
        self.inner
            .token
            .read()
            .await
            .as_ref()
            .is_some_and(Token::is_valid)
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.flight.is_in_flight()
    }
}

impl Inner {
    async fn acquire(&self, interactive: bool) -> AuthOutcome {
        let request = AuthRequest::new(&self.config, &self.launcher.redirect_uri(), interactive);
        let outcome = match self.launcher.launch(&request.url, interactive).await {
            Ok(redirect) => parse_redirect(&redirect, Some(&request.state)),
            Err(e) => Err(e),
        };

        match outcome {
            Ok(token) => {
                if let Err(e) = self.store.save(&token).await {
                    *self.token.write().await = None;
                    return Err(e.into());
                }
                info!(interactive, expires_at = %token.expires_at, "authorized with Google");
                *self.token.write().await = Some(token.clone());
                Ok(token)
            }
            Err(e) => {
                warn!(interactive, error = %e, "Google authorization failed");
                *self.token.write().await = None;
                Err(e)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use futures_util::future::{BoxFuture, join_all};
    use url::Url;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::GoogleEndpoints;

    /// Answers every flow with a token valid for `expires_in` seconds.
    pub(crate) struct FakeLauncher {
        pub calls: AtomicUsize,
        pub expires_in: i64,
        pub fail_with: Option<AuthError>,
        pub delay: Duration,
    }

    impl FakeLauncher {
        pub(crate) fn granting(expires_in: i64) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                expires_in,
                fail_with: None,
                delay: Duration::from_millis(20),
            }
        }

        pub(crate) fn failing(error: AuthError) -> Self {
            Self {
                fail_with: Some(error),
                ..Self::granting(3600)
            }
        }
    }

    impl AuthFlowLauncher for FakeLauncher {
        fn redirect_uri(&self) -> String {
            "https://app.example/redirect".to_string()
        }

        fn launch<'a>(&'a self, url: &'a str, _interactive: bool) -> BoxFuture<'a, Result<String, AuthError>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(self.delay).await;
                if let Some(err) = &self.fail_with {
                    return Err(err.clone());
                }
                let state = Url::parse(url)
                    .unwrap()
                    .query_pairs()
                    .find(|(k, _)| k == "state")
                    .map(|(_, v)| v.into_owned())
                    .unwrap();
                Ok(format!(
                    "{}#access_token=token-{n}&expires_in={}&token_type=Bearer&scope=email&state={state}",
                    self.redirect_uri(),
                    self.expires_in
                ))
            })
        }
    }

    pub(crate) fn manager_with(
        launcher: Arc<FakeLauncher>,
        store: LocalStore,
        base: &str,
    ) -> TokenManager {
        let config = GoogleConfig::new("client")
            .with_endpoints(GoogleEndpoints::with_base(base));
        let http = config.http_client().unwrap();
        TokenManager::new(config, store, launcher, http)
    }

    /// A manager already holding a long-lived token.
    pub(crate) async fn authorized_manager(store: LocalStore, base: &str) -> TokenManager {
        let launcher = Arc::new(FakeLauncher::granting(3600));
        let manager = manager_with(launcher, store, base);
        manager.authorize(true).await.unwrap();
        manager
    }

    #[tokio::test]
    async fn authorize_persists_token() {
        let store = LocalStore::in_memory();
        let launcher = Arc::new(FakeLauncher::granting(3600));
        let manager = manager_with(launcher, store.clone(), "http://unused");

        let token = manager.authorize(true).await.unwrap();
        assert_eq!(token.access_token, "token-1");
        assert!(manager.is_valid().await);

        let stored = TokenStore::new(store).load().await.unwrap().unwrap();
        assert_eq!(stored.access_token, "token-1");
    }

    #[tokio::test]
    async fn failed_authorize_clears_memory() {
        let store = LocalStore::in_memory();
        TokenStore::new(store.clone())
            .save(&Token::new("old", "Bearer", "email", 3600))
            .await
            .unwrap();

        let launcher = Arc::new(FakeLauncher::failing(AuthError::Cancelled));
        let manager = manager_with(launcher, store, "http://unused");
        assert!(manager.restore().await);

        assert_eq!(manager.authorize(true).await, Err(AuthError::Cancelled));
        assert!(!manager.is_valid().await);
        assert!(manager.ensure_valid().await.is_none());
    }

    #[tokio::test]
    async fn concurrent_ensure_valid_refreshes_once() {
        let launcher = Arc::new(FakeLauncher::granting(3600));
        let manager = manager_with(Arc::clone(&launcher), LocalStore::in_memory(), "http://unused");
        *manager.inner.token.write().await = Some(Token::new("expiring", "Bearer", "email", 60));

        let results = join_all((0..10).map(|_| manager.ensure_valid())).await;

        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
        for token in results {
            assert_eq!(token.unwrap().access_token, "token-1");
        }
        assert!(!manager.is_refreshing());
    }

    #[tokio::test]
    async fn fresh_token_is_not_refreshed() {
        let launcher = Arc::new(FakeLauncher::granting(3600));
        let manager = manager_with(Arc::clone(&launcher), LocalStore::in_memory(), "http://unused");
        manager.authorize(true).await.unwrap();

        for _ in 0..3 {
            assert!(manager.ensure_valid().await.is_some());
        }
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn no_token_means_no_silent_flow() {
        let launcher = Arc::new(FakeLauncher::granting(3600));
        let manager = manager_with(Arc::clone(&launcher), LocalStore::in_memory(), "http://unused");

        assert!(!manager.restore().await);
        assert!(manager.ensure_valid().await.is_none());
        assert!(!manager.is_valid().await);
        assert_eq!(launcher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn revoke_clears_locally_and_notifies_google() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/o/oauth2/revoke"))
            .and(query_param("token", "token-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = LocalStore::in_memory();
        let manager = authorized_manager(store.clone(), &server.uri()).await;

        manager.revoke().await;

        assert!(!manager.is_valid().await);
        assert!(TokenStore::new(store).load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn revoke_survives_remote_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/o/oauth2/revoke"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let store = LocalStore::in_memory();
        let manager = authorized_manager(store.clone(), &server.uri()).await;

        manager.revoke().await;
        assert!(!manager.is_valid().await);
        assert!(TokenStore::new(store).load().await.unwrap().is_none());
    }
}

//! Authenticated access to Google REST endpoints.
//!
//! [`GoogleApi::fetch`] is the one primitive every Google call goes through.
//! It resolves a usable token first and, when there is none, returns
//! `Ok(None)` instead of an error: callers treat that as "not authorized
//! yet". Transport failures are logged and reported the same way, so a
//! flaky network degrades to serving cached data. Only an HTTP error status
//! or an unparseable body is an `Err`.

use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::auth::TokenManager;
use crate::config::GoogleEndpoints;
use crate::error::{GoogleError, GoogleResult};

/// A request to a Google endpoint.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            params: Vec::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            url: url.into(),
            params: Vec::new(),
            body: Some(body),
        }
    }

    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.params.push((key.into(), value.to_string()));
        self
    }

    #[must_use]
    pub fn with_optional_param(self, key: impl Into<String>, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.with_param(key, value),
            None => self,
        }
    }
}

/// The signed-in user's profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    /// Hosted domain; present only for organization accounts.
    #[serde(default)]
    pub hd: Option<String>,
}

impl UserInfo {
    pub fn has_directory(&self) -> bool {
        self.hd.as_deref().is_some_and(|hd| !hd.is_empty())
    }
}

/// Authenticated client for Google endpoints. Clones share the profile
/// cache and the token manager.
#[derive(Debug, Clone)]
pub struct GoogleApi {
    tokens: TokenManager,
    http: reqwest::Client,
    endpoints: Arc<GoogleEndpoints>,
    user: Arc<RwLock<Option<UserInfo>>>,
}

impl GoogleApi {
    pub fn new(tokens: TokenManager, http: reqwest::Client, endpoints: GoogleEndpoints) -> Self {
        Self {
            tokens,
            http,
            endpoints: Arc::new(endpoints),
            user: Arc::new(RwLock::new(None)),
        }
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    pub fn endpoints(&self) -> &GoogleEndpoints {
        &self.endpoints
    }

    /// Issues `request` with the current token.
    ///
    /// Returns `Ok(None)` when no usable token exists or the request never
    /// got a response.
    pub async fn fetch(&self, request: ApiRequest) -> GoogleResult<Option<Value>> {
        let Some(token) = self.tokens.ensure_valid().await else {
            debug!(url = %request.url, "no usable token, skipping request");
            return Ok(None);
        };

        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .query(&request.params)
            .query(&[("access_token", token.access_token.as_str()), ("alt", "json")]);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(
                    url = %request.url,
                    timeout = e.is_timeout(),
                    error = %e,
                    "Google request failed"
                );
                return Ok(None);
            }
        };

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %request.url, error = %e, "failed to read Google response");
                return Ok(None);
            }
        };

        if !status.is_success() {
            if let Some(retry_after) = retry_after {
                warn!(url = %request.url, %status, %retry_after, "Google asked to back off");
            }
            return Err(GoogleError::from_status(status.as_u16(), &body));
        }

        if body.trim().is_empty() {
            return Ok(Some(Value::Null));
        }
        serde_json::from_str(&body).map(Some).map_err(|e| {
            GoogleError::invalid_response(format!("unparseable response from {}", request.url))
                .with_source(e)
        })
    }

    /// [`fetch`](Self::fetch), decoded into `T`.
    pub async fn fetch_as<T: DeserializeOwned>(&self, request: ApiRequest) -> GoogleResult<Option<T>> {
        let url = request.url.clone();
        match self.fetch(request).await? {
            None => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                GoogleError::invalid_response(format!("unexpected response shape from {url}"))
                    .with_source(e)
            }),
        }
    }

    /// The cached profile, fetched on first use.
    pub async fn user_info(&self) -> GoogleResult<Option<UserInfo>> {
        if let Some(user) = self.user.read().await.clone() {
            return Ok(Some(user));
        }
        self.refresh_user_info().await
    }

    /// Re-reads the profile from Google.
    pub async fn refresh_user_info(&self) -> GoogleResult<Option<UserInfo>> {
        let user: Option<UserInfo> = self
            .fetch_as(ApiRequest::get(self.endpoints.userinfo.clone()))
            .await?;
        if let Some(user) = &user {
            debug!(hosted_domain = ?user.hd, "loaded Google profile");
            *self.user.write().await = Some(user.clone());
        }
        Ok(user)
    }

    pub async fn clear_user_info(&self) {
        self.user.write().await.take();
    }
}

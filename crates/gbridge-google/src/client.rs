//! Wires the token manager, API client and sync engine together.

use std::sync::Arc;

use gbridge_core::LocalStore;

use crate::api::GoogleApi;
use crate::auth::TokenManager;
use crate::config::GoogleConfig;
use crate::error::{GoogleError, GoogleResult};
use crate::oauth::AuthFlowLauncher;
use crate::sync::SyncEngine;

/// Everything needed to talk to Google on behalf of one user.
#[derive(Debug, Clone)]
pub struct GoogleClient {
    pub tokens: TokenManager,
    pub api: GoogleApi,
    pub sync: SyncEngine,
}

impl GoogleClient {
    pub fn new(
        config: GoogleConfig,
        store: LocalStore,
        launcher: Arc<dyn AuthFlowLauncher>,
    ) -> GoogleResult<Self> {
        let http = config.http_client().map_err(|e| {
            GoogleError::configuration("failed to build HTTP client").with_source(e)
        })?;
        let personal = config.personal_staleness;
        let directory = config.directory_staleness;
        let endpoints = config.endpoints.clone();

        let tokens = TokenManager::new(config, store.clone(), launcher, http.clone());
        let api = GoogleApi::new(tokens.clone(), http, endpoints);
        let sync = SyncEngine::new(api.clone(), store, personal, directory);
        Ok(Self { tokens, api, sync })
    }

    /// Signs out and forgets the cached profile.
    pub async fn sign_out(&self) {
        self.tokens.revoke().await;
        self.api.clear_user_info().await;
    }
}

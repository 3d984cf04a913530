//! Google adapter: OAuth token lifecycle, contact synchronization, calendar
//! events and mail activity.
//!
//! [`GoogleClient`] bundles the pieces. [`TokenManager`] owns the bearer
//! token, [`GoogleApi`] issues authenticated requests with it, and
//! [`SyncEngine`] keeps the personal and directory contact collections
//! cached in a [`LocalStore`](gbridge_core::LocalStore).

pub mod api;
pub mod auth;
pub mod calendar;
pub mod client;
pub mod config;
pub mod contacts;
pub mod error;
pub mod gmail;
pub mod oauth;
pub mod pull;
pub mod sync;
pub mod tokens;

pub use api::{ApiRequest, GoogleApi, UserInfo};
pub use auth::TokenManager;
pub use calendar::CONFERENCE_TITLE;
pub use client::GoogleClient;
pub use config::{DEFAULT_SCOPES, GoogleConfig, GoogleEndpoints};
pub use contacts::{ContactStore, match_numbers, merge, search};
pub use error::{AuthError, GoogleError, GoogleErrorCode, GoogleResult, SyncError};
pub use gmail::thread_query;
pub use oauth::{AuthFlowLauncher, AuthRequest, BrowserOpener, LoopbackLauncher, parse_redirect};
pub use pull::PersonalPull;
pub use sync::{ContactsDelta, SyncCursor, SyncEngine};
pub use tokens::{TOKEN_KEY, Token, TokenStore};

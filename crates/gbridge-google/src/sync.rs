//! Incremental synchronization of the two contact collections.
//!
//! Each collection has a [`SyncCursor`] recording when it was last pulled
//! and, for personal contacts, the opaque cursor token Google handed back.
//! A collection is re-pulled once its staleness window has passed. The
//! merged contacts and the cursor are written in one store batch, so they
//! always move forward together.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use gbridge_core::{Contact, ContactSource, LocalStore, SingleFlight};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::api::GoogleApi;
use crate::contacts::{ContactStore, data_key, merge};
use crate::error::{GoogleErrorCode, SyncError};

fn cursor_key(source: ContactSource) -> &'static str {
    match source {
        ContactSource::Personal => "gbridge.contacts.personal.cursor",
        ContactSource::Directory => "gbridge.contacts.directory.cursor",
    }
}

/// Progress marker for one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    /// Token for the next incremental pull, when the API issues one.
    pub cursor_token: Option<String>,
    pub last_synced_at: DateTime<Utc>,
}

impl SyncCursor {
    fn is_stale(cursor: Option<&Self>, window: Duration, now: DateTime<Utc>) -> bool {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        cursor.is_none_or(|c| now.signed_duration_since(c.last_synced_at) > window)
    }
}

/// Answer to a contacts query.
#[derive(Debug, Clone, PartialEq)]
pub struct ContactsDelta {
    pub contacts: Vec<Contact>,
    /// The value the caller should present on its next query.
    pub sync_timestamp: DateTime<Utc>,
}

struct Inner {
    api: GoogleApi,
    store: LocalStore,
    contacts: ContactStore,
    personal_staleness: Duration,
    directory_staleness: Duration,
    flight: SingleFlight<Result<(), SyncError>>,
    /// Latest timestamp handed out or committed. Commits stamp strictly
    /// after it, and queries read under it.
    clock: Mutex<DateTime<Utc>>,
}

/// Keeps the cached collections up to date. Clones share state.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for SyncEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("personal_staleness", &self.inner.personal_staleness)
            .field("directory_staleness", &self.inner.directory_staleness)
            .field("flight", &self.inner.flight)
            .finish_non_exhaustive()
    }
}

impl SyncEngine {
    pub fn new(
        api: GoogleApi,
        store: LocalStore,
        personal_staleness: Duration,
        directory_staleness: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                contacts: ContactStore::new(store.clone()),
                store,
                personal_staleness,
                directory_staleness,
                flight: SingleFlight::new(),
                clock: Mutex::new(DateTime::<Utc>::MIN_UTC),
            }),
        }
    }

    pub fn contacts(&self) -> &ContactStore {
        &self.inner.contacts
    }

    /// Pulls every collection whose staleness window has passed, or all of
    /// them when `force` is set. Concurrent callers share one run.
    pub async fn sync_contacts(&self, force: bool) -> Result<(), SyncError> {
        let inner = Arc::clone(&self.inner);
        self.inner
            .flight
            .run(move || async move { inner.sync_all(force).await })
            .await
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.flight.is_in_flight()
    }

    pub async fn cursor(&self, source: ContactSource) -> Result<Option<SyncCursor>, SyncError> {
        self.inner.cursor(source).await
    }

    /// Catches up, then returns what changed since `since`.
    ///
    /// Without `since`, every contact is returned. Otherwise only the
    /// collections synced after `since` are returned, whole. A failed sync
    /// is logged and the cached data served.
    ///
    /// Any commit the returned contacts miss carries a `last_synced_at`
    /// later than the returned `sync_timestamp`.
    pub async fn query_contacts(&self, since: Option<DateTime<Utc>>) -> Result<ContactsDelta, SyncError> {
        if let Err(e) = self.sync_contacts(false).await {
            warn!(error = %e, "contact sync failed, serving cached contacts");
        }

        let mut clock = self.inner.clock.lock().await;
        let sync_timestamp = Utc::now().trunc_subsecs(3).max(*clock);
        *clock = sync_timestamp;

        let contacts = match since {
            None => self
                .inner
                .contacts
                .all()
                .await
                .map_err(|e| SyncError::store(ContactSource::Personal, &e))?,
            Some(since) => {
                let mut contacts = Vec::new();
                for source in [ContactSource::Directory, ContactSource::Personal] {
                    let newer = self
                        .inner
                        .cursor(source)
                        .await?
                        .is_some_and(|c| since < c.last_synced_at);
                    if newer {
                        contacts.extend(self.inner.collection(source).await?);
                    }
                }
                contacts
            }
        };
        drop(clock);

        Ok(ContactsDelta {
            contacts,
            sync_timestamp,
        })
    }
}

impl Inner {
    async fn cursor(&self, source: ContactSource) -> Result<Option<SyncCursor>, SyncError> {
        self.store
            .get_as(cursor_key(source))
            .await
            .map_err(|e| SyncError::store(source, &e))
    }

    async fn collection(&self, source: ContactSource) -> Result<Vec<Contact>, SyncError> {
        self.contacts
            .collection(source)
            .await
            .map_err(|e| SyncError::store(source, &e))
    }

    async fn sync_all(&self, force: bool) -> Result<(), SyncError> {
        let now = Utc::now();

        let personal = self.cursor(ContactSource::Personal).await?;
        if force || SyncCursor::is_stale(personal.as_ref(), self.personal_staleness, now) {
            self.sync_personal(personal).await?;
        } else {
            debug!("personal contacts are fresh");
        }

        let directory = self.cursor(ContactSource::Directory).await?;
        if force || SyncCursor::is_stale(directory.as_ref(), self.directory_staleness, now) {
            self.sync_directory().await?;
        } else {
            debug!("directory is fresh");
        }

        Ok(())
    }

    async fn sync_personal(&self, previous: Option<SyncCursor>) -> Result<(), SyncError> {
        let source = ContactSource::Personal;
        let cursor_token = previous.and_then(|c| c.cursor_token);

        match self.api.pull_personal(cursor_token.as_deref()).await {
            Ok(Some(pull)) => self.commit(source, pull.contacts, pull.next_cursor).await,
            Ok(None) => {
                debug!("personal pull skipped");
                Ok(())
            }
            Err(e) if e.code() == GoogleErrorCode::Gone && cursor_token.is_some() => {
                warn!("personal sync cursor expired, dropping it");
                self.store
                    .remove(cursor_key(source))
                    .await
                    .map_err(|e| SyncError::store(source, &e))?;
                Err(SyncError::CursorExpired(source))
            }
            Err(e) => Err(SyncError::api(source, &e)),
        }
    }

    async fn sync_directory(&self) -> Result<(), SyncError> {
        let source = ContactSource::Directory;

        let user = match self.api.user_info().await {
            Ok(Some(user)) => user,
            Ok(None) => {
                debug!("no profile, skipping directory");
                return Ok(());
            }
            Err(e) => return Err(SyncError::api(source, &e)),
        };
        if !user.has_directory() {
            debug!("account has no hosted domain, skipping directory");
            return Ok(());
        }

        match self.api.pull_directory().await {
            Ok(Some(contacts)) => self.commit(source, contacts, None).await,
            Ok(None) => {
                debug!("directory pull skipped");
                Ok(())
            }
            Err(e) => Err(SyncError::api(source, &e)),
        }
    }

    async fn commit(
        &self,
        source: ContactSource,
        delta: Vec<Contact>,
        cursor_token: Option<String>,
    ) -> Result<(), SyncError> {
        let changed = delta.len();
        let merged = merge(self.collection(source).await?, delta);

        let mut clock = self.clock.lock().await;
        // Callers get timestamps back in milliseconds.
        let last_synced_at = Utc::now()
            .trunc_subsecs(3)
            .max(*clock + chrono::Duration::milliseconds(1));
        let cursor = SyncCursor {
            cursor_token,
            last_synced_at,
        };

        let to_value = |v: serde_json::Result<serde_json::Value>| {
            v.map_err(|e| SyncError::Store {
                source_type: source,
                message: e.to_string(),
            })
        };
        let entries = vec![
            (data_key(source).to_string(), to_value(serde_json::to_value(&merged))?),
            (cursor_key(source).to_string(), to_value(serde_json::to_value(&cursor))?),
        ];
        self.store
            .set_many(entries)
            .await
            .map_err(|e| SyncError::store(source, &e))?;
        *clock = last_synced_at;
        drop(clock);

        info!(%source, changed, total = merged.len(), "synced contacts");
        Ok(())
    }
}

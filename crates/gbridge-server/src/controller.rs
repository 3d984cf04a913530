//! The controller session: owns every component and implements each
//! request path on top of them.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::DateTime;
use gbridge_core::{
    Activity, Contact, ContactSource, CreatedEvent, LocalStore, StorageChange, StoreResult,
};
use gbridge_google::{GoogleClient, GoogleResult, SyncError};
use gbridge_protocol::{BusMessage, ContextKind, ServiceInfo, StatusInfo};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::bus::MessageBus;
use crate::config::ServerConfig;
use crate::error::ServerResult;
use crate::notify::{Notifier, RingingNotifier};
use crate::registry::ContextRegistry;
use crate::window::WindowOpener;

pub struct Controller {
    google: GoogleClient,
    bus: MessageBus,
    registry: Mutex<ContextRegistry>,
    ringing: RingingNotifier,
    opener: Arc<dyn WindowOpener>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("google", &self.google)
            .field("bus", &self.bus)
            .field("ringing", &self.ringing)
            .finish_non_exhaustive()
    }
}

impl Controller {
    pub fn new(
        config: &ServerConfig,
        google: GoogleClient,
        store: LocalStore,
        notifier: Arc<dyn Notifier>,
        opener: Arc<dyn WindowOpener>,
    ) -> Self {
        Self {
            google,
            bus: MessageBus::new(store, Arc::clone(&opener), config.popup_url.clone()),
            registry: Mutex::new(ContextRegistry::new(config.max_injected_contexts)),
            ringing: RingingNotifier::new(notifier),
            opener,
        }
    }

    pub fn google(&self) -> &GoogleClient {
        &self.google
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    fn registry(&self) -> MutexGuard<'_, ContextRegistry> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Loads the stored token and, when usable, kicks off a background sync.
    pub async fn start(self: &Arc<Self>) -> bool {
        let authorized = self.google.tokens.restore().await;
        info!(authorized, "controller started");
        if authorized {
            self.spawn_sync(false);
        }
        authorized
    }

    fn spawn_sync(self: &Arc<Self>, force: bool) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.google.sync.sync_contacts(force).await {
                warn!(error = %e, "background contact sync failed");
            }
        });
    }

    pub fn attach(&self, connection: u64) {
        self.registry().attach(connection);
    }

    /// Detaches a closed connection. A closing receiver window makes
    /// receiver-bound messages queue again.
    pub async fn detach(&self, connection: u64) {
        let kind = self.registry().detach(connection);
        if kind == Some(ContextKind::Popup) {
            self.bus.on_receiver_closed().await;
        }
    }

    /// Registration handshake.
    pub async fn register(&self, connection: u64, context: ContextKind) -> ServerResult<ServiceInfo> {
        self.registry().register(connection, context);
        if context == ContextKind::Popup {
            self.bus.on_receiver_registered().await?;
        }
        Ok(self.service_info().await)
    }

    /// Registers `connection` and hands back its view of the bus.
    ///
    /// The receiver exists before registration, so a popup also sees the
    /// queue flush its registration triggers.
    pub async fn subscribe(
        &self,
        connection: u64,
        context: ContextKind,
    ) -> ServerResult<(ServiceInfo, broadcast::Receiver<StorageChange>)> {
        let changes = self.bus.subscribe();
        let service = self.register(connection, context).await?;
        Ok((service, changes))
    }

    pub async fn service_info(&self) -> ServiceInfo {
        ServiceInfo::google(self.google.tokens.is_valid().await)
    }

    pub fn should_inject(&self) -> bool {
        self.registry().should_inject()
    }

    /// Flips authorization: signs in when `authorized` is false, signs out
    /// otherwise, then tells every context the resulting state.
    pub async fn toggle_authorization(self: Arc<Self>, authorized: bool) -> StoreResult<bool> {
        if authorized {
            self.google.sign_out().await;
        } else if let Err(e) = self.google.tokens.authorize(true).await {
            warn!(error = %e, "authorization did not complete");
        }

        let now_authorized = self.google.tokens.is_valid().await;
        if now_authorized {
            if let Err(e) = self.google.api.refresh_user_info().await {
                warn!(error = %e, "failed to load Google profile");
            }
            self.spawn_sync(true);
        }

        info!(authorized = now_authorized, "authorization changed");
        self.bus
            .broadcast(BusMessage::AuthorizeStatusChanged {
                authorized: now_authorized,
            })
            .await?;
        Ok(now_authorized)
    }

    /// Contacts changed after `since_ms` (epoch milliseconds), with the
    /// timestamp to present next time.
    pub async fn contacts(&self, since_ms: Option<i64>) -> Result<(Vec<Contact>, i64), SyncError> {
        let since = since_ms.and_then(DateTime::from_timestamp_millis);
        let delta = self.google.sync.query_contacts(since).await?;
        debug!(count = delta.contacts.len(), ?since, "contacts query");
        Ok((delta.contacts, delta.sync_timestamp.timestamp_millis()))
    }

    pub async fn search(&self, query: &str) -> StoreResult<Vec<Contact>> {
        self.google.sync.contacts().search(query).await
    }

    pub async fn match_numbers(&self, numbers: &[String]) -> StoreResult<Vec<Contact>> {
        self.google.sync.contacts().match_numbers(numbers).await
    }

    pub async fn conference_invite(&self, invite_text: &str) -> GoogleResult<Option<CreatedEvent>> {
        self.google.api.create_conference(invite_text).await
    }

    pub async fn activities(&self, emails: &[String]) -> GoogleResult<Vec<Activity>> {
        self.google.api.activities(emails).await
    }

    /// Opens a mail thread in a new window.
    pub async fn open_activity(&self, thread_id: &str) -> ServerResult<()> {
        let link = self.google.api.thread_link(thread_id).await?;
        self.opener.open(&link)?;
        Ok(())
    }

    pub fn call_ringing(&self, session_id: &str, phone_number: &str, caller_name: Option<&str>) {
        self.ringing.ringing(session_id, phone_number, caller_name);
    }

    pub fn call_dismissed(&self, session_id: &str) {
        self.ringing.dismiss(session_id);
    }

    /// Raises the floating widget in every page.
    pub async fn activate_floating_window(&self) -> StoreResult<()> {
        self.bus.broadcast(BusMessage::OpenAppWindow).await
    }

    pub async fn place_call(&self, phone_number: &str) -> StoreResult<()> {
        self.bus
            .send_to_receiver(BusMessage::NewCall {
                phone_number: phone_number.to_string(),
                to_call: true,
            })
            .await
    }

    pub async fn send_sms(&self, phone_number: &str) -> StoreResult<()> {
        self.bus
            .send_to_receiver(BusMessage::NewSms {
                phone_number: phone_number.to_string(),
            })
            .await
    }

    async fn synced_at(&self, source: ContactSource) -> Option<i64> {
        match self.google.sync.cursor(source).await {
            Ok(cursor) => cursor.map(|c| c.last_synced_at.timestamp_millis()),
            Err(e) => {
                warn!(%source, error = %e, "unreadable sync cursor");
                None
            }
        }
    }

    pub async fn status(&self) -> StatusInfo {
        let attached_contexts = self.registry().len();
        StatusInfo {
            authorized: self.google.tokens.is_valid().await,
            attached_contexts,
            receiver_ready: self.bus.receiver_ready().await,
            queued_messages: self.bus.queued().await,
            personal_synced_at: self.synced_at(ContactSource::Personal).await,
            directory_synced_at: self.synced_at(ContactSource::Directory).await,
        }
    }
}

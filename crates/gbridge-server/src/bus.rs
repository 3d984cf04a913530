//! Controller-to-context messaging over the shared store.
//!
//! Listeners only see a change when a key's value actually differs, so two
//! identical envelopes written back to back would collapse into one event.
//! Every send therefore writes the envelope under [`TRANSPORT_KEY`] and
//! removes it straight away: each send is one absent-to-present edge.
//!
//! Messages for the receiver window wait in an outbound queue until that
//! window registers. The first queued message opens it.

use std::collections::VecDeque;
use std::sync::Arc;

use gbridge_core::{LocalStore, StorageChange, StoreResult};
use gbridge_protocol::{BusEnvelope, BusMessage, TRANSPORT_KEY};
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};

use crate::window::WindowOpener;

#[derive(Debug, Default)]
struct ReceiverState {
    ready: bool,
    /// Popup requested but not registered yet.
    opening: bool,
    queue: VecDeque<BusMessage>,
}

pub struct MessageBus {
    store: LocalStore,
    /// Serializes write-then-delete pairs so they never interleave.
    transport: Mutex<()>,
    receiver: Mutex<ReceiverState>,
    opener: Arc<dyn WindowOpener>,
    popup_url: String,
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("popup_url", &self.popup_url)
            .finish_non_exhaustive()
    }
}

impl MessageBus {
    pub fn new(store: LocalStore, opener: Arc<dyn WindowOpener>, popup_url: impl Into<String>) -> Self {
        Self {
            store,
            transport: Mutex::new(()),
            receiver: Mutex::new(ReceiverState::default()),
            opener,
            popup_url: popup_url.into(),
        }
    }

    pub async fn send(&self, envelope: BusEnvelope) -> StoreResult<()> {
        let _guard = self.transport.lock().await;
        debug!(setter = ?envelope.setter, message = ?envelope.value, "bus send");
        self.store.set(TRANSPORT_KEY, &envelope).await?;
        self.store.remove(TRANSPORT_KEY).await
    }

    /// Store changes as seen from here on. Filter them with
    /// [`gbridge_protocol::accept`].
    pub fn subscribe(&self) -> broadcast::Receiver<StorageChange> {
        self.store.subscribe()
    }

    /// Delivers `message` to every listening context.
    pub async fn broadcast(&self, message: BusMessage) -> StoreResult<()> {
        self.send(BusEnvelope::broadcast(message)).await
    }

    /// Delivers `message` to the receiver window, queueing it and opening
    /// the window when there is none.
    ///
    /// Messages still queued from an earlier failed flush go out first.
    pub async fn send_to_receiver(&self, message: BusMessage) -> StoreResult<()> {
        let mut receiver = self.receiver.lock().await;
        receiver.queue.push_back(message);
        if receiver.ready {
            self.flush(&mut receiver).await?;
            return Ok(());
        }

        debug!(queued = receiver.queue.len(), "receiver absent, message queued");
        if !receiver.opening {
            receiver.opening = true;
            info!(url = %self.popup_url, "opening receiver window");
            if let Err(e) = self.opener.open(&self.popup_url) {
                warn!(error = %e, "failed to open receiver window");
                receiver.opening = false;
            }
        }
        Ok(())
    }

    /// Marks the receiver present and flushes the queue in order.
    ///
    /// On a store failure the unsent messages stay queued ahead of
    /// anything sent later.
    pub async fn on_receiver_registered(&self) -> StoreResult<usize> {
        let mut receiver = self.receiver.lock().await;
        receiver.ready = true;
        receiver.opening = false;

        let flushed = self.flush(&mut receiver).await?;
        if flushed > 0 {
            info!(flushed, "delivered queued messages to receiver");
        }
        Ok(flushed)
    }

    async fn flush(&self, receiver: &mut ReceiverState) -> StoreResult<usize> {
        let mut flushed = 0;
        while let Some(message) = receiver.queue.front().cloned() {
            if let Err(e) = self.send(BusEnvelope::to_receiver(message)).await {
                warn!(error = %e, pending = receiver.queue.len(), "receiver flush interrupted");
                return Err(e);
            }
            receiver.queue.pop_front();
            flushed += 1;
        }
        Ok(flushed)
    }

    pub async fn on_receiver_closed(&self) {
        let mut receiver = self.receiver.lock().await;
        receiver.ready = false;
        receiver.opening = false;
        debug!("receiver window closed");
    }

    pub async fn receiver_ready(&self) -> bool {
        self.receiver.lock().await.ready
    }

    pub async fn queued(&self) -> usize {
        self.receiver.lock().await.queue.len()
    }
}

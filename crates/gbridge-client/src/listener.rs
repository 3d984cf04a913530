//! Receiving controller messages straight from a store the controller
//! shares with this process. Other processes use
//! [`Session::listen`](crate::Session::listen).

use gbridge_core::{LocalStore, StorageChange};
use gbridge_protocol::{BusMessage, ContextKind, accept};
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

/// Bus subscription for one context.
pub struct BusListener {
    context: ContextKind,
    changes: broadcast::Receiver<StorageChange>,
}

impl BusListener {
    pub fn new(store: &LocalStore, context: ContextKind) -> Self {
        Self {
            context,
            changes: store.subscribe(),
        }
    }

    pub fn context(&self) -> ContextKind {
        self.context
    }

    /// Next message for this context. `None` once the store is gone.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.changes.recv().await {
                Ok(change) => {
                    if let Some(envelope) = accept(&change, self.context) {
                        return Some(envelope.value);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "bus listener fell behind, messages dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

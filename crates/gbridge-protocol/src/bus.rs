//! Messages published by the controller through the shared store.

use gbridge_core::StorageChange;
use serde::{Deserialize, Serialize};

/// The store key every bus message is written to and then removed from.
pub const TRANSPORT_KEY: &str = "__gbridge_transport";

/// Who a bus envelope is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Setter {
    /// Every listening context.
    ControllerBroadcast,
    /// Only the standalone receiver window.
    ControllerToReceiver,
}

/// The kind of client context talking to the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    /// A widget injected into a web page.
    Page,
    /// The standalone popup window, which receives point-to-point messages.
    Popup,
}

impl ContextKind {
    /// Whether a listener in this context should act on `setter`.
    pub fn accepts(&self, setter: Setter) -> bool {
        match self {
            Self::Page => setter == Setter::ControllerBroadcast,
            Self::Popup => true,
        }
    }
}

/// Payload carried on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum BusMessage {
    /// Raise the floating widget window.
    OpenAppWindow,

    AuthorizeStatusChanged { authorized: bool },

    /// Start an outbound call. `to_call` false only prefills the dialer.
    #[serde(rename_all = "camelCase")]
    NewCall { phone_number: String, to_call: bool },

    #[serde(rename_all = "camelCase")]
    NewSms { phone_number: String },
}

/// What is actually written under [`TRANSPORT_KEY`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub setter: Setter,
    pub value: BusMessage,
}

impl BusEnvelope {
    pub fn broadcast(value: BusMessage) -> Self {
        Self {
            setter: Setter::ControllerBroadcast,
            value,
        }
    }

    pub fn to_receiver(value: BusMessage) -> Self {
        Self {
            setter: Setter::ControllerToReceiver,
            value,
        }
    }
}

/// Decodes the bus envelope carried by `change`, if a `context` listener
/// should act on it. Removals, other keys, undecodable values and envelopes
/// addressed elsewhere yield `None`.
pub fn accept(change: &StorageChange, context: ContextKind) -> Option<BusEnvelope> {
    if change.key != TRANSPORT_KEY {
        return None;
    }
    let envelope: BusEnvelope = serde_json::from_value(change.new_value.clone()?).ok()?;
    context.accepts(envelope.setter).then_some(envelope)
}

//! Core types: contacts, the shared key/value store, single-flight
//! coalescing and tracing setup.

pub mod activity;
pub mod contact;
pub mod flight;
pub mod store;
pub mod tracing;

pub use activity::{Activity, CreatedEvent};
pub use contact::{Contact, ContactSource, PhoneNumber, normalize_phone};
pub use flight::SingleFlight;
pub use store::{LocalStore, StorageChange, StoreError, StoreResult};
pub use tracing::{TracingConfig, TracingError, TracingOutputFormat, init_tracing};

//! Wire types shared by the controller and its clients.
//!
//! Two channels exist between contexts:
//!
//! - **Requests** travel from a page or popup client to the controller over a
//!   Unix socket. Each is a [`Request`] variant keyed by its logical path,
//!   wrapped in an [`Envelope`] and framed as length-prefixed JSON
//!   (4-byte big-endian length, then the payload).
//! - **Bus messages** travel from the controller to clients through the
//!   shared store. Each is a [`BusMessage`] wrapped in a [`BusEnvelope`]
//!   whose [`Setter`] tag lets listeners filter what they accept. A client
//!   in another process sends [`Request::Subscribe`] and receives the
//!   messages for its context as pushed [`Response::Bus`] frames.

mod bus;
mod error;
mod framing;
mod request;
mod response;

pub use bus::{BusEnvelope, BusMessage, ContextKind, Setter, TRANSPORT_KEY, accept};
pub use error::{ProtocolError, ProtocolResult};
pub use framing::{decode_message, encode_message, read_frame, write_frame};
pub use request::{ActivityRef, Conference, ContactRef, Envelope, Request};
pub use response::{ErrorCode, ErrorResponse, Response, ServiceInfo, StatusInfo};

/// Version string carried by every [`Envelope`].
pub const PROTOCOL_VERSION: &str = "1";

/// Largest accepted frame payload (1 MiB).
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

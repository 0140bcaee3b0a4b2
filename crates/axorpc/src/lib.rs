//! # axorpc
//!
//! The message envelope layer: the fixed-size header that precedes every
//! struct payload, and the entry points that glue header and payload into
//! one outgoing message (or pull a payload back out of an incoming one).

pub mod header;
pub mod message;
pub mod types;

pub use header::MessageHeader;
pub use header::FLAG_EXPECTS_RESPONSE;
pub use header::FLAG_IS_RESPONSE;
pub use message::deserialize_payload;
pub use message::serialize_message;
pub use message::OutgoingMessage;
pub use types::Error;
pub use types::Result;

//! Wire protocol for Courier.
//!
//! This crate defines the "language" that peers speak:
//!
//! - **Types** ([`Message`], [`MessageType`], [`Envelope`]): the closed
//!   message set, its variants, and the `{class, fields}` JSON envelope.
//! - **Registry** ([`MessageRegistry`]): identifier → type resolution,
//!   including adapter mappings for renamed types.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): messages to/from the
//!   payload of one frame.
//! - **Errors** ([`ProtocolError`]).
//!
//! # Architecture
//!
//! The protocol layer sits below the transport. It doesn't know about
//! streams or connections, only how one payload maps to one message.
//!
//! ```text
//! Transport (frames) → Protocol (Envelope → Message) → Connection (execute)
//! ```

mod codec;
mod error;
mod registry;
mod types;

pub use codec::{Codec, JsonCodec};
pub use error::ProtocolError;
pub use registry::MessageRegistry;
pub use types::{Envelope, Message, MessageType, WireFields};

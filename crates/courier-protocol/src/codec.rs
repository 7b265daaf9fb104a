//! Codec trait and the JSON envelope codec.
//!
//! A "codec" (coder/decoder) converts between messages and the bytes of a
//! single frame. The transport layer handles framing; the codec only ever
//! sees one complete payload at a time.

use std::fmt;
use std::sync::Arc;

use crate::{Envelope, Message, MessageRegistry, ProtocolError};

/// Converts messages of the set `M` to and from frame payloads.
///
/// `Send + Sync + 'static` because one codec is shared by the reader and
/// writer of every connection built from the same factory.
pub trait Codec<M>: Send + Sync + 'static {
    /// Serializes a message into a frame payload.
    ///
    /// # Errors
    /// Returns `ProtocolError::Encode` if the message can't be represented.
    fn encode(&self, message: &M) -> Result<Vec<u8>, ProtocolError>;

    /// Deserializes a frame payload into a message.
    ///
    /// # Errors
    /// Returns `ProtocolError::Decode` for malformed JSON or fields, and
    /// `ProtocolError::UnknownType` when `class` resolves to nothing.
    fn decode(&self, data: &[u8]) -> Result<M, ProtocolError>;
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`Codec`] that writes `{"class", "fields"}` JSON envelopes, resolving
/// identifiers through a shared [`MessageRegistry`].
///
/// ## Example
///
/// ```rust
/// use std::sync::Arc;
///
/// use courier_protocol::{
///     Codec, JsonCodec, Message, MessageRegistry, MessageType, ProtocolError, WireFields,
/// };
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
/// struct Ping {
///     n: u32,
/// }
///
/// impl MessageType for Ping {
///     const IDENTIFIER: &'static str = "Ping";
/// }
///
/// #[derive(Debug, PartialEq)]
/// enum Msg {
///     Ping(Ping),
/// }
///
/// impl From<Ping> for Msg {
///     fn from(p: Ping) -> Self {
///         Msg::Ping(p)
///     }
/// }
///
/// impl Message for Msg {
///     type Context = ();
///
///     fn execute(&self, _: &mut ()) -> Option<Self> {
///         None
///     }
///
///     fn to_wire(&self) -> Result<WireFields, ProtocolError> {
///         match self {
///             Msg::Ping(p) => WireFields::of(p),
///         }
///     }
/// }
///
/// let registry = MessageRegistry::<Msg>::new().register::<Ping>().unwrap();
/// let codec = JsonCodec::new(Arc::new(registry));
///
/// let bytes = codec.encode(&Msg::Ping(Ping { n: 1 })).unwrap();
/// assert_eq!(bytes, br#"{"class":"Ping","fields":{"n":1}}"#);
/// assert_eq!(codec.decode(&bytes).unwrap(), Msg::Ping(Ping { n: 1 }));
/// ```
pub struct JsonCodec<M> {
    registry: Arc<MessageRegistry<M>>,
}

impl<M: Message> JsonCodec<M> {
    pub fn new(registry: Arc<MessageRegistry<M>>) -> Self {
        Self { registry }
    }

    /// The registry this codec resolves identifiers through.
    pub fn registry(&self) -> &Arc<MessageRegistry<M>> {
        &self.registry
    }
}

// Manual impl: cloning only bumps the Arc, `M` itself need not be Clone.
impl<M> Clone for JsonCodec<M> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<M> fmt::Debug for JsonCodec<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCodec")
            .field("registry", &self.registry)
            .finish()
    }
}

impl<M: Message> Codec<M> for JsonCodec<M> {
    fn encode(&self, message: &M) -> Result<Vec<u8>, ProtocolError> {
        let envelope = self.registry.encode(message)?;
        serde_json::to_vec(&envelope).map_err(ProtocolError::Encode)
    }

    fn decode(&self, data: &[u8]) -> Result<M, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_slice(data).map_err(ProtocolError::Decode)?;
        if envelope.class.is_empty() {
            return Err(ProtocolError::InvalidMessage(
                "envelope class must not be empty".into(),
            ));
        }
        self.registry.decode(envelope)
    }
}

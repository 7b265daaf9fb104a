//! Core protocol types: the message traits and the wire envelope.
//!
//! A deployment describes the messages it speaks as a closed Rust `enum`
//! (the "message set"). Each variant wraps a plain serde struct that
//! implements [`MessageType`], which gives it a stable wire identifier.
//! The enum itself implements [`Message`], which is what the connection
//! pipeline executes.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Message traits
// ---------------------------------------------------------------------------

/// A concrete message variant with a stable wire identifier.
///
/// The associated constants replace annotation scanning: the registry reads
/// them when the type is registered, so every adapter mapping is known
/// before the first byte is decoded.
///
/// ```rust
/// use courier_protocol::MessageType;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Default, Serialize, Deserialize)]
/// #[serde(default)]
/// struct ChatV2 {
///     text: String,
///     room: String,
/// }
///
/// impl MessageType for ChatV2 {
///     const IDENTIFIER: &'static str = "chat.v2";
///     // Older peers still send "chat"; decode those as ChatV2.
///     const ADAPTS_FROM: &'static [&'static str] = &["chat"];
/// }
/// ```
pub trait MessageType: Serialize + DeserializeOwned + 'static {
    /// Canonical identifier written to the envelope's `class` field.
    const IDENTIFIER: &'static str;

    /// Alternate identifiers that decode into this type.
    ///
    /// Adapter mappings win over direct resolution, so a legacy identifier
    /// listed here shadows a type still registered under that name.
    const ADAPTS_FROM: &'static [&'static str] = &[];

    /// Identifier to write instead of [`IDENTIFIER`](Self::IDENTIFIER)
    /// when this type is encoded.
    const ADAPTS_TO: Option<&'static str> = None;
}

/// The closed set of messages exchanged on a connection.
///
/// `execute` runs on the connection's execute worker with exclusive access
/// to the per-connection context. Returning `Some` queues the response for
/// the writer; `None` sends nothing.
pub trait Message: Sized + Send + 'static {
    /// Per-connection state handed to every `execute` call.
    type Context: Send + 'static;

    /// Runs the message against the connection's context.
    fn execute(&self, context: &mut Self::Context) -> Option<Self>;

    /// Returns the canonical identifier and serialized fields of the
    /// concrete variant. Implementations are usually one
    /// [`WireFields::of`] call per match arm.
    fn to_wire(&self) -> Result<WireFields, ProtocolError>;
}

/// The canonical identifier and JSON fields of one concrete message.
#[derive(Debug, Clone, PartialEq)]
pub struct WireFields {
    pub identifier: &'static str,
    pub fields: Value,
}

impl WireFields {
    /// Serializes a concrete variant under its canonical identifier.
    pub fn of<T: MessageType>(value: &T) -> Result<Self, ProtocolError> {
        let fields = serde_json::to_value(value).map_err(ProtocolError::Encode)?;
        Ok(Self {
            identifier: T::IDENTIFIER,
            fields,
        })
    }
}

// ---------------------------------------------------------------------------
// Envelope: the top-level wire format
// ---------------------------------------------------------------------------

/// The JSON shape of one frame: `{"class": "...", "fields": {...}}`.
///
/// `fields` may be absent (or `null`) on the wire; the registry decodes
/// that as an empty object so serde defaults apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub class: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Value>,
}

impl Envelope {
    /// Creates an envelope carrying the given fields.
    pub fn new(class: impl Into<String>, fields: Value) -> Self {
        Self {
            class: class.into(),
            fields: Some(fields),
        }
    }

    /// The payload, or an empty object when the envelope carried none.
    pub fn fields_or_empty(self) -> Value {
        match self.fields {
            Some(Value::Null) | None => Value::Object(serde_json::Map::new()),
            Some(fields) => fields,
        }
    }
}

// =========================================================================
// Tests
// =========================================================================

//! The message registry: identifier → type resolution, including adapters.
//!
//! The registry is built once, ahead of use, by listing every variant of
//! the message set:
//!
//! ```rust,ignore
//! let registry = MessageRegistry::<Chat>::new()
//!     .register::<Hello>()?
//!     .register::<Say>()?
//!     .register::<SayV2>()?; // SayV2::ADAPTS_FROM = &["Say"]
//! ```
//!
//! Each `register::<T>()` reads `T`'s identifier and adapter declarations
//! and stores a plain function pointer that decodes `T` and converts it
//! into the message set with `Into`.
//!
//! # Resolution order
//!
//! ```text
//! class ──→ adapter mapping? ──yes──→ adapted type
//!               │ no
//!               ▼
//!           registered directly? ──yes──→ that type
//!               │ no
//!               ▼
//!           ProtocolError::UnknownType
//! ```

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

use crate::{Envelope, Message, MessageType, ProtocolError};

type DecodeFn<M> = fn(Value) -> Result<M, serde_json::Error>;

fn decode_as<T, M>(fields: Value) -> Result<M, serde_json::Error>
where
    T: MessageType + Into<M>,
{
    serde_json::from_value::<T>(fields).map(Into::into)
}

/// Maps wire identifiers to the concrete variants of a message set.
pub struct MessageRegistry<M> {
    /// Canonical identifier → decoder.
    decoders: HashMap<&'static str, DecodeFn<M>>,
    /// Alternate (legacy) identifier → canonical identifier.
    adapted_from: HashMap<&'static str, &'static str>,
    /// Canonical identifier → identifier written on encode.
    adapted_to: HashMap<&'static str, &'static str>,
}

impl<M: Message> MessageRegistry<M> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
            adapted_from: HashMap::new(),
            adapted_to: HashMap::new(),
        }
    }

    /// Registers `T` under its canonical identifier, along with the
    /// adapter mappings it declares.
    ///
    /// # Errors
    /// [`ProtocolError::DuplicateIdentifier`] if `T::IDENTIFIER` is already
    /// registered, or if another type already adapts from one of
    /// `T::ADAPTS_FROM`.
    pub fn register<T>(mut self) -> Result<Self, ProtocolError>
    where
        T: MessageType + Into<M>,
    {
        if self.decoders.contains_key(T::IDENTIFIER) {
            return Err(ProtocolError::DuplicateIdentifier(T::IDENTIFIER.into()));
        }
        for legacy in T::ADAPTS_FROM {
            if self.adapted_from.contains_key(legacy) {
                return Err(ProtocolError::DuplicateIdentifier((*legacy).into()));
            }
        }

        for legacy in T::ADAPTS_FROM {
            self.adapted_from.insert(*legacy, T::IDENTIFIER);
        }
        if let Some(alias) = T::ADAPTS_TO {
            self.adapted_to.insert(T::IDENTIFIER, alias);
        }
        self.decoders.insert(T::IDENTIFIER, decode_as::<T, M>);

        tracing::trace!(
            identifier = T::IDENTIFIER,
            adapts_from = ?T::ADAPTS_FROM,
            adapts_to = ?T::ADAPTS_TO,
            "registered message type"
        );
        Ok(self)
    }

    /// Resolves a wire identifier to the canonical identifier it decodes as.
    pub fn resolve(&self, class: &str) -> Option<&'static str> {
        if let Some(canonical) = self.adapted_from.get(class) {
            return Some(*canonical);
        }
        self.decoders.get_key_value(class).map(|(id, _)| *id)
    }

    /// The identifier written to the wire for a canonical identifier.
    pub fn wire_identifier<'a>(&self, canonical: &'a str) -> &'a str {
        match self.adapted_to.get(canonical) {
            Some(alias) => *alias,
            None => canonical,
        }
    }

    /// Decodes an envelope into the message set.
    ///
    /// # Errors
    /// - [`ProtocolError::UnknownType`]: nothing resolves `class`
    /// - [`ProtocolError::Decode`]: `fields` don't fit the resolved type
    pub fn decode(&self, envelope: Envelope) -> Result<M, ProtocolError> {
        let canonical = self
            .resolve(&envelope.class)
            .ok_or_else(|| ProtocolError::UnknownType(envelope.class.clone()))?;
        // Presence in `decoders` is guaranteed for both resolution paths.
        let decode = self.decoders[canonical];
        decode(envelope.fields_or_empty()).map_err(ProtocolError::Decode)
    }

    /// Encodes a message into an envelope, honouring `ADAPTS_TO`.
    pub fn encode(&self, message: &M) -> Result<Envelope, ProtocolError> {
        let wire = message.to_wire()?;
        let class = self.wire_identifier(wire.identifier);
        Ok(Envelope::new(class, wire.fields))
    }

    /// Number of registered types (adapter mappings not counted).
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

impl<M: Message> Default for MessageRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> fmt::Debug for MessageRegistry<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.decoders.keys().collect();
        types.sort();
        f.debug_struct("MessageRegistry")
            .field("types", &types)
            .field("adapted_from", &self.adapted_from)
            .field("adapted_to", &self.adapted_to)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use serde_json::json;

    use super::*;
    use crate::WireFields;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct LegacyV1 {
        name: String,
    }

    impl MessageType for LegacyV1 {
        const IDENTIFIER: &'static str = "LegacyV1";
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    #[serde(default)]
    struct AdaptedV2 {
        name: String,
        version: u32,
    }

    impl MessageType for AdaptedV2 {
        const IDENTIFIER: &'static str = "AdaptedV2";
        const ADAPTS_FROM: &'static [&'static str] = &["LegacyV1"];
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Outbound {
        n: u8,
    }

    impl MessageType for Outbound {
        const IDENTIFIER: &'static str = "Outbound";
        const ADAPTS_TO: Option<&'static str> = Some("com.example.Outbound");
    }

    #[derive(Debug, Clone, PartialEq)]
    enum Set {
        Legacy(LegacyV1),
        Adapted(AdaptedV2),
        Out(Outbound),
    }

    impl From<LegacyV1> for Set {
        fn from(m: LegacyV1) -> Self {
            Set::Legacy(m)
        }
    }

    impl From<AdaptedV2> for Set {
        fn from(m: AdaptedV2) -> Self {
            Set::Adapted(m)
        }
    }

    impl From<Outbound> for Set {
        fn from(m: Outbound) -> Self {
            Set::Out(m)
        }
    }

    impl Message for Set {
        type Context = ();

        fn execute(&self, _: &mut ()) -> Option<Self> {
            None
        }

        fn to_wire(&self) -> Result<WireFields, ProtocolError> {
            match self {
                Set::Legacy(m) => WireFields::of(m),
                Set::Adapted(m) => WireFields::of(m),
                Set::Out(m) => WireFields::of(m),
            }
        }
    }

    fn registry() -> MessageRegistry<Set> {
        MessageRegistry::new()
            .register::<LegacyV1>()
            .and_then(|r| r.register::<AdaptedV2>())
            .and_then(|r| r.register::<Outbound>())
            .expect("registry should build")
    }

    #[test]
    fn test_adapter_mapping_wins_over_direct_registration() {
        let reg = registry();
        assert_eq!(reg.resolve("LegacyV1"), Some("AdaptedV2"));

        let env = Envelope::new("LegacyV1", json!({ "name": "old" }));
        let decoded = reg.decode(env).unwrap();
        assert_eq!(
            decoded,
            Set::Adapted(AdaptedV2 {
                name: "old".into(),
                version: 0,
            })
        );
    }

    #[test]
    fn test_unknown_class_is_rejected() {
        let reg = registry();
        let err = reg.decode(Envelope::new("Nope", json!({}))).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownType(ref c) if c == "Nope"));
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let reg = registry();
        let env = Envelope {
            class: "AdaptedV2".into(),
            fields: None,
        };
        assert_eq!(reg.decode(env).unwrap(), Set::Adapted(AdaptedV2::default()));
    }

    #[test]
    fn test_mismatched_fields_fail_to_decode() {
        let reg = registry();
        let env = Envelope::new("Outbound", json!({ "n": "not a number" }));
        assert!(matches!(reg.decode(env), Err(ProtocolError::Decode(_))));
    }

    #[test]
    fn test_encode_uses_adapts_to_identifier() {
        let reg = registry();
        let env = reg.encode(&Set::Out(Outbound { n: 4 })).unwrap();
        assert_eq!(env.class, "com.example.Outbound");
        assert_eq!(env.fields, Some(json!({ "n": 4 })));
    }

    #[test]
    fn test_encode_without_adapter_uses_canonical_identifier() {
        let reg = registry();
        let env = reg.encode(&Set::Legacy(LegacyV1 { name: "x".into() })).unwrap();
        assert_eq!(env.class, "LegacyV1");
    }

    #[test]
    fn test_duplicate_identifier_is_rejected() {
        let res = MessageRegistry::<Set>::new()
            .register::<Outbound>()
            .and_then(|r| r.register::<Outbound>());
        assert!(matches!(res, Err(ProtocolError::DuplicateIdentifier(ref id)) if id == "Outbound"));
    }

    #[test]
    fn test_len_counts_types_not_adapters() {
        let reg = registry();
        assert_eq!(reg.len(), 3);
        assert!(!reg.is_empty());
    }
}

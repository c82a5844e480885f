//! Message registry: maps a message kind to its decoder.
//!
//! Populated once before the connection starts. The first registration of a
//! kind wins; later registrations of the same kind are logged and ignored.

use std::collections::HashMap;

use crate::codec::ByteReader;
use crate::error::DecodeError;
use crate::message::Inbound;

/// Decode a message body. Receives read access to the session context so
/// decoders can consult state (entity registries, known entities) captured at
/// session start.
pub type MessageDecoder<C> =
    fn(&mut ByteReader<'_>, &C) -> Result<Box<dyn Inbound<C>>, DecodeError>;

/// String-keyed table of message decoders.
pub struct MessageRegistry<C> {
    decoders: HashMap<String, MessageDecoder<C>>,
}

impl<C> Default for MessageRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> MessageRegistry<C> {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register `decoder` for `kind`.
    ///
    /// Returns `false` and leaves the registry unchanged if `kind` is
    /// already registered.
    pub fn register(&mut self, kind: &str, decoder: MessageDecoder<C>) -> bool {
        if self.decoders.contains_key(kind) {
            tracing::error!(
                "Failed to add message decoder '{kind}': identifier is already in use"
            );
            return false;
        }
        self.decoders.insert(kind.to_string(), decoder);
        true
    }

    /// Decoder registered for `kind`, if any.
    pub fn lookup(&self, kind: &str) -> Option<MessageDecoder<C>> {
        self.decoders.get(kind).copied()
    }

    /// Whether `kind` has a decoder.
    pub fn contains(&self, kind: &str) -> bool {
        self.decoders.contains_key(kind)
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    /// Whether no kinds are registered.
    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tagged(&'static str);

    impl Inbound<Vec<&'static str>> for Tagged {
        fn kind(&self) -> &str {
            "HeartBeat"
        }

        fn execute(self: Box<Self>, ctx: &mut Vec<&'static str>) {
            ctx.push(self.0);
        }
    }

    fn first(
        _: &mut ByteReader<'_>,
        _: &Vec<&'static str>,
    ) -> Result<Box<dyn Inbound<Vec<&'static str>>>, DecodeError> {
        Ok(Box::new(Tagged("first")))
    }

    fn second(
        _: &mut ByteReader<'_>,
        _: &Vec<&'static str>,
    ) -> Result<Box<dyn Inbound<Vec<&'static str>>>, DecodeError> {
        Ok(Box::new(Tagged("second")))
    }

    #[test]
    fn test_duplicate_registration_keeps_first() {
        let mut registry: MessageRegistry<Vec<&'static str>> = MessageRegistry::new();
        assert!(registry.register("HeartBeat", first));
        assert!(!registry.register("HeartBeat", second));
        assert_eq!(registry.len(), 1);

        let mut ctx = Vec::new();
        let decoder = registry.lookup("HeartBeat").unwrap();
        let message = decoder(&mut ByteReader::new(&[]), &ctx).unwrap();
        message.execute(&mut ctx);
        assert_eq!(ctx, vec!["first"]);
    }

    #[test]
    fn test_unknown_kind_misses() {
        let registry: MessageRegistry<Vec<&'static str>> = MessageRegistry::new();
        assert!(registry.lookup("nope").is_none());
        assert!(registry.is_empty());
    }
}

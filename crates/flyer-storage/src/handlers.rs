//! Type-tag to reader registry.
//!
//! Resolving a datum needs a reader for its resource's type tag. The mapping
//! lives in a [`HandlerRegistry`] that is built up front and injected into
//! whatever resolves datums. Looking up a tag nobody registered fails
//! immediately with [`FlyerError::HandlerNotRegistered`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use flyer_core::kind::{ANALOG_TYPE_TAG, DIGITAL_INPUT_TYPE_TAG, ENCODER_TYPE_TAG};
use flyer_core::{FlyerError, Result};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::reader::{AnalogReader, ChunkReader, DigitalInputReader, EncoderReader};

/// Builds a reader for `(path, chunk_size)`.
pub type ReaderFactory = Arc<dyn Fn(&Path, usize) -> Result<Box<dyn ChunkReader>> + Send + Sync>;

/// Registry of reader factories keyed by type tag.
///
/// Clones share the same underlying table.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<RwLock<HashMap<String, ReaderFactory>>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the encoder, digital-input and analog readers.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(ENCODER_TYPE_TAG, |path, chunk_size| {
            Ok(Box::new(EncoderReader::open(path, chunk_size)?) as Box<dyn ChunkReader>)
        });
        registry.register(DIGITAL_INPUT_TYPE_TAG, |path, chunk_size| {
            Ok(Box::new(DigitalInputReader::open(path, chunk_size)?) as Box<dyn ChunkReader>)
        });
        registry.register(ANALOG_TYPE_TAG, |path, chunk_size| {
            Ok(Box::new(AnalogReader::open(path, chunk_size)?) as Box<dyn ChunkReader>)
        });
        registry
    }

    /// Register `factory` for `type_tag`, replacing any previous one.
    ///
    /// Returns `true` if an existing handler was replaced.
    pub fn register<F>(&self, type_tag: &str, factory: F) -> bool
    where
        F: Fn(&Path, usize) -> Result<Box<dyn ChunkReader>> + Send + Sync + 'static,
    {
        let replaced = self
            .handlers
            .write()
            .insert(type_tag.to_string(), Arc::new(factory))
            .is_some();
        if replaced {
            info!(type_tag, "Replaced reader handler");
        } else {
            debug!(type_tag, "Registered reader handler");
        }
        replaced
    }

    /// Whether a handler exists for `type_tag`.
    pub fn is_registered(&self, type_tag: &str) -> bool {
        self.handlers.read().contains_key(type_tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = self.handlers.read().keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Build a reader for `path` using the handler for `type_tag`.
    pub fn open(&self, type_tag: &str, path: &Path, chunk_size: usize) -> Result<Box<dyn ChunkReader>> {
        let factory = self
            .handlers
            .read()
            .get(type_tag)
            .cloned()
            .ok_or_else(|| FlyerError::HandlerNotRegistered(type_tag.to_string()))?;
        factory(path, chunk_size)
    }
}

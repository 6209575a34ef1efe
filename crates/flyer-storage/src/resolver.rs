//! Datum retrieval.
//!
//! ```text
//! datum_id ──registrar──► Datum { resource_id, chunk_num, column }
//!                              │
//!                              ▼
//!           registrar ──► Resource { type_tag, full_path, chunk_size }
//!                              │
//!                              ▼
//!           handlers  ──► reader (cached per resource) ──► rows
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use flyer_core::{Registrar, Result};
use parking_lot::Mutex;
use tracing::debug;

use crate::handlers::HandlerRegistry;
use crate::reader::ChunkReader;
use crate::rows::Row;

/// Resolves datum ids to decoded rows.
pub struct DatumResolver {
    registrar: Arc<dyn Registrar>,
    handlers: HandlerRegistry,
    cache: Mutex<HashMap<String, Arc<dyn ChunkReader>>>,
}

impl DatumResolver {
    /// Resolver using `registrar` for lookups and `handlers` for readers.
    pub fn new(registrar: Arc<dyn Registrar>, handlers: HandlerRegistry) -> Self {
        Self {
            registrar,
            handlers,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Rows referenced by `datum_id`.
    pub fn retrieve(&self, datum_id: &str) -> Result<Vec<Row>> {
        let datum = self.registrar.datum(datum_id)?;
        let reader = self.reader_for(&datum.resource_id)?;
        reader.read(datum.params.chunk_num, datum.params.column)
    }

    /// Rows of several datums, concatenated in the given order.
    pub fn retrieve_all<'a, I>(&self, datum_ids: I) -> Result<Vec<Row>>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut rows = Vec::new();
        for id in datum_ids {
            rows.extend(self.retrieve(id)?);
        }
        Ok(rows)
    }

    /// Reader for `resource_id`, opened on first use.
    pub fn reader_for(&self, resource_id: &str) -> Result<Arc<dyn ChunkReader>> {
        if let Some(reader) = self.cache.lock().get(resource_id) {
            return Ok(Arc::clone(reader));
        }
        let resource = self.registrar.resource(resource_id)?;
        let reader: Arc<dyn ChunkReader> = Arc::from(self.handlers.open(
            &resource.type_tag,
            &resource.full_path,
            resource.chunk_size(),
        )?);
        debug!(
            resource_id,
            type_tag = %resource.type_tag,
            lines = reader.line_count(),
            "Opened reader"
        );
        self.cache
            .lock()
            .insert(resource_id.to_string(), Arc::clone(&reader));
        Ok(reader)
    }

    /// Drop cached readers so the next retrieval reloads files.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Number of cached readers.
    pub fn cached_readers(&self) -> usize {
        self.cache.lock().len()
    }
}

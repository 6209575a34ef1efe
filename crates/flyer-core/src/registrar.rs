//! Resource/datum registrar.
//!
//! The registrar is the store that assigns ids to resources and datums. In
//! production it fronts a document database; channels only see the
//! [`Registrar`] trait and receive an `Arc<dyn Registrar>` at construction.
//! [`InMemoryRegistrar`] is an append-only implementation used by tests, the
//! CLI and anything that resolves datums within one process.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::RwLock;
use tracing::debug;

use crate::document::{new_uid, Datum, DatumParams, Resource, ResourceParams};
use crate::error::{FlyerError, Result};

/// Assigns ids to resources and datums and looks them up again.
///
/// Implementations must allow concurrent registration from many channels.
pub trait Registrar: Send + Sync {
    /// Register an external file, returning its resource id.
    fn register_resource(
        &self,
        type_tag: &str,
        directory: &Path,
        full_path: &Path,
        params: ResourceParams,
    ) -> Result<String>;

    /// Register one chunk of a resource, returning its datum id.
    ///
    /// Fails with [`FlyerError::UnknownResource`] if `resource_id` was never
    /// registered.
    fn register_datum(&self, resource_id: &str, params: DatumParams) -> Result<String>;

    /// Look up a registered resource.
    fn resource(&self, resource_id: &str) -> Result<Resource>;

    /// Look up a registered datum.
    fn datum(&self, datum_id: &str) -> Result<Datum>;
}

/// Append-only in-process registrar.
#[derive(Debug, Default)]
pub struct InMemoryRegistrar {
    resources: RwLock<HashMap<String, Resource>>,
    datums: RwLock<HashMap<String, Datum>>,
}

impl InMemoryRegistrar {
    /// Create an empty registrar.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resources registered so far.
    pub fn resource_count(&self) -> usize {
        self.resources.read().len()
    }

    /// Number of datums registered so far.
    pub fn datum_count(&self) -> usize {
        self.datums.read().len()
    }

    /// All datums of `resource_id`, ordered by chunk then column.
    pub fn datums_for(&self, resource_id: &str) -> Vec<Datum> {
        let mut datums: Vec<Datum> = self
            .datums
            .read()
            .values()
            .filter(|d| d.resource_id == resource_id)
            .cloned()
            .collect();
        datums.sort_by_key(|d| (d.params.chunk_num, d.params.column));
        datums
    }
}

impl Registrar for InMemoryRegistrar {
    fn register_resource(
        &self,
        type_tag: &str,
        directory: &Path,
        full_path: &Path,
        params: ResourceParams,
    ) -> Result<String> {
        let resource = Resource {
            id: new_uid(),
            type_tag: type_tag.to_string(),
            directory: directory.to_path_buf(),
            full_path: full_path.to_path_buf(),
            params,
        };
        let id = resource.id.clone();
        self.resources.write().insert(id.clone(), resource);
        debug!(resource_id = %id, type_tag, path = %full_path.display(), "Registered resource");
        Ok(id)
    }

    fn register_datum(&self, resource_id: &str, params: DatumParams) -> Result<String> {
        if !self.resources.read().contains_key(resource_id) {
            return Err(FlyerError::UnknownResource(resource_id.to_string()));
        }
        let datum = Datum {
            id: new_uid(),
            resource_id: resource_id.to_string(),
            params,
        };
        let id = datum.id.clone();
        self.datums.write().insert(id.clone(), datum);
        Ok(id)
    }

    fn resource(&self, resource_id: &str) -> Result<Resource> {
        self.resources
            .read()
            .get(resource_id)
            .cloned()
            .ok_or_else(|| FlyerError::UnknownResource(resource_id.to_string()))
    }

    fn datum(&self, datum_id: &str) -> Result<Datum> {
        self.datums
            .read()
            .get(datum_id)
            .cloned()
            .ok_or_else(|| FlyerError::UnknownDatum(datum_id.to_string()))
    }
}

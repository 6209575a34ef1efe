//! Resource / datum document model.
//!
//! Flyer data never travels inline. A channel registers one [`Resource`]
//! describing the external file it owns, and at harvest time one [`Datum`]
//! per chunk of that file. Event records carry only datum ids; the rows are
//! parsed later, possibly in another process, by resolving the datum back to
//! its resource and handing the pair to a chunk reader.
//!
//! ```text
//! Resource (1 per arm cycle)
//!    │  type_tag, directory, full_path, chunk_size
//!    │
//!    └── Datum (1 per chunk)
//!            chunk_num, column?
//!               ▲
//!               │ datum id
//!        CollectRecord { data: {channel: datum_id}, timestamps, time_ns }
//! ```

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Marker placed in `external` to say the data lives in the file store.
pub const EXTERNAL_FILESTORE: &str = "FILESTORE:";

/// Generate a new unique document id.
pub fn new_uid() -> String {
    Uuid::new_v4().to_string()
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
pub fn now_ns() -> u64 {
    chrono::Utc::now()
        .timestamp_nanos_opt()
        .map(|ns| ns.max(0) as u64)
        .unwrap_or_default()
}

/// Number of chunks needed to cover `line_count` rows.
///
/// `ceil(line_count / chunk_size)`; zero only for an empty file. A zero
/// `chunk_size` is treated as one row per chunk.
pub fn chunk_count(line_count: usize, chunk_size: usize) -> usize {
    line_count.div_ceil(chunk_size.max(1))
}

/// Parameters stored with a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceParams {
    /// Rows per chunk
    pub chunk_size: usize,
}

/// A registered external file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Registrar-assigned id
    pub id: String,
    /// Handler type tag, e.g. `PIZZABOX_ENC_FILE_TXT`
    pub type_tag: String,
    /// Date-based directory the file lives in
    pub directory: PathBuf,
    /// Full path of the file
    pub full_path: PathBuf,
    /// Chunking parameters
    pub params: ResourceParams,
}

impl Resource {
    /// Rows per chunk.
    pub fn chunk_size(&self) -> usize {
        self.params.chunk_size
    }
}

/// Per-chunk parameters stored with a datum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatumParams {
    /// Chunk index within the resource
    pub chunk_num: usize,
    /// Value column for multi-column files
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<usize>,
}

impl DatumParams {
    /// Params for a single-column chunk.
    pub fn chunk(chunk_num: usize) -> Self {
        Self {
            chunk_num,
            column: None,
        }
    }

    /// Params for one column of a multi-column chunk.
    pub fn chunk_column(chunk_num: usize, column: usize) -> Self {
        Self {
            chunk_num,
            column: Some(column),
        }
    }
}

/// A registered reference to one chunk of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Datum {
    /// Registrar-assigned id
    pub id: String,
    /// Resource this chunk belongs to
    pub resource_id: String,
    /// Chunk parameters
    pub params: DatumParams,
}

/// One harvested event: datum references keyed by channel name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectRecord {
    /// channel name -> datum id
    pub data: HashMap<String, String>,
    /// channel name -> timestamp (ns)
    pub timestamps: HashMap<String, u64>,
    /// Event time (ns)
    pub time_ns: u64,
}

impl CollectRecord {
    /// Record a single datum for `channel`, stamped at `time_ns`.
    pub fn single(channel: &str, datum_id: String, time_ns: u64) -> Self {
        let mut data = HashMap::new();
        data.insert(channel.to_string(), datum_id);
        let timestamps = data.keys().map(|k| (k.clone(), time_ns)).collect();
        Self {
            data,
            timestamps,
            time_ns,
        }
    }

    /// Datum id recorded for `channel`, if any.
    pub fn datum_for(&self, channel: &str) -> Option<&str> {
        self.data.get(channel).map(String::as_str)
    }
}

/// Schema entry telling consumers where and how to decode external data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalDataKey {
    /// Full path of the file
    pub filename: String,
    /// Device name reported by the hardware
    pub devname: String,
    /// Source tag, e.g. `pizzabox-enc-file`
    pub source: String,
    /// Always [`EXTERNAL_FILESTORE`]
    pub external: String,
    /// `[chunk_size, field_count]`
    pub shape: Vec<usize>,
    /// Always `array`
    pub dtype: String,
}

impl ExternalDataKey {
    /// Array data key for a chunked file.
    pub fn chunked_file(
        filename: impl Into<String>,
        devname: impl Into<String>,
        source: &str,
        chunk_size: usize,
        field_count: usize,
    ) -> Self {
        Self {
            filename: filename.into(),
            devname: devname.into(),
            source: source.to_string(),
            external: EXTERNAL_FILESTORE.to_string(),
            shape: vec![chunk_size, field_count],
            dtype: "array".to_string(),
        }
    }
}

/// Describe payload: `{stream: {field: key}}`.
pub type Describe = HashMap<String, HashMap<String, ExternalDataKey>>;

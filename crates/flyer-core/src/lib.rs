//! Core types for flyer-mode acquisition.
//!
//! Pizza-box hardware streams timestamped rows to flat files on its own. This
//! crate holds the vocabulary shared by everything that arms those devices,
//! harvests references to what they wrote, and reads the rows back later:
//!
//! - [`error`] - the shared [`FlyerError`] type
//! - [`kind`] - channel kinds and their fixed file metadata
//! - [`document`] - resources, datums, harvested records, describe payloads
//! - [`registrar`] - the id-assigning store for resources and datums
//! - [`signal`] - control-system signals and an in-memory implementation
//! - [`status`] - completion handles for asynchronous operations
//! - [`flyer`] - the arm/start/stop/harvest lifecycle trait
//! - [`config`] - figment-based configuration

pub mod config;
pub mod document;
pub mod error;
pub mod flyer;
pub mod kind;
pub mod registrar;
pub mod signal;
pub mod status;

pub use document::{
    chunk_count, new_uid, now_ns, CollectRecord, Datum, DatumParams, Describe, ExternalDataKey,
    Resource, ResourceParams,
};
pub use error::{FlyerError, Result};
pub use flyer::{ArmOutcome, ChannelState, Flyer, Harvest, HarvestOutcome, TriggerRole};
pub use kind::ChannelKind;
pub use registrar::{InMemoryRegistrar, Registrar};
pub use signal::{Signal, SignalProvider, SoftSignal, SoftSignalProvider, STREAMING, SUPPRESSED};
pub use status::{Status, StatusHandle, StatusState};

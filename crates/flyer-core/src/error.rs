//! Error types for flyer acquisition.
//!
//! `FlyerError` is the single error type shared by the core, storage and
//! hardware crates. It separates three broad kinds of failure:
//!
//! 1. **Sequencing** - an acquisition lifecycle call made out of order
//!    (`stop()` before `start()`, `harvest()` before `stop()`, ...). These are
//!    programming errors in the caller and are never retried.
//! 2. **Coordination** - the trigger-line wait timed out, a completion handle
//!    failed, or a group was asked to do something with no active members.
//! 3. **Data** - missing reader handlers, unknown resource/datum ids, and rows
//!    that do not match the fixed per-kind schema.
//!
//! Soft conditions (a disconnected device at arm time, a file the hardware
//! never created) are *not* errors; they are reported through
//! [`ArmOutcome`](crate::flyer::ArmOutcome) and
//! [`HarvestOutcome`](crate::flyer::HarvestOutcome).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::flyer::ChannelState;

/// Result alias used throughout the flyer crates.
pub type Result<T> = std::result::Result<T, FlyerError>;

/// Primary error type for flyer acquisition.
#[derive(Error, Debug)]
pub enum FlyerError {
    /// A lifecycle operation was invoked in the wrong state.
    ///
    /// The per-channel order is `arm -> start -> stop -> harvest`.
    #[error("Channel '{channel}': cannot {operation} while {state}")]
    Sequencing {
        /// Channel name
        channel: String,
        /// The operation that was attempted
        operation: &'static str,
        /// State the channel was in at the time
        state: ChannelState,
    },

    /// A slave channel gave up waiting for its master to enable the shared line.
    #[error("Channel '{channel}': trigger line '{line}' not enabled by master within {waited:?} ({polls} polls)")]
    TriggerTimeout {
        /// Waiting (slave) channel
        channel: String,
        /// Trigger line name
        line: String,
        /// How long the channel waited before giving up
        waited: Duration,
        /// Number of polls performed
        polls: u32,
    },

    /// A completion handle finished unsuccessfully.
    #[error("Status '{name}' failed: {cause}")]
    StatusFailed {
        /// Name of the operation the status tracked
        name: String,
        /// Error the operation failed with
        cause: Arc<FlyerError>,
    },

    /// A group operation was requested but every member is disabled.
    #[error("Group '{0}' has no active members")]
    EmptyGroup(String),

    /// No reader constructor registered for a resource type tag.
    #[error("No handler registered for type tag '{0}'")]
    HandlerNotRegistered(String),

    /// The registrar has no resource with this id.
    #[error("Unknown resource id '{0}'")]
    UnknownResource(String),

    /// The registrar has no datum with this id.
    #[error("Unknown datum id '{0}'")]
    UnknownDatum(String),

    /// A row field could not be parsed in its fixed numeric base.
    #[error("{}:{line}: field '{field}' value '{value}' is not a base-{base} integer", path.display())]
    Parse {
        /// File being parsed
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// Field name from the row schema
        field: &'static str,
        /// Offending token
        value: String,
        /// Expected numeric base
        base: u32,
    },

    /// A row has fewer fields than its schema requires.
    #[error("{}:{line}: expected {expected} fields, found {found}", path.display())]
    FieldCount {
        /// File being parsed
        path: PathBuf,
        /// 1-based line number
        line: usize,
        /// Fields required by the schema (and selected column)
        expected: usize,
        /// Fields present on the line
        found: usize,
    },

    /// A column was requested that the reader's schema cannot provide.
    #[error("Column {column} not available for type tag '{type_tag}'")]
    ColumnOutOfRange {
        /// Type tag of the reader
        type_tag: &'static str,
        /// Requested column
        column: usize,
    },

    /// The control system reports the signal as not connected.
    #[error("Signal '{0}' is disconnected")]
    Disconnected(String),

    /// Configuration parsed but is semantically invalid.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Configuration file parsing failed.
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Standard I/O failure (line counting, file loading).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A background task panicked or was cancelled.
    #[error("Task join error: {0}")]
    Join(String),
}

impl From<figment::Error> for FlyerError {
    fn from(err: figment::Error) -> Self {
        FlyerError::Config(Box::new(err))
    }
}

impl FlyerError {
    /// Build a sequencing error for `channel`.
    pub fn sequencing(channel: impl Into<String>, operation: &'static str, state: ChannelState) -> Self {
        FlyerError::Sequencing {
            channel: channel.into(),
            operation,
            state,
        }
    }

    /// Whether this error is a lifecycle ordering violation.
    pub fn is_sequencing(&self) -> bool {
        matches!(self, FlyerError::Sequencing { .. })
    }

    /// The innermost error, looking through failed completion handles.
    pub fn root_cause(&self) -> &FlyerError {
        match self {
            FlyerError::StatusFailed { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

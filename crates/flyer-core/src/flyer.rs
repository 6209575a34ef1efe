//! The flyer lifecycle trait.
//!
//! A flyer collects asynchronously to the orchestrating process: hardware
//! writes rows to a file on its own, and the orchestrator only arms the
//! device, gates streaming on and off, and afterwards harvests references to
//! what was written.
//!
//! ```text
//!          arm()            start()            stop()
//!  Idle ──────────► Armed ──────────► Running ─────────► Stopped
//!   ▲                                                      │
//!   │                      unstage()                       │ harvest()
//!   └──────────────────────────────────────────────────────┘ (stays Stopped)
//! ```
//!
//! Out-of-order calls fail with [`FlyerError::Sequencing`](crate::FlyerError).
//! Soft conditions come back as [`ArmOutcome`] / [`HarvestOutcome`] values.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::document::{CollectRecord, Describe};
use crate::error::Result;
use crate::kind::ChannelKind;
use crate::status::Status;

/// Lifecycle state of one acquisition channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    /// Not armed; no resource registered for the current cycle
    #[default]
    Idle,
    /// File path written and resource registered; streaming suppressed
    Armed,
    /// Streaming enabled (or waiting on the master, for slaves)
    Running,
    /// Streaming suppressed again; ready to harvest
    Stopped,
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Armed => "armed",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Role of a channel on a shared trigger line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerRole {
    /// Drives the shared enable signal
    #[default]
    Master,
    /// Observes the shared enable signal
    Slave,
    /// Excluded from all group operations
    Disabled,
}

impl TriggerRole {
    /// Whether the role takes part in group operations.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Disabled)
    }
}

impl std::fmt::Display for TriggerRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Master => "master",
            Self::Slave => "slave",
            Self::Disabled => "disabled",
        };
        f.write_str(label)
    }
}

/// Result of [`Flyer::arm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArmOutcome {
    /// Path written to the device and a resource registered
    Armed {
        /// Full path of the new file
        path: PathBuf,
        /// Registered resource id
        resource_id: String,
    },
    /// Slave armed; it harvests the file its master publishes on the line
    Attached {
        /// Trigger line name
        line: String,
    },
    /// Device not connected; arm was a no-op
    Disconnected,
    /// Channel role is disabled; arm was a no-op
    Disabled,
}

impl ArmOutcome {
    /// Whether the channel is now armed.
    pub fn is_armed(&self) -> bool {
        matches!(self, Self::Armed { .. } | Self::Attached { .. })
    }
}

/// Degraded-or-not summary of one harvest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HarvestOutcome {
    /// One datum registered per chunk
    Collected {
        /// Number of chunks (and records)
        chunks: usize,
    },
    /// The hardware never created the file
    MissingFile {
        /// Path the channel expected
        path: PathBuf,
    },
    /// No resource for this cycle (disconnected at arm, or disabled)
    NotArmed,
}

/// Records produced by [`Flyer::harvest`] together with how they came about.
#[derive(Debug, Clone, PartialEq)]
pub struct Harvest {
    /// Channel that produced the records
    pub channel: String,
    /// One record per chunk, in chunk order
    pub records: Vec<CollectRecord>,
    /// Typed summary
    pub outcome: HarvestOutcome,
}

impl Harvest {
    /// Harvest with no records.
    pub fn empty(channel: impl Into<String>, outcome: HarvestOutcome) -> Self {
        Self {
            channel: channel.into(),
            records: Vec::new(),
            outcome,
        }
    }
}

/// An acquisition channel driven through arm/start/stop/harvest.
///
/// All methods take `&self`; implementations keep their state behind
/// interior mutability so they can be shared as `Arc<dyn Flyer>` between a
/// group and background tasks.
#[async_trait]
pub trait Flyer: Send + Sync {
    /// Channel name, used as the record and describe key.
    fn name(&self) -> &str;

    /// Kind of data this channel writes.
    fn kind(&self) -> ChannelKind;

    /// Role on the trigger line (standalone channels are masters).
    fn role(&self) -> TriggerRole;

    /// Name of the shared trigger line, if any.
    fn trigger_line(&self) -> Option<&str> {
        None
    }

    /// Current lifecycle state.
    fn state(&self) -> ChannelState;

    /// Prepare a new file and register its resource.
    async fn arm(&self) -> Result<ArmOutcome>;

    /// Force streaming off and return to `Idle`.
    async fn unstage(&self) -> Result<()>;

    /// Enable streaming; the returned status completes when data is flowing.
    async fn start(&self) -> Result<Status>;

    /// Suppress streaming.
    async fn stop(&self) -> Result<Status>;

    /// Register one datum per chunk of the written file.
    async fn harvest(&self) -> Result<Harvest>;

    /// Describe payload for this channel's external data.
    async fn describe(&self) -> Result<Describe>;
}

//! Configuration loading using Figment.
//!
//! Configuration is loaded from:
//! 1. a TOML file (`config/flyer.toml` by default)
//! 2. environment variables prefixed with `FLYER_`, nested keys separated by
//!    a double underscore (`FLYER_ACQUISITION__CHUNK_SIZE=2048`)
//!
//! # Example
//! ```no_run
//! use flyer_core::config::FlyerConfig;
//!
//! let config = FlyerConfig::load()?;
//! config.validate()?;
//! println!("{} channels", config.channels.len());
//! # Ok::<(), flyer_core::FlyerError>(())
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{FlyerError, Result};
use crate::flyer::TriggerRole;
use crate::kind::ChannelKind;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/flyer.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlyerConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// File layout and harvesting settings
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Slave wait policy for shared trigger lines
    #[serde(default)]
    pub trigger: TriggerConfig,
    /// Channel definitions, in group order
    #[serde(default)]
    pub channels: Vec<ChannelDefinition>,
}

/// Application-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_name")]
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
        }
    }
}

/// Where files go and how they are chunked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionConfig {
    /// Rows per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Root directory the hardware writes under
    #[serde(default = "default_data_root")]
    pub data_root: PathBuf,
    /// strftime template for the date sub-directory
    #[serde(default = "default_path_template")]
    pub path_template: String,
    /// Delay before counting lines at harvest, in milliseconds
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            data_root: default_data_root(),
            path_template: default_path_template(),
            settle_delay_ms: default_settle_delay(),
        }
    }
}

impl AcquisitionConfig {
    /// Settle delay as a [`Duration`].
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Backoff strategy between slave polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Same interval every poll
    Fixed,
    /// Interval multiplied by `backoff_factor` each poll, capped
    #[default]
    Exponential,
}

/// Slave wait policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerConfig {
    /// First poll interval in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Upper bound for the poll interval in milliseconds
    #[serde(default = "default_max_poll_interval")]
    pub max_poll_interval_ms: u64,
    /// Total time to wait for the master in milliseconds
    #[serde(default = "default_wait_timeout")]
    pub timeout_ms: u64,
    /// Backoff strategy
    #[serde(default)]
    pub backoff: BackoffKind,
    /// Multiplier for exponential backoff
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            max_poll_interval_ms: default_max_poll_interval(),
            timeout_ms: default_wait_timeout(),
            backoff: BackoffKind::default(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

/// One acquisition channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDefinition {
    /// Unique channel name
    pub name: String,
    /// Data kind
    pub kind: ChannelKind,
    /// PV prefix of the device, without the closing brace
    /// (e.g. `XF:07BMB-CT{Enc01:1`)
    pub prefix: String,
    /// Role on the trigger line
    #[serde(default)]
    pub role: TriggerRole,
    /// PV prefix of the shared trigger line, for paired ADCs
    #[serde(default)]
    pub trigger: Option<String>,
    /// Value column in a shared file
    #[serde(default)]
    pub column: Option<usize>,
}

// Default value functions
fn default_name() -> String {
    "flyer".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_chunk_size() -> usize {
    1024
}

fn default_data_root() -> PathBuf {
    PathBuf::from("/nsls2/xf07bm/data/pizza_box_data")
}

fn default_path_template() -> String {
    "%Y/%m/%d".to_string()
}

fn default_settle_delay() -> u64 {
    1000
}

fn default_poll_interval() -> u64 {
    100
}

fn default_max_poll_interval() -> u64 {
    1000
}

fn default_wait_timeout() -> u64 {
    10_000
}

fn default_backoff_factor() -> f64 {
    2.0
}

impl FlyerConfig {
    /// Load configuration from [`DEFAULT_CONFIG_PATH`] and the environment.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path and the environment.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("FLYER_").split("__"))
            .extract()?)
    }

    /// Parse configuration from a TOML string, ignoring the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Ok(Figment::new().merge(Toml::string(toml)).extract()?)
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(FlyerError::Configuration(msg));

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        if self.acquisition.chunk_size == 0 {
            return invalid("chunk_size must be greater than 0".into());
        }

        let trigger = &self.trigger;
        if trigger.poll_interval_ms == 0 {
            return invalid("poll_interval_ms must be greater than 0".into());
        }
        if trigger.max_poll_interval_ms < trigger.poll_interval_ms {
            return invalid(format!(
                "max_poll_interval_ms ({}) is below poll_interval_ms ({})",
                trigger.max_poll_interval_ms, trigger.poll_interval_ms
            ));
        }
        if trigger.backoff_factor.is_nan() || trigger.backoff_factor < 1.0 {
            return invalid(format!("backoff_factor {} must be >= 1.0", trigger.backoff_factor));
        }

        let mut names = HashSet::new();
        for channel in &self.channels {
            if !names.insert(channel.name.as_str()) {
                return invalid(format!("Duplicate channel name: {}", channel.name));
            }
            match &channel.trigger {
                Some(_) => {
                    if channel.kind != ChannelKind::Analog {
                        return invalid(format!(
                            "Channel '{}': only analog channels can share a trigger line",
                            channel.name
                        ));
                    }
                    if channel.column.is_none() {
                        return invalid(format!(
                            "Channel '{}': trigger-line members need a column",
                            channel.name
                        ));
                    }
                }
                None => {
                    if channel.role == TriggerRole::Slave {
                        return invalid(format!(
                            "Channel '{}': slave role requires a trigger line",
                            channel.name
                        ));
                    }
                }
            }
        }

        for (line, members) in self.trigger_lines() {
            let masters = members
                .iter()
                .filter(|c| c.role == TriggerRole::Master)
                .count();
            let active = members.iter().filter(|c| c.role.is_active()).count();
            if active > 0 && masters != 1 {
                return invalid(format!(
                    "Trigger line '{}' has {} masters among {} active members; exactly one required",
                    line, masters, active
                ));
            }
        }

        Ok(())
    }

    /// Channels grouped by trigger line, in definition order.
    pub fn trigger_lines(&self) -> BTreeMap<&str, Vec<&ChannelDefinition>> {
        let mut lines: BTreeMap<&str, Vec<&ChannelDefinition>> = BTreeMap::new();
        for channel in &self.channels {
            if let Some(line) = channel.trigger.as_deref() {
                lines.entry(line).or_default().push(channel);
            }
        }
        lines
    }

    /// Channels that take part in group operations.
    pub fn active_channels(&self) -> Vec<&ChannelDefinition> {
        self.channels.iter().filter(|c| c.role.is_active()).collect()
    }
}

//! Driving pizza-box hardware in flyer mode.
//!
//! - [`channel`] - one acquisition channel and its arm/start/stop/harvest cycle
//! - [`trigger`] - shared trigger lines and the bounded slave wait
//! - [`group`] - ordered fan-out over several channels
//! - [`factory`] - channels and groups from [`FlyerConfig`](flyer_core::config::FlyerConfig)
//! - [`mock`] - simulated boxes that write files while their gate is open

pub mod channel;
pub mod factory;
pub mod group;
pub mod mock;
pub mod trigger;

pub use channel::{pv, ChannelSettings, DeviceSignals, FlyerChannel, FlyerChannelBuilder};
pub use factory::{build_channels, build_group};
pub use group::{ChannelGroup, GroupHarvest};
pub use mock::SimulatedPizzaBox;
pub use trigger::{validate_roles, Backoff, TriggerLine, WaitPolicy};

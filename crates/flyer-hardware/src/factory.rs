//! Building channels and groups from configuration.
//!
//! Every `[[channels]]` entry becomes one [`FlyerChannel`]. Entries that name
//! the same `trigger` prefix share one [`TriggerLine`], whose enable control
//! and file path live on the trigger box (`{trigger}}Ena-Sel`,
//! `{trigger}}ID:File.VAL`).

use std::collections::HashMap;
use std::sync::Arc;

use flyer_core::config::FlyerConfig;
use flyer_core::{Flyer, FlyerError, Registrar, Result, SignalProvider};
use tracing::debug;

use crate::channel::{pv, ChannelSettings, DeviceSignals, FlyerChannel, ENABLE_SUFFIX, FILEPATH_SUFFIX};
use crate::group::ChannelGroup;
use crate::trigger::TriggerLine;

/// Trigger line for the box at `prefix`, using `provider`'s signals.
pub fn trigger_line(provider: &dyn SignalProvider, prefix: &str) -> TriggerLine {
    TriggerLine::new(
        prefix,
        provider.int_signal(&pv(prefix, ENABLE_SUFFIX)),
        provider.string_signal(&pv(prefix, FILEPATH_SUFFIX)),
    )
}

/// Channels defined by `config`, in definition order.
///
/// The configuration is validated first.
pub fn build_channels(
    config: &FlyerConfig,
    provider: &dyn SignalProvider,
    registrar: Arc<dyn Registrar>,
) -> Result<Vec<Arc<FlyerChannel>>> {
    config.validate()?;
    let settings = ChannelSettings::from(config);

    let mut lines: HashMap<&str, Arc<TriggerLine>> = HashMap::new();
    let mut channels = Vec::with_capacity(config.channels.len());
    for def in &config.channels {
        let mut builder = FlyerChannel::builder(def.name.clone(), def.kind)
            .signals(DeviceSignals::from_provider(provider, &def.prefix, def.kind))
            .registrar(Arc::clone(&registrar))
            .settings(settings.clone())
            .role(def.role);
        if let Some(prefix) = def.trigger.as_deref() {
            let column = def.column.ok_or_else(|| {
                FlyerError::Configuration(format!(
                    "Channel '{}': trigger line members need a column",
                    def.name
                ))
            })?;
            let line = lines
                .entry(prefix)
                .or_insert_with(|| Arc::new(trigger_line(provider, prefix)));
            builder = builder.trigger_line(Arc::clone(line), column);
        }
        let channel = builder.build()?;
        debug!(channel = %def.name, kind = %def.kind, role = %def.role, "Built channel");
        channels.push(Arc::new(channel));
    }
    Ok(channels)
}

/// One group holding every channel defined by `config`.
pub fn build_group(
    name: impl Into<String>,
    config: &FlyerConfig,
    provider: &dyn SignalProvider,
    registrar: Arc<dyn Registrar>,
) -> Result<ChannelGroup> {
    let members = build_channels(config, provider, registrar)?
        .into_iter()
        .map(|c| c as Arc<dyn Flyer>)
        .collect();
    ChannelGroup::new(name, members)
}

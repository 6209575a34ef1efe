//! Simulated pizza boxes.
//!
//! A [`SimulatedPizzaBox`] plays the hardware side of the protocol against
//! [`SoftSignal`]s: while its gate reads `0` (streaming) and a file path is
//! set, every [`emit`](SimulatedPizzaBox::emit) appends rows to that file in
//! the box's text format. Standalone channels get one box each; a trigger
//! line gets one box writing all of its members' columns.
//!
//! ```rust,ignore
//! let provider = SoftSignalProvider::new();
//! let boxes = SimulatedPizzaBox::for_config(&provider, &config);
//! let tasks: Vec<_> = boxes.iter().map(|b| b.spawn_streaming(Duration::from_millis(5), 10)).collect();
//! ```

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use flyer_core::config::FlyerConfig;
use flyer_core::{ChannelKind, Result, Signal, SoftSignal, SoftSignalProvider, STREAMING};
use flyer_storage::rows::{format_analog_line, format_digital_input_line, format_encoder_line};
use flyer_storage::{DigitalInputRow, EncoderRow};
use tokio::task::JoinHandle;
use tracing::{trace, warn};

use crate::channel::{pv, DEVNAME_SUFFIX, ENABLE_SUFFIX, FILEPATH_SUFFIX};

/// Hardware stand-in writing rows while its gate is open.
#[derive(Debug)]
pub struct SimulatedPizzaBox {
    prefix: String,
    kind: ChannelKind,
    columns: usize,
    gate: Arc<SoftSignal<i64>>,
    filepath: Arc<SoftSignal<String>>,
    dev_name: Arc<SoftSignal<String>>,
    index: AtomicI64,
}

impl SimulatedPizzaBox {
    /// Box for a standalone `kind` channel at `prefix`.
    pub fn standalone(provider: &SoftSignalProvider, prefix: &str, kind: ChannelKind) -> Self {
        Self {
            prefix: prefix.to_string(),
            kind,
            columns: 1,
            gate: provider.soft_int(&pv(prefix, kind.suppress_suffix())),
            filepath: provider.soft_string(&pv(prefix, FILEPATH_SUFFIX)),
            dev_name: provider.soft_string(&pv(prefix, DEVNAME_SUFFIX)),
            index: AtomicI64::new(0),
        }
    }

    /// Analog box driving the trigger line at `prefix`, writing `columns` values per row.
    pub fn trigger_line(provider: &SoftSignalProvider, prefix: &str, columns: usize) -> Self {
        Self {
            prefix: prefix.to_string(),
            kind: ChannelKind::Analog,
            columns: columns.max(1),
            gate: provider.soft_int(&pv(prefix, ENABLE_SUFFIX)),
            filepath: provider.soft_string(&pv(prefix, FILEPATH_SUFFIX)),
            dev_name: provider.soft_string(&pv(prefix, DEVNAME_SUFFIX)),
            index: AtomicI64::new(0),
        }
    }

    /// Boxes for every channel in `config`.
    ///
    /// Also fills in each channel's device name with the channel name.
    pub fn for_config(provider: &SoftSignalProvider, config: &FlyerConfig) -> Vec<Arc<Self>> {
        let mut boxes = Vec::new();
        for def in &config.channels {
            provider
                .soft_string(&pv(&def.prefix, DEVNAME_SUFFIX))
                .put_local(def.name.clone());
            if def.trigger.is_none() {
                boxes.push(Arc::new(Self::standalone(provider, &def.prefix, def.kind)));
            }
        }
        for (line, members) in config.trigger_lines() {
            let columns = members
                .iter()
                .filter_map(|m| m.column)
                .max()
                .map_or(1, |c| c + 1);
            boxes.push(Arc::new(Self::trigger_line(provider, line, columns)));
        }
        boxes
    }

    /// PV prefix of the box.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Rows written so far.
    pub fn rows_written(&self) -> i64 {
        self.index.load(Ordering::SeqCst)
    }

    /// Connect or disconnect all of the box's signals.
    pub fn set_connected(&self, connected: bool) {
        self.gate.set_connected(connected);
        self.filepath.set_connected(connected);
        self.dev_name.set_connected(connected);
    }

    /// Whether the gate is open.
    pub fn is_streaming(&self) -> bool {
        self.gate.is_connected() && self.gate.value() == STREAMING
    }

    /// Append `rows` rows if streaming; returns how many were written.
    pub fn emit(&self, rows: usize) -> Result<usize> {
        let path = self.filepath.value();
        if !self.is_streaming() || path.is_empty() || rows == 0 {
            return Ok(0);
        }
        let path = PathBuf::from(path);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut text = String::new();
        for _ in 0..rows {
            let index = self.index.fetch_add(1, Ordering::SeqCst);
            text.push_str(&self.line(index));
            text.push('\n');
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(text.as_bytes())?;
        trace!(prefix = %self.prefix, path = %path.display(), rows, "Emitted rows");
        Ok(rows)
    }

    fn line(&self, index: i64) -> String {
        let now = chrono::Utc::now();
        let (ts_s, ts_ns) = (now.timestamp(), i64::from(now.timestamp_subsec_nanos()));
        match self.kind {
            ChannelKind::Encoder => format_encoder_line(&EncoderRow {
                ts_s,
                ts_ns,
                encoder: -3 * index,
                index,
                state: index % 2,
            }),
            ChannelKind::DigitalInput => format_digital_input_line(&DigitalInputRow {
                ts_s,
                ts_ns,
                encoder: 0,
                index,
                di: index % 2,
            }),
            ChannelKind::Analog => {
                let values: Vec<i64> = (0..self.columns)
                    .map(|c| ((c as i64 + 1) << 12) + (index & 0xfff))
                    .collect();
                format_analog_line(ts_s, ts_ns, index, &values)
            }
        }
    }

    /// Emit `rows` rows every `period` until the task is aborted.
    pub fn spawn_streaming(self: &Arc<Self>, period: Duration, rows: usize) -> JoinHandle<()> {
        let sim = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = sim.emit(rows) {
                    warn!(prefix = %sim.prefix, error = %e, "Simulated write failed");
                }
            }
        })
    }
}

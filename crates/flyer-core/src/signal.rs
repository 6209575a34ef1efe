//! Device signals.
//!
//! Each pizza-box channel is driven through a handful of control-system
//! process variables: the file path the box writes to, the control that
//! suppresses (or allows) writing, and the device name. The control system
//! itself is outside this crate; channels only see the [`Signal`] trait.
//!
//! [`SoftSignal`] is an in-memory stand-in built on `tokio::sync::watch`, so
//! simulated hardware can react to writes the same way an IOC would, and
//! [`SoftSignalProvider`] hands out one shared signal per PV name.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{FlyerError, Result};

/// Suppression control value: the box does not write rows.
pub const SUPPRESSED: i64 = 1;
/// Suppression control value: the box streams rows to its file.
pub const STREAMING: i64 = 0;

/// A readable and writable control-system value.
#[async_trait]
pub trait Signal<T>: Send + Sync
where
    T: Clone + Send + Sync + 'static,
{
    /// PV name.
    fn name(&self) -> &str;

    /// Whether the underlying channel is currently connected.
    fn is_connected(&self) -> bool;

    /// Read the current value.
    async fn get(&self) -> Result<T>;

    /// Write a new value.
    async fn set(&self, value: T) -> Result<()>;
}

/// In-memory signal backed by a watch channel.
///
/// Reads and writes fail with [`FlyerError::Disconnected`] while the signal
/// is marked disconnected.
pub struct SoftSignal<T> {
    name: String,
    tx: watch::Sender<T>,
    connected: AtomicBool,
}

impl<T> SoftSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a connected signal holding `initial`.
    pub fn new(name: impl Into<String>, initial: T) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self {
            name: name.into(),
            tx,
            connected: AtomicBool::new(true),
        }
    }

    /// Mark the signal connected or disconnected.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Subscribe to value changes.
    pub fn subscribe(&self) -> watch::Receiver<T> {
        self.tx.subscribe()
    }

    /// Current value, regardless of connection state.
    pub fn value(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Overwrite the value from the device side, regardless of connection state.
    pub fn put_local(&self, value: T) {
        self.tx.send_replace(value);
    }

    fn check_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(FlyerError::Disconnected(self.name.clone()))
        }
    }
}

impl<T: Debug> Debug for SoftSignal<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftSignal")
            .field("name", &self.name)
            .field("value", &*self.tx.borrow())
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}

#[async_trait]
impl<T> Signal<T> for SoftSignal<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn get(&self) -> Result<T> {
        self.check_connected()?;
        Ok(self.tx.borrow().clone())
    }

    async fn set(&self, value: T) -> Result<()> {
        self.check_connected()?;
        self.tx.send_replace(value);
        Ok(())
    }
}

/// Source of signals by PV name.
///
/// Asking twice for the same name returns the same underlying signal, so
/// channels sharing a trigger line share its enable control.
pub trait SignalProvider: Send + Sync {
    /// Text-valued signal (file path, device name).
    fn string_signal(&self, pv: &str) -> Arc<dyn Signal<String>>;

    /// Integer-valued signal (suppression control).
    fn int_signal(&self, pv: &str) -> Arc<dyn Signal<i64>>;
}

/// Provider of [`SoftSignal`]s, created on first request.
#[derive(Debug, Default)]
pub struct SoftSignalProvider {
    strings: Mutex<HashMap<String, Arc<SoftSignal<String>>>>,
    ints: Mutex<HashMap<String, Arc<SoftSignal<i64>>>>,
}

impl SoftSignalProvider {
    /// Create an empty provider.
    pub fn new() -> Self {
        Self::default()
    }

    /// Concrete text signal for `pv`, created empty if needed.
    pub fn soft_string(&self, pv: &str) -> Arc<SoftSignal<String>> {
        self.strings
            .lock()
            .entry(pv.to_string())
            .or_insert_with(|| Arc::new(SoftSignal::new(pv, String::new())))
            .clone()
    }

    /// Concrete integer signal for `pv`, created suppressed if needed.
    pub fn soft_int(&self, pv: &str) -> Arc<SoftSignal<i64>> {
        self.ints
            .lock()
            .entry(pv.to_string())
            .or_insert_with(|| Arc::new(SoftSignal::new(pv, SUPPRESSED)))
            .clone()
    }

    /// Connect or disconnect every signal of the device at `prefix`.
    ///
    /// `prefix` may carry the closing brace or not; `{Enc01:1` leaves
    /// `{Enc01:10` alone.
    pub fn set_connected(&self, prefix: &str, connected: bool) {
        let device = format!("{}}}", prefix.trim_end_matches('}'));
        for (pv, signal) in self.strings.lock().iter() {
            if pv.starts_with(&device) {
                signal.set_connected(connected);
            }
        }
        for (pv, signal) in self.ints.lock().iter() {
            if pv.starts_with(&device) {
                signal.set_connected(connected);
            }
        }
    }
}

impl SignalProvider for SoftSignalProvider {
    fn string_signal(&self, pv: &str) -> Arc<dyn Signal<String>> {
        self.soft_string(pv)
    }

    fn int_signal(&self, pv: &str) -> Arc<dyn Signal<i64>> {
        self.soft_int(pv)
    }
}

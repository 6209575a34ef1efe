//! Shared trigger lines.
//!
//! Paired ADCs write one file together and are gated by one enable control
//! that belongs to whichever box is wired as the trigger. Exactly one active
//! member of the line is the *master*: it writes the file path, registers the
//! resource, publishes it here, and drives the enable control. The other
//! members are *slaves*: they never touch the control, they only wait for the
//! master to open it.
//!
//! # Slave wait
//!
//! A slave's wait is bounded. It polls the enable control on a
//! [`WaitPolicy`] (fixed or exponential backoff between polls, capped) and
//! gives up with [`FlyerError::TriggerTimeout`] once the policy's timeout
//! has elapsed.
//!
//! ```rust,ignore
//! let policy = WaitPolicy::fixed(Duration::from_millis(20), Duration::from_secs(2));
//! let polls = line.wait_for_master("adc5", &policy).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use flyer_core::config::{BackoffKind, TriggerConfig};
use flyer_core::{FlyerError, Resource, Result, Signal, TriggerRole, STREAMING};
use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::{debug, trace};

/// How the poll interval grows between polls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same interval every poll
    Fixed,
    /// Interval multiplied by `factor` after each poll
    Exponential {
        /// Growth factor, at least 1.0
        factor: f64,
    },
}

/// Bounded polling policy for slaves.
#[derive(Debug, Clone, PartialEq)]
pub struct WaitPolicy {
    /// Interval before the second poll
    pub poll_interval: Duration,
    /// Upper bound on the interval
    pub max_interval: Duration,
    /// Give up after this long
    pub timeout: Duration,
    /// Interval growth
    pub backoff: Backoff,
}

impl Default for WaitPolicy {
    /// 100 ms doubling up to 1 s, for at most 10 s.
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
            backoff: Backoff::Exponential { factor: 2.0 },
        }
    }
}

impl From<&TriggerConfig> for WaitPolicy {
    fn from(config: &TriggerConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_interval: Duration::from_millis(config.max_poll_interval_ms),
            timeout: Duration::from_millis(config.timeout_ms),
            backoff: match config.backoff {
                BackoffKind::Fixed => Backoff::Fixed,
                BackoffKind::Exponential => Backoff::Exponential {
                    factor: config.backoff_factor,
                },
            },
        }
    }
}

impl WaitPolicy {
    /// Poll every `interval` until `timeout`.
    pub fn fixed(interval: Duration, timeout: Duration) -> Self {
        Self {
            poll_interval: interval,
            max_interval: interval,
            timeout,
            backoff: Backoff::Fixed,
        }
    }

    /// Interval to use after one spent `current`.
    pub fn next_interval(&self, current: Duration) -> Duration {
        let next = match self.backoff {
            Backoff::Fixed => current,
            Backoff::Exponential { factor } => current.mul_f64(factor.max(1.0)),
        };
        next.min(self.max_interval.max(self.poll_interval))
    }
}

/// One enable control and file path shared by several channels.
pub struct TriggerLine {
    name: String,
    enable: Arc<dyn Signal<i64>>,
    filepath: Arc<dyn Signal<String>>,
    published: RwLock<Option<Resource>>,
}

impl std::fmt::Debug for TriggerLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriggerLine")
            .field("name", &self.name)
            .field("enable", &self.enable.name())
            .field("filepath", &self.filepath.name())
            .field("published", &self.published.read().as_ref().map(|r| r.id.clone()))
            .finish()
    }
}

impl TriggerLine {
    /// Line named `name` gated by `enable`, writing to `filepath`.
    pub fn new(
        name: impl Into<String>,
        enable: Arc<dyn Signal<i64>>,
        filepath: Arc<dyn Signal<String>>,
    ) -> Self {
        Self {
            name: name.into(),
            enable,
            filepath,
            published: RwLock::new(None),
        }
    }

    /// Line name (the trigger box's PV prefix).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared enable control.
    pub fn enable(&self) -> &Arc<dyn Signal<i64>> {
        &self.enable
    }

    /// Shared file path setting.
    pub fn filepath(&self) -> &Arc<dyn Signal<String>> {
        &self.filepath
    }

    /// Make the master's resource visible to the slaves.
    pub fn publish(&self, resource: Resource) {
        debug!(line = %self.name, resource_id = %resource.id, "Published shared resource");
        *self.published.write() = Some(resource);
    }

    /// Withdraw the published resource until the master arms again.
    pub fn clear(&self) {
        if let Some(resource) = self.published.write().take() {
            debug!(line = %self.name, resource_id = %resource.id, "Withdrew shared resource");
        }
    }

    /// Resource published by the current master, if any.
    pub fn published(&self) -> Option<Resource> {
        self.published.read().clone()
    }

    /// Whether the master has opened the line.
    pub async fn is_enabled(&self) -> Result<bool> {
        Ok(self.enable.get().await? == STREAMING)
    }

    /// Wait until the master opens the line, polling per `policy`.
    ///
    /// Returns the number of polls it took. Read errors count as "not yet".
    pub async fn wait_for_master(&self, channel: &str, policy: &WaitPolicy) -> Result<u32> {
        let started = Instant::now();
        let mut interval = policy.poll_interval;
        let mut polls = 0u32;
        loop {
            polls += 1;
            match self.is_enabled().await {
                Ok(true) => {
                    debug!(channel, line = %self.name, polls, "Master enabled trigger line");
                    return Ok(polls);
                }
                Ok(false) => trace!(channel, line = %self.name, polls, "Trigger line not enabled yet"),
                Err(e) => debug!(channel, line = %self.name, error = %e, "Trigger line unreadable"),
            }

            let waited = started.elapsed();
            if waited >= policy.timeout {
                return Err(FlyerError::TriggerTimeout {
                    channel: channel.to_string(),
                    line: self.name.clone(),
                    waited,
                    polls,
                });
            }
            tokio::time::sleep(interval.min(policy.timeout - waited)).await;
            interval = policy.next_interval(interval);
        }
    }
}

/// Check that exactly one active member of `line` is its master.
///
/// A line whose members are all disabled is valid.
pub fn validate_roles<'a>(line: &str, roles: impl IntoIterator<Item = &'a TriggerRole>) -> Result<()> {
    let (mut masters, mut active) = (0usize, 0usize);
    for role in roles {
        if role.is_active() {
            active += 1;
        }
        if *role == TriggerRole::Master {
            masters += 1;
        }
    }
    if active > 0 && masters != 1 {
        return Err(FlyerError::Configuration(format!(
            "Trigger line '{}' has {} masters among {} active members; exactly one required",
            line, masters, active
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flyer_core::{SoftSignal, SUPPRESSED};

    fn line() -> (TriggerLine, Arc<SoftSignal<i64>>) {
        let enable = Arc::new(SoftSignal::new("XF:07BMB-CT{GP2-ADC:6}Ena-Sel", SUPPRESSED));
        let filepath = Arc::new(SoftSignal::new("XF:07BMB-CT{GP2-ADC:6}ID:File.VAL", String::new()));
        (
            TriggerLine::new("XF:07BMB-CT{GP2-ADC:6", enable.clone(), filepath),
            enable,
        )
    }

    #[test]
    fn test_exponential_backoff_caps() {
        let policy = WaitPolicy {
            poll_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(35),
            timeout: Duration::from_secs(1),
            backoff: Backoff::Exponential { factor: 2.0 },
        };
        let mut interval = policy.poll_interval;
        let mut seen = Vec::new();
        for _ in 0..4 {
            interval = policy.next_interval(interval);
            seen.push(interval.as_millis());
        }
        assert_eq!(seen, vec![20, 35, 35, 35]);
    }

    #[test]
    fn test_fixed_backoff() {
        let policy = WaitPolicy::fixed(Duration::from_millis(15), Duration::from_secs(1));
        assert_eq!(policy.next_interval(Duration::from_millis(15)), Duration::from_millis(15));
    }

    #[test]
    fn test_policy_from_config() {
        let config = TriggerConfig {
            poll_interval_ms: 50,
            max_poll_interval_ms: 400,
            timeout_ms: 3000,
            backoff: BackoffKind::Fixed,
            backoff_factor: 3.0,
        };
        let policy = WaitPolicy::from(&config);
        assert_eq!(policy.backoff, Backoff::Fixed);
        assert_eq!(policy.timeout, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_wait_returns_once_enabled() {
        let (line, enable) = line();
        enable.put_local(STREAMING);
        let policy = WaitPolicy::fixed(Duration::from_millis(5), Duration::from_millis(200));
        assert_eq!(line.wait_for_master("adc5", &policy).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let (line, _enable) = line();
        let policy = WaitPolicy::fixed(Duration::from_millis(10), Duration::from_millis(50));
        let started = Instant::now();
        let err = line.wait_for_master("adc5", &policy).await.unwrap_err();
        assert!(started.elapsed() >= Duration::from_millis(50));
        match err {
            FlyerError::TriggerTimeout { channel, polls, waited, .. } => {
                assert_eq!(channel, "adc5");
                assert!(polls >= 2);
                assert!(waited >= Duration::from_millis(50));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn test_disconnected_enable_counts_as_not_yet() {
        let (line, enable) = line();
        enable.set_connected(false);
        enable.put_local(STREAMING);
        let policy = WaitPolicy::fixed(Duration::from_millis(5), Duration::from_millis(30));
        assert!(matches!(
            line.wait_for_master("adc5", &policy).await,
            Err(FlyerError::TriggerTimeout { .. })
        ));
    }

    #[test]
    fn test_validate_roles() {
        use TriggerRole::*;
        assert!(validate_roles("l", &[Master, Slave]).is_ok());
        assert!(validate_roles("l", &[Disabled, Disabled]).is_ok());
        assert!(validate_roles("l", &[Master, Disabled]).is_ok());
        assert!(validate_roles("l", &[Slave, Slave]).is_err());
        assert!(validate_roles("l", &[Master, Master]).is_err());
    }

    #[test]
    fn test_publish_replaces() {
        let (line, _) = line();
        assert!(line.published().is_none());
        let resource = |id: &str| Resource {
            id: id.into(),
            type_tag: "PIZZABOX_AN_FILE_TXT".into(),
            directory: "/d".into(),
            full_path: "/d/an_000000".into(),
            params: flyer_core::ResourceParams { chunk_size: 4 },
        };
        line.publish(resource("a"));
        line.publish(resource("b"));
        assert_eq!(line.published().unwrap().id, "b");
        line.clear();
        assert!(line.published().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_timing_under_paused_clock() {
        let (line, _enable) = line();
        let policy = WaitPolicy {
            poll_interval: Duration::from_millis(10),
            max_interval: Duration::from_millis(40),
            timeout: Duration::from_millis(100),
            backoff: Backoff::Exponential { factor: 2.0 },
        };
        // polls at 0, 10, 30, 70 and 100 ms
        let started = Instant::now();
        let err = line.wait_for_master("adc5", &policy).await.unwrap_err();
        assert_eq!(started.elapsed(), Duration::from_millis(100));
        match err {
            FlyerError::TriggerTimeout { polls, waited, .. } => {
                assert_eq!(polls, 5);
                assert_eq!(waited, Duration::from_millis(100));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_wait_sees_late_master() {
        let (line, enable) = line();
        let policy = WaitPolicy::fixed(Duration::from_millis(20), Duration::from_secs(1));
        let opener = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            enable.put_local(STREAMING);
        });
        // polls at 0, 20, 40 and 60 ms
        assert_eq!(line.wait_for_master("adc5", &policy).await.unwrap(), 4);
        opener.await.unwrap();
    }
}

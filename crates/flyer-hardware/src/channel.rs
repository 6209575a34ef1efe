//! Pizza-box acquisition channel.
//!
//! A [`FlyerChannel`] owns one device's signals and walks it through
//! `arm -> start -> stop -> harvest`:
//!
//! - **arm** picks a fresh file under `data_root/<date>/`, writes the path to
//!   the device, registers a resource and leaves streaming suppressed
//! - **start** opens the suppression control (masters and standalone
//!   channels) or waits on the trigger line (slaves)
//! - **stop** closes the control again
//! - **harvest** counts the lines the hardware wrote and registers one datum
//!   per chunk
//!
//! A device that is not connected at arm time is skipped with a warning; the
//! rest of the cycle runs without touching it and harvests nothing.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flyer_core::config::FlyerConfig;
use flyer_core::{
    chunk_count, now_ns, ArmOutcome, ChannelKind, ChannelState, CollectRecord, DatumParams,
    Describe, ExternalDataKey, Flyer, FlyerError, Harvest, HarvestOutcome, Registrar, Resource,
    ResourceParams, Result, Signal, SignalProvider, Status, TriggerRole, STREAMING, SUPPRESSED,
};
use flyer_storage::count_lines_async;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::trigger::{TriggerLine, WaitPolicy};

/// PV suffix of the file path setting.
pub const FILEPATH_SUFFIX: &str = "ID:File.VAL";
/// PV suffix of the device name.
pub const DEVNAME_SUFFIX: &str = "DevName";
/// PV suffix of the shared enable control on a trigger box.
pub const ENABLE_SUFFIX: &str = "Ena-Sel";

/// Attempts at finding an unused filename before giving up.
const MAX_NAME_ATTEMPTS: usize = 16;

/// Full PV name for `suffix` on the device at `prefix`.
pub fn pv(prefix: &str, suffix: &str) -> String {
    format!("{prefix}}}{suffix}")
}

/// Harvest and file layout settings shared by all channels.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSettings {
    /// Rows per chunk
    pub chunk_size: usize,
    /// Root the hardware writes under
    pub data_root: PathBuf,
    /// strftime template for the date sub-directory
    pub path_template: String,
    /// Wait before counting lines at harvest
    pub settle_delay: Duration,
    /// Slave polling policy
    pub wait_policy: WaitPolicy,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1024,
            data_root: PathBuf::from("/nsls2/xf07bm/data/pizza_box_data"),
            path_template: "%Y/%m/%d".to_string(),
            settle_delay: Duration::from_secs(1),
            wait_policy: WaitPolicy::default(),
        }
    }
}

impl From<&FlyerConfig> for ChannelSettings {
    fn from(config: &FlyerConfig) -> Self {
        Self {
            chunk_size: config.acquisition.chunk_size,
            data_root: config.acquisition.data_root.clone(),
            path_template: config.acquisition.path_template.clone(),
            settle_delay: config.acquisition.settle_delay(),
            wait_policy: WaitPolicy::from(&config.trigger),
        }
    }
}

impl ChannelSettings {
    /// Directory for files armed now.
    pub fn directory_for_now(&self) -> PathBuf {
        let dated = chrono::Local::now().format(&self.path_template).to_string();
        self.data_root.join(dated)
    }
}

/// The three signals every pizza-box channel talks to.
#[derive(Clone)]
pub struct DeviceSignals {
    /// File the box writes to
    pub filepath: Arc<dyn Signal<String>>,
    /// Suppression control (`1` suppressed, `0` streaming)
    pub suppress: Arc<dyn Signal<i64>>,
    /// Device name reported in describe
    pub dev_name: Arc<dyn Signal<String>>,
}

impl std::fmt::Debug for DeviceSignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSignals")
            .field("filepath", &self.filepath.name())
            .field("suppress", &self.suppress.name())
            .field("dev_name", &self.dev_name.name())
            .finish()
    }
}

impl DeviceSignals {
    /// Signals of the `kind` device at `prefix`.
    pub fn from_provider(provider: &dyn SignalProvider, prefix: &str, kind: ChannelKind) -> Self {
        Self {
            filepath: provider.string_signal(&pv(prefix, FILEPATH_SUFFIX)),
            suppress: provider.int_signal(&pv(prefix, kind.suppress_suffix())),
            dev_name: provider.string_signal(&pv(prefix, DEVNAME_SUFFIX)),
        }
    }
}

/// Trigger-line membership of a channel.
#[derive(Debug, Clone)]
struct LineMembership {
    line: Arc<TriggerLine>,
    role: TriggerRole,
    column: usize,
}

#[derive(Debug, Default)]
struct ChannelInner {
    state: ChannelState,
    ready: bool,
    /// Arm was skipped because the device was offline
    degraded: bool,
    resource: Option<Resource>,
    devname: Option<String>,
    /// Result of the first harvest since the last arm
    harvested: Option<Harvest>,
}

/// Builder for [`FlyerChannel`].
pub struct FlyerChannelBuilder {
    name: String,
    kind: ChannelKind,
    signals: Option<DeviceSignals>,
    registrar: Option<Arc<dyn Registrar>>,
    settings: ChannelSettings,
    role: TriggerRole,
    membership: Option<(Arc<TriggerLine>, usize)>,
}

impl FlyerChannelBuilder {
    /// Device signals (required).
    pub fn signals(mut self, signals: DeviceSignals) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Registrar for resources and datums (required).
    pub fn registrar(mut self, registrar: Arc<dyn Registrar>) -> Self {
        self.registrar = Some(registrar);
        self
    }

    /// File layout and harvest settings.
    pub fn settings(mut self, settings: ChannelSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Role; `Disabled` excludes the channel from group operations.
    pub fn role(mut self, role: TriggerRole) -> Self {
        self.role = role;
        self
    }

    /// Join a shared trigger line, reading value `column` of its file.
    pub fn trigger_line(mut self, line: Arc<TriggerLine>, column: usize) -> Self {
        self.membership = Some((line, column));
        self
    }

    /// Build the channel.
    pub fn build(self) -> Result<FlyerChannel> {
        let signals = self.signals.ok_or_else(|| {
            FlyerError::Configuration(format!("Channel '{}': signals not set", self.name))
        })?;
        let registrar = self.registrar.ok_or_else(|| {
            FlyerError::Configuration(format!("Channel '{}': registrar not set", self.name))
        })?;
        if self.settings.chunk_size == 0 {
            return Err(FlyerError::Configuration(format!(
                "Channel '{}': chunk_size must be greater than 0",
                self.name
            )));
        }
        let membership = match self.membership {
            Some((line, column)) => Some(LineMembership {
                line,
                role: self.role,
                column,
            }),
            None if self.role == TriggerRole::Slave => {
                return Err(FlyerError::Configuration(format!(
                    "Channel '{}': slave role requires a trigger line",
                    self.name
                )))
            }
            None => None,
        };
        Ok(FlyerChannel {
            name: self.name,
            kind: self.kind,
            role: self.role,
            signals,
            registrar,
            settings: self.settings,
            membership,
            inner: Mutex::new(ChannelInner::default()),
        })
    }
}

/// One pizza-box acquisition channel.
pub struct FlyerChannel {
    name: String,
    kind: ChannelKind,
    role: TriggerRole,
    signals: DeviceSignals,
    registrar: Arc<dyn Registrar>,
    settings: ChannelSettings,
    membership: Option<LineMembership>,
    inner: Mutex<ChannelInner>,
}

impl std::fmt::Debug for FlyerChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlyerChannel")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("role", &self.role)
            .field("line", &self.membership.as_ref().map(|m| m.line.name().to_string()))
            .field("state", &self.inner.lock().state)
            .finish()
    }
}

impl FlyerChannel {
    /// Start building a channel.
    pub fn builder(name: impl Into<String>, kind: ChannelKind) -> FlyerChannelBuilder {
        FlyerChannelBuilder {
            name: name.into(),
            kind,
            signals: None,
            registrar: None,
            settings: ChannelSettings::default(),
            role: TriggerRole::Master,
            membership: None,
        }
    }

    /// Value column in the file, for trigger-line members.
    pub fn column(&self) -> Option<usize> {
        self.membership.as_ref().map(|m| m.column)
    }

    /// Full path of the current file, if armed.
    pub fn full_path(&self) -> Option<PathBuf> {
        self.current_resource().map(|r| r.full_path)
    }

    /// Resource harvested against: own for masters, published for slaves.
    pub fn current_resource(&self) -> Option<Resource> {
        match &self.membership {
            Some(m) if m.role == TriggerRole::Slave => m.line.published(),
            _ => self.inner.lock().resource.clone(),
        }
    }

    /// Whether the last arm was skipped because the device was offline.
    pub fn is_degraded(&self) -> bool {
        self.inner.lock().degraded
    }

    fn is_slave(&self) -> bool {
        self.role == TriggerRole::Slave
    }

    /// Line this channel publishes on, if it is a line master.
    fn published_line(&self) -> Option<&Arc<TriggerLine>> {
        self.membership
            .as_ref()
            .filter(|m| m.role == TriggerRole::Master)
            .map(|m| &m.line)
    }

    /// Control that gates streaming: the line's for members, own otherwise.
    fn gate(&self) -> &Arc<dyn Signal<i64>> {
        match &self.membership {
            Some(m) => m.line.enable(),
            None => &self.signals.suppress,
        }
    }

    fn path_signal(&self) -> &Arc<dyn Signal<String>> {
        match &self.membership {
            Some(m) => m.line.filepath(),
            None => &self.signals.filepath,
        }
    }

    fn is_connected(&self) -> bool {
        let mut connected = self.gate().is_connected() && self.signals.dev_name.is_connected();
        if !self.is_slave() {
            connected &= self.path_signal().is_connected();
        }
        connected
    }

    /// Fresh `prefix + 6 hex` path in `directory` that does not exist yet.
    fn unique_path(&self, directory: &Path) -> Result<PathBuf> {
        for _ in 0..MAX_NAME_ATTEMPTS {
            let token = Uuid::new_v4().simple().to_string();
            let filename = format!("{}{}", self.kind.file_prefix(), &token[..6]);
            let path = directory.join(filename);
            if !path.exists() {
                return Ok(path);
            }
            debug!(channel = %self.name, path = %path.display(), "Filename taken, retrying");
        }
        Err(FlyerError::Io(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("no unused filename in {}", directory.display()),
        )))
    }

    fn set_state(&self, state: ChannelState) {
        self.inner.lock().state = state;
    }

    /// Count the file's lines and register one datum per chunk.
    async fn collect(&self) -> Result<Harvest> {
        let stamp = now_ns();
        tokio::time::sleep(self.settings.settle_delay).await;

        let resource = if self.is_degraded() {
            None
        } else {
            self.current_resource()
        };
        let Some(resource) = resource else {
            match self.membership.as_ref().filter(|m| m.role == TriggerRole::Slave) {
                Some(m) => warn!(
                    channel = %self.name,
                    line = %m.line.name(),
                    "Master published no resource this cycle; harvest is empty"
                ),
                None => warn!(channel = %self.name, "Nothing armed; harvest is empty"),
            }
            return Ok(Harvest::empty(self.name.clone(), HarvestOutcome::NotArmed));
        };

        let path = resource.full_path.clone();
        if !path.is_file() {
            warn!(channel = %self.name, path = %path.display(), "File was not created");
            return Ok(Harvest::empty(self.name.clone(), HarvestOutcome::MissingFile { path }));
        }

        let lines = count_lines_async(path.clone()).await?;
        let chunks = chunk_count(lines, resource.chunk_size());
        let column = self.column();
        let mut records = Vec::with_capacity(chunks);
        for chunk in 0..chunks {
            let params = match column {
                Some(column) => DatumParams::chunk_column(chunk, column),
                None => DatumParams::chunk(chunk),
            };
            let datum_id = self.registrar.register_datum(&resource.id, params)?;
            records.push(CollectRecord::single(&self.name, datum_id, stamp));
        }
        info!(channel = %self.name, path = %path.display(), lines, chunks, "Harvested");
        Ok(Harvest {
            channel: self.name.clone(),
            records,
            outcome: HarvestOutcome::Collected { chunks },
        })
    }
}

#[async_trait]
impl Flyer for FlyerChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn role(&self) -> TriggerRole {
        self.role
    }

    fn trigger_line(&self) -> Option<&str> {
        self.membership.as_ref().map(|m| m.line.name())
    }

    fn state(&self) -> ChannelState {
        self.inner.lock().state
    }

    async fn arm(&self) -> Result<ArmOutcome> {
        if self.role == TriggerRole::Disabled {
            debug!(channel = %self.name, "Disabled; arm skipped");
            return Ok(ArmOutcome::Disabled);
        }
        let state = self.state();
        if matches!(state, ChannelState::Armed | ChannelState::Running) {
            return Err(FlyerError::sequencing(&self.name, "arm", state));
        }
        if let Some(line) = self.published_line() {
            line.clear();
        }

        if !self.is_connected() {
            warn!(channel = %self.name, "Device not connected; arm skipped");
            let mut inner = self.inner.lock();
            *inner = ChannelInner {
                degraded: true,
                ..ChannelInner::default()
            };
            return Ok(ArmOutcome::Disconnected);
        }

        let devname = self.signals.dev_name.get().await?;

        if let Some(m) = self.membership.as_ref().filter(|m| m.role == TriggerRole::Slave) {
            info!(channel = %self.name, line = %m.line.name(), "Armed as slave");
            let mut inner = self.inner.lock();
            *inner = ChannelInner {
                state: ChannelState::Armed,
                devname: Some(devname),
                ..ChannelInner::default()
            };
            return Ok(ArmOutcome::Attached {
                line: m.line.name().to_string(),
            });
        }

        let directory = self.settings.directory_for_now();
        let path = self.unique_path(&directory)?;

        self.gate().set(SUPPRESSED).await?;
        self.path_signal()
            .set(path.to_string_lossy().into_owned())
            .await?;

        let params = ResourceParams {
            chunk_size: self.settings.chunk_size,
        };
        let resource_id =
            self.registrar
                .register_resource(self.kind.type_tag(), &directory, &path, params)?;
        let resource = Resource {
            id: resource_id.clone(),
            type_tag: self.kind.type_tag().to_string(),
            directory,
            full_path: path.clone(),
            params,
        };
        if let Some(m) = &self.membership {
            m.line.publish(resource.clone());
        }

        info!(channel = %self.name, path = %path.display(), resource_id = %resource_id, "Armed");
        *self.inner.lock() = ChannelInner {
            state: ChannelState::Armed,
            resource: Some(resource),
            devname: Some(devname),
            ..ChannelInner::default()
        };
        Ok(ArmOutcome::Armed { path, resource_id })
    }

    async fn unstage(&self) -> Result<()> {
        if self.role == TriggerRole::Disabled {
            return Ok(());
        }
        if self.gate().is_connected() {
            self.gate().set(SUPPRESSED).await?;
        } else {
            warn!(channel = %self.name, "Device not connected; suppression not forced");
        }
        if let Some(line) = self.published_line() {
            line.clear();
        }
        let mut inner = self.inner.lock();
        inner.state = ChannelState::Idle;
        inner.ready = false;
        inner.degraded = false;
        debug!(channel = %self.name, "Unstaged");
        Ok(())
    }

    async fn start(&self) -> Result<Status> {
        if self.role == TriggerRole::Disabled {
            return Ok(Status::done(self.name.clone()));
        }
        let (state, degraded) = {
            let inner = self.inner.lock();
            (inner.state, inner.degraded)
        };
        match state {
            ChannelState::Armed => {}
            ChannelState::Idle if degraded => {
                warn!(channel = %self.name, "Starting without a connected device; nothing will be recorded");
                let mut inner = self.inner.lock();
                inner.state = ChannelState::Running;
                inner.ready = true;
                return Ok(Status::done(self.name.clone()));
            }
            other => return Err(FlyerError::sequencing(&self.name, "start", other)),
        }

        let membership = match &self.membership {
            Some(m) if m.role == TriggerRole::Slave => m,
            _ => {
                self.gate().set(STREAMING).await?;
                let mut inner = self.inner.lock();
                inner.state = ChannelState::Running;
                inner.ready = true;
                info!(channel = %self.name, "Streaming enabled");
                return Ok(Status::done(self.name.clone()));
            }
        };

        {
            let mut inner = self.inner.lock();
            inner.state = ChannelState::Running;
            inner.ready = true;
        }
        let (status, handle) = Status::pending(self.name.clone());
        let line = Arc::clone(&membership.line);
        let policy = self.settings.wait_policy.clone();
        let channel = self.name.clone();
        tokio::spawn(async move {
            match line.wait_for_master(&channel, &policy).await {
                Ok(_) => handle.finish(),
                Err(e) => {
                    warn!(channel = %channel, error = %e, "Master never enabled trigger line");
                    handle.fail(e);
                }
            }
        });
        debug!(channel = %self.name, "Waiting on master");
        Ok(status)
    }

    async fn stop(&self) -> Result<Status> {
        if self.role == TriggerRole::Disabled {
            return Ok(Status::done(self.name.clone()));
        }
        let (state, ready, degraded) = {
            let inner = self.inner.lock();
            (inner.state, inner.ready, inner.degraded)
        };
        if !ready {
            return Err(FlyerError::sequencing(&self.name, "stop", state));
        }
        if !self.is_slave() && !degraded {
            self.gate().set(SUPPRESSED).await?;
        }
        self.set_state(ChannelState::Stopped);
        info!(channel = %self.name, "Streaming stopped");
        Ok(Status::done(self.name.clone()))
    }

    async fn harvest(&self) -> Result<Harvest> {
        if self.role == TriggerRole::Disabled {
            return Ok(Harvest::empty(self.name.clone(), HarvestOutcome::NotArmed));
        }
        {
            let mut inner = self.inner.lock();
            if inner.state != ChannelState::Stopped {
                return Err(FlyerError::sequencing(&self.name, "harvest", inner.state));
            }
            if let Some(harvest) = &inner.harvested {
                debug!(channel = %self.name, "Already harvested; returning cached records");
                return Ok(harvest.clone());
            }
            inner.ready = false;
        }
        let harvest = self.collect().await?;
        self.inner.lock().harvested = Some(harvest.clone());
        Ok(harvest)
    }

    async fn describe(&self) -> Result<Describe> {
        if self.role == TriggerRole::Disabled {
            return Ok(Describe::new());
        }
        let (state, devname) = {
            let inner = self.inner.lock();
            (inner.state, inner.devname.clone())
        };
        let (Some(devname), Some(resource)) = (devname, self.current_resource()) else {
            return Err(FlyerError::sequencing(&self.name, "describe", state));
        };
        let key = ExternalDataKey::chunked_file(
            resource.full_path.to_string_lossy(),
            devname,
            self.kind.source(),
            resource.chunk_size(),
            self.kind.field_count(),
        );
        let mut fields = std::collections::HashMap::new();
        fields.insert(self.name.clone(), key);
        let mut describe = Describe::new();
        describe.insert(self.name.clone(), fields);
        Ok(describe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flyer_core::{InMemoryRegistrar, SoftSignalProvider};
    use tracing_test::traced_test;

    const PREFIX: &str = "XF:07BMB-CT{Enc01:1";

    fn encoder(dir: &Path, provider: &SoftSignalProvider) -> FlyerChannel {
        provider.soft_string(&pv(PREFIX, DEVNAME_SUFFIX)).put_local("enc1".into());
        FlyerChannel::builder("enc1", ChannelKind::Encoder)
            .signals(DeviceSignals::from_provider(provider, PREFIX, ChannelKind::Encoder))
            .registrar(Arc::new(InMemoryRegistrar::new()))
            .settings(ChannelSettings {
                chunk_size: 4,
                data_root: dir.to_path_buf(),
                settle_delay: Duration::from_millis(1),
                ..ChannelSettings::default()
            })
            .build()
            .unwrap()
    }

    #[test]
    fn test_pv_closes_brace() {
        assert_eq!(pv("XF:07BMB-CT{GP2-ADC:6", ENABLE_SUFFIX), "XF:07BMB-CT{GP2-ADC:6}Ena-Sel");
    }

    #[test]
    fn test_builder_requires_signals_and_registrar() {
        let err = FlyerChannel::builder("enc1", ChannelKind::Encoder).build().unwrap_err();
        assert!(err.to_string().contains("signals not set"));
    }

    #[test]
    fn test_slave_without_line_rejected() {
        let provider = SoftSignalProvider::new();
        let err = FlyerChannel::builder("adc5", ChannelKind::Analog)
            .signals(DeviceSignals::from_provider(&provider, "XF:07BMB-CT{GP2-ADC:5", ChannelKind::Analog))
            .registrar(Arc::new(InMemoryRegistrar::new()))
            .role(TriggerRole::Slave)
            .build()
            .unwrap_err();
        assert!(matches!(err, FlyerError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_arm_writes_fresh_path_and_suppresses() {
        let dir = tempfile::tempdir().unwrap();
        let provider = SoftSignalProvider::new();
        let channel = encoder(dir.path(), &provider);
        provider.soft_int(&pv(PREFIX, "Ignore-Sel")).put_local(STREAMING);

        let ArmOutcome::Armed { path, .. } = channel.arm().await.unwrap() else {
            panic!("expected armed");
        };
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("en_"));
        assert_eq!(name.len(), 9);
        assert!(path.starts_with(dir.path()));
        assert_eq!(provider.soft_string(&pv(PREFIX, FILEPATH_SUFFIX)).value(), path.to_string_lossy());
        assert_eq!(provider.soft_int(&pv(PREFIX, "Ignore-Sel")).value(), SUPPRESSED);
        assert_eq!(channel.state(), ChannelState::Armed);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_disconnected_arm_is_skipped_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let provider = SoftSignalProvider::new();
        let channel = encoder(dir.path(), &provider);
        provider.set_connected(PREFIX, false);

        assert_eq!(channel.arm().await.unwrap(), ArmOutcome::Disconnected);
        assert!(logs_contain("Device not connected; arm skipped"));
        assert!(channel.is_degraded());
        assert_eq!(channel.state(), ChannelState::Idle);

        assert!(channel.start().await.unwrap().is_done());
        channel.stop().await.unwrap();
        let harvest = channel.harvest().await.unwrap();
        assert_eq!(harvest.outcome, HarvestOutcome::NotArmed);
        assert!(harvest.records.is_empty());
    }

    #[tokio::test]
    async fn test_unstage_forces_suppression() {
        let dir = tempfile::tempdir().unwrap();
        let provider = SoftSignalProvider::new();
        let channel = encoder(dir.path(), &provider);
        channel.arm().await.unwrap();
        channel.start().await.unwrap();
        assert_eq!(provider.soft_int(&pv(PREFIX, "Ignore-Sel")).value(), STREAMING);

        channel.unstage().await.unwrap();
        assert_eq!(provider.soft_int(&pv(PREFIX, "Ignore-Sel")).value(), SUPPRESSED);
        assert_eq!(channel.state(), ChannelState::Idle);
        assert!(channel.stop().await.unwrap_err().is_sequencing());
    }
}

//! Full arm/start/stop/harvest cycles against simulated pizza boxes,
//! read back through the datum resolver.

use std::sync::Arc;
use std::time::Duration;

use flyer_core::config::FlyerConfig;
use flyer_core::{
    ArmOutcome, ChannelState, Flyer, FlyerError, HarvestOutcome, InMemoryRegistrar, Registrar,
    SoftSignalProvider, STREAMING, SUPPRESSED,
};
use flyer_hardware::{build_channels, build_group, ChannelGroup, FlyerChannel, SimulatedPizzaBox};
use flyer_storage::{DatumResolver, HandlerRegistry, Row};
use tempfile::TempDir;
use tokio::time::timeout;

const CHANNELS: &str = r#"
    [acquisition]
    chunk_size = 8
    settle_delay_ms = 5

    [trigger]
    poll_interval_ms = 5
    max_poll_interval_ms = 20
    timeout_ms = 2000

    [[channels]]
    name = "enc1"
    kind = "encoder"
    prefix = "XF:07BMB-CT{Enc01:1"

    [[channels]]
    name = "di1"
    kind = "digital_input"
    prefix = "XF:07BMB-CT{DIO:1"

    [[channels]]
    name = "adc5"
    kind = "analog"
    prefix = "XF:07BMB-CT{GP2-ADC:5"
    role = "slave"
    trigger = "XF:07BMB-CT{GP2-ADC:6"
    column = 0

    [[channels]]
    name = "adc6"
    kind = "analog"
    prefix = "XF:07BMB-CT{GP2-ADC:6"
    trigger = "XF:07BMB-CT{GP2-ADC:6"
    column = 1
"#;

const LINE: &str = "XF:07BMB-CT{GP2-ADC:6";

struct Rig {
    _dir: TempDir,
    config: FlyerConfig,
    provider: Arc<SoftSignalProvider>,
    registrar: Arc<InMemoryRegistrar>,
    boxes: Vec<Arc<SimulatedPizzaBox>>,
}

impl Rig {
    fn new(toml: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = FlyerConfig::from_toml_str(toml).unwrap();
        config.acquisition.data_root = dir.path().to_path_buf();
        let provider = Arc::new(SoftSignalProvider::new());
        let boxes = SimulatedPizzaBox::for_config(&provider, &config);
        Self {
            _dir: dir,
            config,
            provider,
            registrar: Arc::new(InMemoryRegistrar::new()),
            boxes,
        }
    }

    fn group(&self) -> ChannelGroup {
        build_group("pizzaboxes", &self.config, &*self.provider, self.registrar.clone()).unwrap()
    }

    fn channels(&self) -> Vec<Arc<FlyerChannel>> {
        build_channels(&self.config, &*self.provider, self.registrar.clone()).unwrap()
    }

    fn sim(&self, prefix: &str) -> &SimulatedPizzaBox {
        self.boxes.iter().find(|b| b.prefix() == prefix).unwrap()
    }

    fn emit_all(&self, rows: usize) {
        for sim in &self.boxes {
            sim.emit(rows).unwrap();
        }
    }

    fn resolver(&self) -> DatumResolver {
        DatumResolver::new(self.registrar.clone(), HandlerRegistry::with_defaults())
    }
}

fn adc_values(rows: Vec<Row>) -> Vec<i64> {
    rows.into_iter()
        .map(|row| match row {
            Row::Analog(r) => r.adc,
            other => panic!("expected analog row, got {other:?}"),
        })
        .collect()
}

#[tokio::test]
async fn standalone_encoder_round_trip() {
    let rig = Rig::new(CHANNELS);
    let channels = rig.channels();
    let enc = &channels[0];
    let gate = rig.provider.soft_int("XF:07BMB-CT{Enc01:1}Ignore-Sel");

    let ArmOutcome::Armed { path, resource_id } = enc.arm().await.unwrap() else {
        panic!("encoder should arm");
    };
    assert_eq!(gate.value(), SUPPRESSED);
    rig.sim("XF:07BMB-CT{Enc01:1").emit(3).unwrap();
    assert!(!path.exists());

    enc.start().await.unwrap().wait().await.unwrap();
    assert_eq!(gate.value(), STREAMING);
    rig.sim("XF:07BMB-CT{Enc01:1").emit(20).unwrap();
    enc.stop().await.unwrap();
    assert_eq!(gate.value(), SUPPRESSED);
    assert_eq!(enc.state(), ChannelState::Stopped);

    let harvest = enc.harvest().await.unwrap();
    assert_eq!(harvest.outcome, HarvestOutcome::Collected { chunks: 3 });
    assert_eq!(rig.registrar.datums_for(&resource_id).len(), 3);

    let stamp = harvest.records[0].time_ns;
    assert!(harvest.records.iter().all(|r| r.time_ns == stamp));
    assert!(harvest.records.iter().all(|r| r.timestamps["enc1"] == stamp));

    let resolver = rig.resolver();
    let ids: Vec<&str> = harvest
        .records
        .iter()
        .map(|r| r.datum_for("enc1").unwrap())
        .collect();
    let sizes: Vec<usize> = ids.iter().map(|id| resolver.retrieve(id).unwrap().len()).collect();
    assert_eq!(sizes, vec![8, 8, 4]);

    let indices: Vec<i64> = resolver
        .retrieve_all(ids)
        .unwrap()
        .into_iter()
        .map(|row| match row {
            Row::Encoder(r) => r.index,
            other => panic!("expected encoder row, got {other:?}"),
        })
        .collect();
    assert_eq!(indices, (0..20).collect::<Vec<i64>>());
}

#[tokio::test]
async fn dual_adc_pair_shares_one_file() {
    let rig = Rig::new(CHANNELS);
    let group = rig.group();

    let staged = group.stage().await.unwrap();
    let outcome = |name: &str| staged.iter().find(|(n, _)| n == name).map(|(_, o)| o.clone());
    assert_eq!(outcome("adc5"), Some(ArmOutcome::Attached { line: LINE.into() }));
    let Some(ArmOutcome::Armed { path, resource_id }) = outcome("adc6") else {
        panic!("master should arm");
    };
    assert!(path.file_name().unwrap().to_string_lossy().starts_with("an_"));
    assert_eq!(rig.registrar.resource(&resource_id).unwrap().full_path, path);

    let status = group.start().await.unwrap();
    timeout(Duration::from_secs(2), status.wait()).await.unwrap().unwrap();

    rig.emit_all(10);
    group.stop().await.unwrap();
    let harvest = group.harvest().await.unwrap();

    let order: Vec<&str> = harvest.outcomes.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(order, vec!["enc1", "di1", "adc5", "adc6"]);
    for (_, outcome) in &harvest.outcomes {
        assert_eq!(*outcome, HarvestOutcome::Collected { chunks: 2 });
    }
    assert_eq!(harvest.records.len(), 8);
    assert_eq!(rig.registrar.datums_for(&resource_id).len(), 4);

    let resolver = rig.resolver();
    let column = |name: &str| -> Vec<i64> {
        let ids = harvest.records.iter().filter_map(|r| r.datum_for(name));
        adc_values(resolver.retrieve_all(ids).unwrap())
    };
    let index: Vec<i64> = (0..10).collect();
    assert_eq!(column("adc5"), index.iter().map(|i| 0x1000 + i).collect::<Vec<_>>());
    assert_eq!(column("adc6"), index.iter().map(|i| 0x2000 + i).collect::<Vec<_>>());
    assert_eq!(resolver.cached_readers(), 1);

    let describe = group.describe().await.unwrap();
    assert_eq!(describe.len(), 4);
    assert_eq!(describe["adc5"]["adc5"].filename, describe["adc6"]["adc6"].filename);
    assert_eq!(describe["adc6"]["adc6"].shape, vec![8, 4]);
    assert_eq!(describe["enc1"]["enc1"].shape, vec![8, 5]);
    assert_eq!(describe["di1"]["di1"].devname, "di1");
    assert_eq!(describe, group.describe().await.unwrap());

    group.unstage().await.unwrap();
    assert_eq!(rig.provider.soft_int(&format!("{LINE}}}Ena-Sel")).value(), SUPPRESSED);
}

#[tokio::test]
async fn slave_status_completes_only_after_master_starts() {
    let rig = Rig::new(CHANNELS);
    let channels = rig.channels();
    let (adc5, adc6) = (&channels[2], &channels[3]);
    adc5.arm().await.unwrap();
    adc6.arm().await.unwrap();

    let slave = adc5.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert!(!slave.is_done());

    adc6.start().await.unwrap();
    timeout(Duration::from_millis(500), slave.wait()).await.unwrap().unwrap();
    assert!(slave.is_done());
}

#[tokio::test]
async fn slave_gives_up_with_typed_timeout() {
    let toml = CHANNELS.replace("timeout_ms = 2000", "timeout_ms = 40");
    let rig = Rig::new(&toml);
    let channels = rig.channels();
    let adc5 = &channels[2];
    adc5.arm().await.unwrap();

    let status = adc5.start().await.unwrap();
    let err = timeout(Duration::from_secs(1), status.wait()).await.unwrap().unwrap_err();
    match err.root_cause() {
        FlyerError::TriggerTimeout { channel, line, polls, .. } => {
            assert_eq!(channel, "adc5");
            assert_eq!(line, LINE);
            assert!(*polls >= 2);
        }
        other => panic!("unexpected cause {other}"),
    }
}

#[tokio::test]
async fn out_of_order_calls_are_rejected() {
    let rig = Rig::new(CHANNELS);
    let channels = rig.channels();
    let enc = &channels[0];

    assert!(enc.start().await.unwrap_err().is_sequencing());
    assert!(enc.stop().await.unwrap_err().is_sequencing());
    assert!(enc.harvest().await.unwrap_err().is_sequencing());
    assert!(enc.describe().await.unwrap_err().is_sequencing());

    enc.arm().await.unwrap();
    assert!(enc.arm().await.unwrap_err().is_sequencing());
    assert!(enc.harvest().await.unwrap_err().is_sequencing());

    enc.start().await.unwrap();
    let err = enc.harvest().await.unwrap_err();
    assert!(matches!(
        err,
        FlyerError::Sequencing { operation: "harvest", state: ChannelState::Running, .. }
    ));
}

#[tokio::test]
async fn simultaneous_arms_get_distinct_files() {
    let toml = CHANNELS.replace(
        "[[channels]]\n    name = \"di1\"",
        "[[channels]]\n    name = \"enc2\"\n    kind = \"encoder\"\n    prefix = \"XF:07BMB-CT{Enc01:2\"\n\n    [[channels]]\n    name = \"di1\"",
    );
    let rig = Rig::new(&toml);
    let channels = rig.channels();
    let (enc1, enc2) = (&channels[0], &channels[1]);
    assert_eq!(enc2.name(), "enc2");

    let (a, b) = tokio::join!(enc1.arm(), enc2.arm());
    let (
        ArmOutcome::Armed { path: path_a, resource_id: id_a },
        ArmOutcome::Armed { path: path_b, resource_id: id_b },
    ) = (a.unwrap(), b.unwrap())
    else {
        panic!("both encoders should arm");
    };
    assert_ne!(path_a, path_b);
    assert_ne!(id_a, id_b);
    assert_eq!(path_a.parent(), path_b.parent());
}

#[tokio::test]
async fn missing_file_is_a_soft_outcome() {
    let rig = Rig::new(CHANNELS);
    let channels = rig.channels();
    let di = &channels[1];

    let ArmOutcome::Armed { path, .. } = di.arm().await.unwrap() else {
        panic!("digital input should arm");
    };
    di.start().await.unwrap();
    di.stop().await.unwrap();

    let harvest = di.harvest().await.unwrap();
    assert_eq!(harvest.outcome, HarvestOutcome::MissingFile { path });
    assert!(harvest.records.is_empty());
    assert_eq!(rig.registrar.datum_count(), 0);
}

#[tokio::test]
async fn rearm_after_harvest_opens_new_resource() {
    let rig = Rig::new(CHANNELS);
    let channels = rig.channels();
    let enc = &channels[0];

    let ArmOutcome::Armed { resource_id: first, .. } = enc.arm().await.unwrap() else {
        panic!("encoder should arm");
    };
    enc.start().await.unwrap();
    rig.sim("XF:07BMB-CT{Enc01:1").emit(1).unwrap();
    enc.stop().await.unwrap();
    enc.harvest().await.unwrap();
    assert_eq!(enc.state(), ChannelState::Stopped);

    let ArmOutcome::Armed { resource_id: second, .. } = enc.arm().await.unwrap() else {
        panic!("encoder should re-arm");
    };
    assert_ne!(first, second);
    assert_eq!(rig.registrar.resource_count(), 2);
}

#[tokio::test]
async fn disabled_members_are_skipped() {
    let toml = CHANNELS
        .replace("role = \"slave\"", "role = \"disabled\"")
        .replace("name = \"di1\"\n    kind = \"digital_input\"", "name = \"di1\"\n    kind = \"digital_input\"\n    role = \"disabled\"");
    let rig = Rig::new(&toml);
    let group = rig.group();
    assert_eq!(group.active().count(), 2);

    let staged = group.stage().await.unwrap();
    let names: Vec<&str> = staged.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(names, vec!["enc1", "adc6"]);

    group.start().await.unwrap().wait().await.unwrap();
    rig.emit_all(4);
    group.stop().await.unwrap();
    let harvest = group.harvest().await.unwrap();
    assert!(harvest.outcome("adc5").is_none());
    assert!(harvest.outcome("di1").is_none());
    assert!(!group.describe().await.unwrap().contains_key("adc5"));
    for name in ["adc5", "di1"] {
        assert_eq!(group.member(name).unwrap().state(), ChannelState::Idle);
    }
}

#[tokio::test]
async fn group_without_active_members_cannot_start() {
    let toml = r#"
        [[channels]]
        name = "enc1"
        kind = "encoder"
        prefix = "XF:07BMB-CT{Enc01:1"
        role = "disabled"
    "#;
    let rig = Rig::new(toml);
    let group = rig.group();
    assert!(group.stage().await.unwrap().is_empty());
    assert!(matches!(group.start().await, Err(FlyerError::EmptyGroup(name)) if name == "pizzaboxes"));
}

#[tokio::test]
async fn disconnected_member_degrades_without_failing_group() {
    let rig = Rig::new(CHANNELS);
    rig.sim("XF:07BMB-CT{DIO:1").set_connected(false);
    let group = rig.group();

    let staged = group.stage().await.unwrap();
    assert_eq!(staged[1], ("di1".to_string(), ArmOutcome::Disconnected));

    timeout(Duration::from_secs(2), group.start().await.unwrap().wait())
        .await
        .unwrap()
        .unwrap();
    rig.emit_all(3);
    group.stop().await.unwrap();
    let harvest = group.harvest().await.unwrap();
    assert_eq!(harvest.outcome("di1"), Some(&HarvestOutcome::NotArmed));
    assert_eq!(harvest.outcome("enc1"), Some(&HarvestOutcome::Collected { chunks: 1 }));
}

#[tokio::test]
async fn repeat_harvest_keeps_one_datum_per_chunk() {
    let toml = CHANNELS.replace("chunk_size = 8", "chunk_size = 3");
    let rig = Rig::new(&toml);
    let channels = rig.channels();
    let enc = &channels[0];

    let ArmOutcome::Armed { resource_id, .. } = enc.arm().await.unwrap() else {
        panic!("encoder should arm");
    };
    enc.start().await.unwrap();
    rig.sim("XF:07BMB-CT{Enc01:1").emit(7).unwrap();
    enc.stop().await.unwrap();

    let first = enc.harvest().await.unwrap();
    let second = enc.harvest().await.unwrap();
    assert_eq!(first.outcome, HarvestOutcome::Collected { chunks: 3 });
    assert_eq!(first, second);
    assert_eq!(rig.registrar.datums_for(&resource_id).len(), 3);
    assert_eq!(rig.registrar.datum_count(), 3);
}

#[tokio::test]
async fn slave_ignores_previous_cycle_when_master_is_offline() {
    // adc6 and adc7 are both triggered from the adc1 box
    let toml = r#"
        [acquisition]
        chunk_size = 8
        settle_delay_ms = 5

        [trigger]
        poll_interval_ms = 5
        max_poll_interval_ms = 10
        timeout_ms = 40

        [[channels]]
        name = "adc6"
        kind = "analog"
        prefix = "XF:07BMB-CT{GP2-ADC:6"
        trigger = "XF:07BMB-CT{GP2-ADC:1"
        column = 0

        [[channels]]
        name = "adc7"
        kind = "analog"
        prefix = "XF:07BMB-CT{GP2-ADC:7"
        role = "slave"
        trigger = "XF:07BMB-CT{GP2-ADC:1"
        column = 1
    "#;
    let rig = Rig::new(toml);
    let group = rig.group();

    group.stage().await.unwrap();
    timeout(Duration::from_secs(2), group.start().await.unwrap().wait())
        .await
        .unwrap()
        .unwrap();
    rig.sim("XF:07BMB-CT{GP2-ADC:1").emit(10).unwrap();
    group.stop().await.unwrap();
    let first = group.harvest().await.unwrap();
    assert_eq!(first.outcome("adc7"), Some(&HarvestOutcome::Collected { chunks: 2 }));
    group.unstage().await.unwrap();
    let datums = rig.registrar.datum_count();

    rig.provider.set_connected("XF:07BMB-CT{GP2-ADC:6", false);
    let staged = group.stage().await.unwrap();
    assert_eq!(staged[0], ("adc6".to_string(), ArmOutcome::Disconnected));
    assert_eq!(
        staged[1],
        ("adc7".to_string(), ArmOutcome::Attached { line: "XF:07BMB-CT{GP2-ADC:1".into() })
    );

    group.start().await.unwrap();
    group.stop().await.unwrap();
    let second = group.harvest().await.unwrap();
    assert_eq!(second.outcome("adc6"), Some(&HarvestOutcome::NotArmed));
    assert_eq!(second.outcome("adc7"), Some(&HarvestOutcome::NotArmed));
    assert!(second.records.is_empty());
    assert_eq!(rig.registrar.datum_count(), datums);
    assert_eq!(rig.registrar.resource_count(), 1);
}

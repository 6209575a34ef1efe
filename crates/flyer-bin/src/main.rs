//! `flyer` command-line entry point.
//!
//! ```bash
//! # Validate a configuration and list its trigger lines
//! flyer check --config config/flyer.toml
//!
//! # Inspect a file written by a pizza box
//! flyer chunks /data/2024/05/01/en_3f9a1c --chunk-size 1024
//! flyer read /data/2024/05/01/an_77b0e2 --kind analog --chunk 0 --column 1
//!
//! # Run flyer cycles against simulated hardware
//! flyer simulate --config config/flyer.toml --data-root /tmp/pizza --cycles 2
//! ```

mod logging;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flyer_core::config::FlyerConfig;
use flyer_core::{chunk_count, ChannelKind, Flyer, InMemoryRegistrar, SoftSignalProvider};
use flyer_hardware::{build_group, SimulatedPizzaBox};
use flyer_storage::{count_lines, DatumResolver, HandlerRegistry};
use serde_json::json;
use tracing::info;

use crate::logging::{OutputFormat, TracingConfig};

#[derive(Parser)]
#[command(name = "flyer")]
#[command(about = "Flyer-mode acquisition with pizza-box hardware", long_about = None)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Compact, global = true)]
    log_format: OutputFormat,

    /// Log level, overriding the configuration
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a configuration file
    Check {
        /// Configuration file (defaults to config/flyer.toml)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Count the lines and chunks of a file
    Chunks {
        /// File written by the hardware
        file: PathBuf,
        /// Rows per chunk
        #[arg(long, default_value_t = 1024)]
        chunk_size: usize,
    },

    /// Print one chunk of a file as JSON rows
    Read {
        /// File written by the hardware
        file: PathBuf,
        /// Channel kind (encoder, digital_input, analog)
        #[arg(long, value_parser = parse_kind)]
        kind: ChannelKind,
        /// Rows per chunk
        #[arg(long, default_value_t = 1024)]
        chunk_size: usize,
        /// Chunk number
        #[arg(long, default_value_t = 0)]
        chunk: usize,
        /// Value column, for analog files
        #[arg(long)]
        column: Option<usize>,
    },

    /// Run flyer cycles against simulated pizza boxes
    Simulate {
        /// Configuration file (defaults to config/flyer.toml)
        #[arg(long)]
        config: Option<PathBuf>,
        /// Override the data root
        #[arg(long)]
        data_root: Option<PathBuf>,
        /// Number of arm/start/stop/harvest cycles
        #[arg(long, default_value_t = 1)]
        cycles: usize,
        /// How long each cycle streams, in milliseconds
        #[arg(long, default_value_t = 200)]
        stream_ms: u64,
        /// Rows each box writes per millisecond tick
        #[arg(long, default_value_t = 5)]
        rows_per_tick: usize,
    },
}

fn parse_kind(s: &str) -> std::result::Result<ChannelKind, String> {
    match s {
        "encoder" | "enc" => Ok(ChannelKind::Encoder),
        "digital_input" | "di" => Ok(ChannelKind::DigitalInput),
        "analog" | "an" | "adc" => Ok(ChannelKind::Analog),
        other => Err(format!(
            "unknown kind '{other}' (expected encoder, digital_input or analog)"
        )),
    }
}

fn load_config(path: Option<&Path>) -> Result<FlyerConfig> {
    let config = match path {
        Some(path) => FlyerConfig::load_from(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => FlyerConfig::load().context("Failed to load default configuration")?,
    };
    Ok(config)
}

fn init_logging(cli: &Cli, configured: &str) -> Result<()> {
    let level = cli.log_level.as_deref().unwrap_or(configured);
    logging::init(&TracingConfig::from_level_str(level)?.with_format(cli.log_format))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match &cli.command {
        Commands::Check { config } => {
            let config = load_config(config.as_deref())?;
            init_logging(&cli, &config.application.log_level)?;
            config.validate().context("Invalid configuration")?;
            let lines: serde_json::Map<String, serde_json::Value> = config
                .trigger_lines()
                .into_iter()
                .map(|(line, members)| {
                    let members: Vec<_> = members
                        .iter()
                        .map(|m| json!({"name": m.name, "role": m.role, "column": m.column}))
                        .collect();
                    (line.to_string(), json!(members))
                })
                .collect();
            let summary = json!({
                "channels": config.channels.iter().map(|c| &c.name).collect::<Vec<_>>(),
                "active": config.active_channels().iter().map(|c| &c.name).collect::<Vec<_>>(),
                "trigger_lines": lines,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Chunks { file, chunk_size } => {
            init_logging(&cli, "warn")?;
            anyhow::ensure!(*chunk_size > 0, "chunk size must be greater than 0");
            let lines = count_lines(file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let summary = json!({
                "file": file,
                "lines": lines,
                "chunk_size": chunk_size,
                "chunks": chunk_count(lines, *chunk_size),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Read {
            file,
            kind,
            chunk_size,
            chunk,
            column,
        } => {
            init_logging(&cli, "warn")?;
            let handlers = HandlerRegistry::with_defaults();
            let reader = handlers
                .open(kind.type_tag(), file, *chunk_size)
                .with_context(|| format!("Failed to open {}", file.display()))?;
            let rows = reader.read(*chunk, *column)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        Commands::Simulate {
            config,
            data_root,
            cycles,
            stream_ms,
            rows_per_tick,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(root) = data_root {
                config.acquisition.data_root = root.clone();
            }
            init_logging(&cli, &config.application.log_level)?;
            simulate(&config, *cycles, Duration::from_millis(*stream_ms), *rows_per_tick).await?;
        }
    }

    Ok(())
}

async fn simulate(
    config: &FlyerConfig,
    cycles: usize,
    stream_for: Duration,
    rows_per_tick: usize,
) -> Result<()> {
    let provider = Arc::new(SoftSignalProvider::new());
    let boxes = SimulatedPizzaBox::for_config(&provider, config);
    let registrar = Arc::new(InMemoryRegistrar::new());
    let group = build_group(
        config.application.name.clone(),
        config,
        &*provider,
        registrar.clone(),
    )
    .context("Failed to build channel group")?;
    let resolver = DatumResolver::new(registrar.clone(), HandlerRegistry::with_defaults());
    let start_timeout = Duration::from_millis(config.trigger.timeout_ms) + Duration::from_secs(1);

    for cycle in 0..cycles {
        info!(cycle, group = %group.name(), "Starting cycle");
        let staged = group.stage().await?;
        let status = group.start().await?;
        tokio::time::timeout(start_timeout, status.wait())
            .await
            .context("Timed out waiting for channels to start")??;

        let tasks: Vec<_> = boxes
            .iter()
            .map(|b| b.spawn_streaming(Duration::from_millis(1), rows_per_tick))
            .collect();
        tokio::time::sleep(stream_for).await;
        for task in &tasks {
            task.abort();
        }

        group.stop().await?.wait().await?;
        let harvest = group.harvest().await?;
        let describe = group.describe().await?;

        let mut channels = serde_json::Map::new();
        for member in group.active() {
            let name = member.name();
            let ids: Vec<&str> = harvest
                .records
                .iter()
                .filter_map(|r| r.datum_for(name))
                .collect();
            let rows = resolver.retrieve_all(ids.iter().copied())?.len();
            let arm = staged
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, o)| format!("{o:?}"));
            channels.insert(
                name.to_string(),
                json!({
                    "arm": arm,
                    "harvest": harvest.outcome(name).map(|o| format!("{o:?}")),
                    "datums": ids.len(),
                    "rows": rows,
                    "file": describe.get(name).and_then(|d| d.get(name)).map(|k| &k.filename),
                }),
            );
        }
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({"cycle": cycle, "channels": channels}))?
        );

        group.unstage().await?;
        resolver.clear_cache();
    }

    info!(
        resources = registrar.resource_count(),
        datums = registrar.datum_count(),
        "Simulation finished"
    );
    Ok(())
}

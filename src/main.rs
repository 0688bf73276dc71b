use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use futures_util::stream::select_all;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;

use psiwatch::{
    Config, DetectorConfig, Metric, PressureSource, ProcPressure, Resource, StarvationDetector,
};

const DEFAULT_LOW_THRESHOLD: u32 = 70;
const DEFAULT_HIGH_THRESHOLD: u32 = 90;

#[derive(Parser, Debug)]
#[command(name = "psiwatch", about = "Linux pressure stall monitor")]
struct Args {
    /// Path to a psiwatch.toml config file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory holding the cpu/memory/io pressure files
    #[arg(long)]
    root: Option<PathBuf>,

    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print current pressure for every resource and exit
    Once,
    /// Print starvation alerts until interrupted
    Watch {
        /// Resource to watch (cpu, memory, io); replaces configured detectors
        #[arg(long)]
        resource: Option<String>,
        /// avg10, avg60 or avg300 [default: avg10]
        #[arg(long)]
        metric: Option<String>,
        /// Recovery threshold in percent [default: 70]
        #[arg(long)]
        low: Option<u32>,
        /// Starvation threshold in percent [default: 90]
        #[arg(long)]
        high: Option<u32>,
    },
}

/// Resolve the detectors for `watch`. Flags build a single detector; they
/// never silently mix with `[[detector]]` entries from the config file.
fn watch_detectors(
    configured: Vec<DetectorConfig>,
    resource: Option<String>,
    metric: Option<String>,
    low: Option<u32>,
    high: Option<u32>,
) -> Result<Vec<DetectorConfig>> {
    let flags_given = metric.is_some() || low.is_some() || high.is_some();
    let resource = match resource {
        Some(resource) => resource.parse::<Resource>()?,
        None if !configured.is_empty() => {
            if flags_given {
                bail!(
                    "--metric/--low/--high require --resource when detectors are configured"
                );
            }
            return Ok(configured);
        }
        None => Resource::Cpu,
    };
    let metric = match metric {
        Some(metric) => metric.parse::<Metric>()?,
        None => Metric::default(),
    };
    Ok(vec![DetectorConfig::new(
        resource,
        metric,
        low.unwrap_or(DEFAULT_LOW_THRESHOLD),
        high.unwrap_or(DEFAULT_HIGH_THRESHOLD),
    )])
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(root) = &args.root {
        config.pressure.root = root.clone();
    }

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.logging.level.as_str()),
    )
    .init();

    let source = ProcPressure::new(&config.pressure.root);
    if !source.is_available() {
        bail!(
            "PSI not available under {} (kernel >= 4.20 with CONFIG_PSI required)",
            source.root().display()
        );
    }

    match args.command {
        Command::Once => print_once(&source, args.json),
        Command::Watch {
            resource,
            metric,
            low,
            high,
        } => {
            let configured = std::mem::take(&mut config.detectors);
            config.detectors = watch_detectors(configured, resource, metric, low, high)?;
            watch(config, Arc::new(source), args.json).await
        }
    }
}

fn print_once(source: &ProcPressure, json: bool) -> Result<()> {
    let stats = source.read_all().context("failed to read pressure stats")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("PSI stats:\n------\n\n{stats}");
    }
    Ok(())
}

async fn watch(config: Config, source: Arc<ProcPressure>, json: bool) -> Result<()> {
    let mut streams = Vec::new();
    let mut handles = Vec::new();

    for detector in &config.detectors {
        let (alerts, handle) = StarvationDetector::new(*detector)?
            .with_poller(config.poller)
            .start(source.clone())
            .with_context(|| format!("failed to start {} detector", detector.resource))?;
        streams.push(alerts);
        handles.push(handle);
    }
    info!("watching {} detector(s), Ctrl-C to stop", handles.len());

    let mut alerts = select_all(streams);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            next = alerts.next() => {
                let Some(alert) = next else { break };
                if json {
                    println!("{}", serde_json::to_string(&alert)?);
                } else {
                    println!("ALERT {alert}");
                }
            }
        }
    }

    for handle in handles {
        let name = handle.name().to_string();
        if let Err(err) = handle.cancel().await {
            warn!("{name}: {err}");
        }
    }
    Ok(())
}

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, bail};
use clap::Parser;
use probewatch::{
    actors::supervisor::{SupervisorHandle, SupervisorOptions, default_probe_factory},
    config::{TargetSpec, read_config_file},
    notifier::{self, Dispatcher},
    util::get_config_path,
};
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Probe network targets and alert when they misbehave")]
struct Args {
    /// Config file (defaults to $PROBEWATCH_CONFIG or probewatch.json)
    #[arg(short, long)]
    file: Option<String>,

    /// Raise log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Also append logs to this file
    #[arg(long)]
    log_file: Option<String>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

fn init(verbose: u8, log_file: Option<&str>) -> anyhow::Result<()> {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let filter = filter::Targets::new().with_targets(vec![("probewatch", level)]);

    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("unable to open log file {path}"))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .compact()
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(file_layer)
        .with(filter)
        .init();

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init(args.verbose, args.log_file.as_deref())?;
    trace!("started with args: {args:?}");

    let path = args.file.clone().unwrap_or_else(get_config_path);
    let config = read_config_file(&path)
        .with_context(|| format!("unable to load configuration from {path}"))?;

    let (specs, errors) = config.resolve_targets();
    for e in &errors {
        error!("{e}, target skipped");
    }

    let notifier = notifier::from_config(config.notifier.as_ref())?;

    if args.check {
        for spec in &specs {
            println!("{}", describe(spec));
        }
        if !errors.is_empty() {
            bail!("{} invalid target section(s) in {path}", errors.len());
        }
        println!("{path}: {} target(s) ok", specs.len());
        return Ok(());
    }

    if specs.is_empty() {
        bail!("no valid targets configured in {path}");
    }

    for spec in &specs {
        info!("{}", describe(spec));
    }

    let supervisor = SupervisorHandle::spawn(
        specs,
        default_probe_factory(),
        Dispatcher::new(notifier),
        SupervisorOptions::from(&config.settings),
    )
    .await;

    tokio::signal::ctrl_c()
        .await
        .context("unable to listen for shutdown signal")?;
    info!("shutdown requested");

    let report = supervisor.shutdown().await?;
    for status in report {
        if status.state.is_alive() {
            warn!("{status}");
        } else {
            info!("{status}");
        }
    }

    Ok(())
}

fn describe(spec: &TargetSpec) -> String {
    let mut line = format!(
        "{}: {} {} every {:?}, alert after {} failure(s)",
        spec.name,
        spec.protocol,
        spec.address(),
        spec.interval,
        spec.failure_threshold
    );
    if !spec.alert_enabled {
        line.push_str(", alerts off");
    }
    if let Some(latency) = &spec.latency {
        line.push_str(&format!(
            ", latency {} {}ms",
            latency.mode, latency.threshold_ms
        ));
    }
    line
}

// src/main.rs
use anyhow::{bail, Context, Result};
use clap::Parser;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use market_depth_engine::{
    bus::{FileSource, InputStream, JsonlSink, OutputSink, TcpSource},
    config::{Config, GlobalConfig},
    http,
    metrics::Metrics,
    pipeline::{self, LatestSnapshots},
};

#[derive(Parser, Debug)]
#[command(name = "market-depth-engine", version, about = "Streaming market depth engine")]
struct Cli {
    /// Configuration file path.
    #[arg(short = 'c', long, default_value = "config/config.yaml")]
    config: PathBuf,

    /// Override the input topic from the configuration.
    #[arg(short = 't', long)]
    topic: Option<String>,

    /// Maximum runtime in seconds (0 = unbounded).
    #[arg(short = 'r', long, default_value_t = 0)]
    runtime: u64,

    /// Comma-separated depth levels, e.g. 5,10,25,50.
    #[arg(short = 'd', long)]
    depths: Option<String>,

    /// Reporter interval in seconds.
    #[arg(long)]
    stats_interval: Option<u64>,

    /// Debug-level logging.
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Warn-level logging.
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Replay input from a capture file of length-prefixed envelopes.
    #[arg(long)]
    file: Option<PathBuf>,

    /// Consume framed envelopes from a TCP feed.
    #[arg(long)]
    connect: Option<SocketAddr>,

    /// Output sink path; one JSON line per published message.
    #[arg(long, default_value = "published.jsonl")]
    out: PathBuf,

    /// Number of symbol shards (default: available parallelism).
    #[arg(long)]
    shards: Option<usize>,
}

fn parse_depths(csv: &str) -> Result<Vec<u32>> {
    csv.split(',')
        .map(|s| {
            s.trim()
                .parse::<u32>()
                .with_context(|| format!("invalid depth level {s:?}"))
        })
        .collect()
}

fn init_logging(cli: &Cli, global: &GlobalConfig) -> Result<()> {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        global.log_level.as_str()
    };
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| level.to_string());

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match &global.log_path {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create log directory {dir:?}"))?;
            let file = std::fs::File::create(dir.join("market-depth-engine.log"))?;
            builder.with_writer(Arc::new(file)).with_ansi(false).init();
        }
        None => builder.init(),
    }
    Ok(())
}

fn spawn_signal_task(shutdown: Arc<AtomicBool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut term) => {
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => {}
                        _ = term.recv() => {}
                    }
                }
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                }
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
        }
        info!("signal received; shutting down");
        shutdown.store(true, Ordering::Relaxed);
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut cfg = Config::load(&cli.config)
        .with_context(|| format!("load config {:?}", cli.config))?;
    if let Some(topic) = &cli.topic {
        cfg.processor.input_topic = topic.clone();
    }
    if let Some(csv) = &cli.depths {
        cfg.depth_config.levels = parse_depths(csv)?;
    }
    if let Some(secs) = cli.stats_interval {
        cfg.processor.stats_interval_s = secs;
    }
    cfg.validate().context("configuration rejected")?;

    init_logging(&cli, &cfg.global)?;
    info!(
        "starting: topic={} depths={:?} out={:?}",
        cfg.processor.input_topic,
        cfg.depth_config.sorted_levels(),
        cli.out
    );

    let source: Box<dyn InputStream> = match (&cli.file, cli.connect) {
        (Some(path), None) => Box::new(
            FileSource::open(path).with_context(|| format!("open replay file {path:?}"))?,
        ),
        (None, Some(addr)) => {
            Box::new(TcpSource::connect(addr).with_context(|| format!("connect {addr}"))?)
        }
        _ => bail!("need exactly one of --file or --connect"),
    };
    let sink: Arc<dyn OutputSink> = Arc::new(
        JsonlSink::create(&cli.out).with_context(|| format!("create sink {:?}", cli.out))?,
    );

    let metrics = Arc::new(Metrics::new());
    let latest: LatestSnapshots = Arc::new(DashMap::new());
    let shutdown = Arc::new(AtomicBool::new(false));

    spawn_signal_task(shutdown.clone());
    if cli.runtime > 0 {
        let shutdown = shutdown.clone();
        let secs = cli.runtime;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            info!("runtime limit of {secs}s reached; shutting down");
            shutdown.store(true, Ordering::Relaxed);
        });
    }

    let http_task = match &cfg.processor.http_bind {
        Some(bind) => {
            let addr: SocketAddr = bind
                .parse()
                .with_context(|| format!("invalid processor.http_bind {bind:?}"))?;
            let state = http::AppState {
                metrics: metrics.clone(),
                latest: latest.clone(),
            };
            Some(tokio::spawn(http::serve(addr, state)))
        }
        None => None,
    };

    let shards = cli.shards.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    });

    pipeline::run(cfg, source, sink, metrics, shards, shutdown, latest).await?;

    if let Some(task) = http_task {
        task.abort();
    }
    Ok(())
}

//! DepthScope - order-book signal engine
//!
//! Usage: depthscope [--alerts ALERTS.yaml] [FILE]
//!
//! Replays newline-delimited JSON snapshots from FILE (or stdin) through the
//! engine and prints every closed-bar view as a JSON line on stdout.

use anyhow::{bail, Context, Result};
use chrono::Utc;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use depthscope::alerts::TracingSink;
use depthscope::config::AppConfig;
use depthscope::engine::{EngineEvent, SignalEngine};
use depthscope::feed::decode_line;
use depthscope::persistence::{export_log_csv, import_alerts_yaml, AlertStore, JsonFileStore};
use depthscope::types::Snapshot;

/// Snapshots buffered between the reader task and the engine
const FEED_BUFFER: usize = 1024;

struct Args {
    input: Option<PathBuf>,
    alerts: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        input: None,
        alerts: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--alerts" => {
                let path = iter.next().context("--alerts needs a file")?;
                args.alerts = Some(PathBuf::from(path));
            }
            "-h" | "--help" => {
                println!("Usage: depthscope [--alerts ALERTS.yaml] [FILE]");
                std::process::exit(0);
            }
            _ if args.input.is_none() => args.input = Some(PathBuf::from(arg)),
            other => bail!("Unexpected argument: {}", other),
        }
    }
    Ok(args)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("DEPTHSCOPE_LOG_JSON")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    // Logs go to stderr; stdout carries the views
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// Decode lines and forward snapshots; bad records are logged and skipped
async fn read_feed<R>(reader: R, tx: mpsc::Sender<Snapshot>) -> Result<(u64, u64)>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut accepted = 0u64;
    let mut skipped = 0u64;
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await.context("Failed to read feed")? {
        line_no += 1;
        match decode_line(&line) {
            Ok(Some(snapshot)) => {
                if tx.send(snapshot).await.is_err() {
                    break;
                }
                accepted += 1;
            }
            Ok(None) => {}
            Err(e) => {
                skipped += 1;
                warn!(line = line_no, "Skipping record: {}", e);
            }
        }
    }
    Ok((accepted, skipped))
}

fn emit(events: &[EngineEvent]) -> Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for event in events {
        if let EngineEvent::BarClosed(view) = event {
            let line = serde_json::to_string(view).context("Failed to serialize view")?;
            writeln!(out, "{}", line).context("Failed to write view")?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = parse_args()?;

    let config = AppConfig::load()?;
    info!("🚀 Starting DepthScope v{}", env!("CARGO_PKG_VERSION"));
    info!("Config: {}", config);

    let data_dir = Path::new(&config.persistence.data_dir);
    let store = AlertStore::new(Arc::new(JsonFileStore::open(data_dir.join("store.json"))?));

    let mut engine = SignalEngine::from_config(&config)?;
    engine.alerts_mut().add_sink(Box::new(TracingSink));
    store.restore(engine.alerts_mut());

    if let Some(path) = &args.alerts {
        for alert in import_alerts_yaml(path)? {
            if let Err(e) = engine.alerts_mut().upsert(alert) {
                warn!("Skipping alert definition: {}", e);
            }
        }
    }

    // File replay runs on feed time; stdin runs on the wall clock
    let feed_clock = args.input.is_some();
    let (tx, mut rx) = mpsc::channel::<Snapshot>(FEED_BUFFER);
    let reader = match args.input.clone() {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            tokio::spawn(read_feed(file, tx))
        }
        None => tokio::spawn(read_feed(tokio::io::stdin(), tx)),
    };

    let heartbeat_ms = config.engine.alert_heartbeat_ms.max(1);
    let mut heartbeat = tokio::time::interval(Duration::from_millis(heartbeat_ms));
    let mut last_feed_ms = 0i64;
    let mut interrupted = false;

    loop {
        tokio::select! {
            maybe = rx.recv() => {
                let snapshot = match maybe {
                    Some(s) => s,
                    None => break,
                };
                let now_ms = if feed_clock {
                    snapshot.time * 1000
                } else {
                    Utc::now().timestamp_millis()
                };
                last_feed_ms = now_ms;
                let events = engine.on_snapshot(snapshot, now_ms);
                emit(&events)?;
            }
            _ = heartbeat.tick(), if !feed_clock => {
                engine.heartbeat(Utc::now().timestamp_millis());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                interrupted = true;
                break;
            }
        }
    }

    if interrupted {
        reader.abort();
    }
    match reader.await {
        Ok(Ok((accepted, skipped))) => info!(accepted, skipped, "Feed finished"),
        Ok(Err(e)) => warn!("Feed reader failed: {:#}", e),
        Err(e) if e.is_cancelled() => {}
        Err(e) => warn!("Feed reader task failed: {}", e),
    }

    let final_ms = if feed_clock {
        last_feed_ms
    } else {
        Utc::now().timestamp_millis()
    };
    let events = engine.flush(final_ms);
    emit(&events)?;

    let stats = engine.stats();
    info!(
        snapshots = stats.snapshots,
        rejected = stats.rejected,
        bars = stats.bars_closed,
        gaps = stats.gaps,
        alerts = stats.alerts_fired,
        "Replay complete"
    );

    store.persist(engine.alerts())?;
    if !engine.alerts().log().is_empty() {
        let csv_path = data_dir.join(format!("alert_log_{}.csv", engine.instrument()));
        export_log_csv(engine.alerts().log(), &csv_path)?;
    }

    Ok(())
}

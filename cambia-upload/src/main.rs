//! cambia-upload - batch log upload client
//!
//! Uploads rip logs to a Cambia server over one WebSocket, waits for every
//! file to be accounted for and prints the per-file results with the
//! aggregate score counters.

use std::path::PathBuf;

use anyhow::{Context, Result};
use cambia_common::config::ConfigResolver;
use cambia_common::events::{RowStatus, SessionOutcome, StoreEvent};
use cambia_upload::protocol::CambiaResponse;
use cambia_upload::score::REFERENCE_EVALUATOR;
use cambia_upload::{BatchController, ResultStore, RowContent, StoreSnapshot, UploadFile};
use clap::Parser;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for cambia-upload
#[derive(Parser, Debug)]
#[command(name = "cambia-upload")]
#[command(about = "Upload rip logs to a Cambia server and collect the evaluations")]
#[command(version)]
struct Args {
    /// Log files to upload
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Server base URL (overrides CAMBIA_SERVER and the config file)
    #[arg(short, long)]
    server: Option<String>,

    /// TOML config file (overrides CAMBIA_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print the final store snapshot as JSON
    #[arg(long)]
    json: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigResolver::new()
        .with_server_url(args.server.clone())
        .with_config_path(args.config.clone())
        .with_log_level(args.log_level.clone())
        .resolve()
        .context("Failed to resolve configuration")?;

    // Logs go to stderr so --json output stays parseable
    let directives = filter_directives(
        args.log_level.as_deref(),
        std::env::var(EnvFilter::DEFAULT_ENV).ok(),
        &config.log_level,
    );
    tracing_subscriber::registry()
        .with(EnvFilter::new(directives))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    info!("cambia-upload {}", env!("CARGO_PKG_VERSION"));
    info!("Server: {}", config.server_url);

    let mut controller =
        BatchController::new(&config).context("Failed to set up upload endpoint")?;
    info!("Socket endpoint: {}", controller.endpoint());

    let files: Vec<UploadFile> = args.files.iter().map(UploadFile::from_path).collect();
    let progress = tokio::spawn(log_progress(controller.store().clone()));

    let handle = controller.start_new_batch(files).await;
    let canceller = handle.canceller();
    let wait = handle.wait();
    tokio::pin!(wait);

    let outcome = tokio::select! {
        outcome = &mut wait => outcome,
        _ = signal::ctrl_c() => {
            warn!("Interrupted, cancelling batch");
            canceller.cancel();
            wait.await
        }
    };
    progress.abort();

    let snapshot = controller.store().snapshot().await;
    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot).context("Failed to serialize results")?
        );
    } else {
        print_summary(&snapshot, &outcome);
    }

    match outcome {
        SessionOutcome::Failed { message } => Err(anyhow::anyhow!(message)),
        _ => Ok(()),
    }
}

/// Filter directives for the subscriber
///
/// `--log-level` wins over `RUST_LOG`, which wins over the configured level.
fn filter_directives(cli_level: Option<&str>, env: Option<String>, config_level: &str) -> String {
    let crate_level =
        |level: &str| format!("cambia_upload={level},cambia_common={level}", level = level);
    match (cli_level, env) {
        (Some(level), _) if !level.trim().is_empty() => crate_level(level),
        (_, Some(env)) if !env.trim().is_empty() => env,
        _ => crate_level(config_level),
    }
}

/// Log row and counter changes as they happen
async fn log_progress(store: ResultStore) {
    let mut events = store.subscribe();
    loop {
        match events.recv().await {
            Ok(StoreEvent::RowUpdated {
                row,
                filename,
                status,
                ..
            }) => match status {
                RowStatus::Sent => debug!(row, file = %filename, "Sent"),
                _ => info!(row, file = %filename, status = %status, "File finished"),
            },
            Ok(StoreEvent::CountersChanged { counters, .. }) => {
                debug!(
                    processed = counters.processed,
                    perfect = counters.perfect,
                    warning = counters.warning,
                    bad = counters.bad,
                    unknown = counters.unknown,
                    "Counters"
                );
            }
            Ok(StoreEvent::SessionClosed { .. }) => break,
            Ok(event) => debug!(event = event.event_type(), "Store event"),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Progress log fell behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_summary(snapshot: &StoreSnapshot, outcome: &SessionOutcome) {
    for (index, row) in snapshot.rows.iter().enumerate() {
        let detail = match &row.content {
            Some(RowContent::Result(response)) => score_detail(response),
            Some(RowContent::Error(error)) => error.message.clone(),
            None => String::new(),
        };
        println!(
            "{:>3}  {:<9}  {}  {}",
            index + 1,
            row.status.to_string(),
            row.filename,
            detail
        );
    }

    for error in &snapshot.unattributed_errors {
        println!("  !  {}", error.message);
    }
    if let Some(message) = &snapshot.session_error {
        println!("Session error: {}", message);
    }

    let c = snapshot.counters;
    println!(
        "Processed {}/{}: {} perfect, {} warning, {} bad, {} unknown ({})",
        c.processed,
        snapshot.rows.len(),
        c.perfect,
        c.warning,
        c.bad,
        c.unknown,
        outcome
    );
}

fn score_detail(response: &CambiaResponse) -> String {
    match response.combined_score(REFERENCE_EVALUATOR) {
        Some(score) => format!("{} score {}", REFERENCE_EVALUATOR, score),
        None => format!("no {} score", REFERENCE_EVALUATOR),
    }
}

use std::path::PathBuf;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{error, info};
use vitals_common::config::Config;
use vitals_worker::bridge::{forward_progress, write_lines, Bridge};

/// Requests on stdin, responses and progress on stdout, logs on stderr.
#[tokio::main]
async fn main() {
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => match Config::load(&path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config from {}: {e}", path.display());
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        sample_rate_hz = config.capture.sample_rate_hz,
        duration_secs = config.capture.duration_secs,
        request_timeout_secs = config.worker.request_timeout_secs,
        "starting vitals worker"
    );

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_lines(out_rx, tokio::io::stdout()));

    let (worker, progress) = vitals_worker::spawn(config);
    forward_progress(progress, out_tx.clone());
    let bridge = Bridge::new(worker, out_tx);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => bridge.handle_line(&line).await,
            Ok(None) => break,
            Err(e) => {
                error!(error = %e, "failed to read stdin");
                break;
            }
        }
    }

    // The writer drains until every pending reply and the progress stream close.
    info!("stdin closed, waiting for outstanding replies");
    drop(bridge);
    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "failed to write to stdout"),
        Err(e) => error!(error = %e, "stdout writer task failed"),
    }
    info!("vitals worker exiting");
}

//! Event loop: replays JSON-lines platform events through the engine.

use std::io::Stdout;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use lvl_core::Inbound;
use lvl_db::Database;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::Engine;
use crate::platform::{Notifier, VoiceDirectory};
use crate::replay::{Envelope, ReplayPlatform};

/// Work items for the event loop.
#[derive(Debug)]
enum Message {
    Event(Envelope),
    Scan,
    InputClosed,
}

pub async fn run(db: Database, config: &Config, input: Option<&Path>) -> Result<()> {
    let platform = Arc::new(ReplayPlatform::new(std::io::stdout()));
    let notifier: Arc<dyn Notifier> = platform.clone();
    let directory: Arc<dyn VoiceDirectory> = platform.clone();
    let engine = Engine::new(db, notifier, directory);

    let source: Box<dyn AsyncRead + Unpin + Send> = match input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("failed to open {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };

    let (tx, rx) = mpsc::channel(64);
    spawn_reader(source, tx.clone());
    spawn_scan_scheduler(config.scan_interval(), tx);

    info!(scan_interval = ?config.scan_interval(), "event loop started");
    if config.startup_scan {
        handle(&engine, &platform, Inbound::Scan, Utc::now()).await;
    }
    event_loop(&engine, &platform, rx).await;
    info!("event loop stopped");
    Ok(())
}

async fn event_loop(
    engine: &Engine,
    platform: &ReplayPlatform<Stdout>,
    mut rx: mpsc::Receiver<Message>,
) {
    // Latest replayed timestamp; scheduled scans use it so replays stay
    // on their own clock.
    let mut clock: Option<DateTime<Utc>> = None;

    while let Some(message) = rx.recv().await {
        match message {
            Message::Event(envelope) => {
                let now = envelope.at.unwrap_or_else(Utc::now);
                if envelope.at.is_some() {
                    clock = clock.max(Some(now));
                }
                handle(engine, platform, envelope.event, now).await;
            }
            Message::Scan => {
                let now = clock.unwrap_or_else(Utc::now);
                handle(engine, platform, Inbound::Scan, now).await;
            }
            Message::InputClosed => break,
        }
    }
}

async fn handle(
    engine: &Engine,
    platform: &ReplayPlatform<Stdout>,
    event: Inbound,
    now: DateTime<Utc>,
) {
    platform.observe(&event);
    match engine.handle_at(event, now).await {
        Ok(outcome) => debug!(
            awards = outcome.awards.len(),
            granted = outcome.dispatch.granted.len(),
            failures = outcome.failures + outcome.dispatch.failures,
            "event handled"
        ),
        Err(err) => warn!(error = %err, "event abandoned"),
    }
}

fn spawn_reader(source: Box<dyn AsyncRead + Unpin + Send>, tx: mpsc::Sender<Message>) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(source).lines();
        let mut line_number = 0_usize;
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    error!(error = %err, "failed to read input");
                    break;
                }
            };
            line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Envelope>(&line) {
                Ok(envelope) => {
                    if tx.send(Message::Event(envelope)).await.is_err() {
                        return;
                    }
                }
                Err(err) => warn!(line = line_number, error = %err, "skipping malformed event"),
            }
        }
        let _ = tx.send(Message::InputClosed).await;
    });
}

fn spawn_scan_scheduler(scan_interval: Duration, tx: mpsc::Sender<Message>) {
    tokio::spawn(async move {
        let mut interval = interval(scan_interval);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            interval.tick().await;
            if tx.send(Message::Scan).await.is_err() {
                debug!("event loop closed, scan scheduler stopping");
                break;
            }
        }
    });
}

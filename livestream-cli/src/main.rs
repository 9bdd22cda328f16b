//! Command-line streamer.
//!
//! Publishes the configured capture devices to an RTMP or SRT ingest until
//! interrupted, the optional duration elapses, or the connection fails.

mod engines;
mod settings;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::{select, Sender};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use livestream_engine::{LifecycleGlue, LiveStream};
use livestream_ipc::{signal_channel, HostSignal, LiveStreamEvent};
use livestream_transport::RmlRtmpEngine;

use crate::engines::UnavailableEngine;
use crate::settings::Args;

const LIFECYCLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let mut options = settings::load(args.settings.as_deref())?;
    args.apply(&mut options)?;

    info!(
        url = %args.url,
        orientation = options.orientation.name(),
        "Starting live stream"
    );

    let rtmp_engine = Arc::new(RmlRtmpEngine::new().context("Failed to start the RTMP engine")?);
    let srt_engine = Arc::new(UnavailableEngine::new("SRT"));
    let stream = Arc::new(LiveStream::new(rtmp_engine.clone(), srt_engine, options));
    let events = stream.subscribe();

    let (signal_tx, signal_rx) = signal_channel();
    let lifecycle = LifecycleGlue::new(stream.clone(), signal_rx)
        .spawn()
        .context("Failed to spawn the lifecycle thread")?;
    spawn_interrupt_handler(signal_tx.clone())?;

    stream.start_streaming(&args.stream_key, &args.url)?;

    let deadline = match args.duration {
        Some(secs) => crossbeam_channel::after(Duration::from_secs(secs)),
        None => crossbeam_channel::never(),
    };
    let ticker = crossbeam_channel::tick(LIFECYCLE_POLL_INTERVAL);

    let mut outcome = Ok(());
    let mut running = true;
    while running {
        select! {
            recv(events) -> event => match event {
                Ok(LiveStreamEvent::ConnectionSuccess) => info!("Live"),
                Ok(LiveStreamEvent::ConnectionFailed { code }) => {
                    error!(%code, "Connection failed");
                    outcome = Err(anyhow::anyhow!("Connection failed: {}", code));
                    running = false;
                }
                Ok(LiveStreamEvent::Disconnection) => warn!("Disconnected"),
                Ok(LiveStreamEvent::AudioError(e)) => warn!(error = %e, "Audio capture error"),
                Ok(LiveStreamEvent::VideoError(e)) => warn!(error = %e, "Video capture error"),
                Err(_) => running = false,
            },
            recv(deadline) -> _ => {
                info!("Duration elapsed");
                let _ = signal_tx.send(HostSignal::Shutdown);
                running = false;
            },
            recv(ticker) -> _ => {
                if lifecycle.is_finished() {
                    info!("Interrupted");
                    running = false;
                }
            },
        }
    }

    stream.stop_streaming();
    let _ = signal_tx.send(HostSignal::Shutdown);
    if lifecycle.join().is_err() {
        error!("Lifecycle thread panicked");
    }

    let stats = rtmp_engine.statistics();
    info!(
        bytes_sent = stats.bytes_sent,
        packets_sent = stats.packets_sent,
        packets_dropped = stats.packets_dropped,
        "Stream finished"
    );

    outcome
}

/// Forward ctrl-c to the lifecycle pump as a shutdown signal.
fn spawn_interrupt_handler(signal_tx: Sender<HostSignal>) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to build the signal runtime")?;

    thread::Builder::new()
        .name("ctrl-c".to_string())
        .spawn(move || {
            runtime.block_on(async {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => {
                        let _ = signal_tx.send(HostSignal::Shutdown);
                    }
                    Err(e) => error!(error = %e, "Failed to listen for ctrl-c"),
                }
            });
        })
        .context("Failed to spawn the signal thread")?;

    Ok(())
}

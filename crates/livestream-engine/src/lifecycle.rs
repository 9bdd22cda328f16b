//! Pump host lifecycle signals into the controller.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::Receiver;
use tracing::{debug, info, instrument};

use livestream_ipc::HostSignal;

use crate::orchestrator::LiveStream;

/// Consumes [`HostSignal`]s from the host and applies them to a
/// [`LiveStream`] until a shutdown signal arrives or the host hangs up.
pub struct LifecycleGlue {
    stream: Arc<LiveStream>,
    signal_rx: Receiver<HostSignal>,
}

impl LifecycleGlue {
    pub fn new(stream: Arc<LiveStream>, signal_rx: Receiver<HostSignal>) -> Self {
        Self { stream, signal_rx }
    }

    /// Run the pump (blocking).
    #[instrument(name = "lifecycle_run", skip(self))]
    pub fn run(&self) {
        info!("Lifecycle pump starting");

        loop {
            match self.signal_rx.recv() {
                Ok(signal) => {
                    if !self.stream.handle_signal(signal) {
                        break;
                    }
                }
                Err(_) => {
                    debug!("Signal channel disconnected");
                    break;
                }
            }
        }

        info!("Lifecycle pump stopped");
    }

    /// Run the pump on its own thread.
    pub fn spawn(self) -> std::io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("lifecycle".to_string())
            .spawn(move || self.run())
    }
}

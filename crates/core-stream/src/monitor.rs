//! Idle connection monitor.
//!
//! A background thread pings the controller with `?` every 5 seconds
//! while nothing is engraving. A failed ping marks the link dead;
//! reconnect attempts then back off exponentially (5 s, 10 s, … capped
//! at 120 s) until the controller answers again. During an active stream
//! the monitor does nothing at all — its reads would otherwise race the
//! streaming reader for acknowledgement lines.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use tracing::{debug, info, warn};

use crate::LaserController;

const PING_INTERVAL: Duration = Duration::from_secs(5);
const BACKOFF_INITIAL: Duration = Duration::from_secs(5);
const BACKOFF_CAP: Duration = Duration::from_secs(120);

pub struct MonitorHandle {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Signal the monitor to exit and wait for it.
    pub fn shutdown(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Spawn the monitor over a (shared) controller handle.
pub fn spawn(controller: LaserController) -> MonitorHandle {
    let (stop_tx, stop_rx) = bounded::<()>(1);
    let thread = std::thread::Builder::new()
        .name("link-monitor".to_string())
        .spawn(move || run(controller, stop_rx))
        .expect("spawn link-monitor thread");
    MonitorHandle {
        stop_tx,
        thread: Some(thread),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConnectionSettings, Endpoint};
    use std::time::Instant;

    #[test]
    fn shutdown_returns_before_the_first_tick() {
        let controller = LaserController::new(ConnectionSettings::new(Endpoint::Tcp {
            host: "localhost".to_string(),
            port: 1,
        }));
        let handle = spawn(controller);
        let started = Instant::now();
        handle.shutdown();
        assert!(
            started.elapsed() < PING_INTERVAL,
            "shutdown must not wait out the ping interval"
        );
    }
}

fn run(controller: LaserController, stop_rx: Receiver<()>) {
    let mut backoff = BACKOFF_INITIAL;
    let mut next_reconnect = Instant::now();

    loop {
        match stop_rx.recv_timeout(PING_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                debug!(target: "stream.monitor", "monitor_stopping");
                return;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        // Never touch the wire while a job is streaming.
        if controller.is_engraving() {
            continue;
        }

        if controller.is_connected() {
            match controller.ping() {
                Ok(()) => {
                    backoff = BACKOFF_INITIAL;
                }
                Err(err) => {
                    warn!(target: "stream.monitor", error = %err, "ping_failed_link_marked_dead");
                    next_reconnect = Instant::now();
                }
            }
            continue;
        }

        if Instant::now() < next_reconnect {
            continue;
        }
        match controller.connect() {
            Ok(()) => {
                info!(target: "stream.monitor", "reconnected");
                backoff = BACKOFF_INITIAL;
            }
            Err(err) => {
                debug!(
                    target: "stream.monitor",
                    error = %err,
                    retry_in_s = backoff.as_secs(),
                    "reconnect_failed_backing_off"
                );
                next_reconnect = Instant::now() + backoff;
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
        }
    }
}

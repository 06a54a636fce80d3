//! Streaming controller for GRBL-family (FluidNC) motion controllers.
//!
//! Protocol contract: every non-empty command line is answered by exactly
//! one `ok`, `error:…` or `alarm:…` line; the controller *delays* `ok`
//! while its planner queue is full, which is the back-pressure signal the
//! whole streaming strategy rests on. Asynchronous status (`<…>`), echo
//! (`[echo:…]`), parser state (`[gc:…]`) and message (`[msg:…]`) lines may
//! arrive at any point and are skipped transparently.
//!
//! Concurrency: a single mutex covers every byte written to or read from
//! the transport, so a whole-program stream and single commands can never
//! interleave. The one exception is the E-stop path, which writes `!`
//! then `0x18` on an independent transport handle outside the lock — by
//! design it may steal a response line from a stream in flight.
//!
//! `error`/`alarm` responses are logged and do *not* abort the stream
//! (the operator may have changed power mid-job and wants the remainder
//! to run); a response timeout is fatal. `alarm` can be promoted to fatal
//! via [`ConnectionSettings::abort_on_alarm`].

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info, trace, warn};

pub mod monitor;
#[cfg(feature = "testing")]
pub mod testing;
mod transport;

pub use monitor::MonitorHandle;
pub use transport::{Endpoint, Transport, connect};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Idle,
    Streaming,
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub endpoint: Endpoint,
    pub connect_timeout: Duration,
    /// Per-command response deadline while streaming. Long moves and the
    /// final dwell can hold `ok` back for a while; 60 s covers them.
    pub response_timeout: Duration,
    /// Deadline for one-off commands.
    pub command_timeout: Duration,
    /// Promote `alarm:` responses to stream-fatal.
    pub abort_on_alarm: bool,
}

impl ConnectionSettings {
    pub fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            connect_timeout: Duration::from_secs(5),
            response_timeout: Duration::from_secs(60),
            command_timeout: Duration::from_secs(2),
            abort_on_alarm: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Not connected to controller")]
    NotConnected,
    #[error("Transport failure: {0}")]
    Transport(String),
    #[error("Timeout waiting for response at line {line} ({command})")]
    Timeout { line: usize, command: String },
    #[error("Controller {response} at line {line} ({command})")]
    Alarm {
        line: usize,
        command: String,
        response: String,
    },
    #[error("Stopped by operator")]
    Stopped,
}

impl StreamError {
    /// True when the failure is an operator stop or a controller alarm —
    /// the job outcomes that map to `stopped` rather than `failed`.
    pub fn is_stop_like(&self) -> bool {
        matches!(self, Self::Stopped | Self::Alarm { .. })
    }
}

enum ReadOutcome {
    Line(String),
    TimedOut,
    Closed,
}

/// The transport plus its partial-line read buffer.
struct Wire {
    transport: Box<dyn Transport>,
    buf: Vec<u8>,
}

impl Wire {
    fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            buf: Vec::new(),
        }
    }

    fn write_line(&mut self, line: &str) -> std::io::Result<()> {
        self.transport.write_all(line.as_bytes())?;
        self.transport.write_all(b"\n")
    }

    /// Pop the next non-empty line, reading in small slices until the
    /// deadline so a late-arriving `ok` is picked up promptly.
    fn read_line(&mut self, timeout: Duration) -> std::io::Result<ReadOutcome> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = self.buf.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw).trim().to_string();
                if line.is_empty() {
                    continue;
                }
                return Ok(ReadOutcome::Line(line));
            }
            if Instant::now() >= deadline {
                return Ok(ReadOutcome::TimedOut);
            }
            self.transport
                .set_read_timeout(Duration::from_millis(50))?;
            let mut chunk = [0u8; 256];
            match self.transport.read_some(&mut chunk) {
                Ok(0) => return Ok(ReadOutcome::Closed),
                Ok(n) => self.buf.extend_from_slice(&chunk[..n]),
                Err(e)
                    if e.kind() == std::io::ErrorKind::TimedOut
                        || e.kind() == std::io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Discard whatever is sitting in the input buffer.
    fn flush_input(&mut self) {
        self.buf.clear();
        if self.transport.set_read_timeout(Duration::from_millis(50)).is_err() {
            return;
        }
        let mut chunk = [0u8; 1024];
        loop {
            match self.transport.read_some(&mut chunk) {
                Ok(0) => return,
                Ok(_) => {}
                Err(_) => return,
            }
        }
    }
}

struct ControllerInner {
    settings: ConnectionSettings,
    wire: Mutex<Option<Wire>>,
    estop: Mutex<Option<Box<dyn Transport>>>,
    state: Mutex<LinkState>,
    engraving: AtomicBool,
    stop_flag: AtomicBool,
}

/// Handle to the controller link; cheap to clone, all clones share the
/// same connection and locks.
#[derive(Clone)]
pub struct LaserController {
    inner: Arc<ControllerInner>,
}

/// Is this a line that answers a command?
fn classify(line: &str) -> Response {
    let lower = line.to_ascii_lowercase();
    if lower == "ok" {
        Response::Ok
    } else if lower.starts_with("error") {
        Response::Error
    } else if lower.starts_with("alarm") {
        Response::Alarm
    } else if lower.starts_with('<')
        || lower.starts_with("[echo:")
        || lower.starts_with("[gc:")
        || lower.starts_with("[msg:")
    {
        Response::Async
    } else {
        // Banners, version strings, settings dumps: not a command response.
        Response::Async
    }
}

enum Response {
    Ok,
    Error,
    Alarm,
    Async,
}

impl LaserController {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                settings,
                wire: Mutex::new(None),
                estop: Mutex::new(None),
                state: Mutex::new(LinkState::Disconnected),
                engraving: AtomicBool::new(false),
                stop_flag: AtomicBool::new(false),
            }),
        }
    }

    /// Wrap an already-open transport (tests, unusual links).
    pub fn with_transport(
        transport: Box<dyn Transport>,
        settings: ConnectionSettings,
    ) -> Self {
        let controller = Self::new(settings);
        let estop = transport.try_clone().ok();
        *controller.inner.wire.lock().expect("wire lock") = Some(Wire::new(transport));
        *controller.inner.estop.lock().expect("estop lock") = estop;
        controller.set_state(LinkState::Idle);
        controller
    }

    fn set_state(&self, state: LinkState) {
        *self.inner.state.lock().expect("state lock") = state;
    }

    pub fn state(&self) -> LinkState {
        *self.inner.state.lock().expect("state lock")
    }

    pub fn is_connected(&self) -> bool {
        !matches!(self.state(), LinkState::Disconnected | LinkState::Connecting)
    }

    pub fn is_engraving(&self) -> bool {
        self.inner.engraving.load(Ordering::Relaxed)
    }

    /// Dial the configured endpoint and install the link.
    pub fn connect(&self) -> Result<(), StreamError> {
        self.set_state(LinkState::Connecting);
        let settings = &self.inner.settings;
        match transport::connect(&settings.endpoint, settings.connect_timeout) {
            Ok(transport) => {
                let estop = transport.try_clone().ok();
                *self.inner.wire.lock().expect("wire lock") = Some(Wire::new(transport));
                *self.inner.estop.lock().expect("estop lock") = estop;
                self.set_state(LinkState::Idle);
                info!(target: "stream", endpoint = %settings.endpoint, "controller_connected");
                Ok(())
            }
            Err(e) => {
                self.set_state(LinkState::Disconnected);
                debug!(target: "stream", endpoint = %settings.endpoint, error = %e, "connect_failed");
                Err(StreamError::Transport(e.to_string()))
            }
        }
    }

    pub fn disconnect(&self) {
        *self.inner.wire.lock().expect("wire lock") = None;
        *self.inner.estop.lock().expect("estop lock") = None;
        self.set_state(LinkState::Disconnected);
        info!(target: "stream", "controller_disconnected");
    }

    fn drop_link_locked(&self, wire: &mut Option<Wire>) {
        *wire = None;
        self.set_state(LinkState::Disconnected);
    }

    /// Send one line and return the first response line (which for `?`
    /// is the status report itself). Empty string when nothing arrived
    /// inside the command timeout. Makes one inline reconnect attempt on
    /// a dead link.
    pub fn send_command(&self, command: &str) -> Result<String, StreamError> {
        let mut wire = self.inner.wire.lock().expect("wire lock");
        if wire.is_none() {
            drop(wire);
            self.connect()?;
            wire = self.inner.wire.lock().expect("wire lock");
        }
        let w = wire.as_mut().ok_or(StreamError::NotConnected)?;

        if let Err(e) = w.write_line(command.trim()) {
            self.drop_link_locked(&mut wire);
            return Err(StreamError::Transport(e.to_string()));
        }
        let timeout = self.inner.settings.command_timeout;
        match wire.as_mut().expect("wire present").read_line(timeout) {
            Ok(ReadOutcome::Line(line)) => {
                debug!(target: "stream", cmd = %command.trim(), response = %line, "command");
                Ok(line)
            }
            Ok(ReadOutcome::TimedOut) => Ok(String::new()),
            Ok(ReadOutcome::Closed) => {
                self.drop_link_locked(&mut wire);
                Err(StreamError::Transport("connection closed".to_string()))
            }
            Err(e) => {
                self.drop_link_locked(&mut wire);
                Err(StreamError::Transport(e.to_string()))
            }
        }
    }

    /// Stream a whole program with planner back-pressure.
    ///
    /// `;` comments and blank lines are stripped; `progress` is invoked
    /// once per real command with `(sent, total)`. Returns the number of
    /// commands sent. The first N sends are acknowledged immediately
    /// (planner filling); from then on each `ok` arrives as a planner
    /// slot frees, which paces the stream to the machine.
    pub fn send_program(
        &self,
        lines: &[String],
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<usize, StreamError> {
        let commands: Vec<&str> = lines
            .iter()
            .filter_map(|l| {
                let cmd = l.split(';').next().unwrap_or("").trim();
                (!cmd.is_empty()).then_some(cmd)
            })
            .collect();
        let total = commands.len();
        if total == 0 {
            return Ok(0);
        }

        let mut wire = self.inner.wire.lock().expect("wire lock");
        if wire.is_none() {
            drop(wire);
            self.connect()?;
            wire = self.inner.wire.lock().expect("wire lock");
        }
        if wire.is_none() {
            return Err(StreamError::NotConnected);
        }

        self.inner.stop_flag.store(false, Ordering::SeqCst);
        self.inner.engraving.store(true, Ordering::SeqCst);
        self.set_state(LinkState::Streaming);
        info!(target: "stream", total, "stream_start");

        let result = self.stream_locked(&mut wire, &commands, progress);

        self.inner.engraving.store(false, Ordering::SeqCst);
        match &result {
            Ok(sent) => {
                self.set_state(LinkState::Idle);
                info!(target: "stream", sent, "stream_complete");
            }
            Err(err) => {
                if wire.is_some() {
                    self.set_state(LinkState::Idle);
                }
                warn!(target: "stream", error = %err, "stream_failed");
            }
        }
        result
    }

    fn stream_locked(
        &self,
        wire: &mut std::sync::MutexGuard<'_, Option<Wire>>,
        commands: &[&str],
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<usize, StreamError> {
        let total = commands.len();
        let response_timeout = self.inner.settings.response_timeout;
        let abort_on_alarm = self.inner.settings.abort_on_alarm;

        wire.as_mut().expect("wire present").flush_input();

        for (i, cmd) in commands.iter().enumerate() {
            // Operator stop is honoured between commands; the E-stop bytes
            // themselves travel outside this lock.
            if self.inner.stop_flag.load(Ordering::SeqCst) {
                return Err(StreamError::Stopped);
            }

            let w = wire.as_mut().expect("wire present");
            trace!(target: "stream.wire", line = i + 1, total, cmd = %cmd, "send");
            if let Err(e) = w.write_line(cmd) {
                self.drop_link_locked(wire);
                return Err(StreamError::Transport(format!(
                    "Send error at line {}: {}",
                    i + 1,
                    e
                )));
            }

            // Await the acknowledgement in short slices so an operator
            // stop raised mid-wait is honoured promptly; the overall
            // per-command deadline stays `response_timeout`.
            let deadline = Instant::now() + response_timeout;
            loop {
                if self.inner.stop_flag.load(Ordering::SeqCst) {
                    return Err(StreamError::Stopped);
                }
                let slice = Duration::from_millis(250)
                    .min(deadline.saturating_duration_since(Instant::now()));
                let outcome = wire
                    .as_mut()
                    .expect("wire present")
                    .read_line(slice)
                    .map_err(|e| {
                        let msg = e.to_string();
                        self.drop_link_locked(wire);
                        StreamError::Transport(msg)
                    })?;
                let line = match outcome {
                    ReadOutcome::Line(line) => line,
                    ReadOutcome::TimedOut => {
                        if Instant::now() >= deadline {
                            return Err(StreamError::Timeout {
                                line: i + 1,
                                command: (*cmd).to_string(),
                            });
                        }
                        continue;
                    }
                    ReadOutcome::Closed => {
                        self.drop_link_locked(wire);
                        return Err(StreamError::Transport(
                            "connection closed mid-stream".to_string(),
                        ));
                    }
                };

                match classify(&line) {
                    Response::Async => {
                        trace!(target: "stream.wire", recv = %line, "async_skipped");
                        continue;
                    }
                    Response::Ok => break,
                    Response::Error => {
                        warn!(
                            target: "stream",
                            line = i + 1,
                            cmd = %cmd,
                            response = %line,
                            "controller_error_continuing"
                        );
                        break;
                    }
                    Response::Alarm => {
                        warn!(
                            target: "stream",
                            line = i + 1,
                            cmd = %cmd,
                            response = %line,
                            "controller_alarm"
                        );
                        if abort_on_alarm {
                            return Err(StreamError::Alarm {
                                line: i + 1,
                                command: (*cmd).to_string(),
                                response: line,
                            });
                        }
                        break;
                    }
                }
            }

            progress(i + 1, total);
        }

        Ok(total)
    }

    /// Emergency stop: feed hold then soft reset, written on the
    /// dedicated handle so a stream parked on its read cannot block it.
    /// Also raises the stop flag so the streamer bails before its next
    /// send.
    pub fn stop(&self) -> Result<(), StreamError> {
        self.inner.stop_flag.store(true, Ordering::SeqCst);
        warn!(target: "stream", "emergency_stop");
        let mut estop = self.inner.estop.lock().expect("estop lock");
        let Some(t) = estop.as_mut() else {
            return Err(StreamError::NotConnected);
        };
        t.write_all(b"!\n")
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        std::thread::sleep(Duration::from_millis(100));
        t.write_all(b"\x18\n")
            .map_err(|e| StreamError::Transport(e.to_string()))?;
        Ok(())
    }

    // Convenience wrappers for the operator surface.

    pub fn home(&self) -> Result<String, StreamError> {
        self.send_command("$H")
    }

    pub fn unlock(&self) -> Result<String, StreamError> {
        self.send_command("$X")
    }

    pub fn status(&self) -> Result<String, StreamError> {
        self.send_command("?")
    }

    pub fn soft_reset(&self) -> Result<String, StreamError> {
        self.send_command("\u{18}")
    }

    /// Lightweight liveness probe used by the idle monitor: `?` must
    /// produce *some* bytes quickly. Never attempts a reconnect itself.
    pub(crate) fn ping(&self) -> Result<(), StreamError> {
        let mut wire = self.inner.wire.lock().expect("wire lock");
        let Some(w) = wire.as_mut() else {
            return Err(StreamError::NotConnected);
        };
        if let Err(e) = w.write_line("?") {
            self.drop_link_locked(&mut wire);
            return Err(StreamError::Transport(e.to_string()));
        }
        match wire
            .as_mut()
            .expect("wire present")
            .read_line(Duration::from_secs(2))
        {
            Ok(ReadOutcome::Line(_)) => Ok(()),
            Ok(ReadOutcome::TimedOut) | Ok(ReadOutcome::Closed) => {
                self.drop_link_locked(&mut wire);
                Err(StreamError::Transport("ping failed".to_string()))
            }
            Err(e) => {
                self.drop_link_locked(&mut wire);
                Err(StreamError::Transport(e.to_string()))
            }
        }
    }
}

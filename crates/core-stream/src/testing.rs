//! In-memory mock controller for protocol tests (feature `testing`).
//!
//! The mock plays the controller side of the wire: every line written to
//! it is recorded and handed to a test-supplied reply policy, which says
//! what to answer and after how long. Replies land in a shared inbox the
//! transport's `read_some` drains, with condvar wakeups so timing-based
//! tests (planner back-pressure) behave like a real socket.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use crate::Transport;

/// What the mock controller answers to one command line.
pub struct Reply {
    pub delay: Duration,
    /// Response line (newline appended automatically); `None` = silence.
    pub text: Option<String>,
}

impl Reply {
    pub fn ok() -> Self {
        Self {
            delay: Duration::ZERO,
            text: Some("ok".to_string()),
        }
    }

    pub fn ok_after(delay: Duration) -> Self {
        Self {
            delay,
            text: Some("ok".to_string()),
        }
    }

    pub fn line(text: &str) -> Self {
        Self {
            delay: Duration::ZERO,
            text: Some(text.to_string()),
        }
    }

    pub fn silence() -> Self {
        Self {
            delay: Duration::ZERO,
            text: None,
        }
    }
}

type Policy = Box<dyn FnMut(usize, &str) -> Reply + Send>;

pub struct MockState {
    pub sent: Mutex<Vec<String>>,
    inbox: Mutex<VecDeque<u8>>,
    available: Condvar,
    partial: Mutex<Vec<u8>>,
    read_timeout: Mutex<Duration>,
    policy: Mutex<Policy>,
    seq: AtomicUsize,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct MockPort {
    state: Arc<MockState>,
}

impl MockPort {
    /// Build a mock whose policy sees `(1-based command number, line)`.
    pub fn new(policy: impl FnMut(usize, &str) -> Reply + Send + 'static) -> Self {
        Self {
            state: Arc::new(MockState {
                sent: Mutex::new(Vec::new()),
                inbox: Mutex::new(VecDeque::new()),
                available: Condvar::new(),
                partial: Mutex::new(Vec::new()),
                read_timeout: Mutex::new(Duration::from_millis(50)),
                policy: Mutex::new(Box::new(policy)),
                seq: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn state(&self) -> Arc<MockState> {
        Arc::clone(&self.state)
    }

    /// Simulate the peer dropping the connection.
    pub fn close(&self) {
        self.state.closed.store(true, Ordering::SeqCst);
        self.state.available.notify_all();
    }

    /// Push an unsolicited line (status report, banner) into the inbox.
    pub fn inject(&self, line: &str) {
        push_line(&self.state, line);
    }
}

impl MockState {
    pub fn sent_lines(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    /// Commands only: E-stop control bytes excluded.
    pub fn sent_commands(&self) -> Vec<String> {
        self.sent_lines()
            .into_iter()
            .filter(|l| l != "!" && l != "\u{18}")
            .collect()
    }
}

fn push_line(state: &Arc<MockState>, line: &str) {
    let mut inbox = state.inbox.lock().unwrap();
    inbox.extend(line.as_bytes());
    inbox.push_back(b'\n');
    state.available.notify_all();
}

fn schedule_reply(state: &Arc<MockState>, reply: Reply) {
    let Some(text) = reply.text else { return };
    if reply.delay.is_zero() {
        push_line(state, &text);
        return;
    }
    let state = Arc::clone(state);
    std::thread::spawn(move || {
        std::thread::sleep(reply.delay);
        push_line(&state, &text);
    });
}

impl Transport for MockPort {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock closed"));
        }
        let mut partial = self.state.partial.lock().unwrap();
        partial.extend_from_slice(buf);
        while let Some(pos) = partial.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw).trim_end().to_string();
            self.state.sent.lock().unwrap().push(line.clone());
            // Control bytes are realtime commands: no acknowledgement.
            if line == "!" || line == "\u{18}" {
                continue;
            }
            let seq = self.state.seq.fetch_add(1, Ordering::SeqCst) + 1;
            let reply = (self.state.policy.lock().unwrap())(seq, &line);
            schedule_reply(&self.state, reply);
        }
        Ok(())
    }

    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = *self.state.read_timeout.lock().unwrap();
        let mut inbox = self.state.inbox.lock().unwrap();
        if inbox.is_empty() {
            if self.state.closed.load(Ordering::SeqCst) {
                return Ok(0);
            }
            let (guard, _) = self
                .state
                .available
                .wait_timeout(inbox, timeout)
                .unwrap();
            inbox = guard;
            if inbox.is_empty() {
                if self.state.closed.load(Ordering::SeqCst) {
                    return Ok(0);
                }
                return Err(io::Error::new(io::ErrorKind::TimedOut, "mock timeout"));
            }
        }
        let n = buf.len().min(inbox.len());
        for slot in buf.iter_mut().take(n) {
            *slot = inbox.pop_front().unwrap();
        }
        Ok(n)
    }

    fn set_read_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        *self.state.read_timeout.lock().unwrap() = timeout;
        Ok(())
    }

    fn try_clone(&self) -> io::Result<Box<dyn Transport>> {
        Ok(Box::new(self.clone()))
    }
}

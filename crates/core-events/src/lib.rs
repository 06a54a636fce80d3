//! Event types and channel helpers shared between the orchestrator and
//! its external collaborators.
//!
//! The enqueue boundary is a bounded channel: producers (subscriber
//! monitor, operator UI) push [`EnqueueRequest`]s, the orchestrator
//! drains them into the job store on its own thread. Bounded because a
//! runaway producer must block rather than balloon memory; the queue is
//! human-paced, so [`ENQUEUE_CHANNEL_CAP`] is generous. A full channel is
//! the producer's problem — `try_send` surfaces it immediately.
//!
//! [`OverlayHooks`] is the observe-only notification surface (scene
//! switcher, stream overlay). Implementations must not block: they run on
//! the orchestrator thread between jobs.

use crossbeam_channel::{Receiver, Sender, bounded};

/// Capacity of the enqueue channel.
pub const ENQUEUE_CHANNEL_CAP: usize = 256;

/// A name waiting to become a job.
#[derive(Debug, Clone, PartialEq)]
pub struct EnqueueRequest {
    pub name: String,
    /// Origin of the request (`twitch`, `manual`, …); recorded on the job.
    pub source: String,
    /// Optional per-job setting overrides, schemaless.
    pub settings: Option<serde_json::Map<String, serde_json::Value>>,
}

impl EnqueueRequest {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            settings: None,
        }
    }
}

/// Build the producer/consumer pair for the enqueue boundary.
pub fn enqueue_channel() -> (Sender<EnqueueRequest>, Receiver<EnqueueRequest>) {
    bounded(ENQUEUE_CHANNEL_CAP)
}

/// Hooks fired around each engraving job. Opaque to the core; the
/// default implementation does nothing.
pub trait OverlayHooks: Send + Sync + 'static {
    fn on_engrave_start(&self, _name: &str) {}
    fn on_engrave_finish(&self, _name: &str, _success: bool) {}
}

/// No-op hooks for headless operation and tests.
pub struct NoopOverlayHooks;

impl OverlayHooks for NoopOverlayHooks {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_delivers_in_order() {
        let (tx, rx) = enqueue_channel();
        tx.send(EnqueueRequest::new("alice", "twitch")).unwrap();
        tx.send(EnqueueRequest::new("bob", "manual")).unwrap();
        assert_eq!(rx.recv().unwrap().name, "alice");
        assert_eq!(rx.recv().unwrap().name, "bob");
    }

    #[test]
    fn try_send_surfaces_a_full_channel() {
        let (tx, _rx) = enqueue_channel();
        for i in 0..ENQUEUE_CHANNEL_CAP {
            tx.try_send(EnqueueRequest::new(format!("n{i}"), "test"))
                .unwrap();
        }
        assert!(tx.try_send(EnqueueRequest::new("overflow", "test")).is_err());
    }

    #[test]
    fn noop_hooks_are_callable() {
        let hooks = NoopOverlayHooks;
        hooks.on_engrave_start("alice");
        hooks.on_engrave_finish("alice", true);
    }
}

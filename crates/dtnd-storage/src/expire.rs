//! Logical-time eviction plumbing.
//!
//! Expiry is a pure function of the logical time carried by clock ticks;
//! the storage engine never reads the wall clock to decide eviction, so
//! test harnesses and simulated deployments get deterministic expiry.

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use dtnd_types::DtnTime;

use crate::traits::BundleStorage;

/// A clock notification carrying the current logical time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeTick {
    /// The current logical time.
    pub time: DtnTime,
}

impl TimeTick {
    /// Create a tick for the given logical time.
    pub fn new(time: DtnTime) -> Self {
        Self { time }
    }
}

/// Subscribes one storage instance to an external clock.
///
/// The listener is a single injected subscription: the daemon's clock owns
/// the broadcast channel, and each storage that wants eviction spawns its
/// own listener. The task ends when the channel closes. A lagged receiver
/// skips ahead; expiry is monotonic, so only the newest tick matters.
pub struct TickListener;

impl TickListener {
    /// Spawn the listener task.
    pub fn spawn(
        storage: Arc<dyn BundleStorage>,
        mut ticks: broadcast::Receiver<TimeTick>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                match ticks.recv().await {
                    Ok(tick) => {
                        if let Err(error) = storage.expire(tick.time) {
                            warn!(%error, "eviction sweep failed");
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "tick listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

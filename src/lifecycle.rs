#![expect(
    clippy::module_name_repetitions,
    reason = "Lifecycle types expose their domain in the name for clarity"
)]

//! Background/foreground transition plumbing.
//!
//! The host platform (or a synthetic test source) publishes transitions
//! through [`LifecycleEvents`]; a stream service subscribed via
//! [`SocketStream::watch_lifecycle`](crate::SocketStream::watch_lifecycle)
//! releases its socket on background and reconnects on foreground.

use tokio::sync::broadcast;
use url::Url;

/// Buffered transitions per subscriber; transitions are rare, overflow only
/// means a subscriber observes a lag notification.
const CHANNEL_CAPACITY: usize = 16;

/// A foreground/background transition reported by the host platform.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    /// The application moved to the background
    EnteredBackground,
    /// The application returned to the foreground; reconnect to this URL
    EnteredForeground(Url),
}

/// Publish/subscribe handle for lifecycle transitions.
///
/// Cloneable and cheap to share. Publishing never blocks; with no live
/// subscriber the event is dropped.
#[derive(Debug, Clone)]
pub struct LifecycleEvents {
    tx: broadcast::Sender<LifecycleEvent>,
}

impl LifecycleEvents {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publishes a transition to all subscribed services.
    pub fn publish(&self, event: LifecycleEvent) {
        _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.tx.subscribe()
    }
}

impl Default for LifecycleEvents {
    fn default() -> Self {
        Self::new()
    }
}

//! Keepalive ping scheduler.
//!
//! One task per connection handle, scoped to the handle's cancellation
//! token so it can never fire against a stale or closed connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::transport::FrameSink;

/// Write half shared between the service's send path and the keepalive task.
pub(crate) type SharedSink = Arc<Mutex<Box<dyn FrameSink>>>;

/// Sends a ping on every tick until cancelled or a ping fails.
///
/// The first tick fires immediately; subsequent ticks at `period`. Returns
/// the failing error when a ping could not be delivered, which the caller
/// treats as connection loss.
pub(crate) async fn run(
    sink: SharedSink,
    period: Duration,
    token: CancellationToken,
) -> Option<Error> {
    let mut ticker = time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            // Cancellation wins over a tick that became ready at the same
            // instant: no ping may be sent after disconnect.
            biased;
            () = token.cancelled() => return None,
            _ = ticker.tick() => {
                let result = { sink.lock().await.send_ping().await };
                match result {
                    Ok(()) => tracing::trace!(direction = "sent", "ping"),
                    Err(e) => {
                        tracing::warn!(error = %e, "keepalive ping failed");
                        return Some(e);
                    }
                }
            }
        }
    }
}

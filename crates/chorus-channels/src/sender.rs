//! Rate-limited message egress — one sender per destination channel.
//!
//! Respects the platform's sliding-window limit (default 5 messages per 5
//! seconds). The mutex is held across the wait and the delivery, so
//! concurrent callers drain strictly FIFO in lock-acquisition order and a
//! burst can never violate the window. Messages are never dropped;
//! backpressure shows up as send-time latency.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::port::{ChannelError, ChatPort};

/// Platform default: 5 messages per 5 seconds.
pub const DEFAULT_MAX_PER_WINDOW: usize = 5;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(5);

/// FIFO rate-limited sender for a single channel.
pub struct RateLimitedSender {
    port: Arc<dyn ChatPort>,
    channel_id: u64,
    max_per_window: usize,
    window: Duration,
    timestamps: Mutex<VecDeque<Instant>>,
}

impl RateLimitedSender {
    pub fn new(port: Arc<dyn ChatPort>, channel_id: u64) -> Self {
        Self::with_limits(port, channel_id, DEFAULT_MAX_PER_WINDOW, DEFAULT_WINDOW)
    }

    pub fn with_limits(
        port: Arc<dyn ChatPort>,
        channel_id: u64,
        max_per_window: usize,
        window: Duration,
    ) -> Self {
        Self {
            port,
            channel_id,
            max_per_window,
            window,
            timestamps: Mutex::new(VecDeque::new()),
        }
    }

    /// The destination channel.
    pub fn channel_id(&self) -> u64 {
        self.channel_id
    }

    /// Send a message, waiting out the window if it is full.
    ///
    /// Returns the platform message id. Only transport failures error;
    /// contention never does.
    pub async fn send(&self, content: &str) -> Result<u64, ChannelError> {
        let mut timestamps = self.timestamps.lock().await;

        let mut now = Instant::now();
        Self::prune(&mut timestamps, now, self.window);

        if timestamps.len() >= self.max_per_window {
            // Wait for the oldest send to fall out of the window, then
            // re-evaluate.
            let oldest = *timestamps.front().expect("window is full");
            let wait = self.window.saturating_sub(now.duration_since(oldest));
            if !wait.is_zero() {
                debug!(channel = self.channel_id, wait_ms = wait.as_millis() as u64, "rate window full");
                tokio::time::sleep(wait).await;
            }
            now = Instant::now();
            Self::prune(&mut timestamps, now, self.window);
        }

        timestamps.push_back(Instant::now());
        self.port.send(self.channel_id, content).await
    }

    fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while timestamps
            .front()
            .is_some_and(|t| now.duration_since(*t) >= window)
        {
            timestamps.pop_front();
        }
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

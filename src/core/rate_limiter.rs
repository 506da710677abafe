use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

use crate::broadcast::model::Channel;
use crate::core::config::BroadcastSettings;

/// Per-channel send pacer.
///
/// Hands out send slots so that two sends on the same channel are never
/// closer together than that channel's interval, no matter how many runs
/// share the limiter. There is no burst allowance: a caller that arrives
/// late gets the next free slot, not a backlog of unused ones.
///
/// One instance is built at startup and cloned into every dispatcher.
#[derive(Clone)]
pub struct RateLimiter {
    /// Earliest instant the next send on each channel may start
    next_slot: Arc<Mutex<HashMap<Channel, Instant>>>,
    /// Minimum gap between Telegram sends
    telegram_interval: Duration,
    /// Minimum gap between email sends
    email_interval: Duration,
}

impl RateLimiter {
    /// Creates a limiter with the intervals from the broadcast settings.
    pub fn new(settings: &BroadcastSettings) -> Self {
        Self::with_intervals(settings.telegram_interval, settings.email_interval)
    }

    /// Creates a limiter with explicit per-channel intervals.
    ///
    /// # Arguments
    ///
    /// * `telegram_interval` - Minimum time between two Telegram sends
    /// * `email_interval` - Minimum time between two email sends
    pub fn with_intervals(telegram_interval: Duration, email_interval: Duration) -> Self {
        Self {
            next_slot: Arc::new(Mutex::new(HashMap::new())),
            telegram_interval,
            email_interval,
        }
    }

    /// Returns the configured interval for a channel.
    pub fn interval_for(&self, channel: Channel) -> Duration {
        match channel {
            Channel::Telegram => self.telegram_interval,
            Channel::Email => self.email_interval,
        }
    }

    /// Waits until the caller may issue one send on `channel`.
    ///
    /// The slot is reserved before sleeping, so concurrent callers queue up
    /// behind each other instead of racing for the same instant.
    pub async fn acquire(&self, channel: Channel) {
        let interval = self.interval_for(channel);
        let slot = {
            let mut slots = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match slots.get(&channel) {
                Some(&next) if next > now => next,
                _ => now,
            };
            slots.insert(channel, slot + interval);
            slot
        };

        if slot > Instant::now() {
            tokio::time::sleep_until(slot).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_acquire_spaces_sends() {
        let limiter = RateLimiter::with_intervals(Duration::from_millis(40), Duration::from_millis(200));
        let start = Instant::now();

        limiter.acquire(Channel::Telegram).await;
        limiter.acquire(Channel::Telegram).await;
        limiter.acquire(Channel::Telegram).await;

        assert_eq!(Instant::now() - start, Duration::from_millis(80));
    }

    #[tokio::test(start_paused = true)]
    async fn test_channels_are_independent() {
        let limiter = RateLimiter::with_intervals(Duration::from_millis(40), Duration::from_millis(200));
        let start = Instant::now();

        limiter.acquire(Channel::Email).await;
        limiter.acquire(Channel::Telegram).await;

        assert_eq!(Instant::now(), start);

        limiter.acquire(Channel::Email).await;
        assert_eq!(Instant::now() - start, Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_channel_gets_no_burst() {
        let limiter = RateLimiter::with_intervals(Duration::from_millis(50), Duration::ZERO);

        limiter.acquire(Channel::Telegram).await;
        tokio::time::sleep(Duration::from_secs(5)).await;

        let start = Instant::now();
        limiter.acquire(Channel::Telegram).await;
        limiter.acquire(Channel::Telegram).await;
        assert_eq!(Instant::now() - start, Duration::from_millis(50));
    }
}

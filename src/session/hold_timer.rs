use std::fmt;

use tokio::time::{interval, Duration, Instant, Interval, MissedTickBehavior};

use super::SessionError;
use crate::utils::format_elapsed_time;

/// Hold time used while waiting for the peer's OPEN (RFC 4271 8.2.2)
pub const OPEN_SENT_HOLD_TIME: u16 = 240;

#[derive(Debug)]
pub struct HoldTimer {
    pub(crate) hold_timer: u16,
    pub(crate) interval: u16,
    timer: Interval,
    pub(crate) last_sent: Instant,
    pub(crate) last_received: Instant,
}

impl HoldTimer {
    /// Timer for a negotiated hold time, sending keepalives every third of it
    ///
    /// A hold time of 0 disables both the hold and keepalive timers.
    pub fn new(hold_timer: u16) -> HoldTimer {
        Self::with_interval(hold_timer, hold_timer / 3)
    }

    /// Timer that only watches for the peer's OPEN, without keepalives
    pub fn open_sent() -> HoldTimer {
        Self::with_interval(OPEN_SENT_HOLD_TIME, 0)
    }

    fn with_interval(hold_timer: u16, keepalive_interval: u16) -> HoldTimer {
        let mut timer = interval(Duration::from_millis(100));
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        HoldTimer {
            hold_timer,
            interval: keepalive_interval,
            timer,
            last_received: Instant::now(),
            last_sent: Instant::now(),
        }
    }

    pub fn hold_time(&self) -> u16 {
        self.hold_timer
    }

    pub fn keepalive_interval(&self) -> u16 {
        self.interval
    }

    // Calculate if Keepalive message should be sent
    // Returns true once a keepalive interval has passed since the last message we sent.
    // Never resolves when the hold time is 0.
    pub async fn should_send_keepalive(&mut self) -> Result<bool, SessionError> {
        if self.hold_timer == 0 {
            futures::future::pending::<()>().await;
        }
        self.timer.tick().await;
        if self.is_expired() {
            return Err(SessionError::HoldTimeExpired(self.hold_timer));
        }
        Ok(self.interval > 0
            && self.last_sent.elapsed() >= Duration::from_secs(self.interval.into()))
    }

    /// Bump the last received to now
    pub fn received(&mut self) {
        self.last_received = Instant::now();
    }

    /// Bump the last sent to now
    pub fn sent(&mut self) {
        self.last_sent = Instant::now();
    }

    // Calculate remaining hold time available
    // Counts down from self.hold_timer to 0
    fn get_hold_time(&self) -> Duration {
        Duration::from_secs(self.hold_timer.into()).saturating_sub(self.last_received.elapsed())
    }

    fn is_expired(&self) -> bool {
        self.hold_timer > 0
            && self.last_received.elapsed() >= Duration::from_secs(self.hold_timer.into())
    }
}

impl fmt::Display for HoldTimer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", format_elapsed_time(self.get_hold_time()))
    }
}

//! Pacing timer with explicit arm/disarm.
//!
//! Wraps a `tokio::time::Interval`. While disarmed, [`PacingTimer::tick`]
//! never resolves, so it can sit in a `select!` unconditionally. Tests drive
//! it deterministically with tokio's paused clock.

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug)]
pub struct PacingTimer {
    period: Duration,
    interval: Option<Interval>,
}

impl PacingTimer {
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(MIN_PERIOD),
            interval: None,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn is_armed(&self) -> bool {
        self.interval.is_some()
    }

    /// Arm the timer; first tick one period from now. Returns false if it
    /// was already armed (the existing schedule is kept).
    pub fn arm(&mut self) -> bool {
        if self.interval.is_some() {
            return false;
        }
        let mut interval = interval_at(Instant::now() + self.period, self.period);
        // Fixed cadence, no burst of catch-up ticks after a slow step.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.interval = Some(interval);
        true
    }

    /// Returns false if it was not armed.
    pub fn disarm(&mut self) -> bool {
        self.interval.take().is_some()
    }

    /// Wait for the next tick. Pending forever while disarmed.
    pub async fn tick(&mut self) -> Instant {
        match self.interval.as_mut() {
            Some(interval) => interval.tick().await,
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_at_fixed_period() {
        let mut timer = PacingTimer::new(Duration::from_millis(1000));
        let start = Instant::now();
        assert!(timer.arm());
        assert!(!timer.arm());

        timer.tick().await;
        let first = start.elapsed();
        assert!(first >= Duration::from_millis(1000) && first < Duration::from_millis(1100));
        timer.tick().await;
        let second = start.elapsed();
        assert!(second >= Duration::from_millis(2000) && second < Duration::from_millis(2100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disarmed_timer_never_fires() {
        let mut timer = PacingTimer::new(Duration::from_millis(10));
        timer.arm();
        assert!(timer.disarm());
        assert!(!timer.disarm());

        let waited = tokio::time::timeout(Duration::from_secs(60), timer.tick()).await;
        assert!(waited.is_err());
    }

    #[test]
    fn test_zero_period_is_clamped() {
        let timer = PacingTimer::new(Duration::ZERO);
        assert_eq!(timer.period(), MIN_PERIOD);
        assert!(!timer.is_armed());
    }
}

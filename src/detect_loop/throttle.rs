use std::time::{Duration, Instant};

pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(8);

/// Interval between submissions for a frame rate. Rounds up so the gap never
/// undershoots `1000 / fps` ms.
pub fn interval_for_fps(fps: u32) -> Duration {
    let fps = u64::from(fps.max(1));
    Duration::from_nanos(1_000_000_000u64.div_ceil(fps))
}

/// Submission pacing: the in-flight guard, the last submission time, and the
/// failure backoff.
#[derive(Clone, Debug)]
pub struct Throttle {
    target: Duration,
    max_backoff: Duration,
    last_submission: Option<Instant>,
    consecutive_failures: u32,
    in_flight: bool,
}

impl Throttle {
    pub fn new(fps: u32, max_backoff: Duration) -> Self {
        Self {
            target: interval_for_fps(fps),
            max_backoff,
            last_submission: None,
            consecutive_failures: 0,
            in_flight: false,
        }
    }

    pub fn set_fps(&mut self, fps: u32) {
        self.target = interval_for_fps(fps);
    }

    pub fn target_interval(&self) -> Duration {
        self.target
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }

    /// Target interval, doubled per consecutive failure and capped.
    pub fn effective_interval(&self) -> Duration {
        if self.consecutive_failures == 0 {
            return self.target;
        }
        let cap = self.max_backoff.max(self.target);
        let factor = 1u32
            .checked_shl(self.consecutive_failures)
            .unwrap_or(u32::MAX);
        self.target.saturating_mul(factor).min(cap)
    }

    /// Time left before the next submission may start.
    pub fn remaining(&self, now: Instant) -> Duration {
        match self.last_submission {
            Some(at) => self
                .effective_interval()
                .saturating_sub(now.saturating_duration_since(at)),
            None => Duration::ZERO,
        }
    }

    pub fn ready(&self, now: Instant) -> bool {
        !self.in_flight && self.remaining(now).is_zero()
    }

    pub fn begin(&mut self, now: Instant) {
        self.in_flight = true;
        self.last_submission = Some(now);
    }

    pub fn finish(&mut self, succeeded: bool) {
        self.in_flight = false;
        if succeeded {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_rounds_up() {
        assert_eq!(interval_for_fps(2), Duration::from_millis(500));
        assert_eq!(interval_for_fps(3), Duration::from_nanos(333_333_334));
        assert_eq!(interval_for_fps(0), Duration::from_secs(1));
    }

    #[test]
    fn gates_on_in_flight_and_elapsed() {
        let t0 = Instant::now();
        let mut throttle = Throttle::new(2, DEFAULT_MAX_BACKOFF);
        assert!(throttle.ready(t0));

        throttle.begin(t0);
        assert!(!throttle.ready(t0 + Duration::from_secs(5)));

        throttle.finish(true);
        assert_eq!(
            throttle.remaining(t0 + Duration::from_millis(200)),
            Duration::from_millis(300)
        );
        assert!(throttle.ready(t0 + Duration::from_millis(500)));
    }

    #[test]
    fn backoff_doubles_caps_and_resets() {
        let mut throttle = Throttle::new(2, Duration::from_secs(3));
        let intervals: Vec<Duration> = (0..4)
            .map(|_| {
                throttle.finish(false);
                throttle.effective_interval()
            })
            .collect();
        assert_eq!(
            intervals,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(3),
            ]
        );

        throttle.finish(true);
        assert_eq!(throttle.effective_interval(), Duration::from_millis(500));
    }

    #[test]
    fn backoff_never_undercuts_the_target() {
        let mut throttle = Throttle::new(1, Duration::from_millis(100));
        throttle.finish(false);
        assert_eq!(throttle.effective_interval(), Duration::from_secs(1));
    }
}

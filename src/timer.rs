use chrono::{DateTime, Duration, Utc};

/// A single cancelable deadline. Arming replaces whatever was armed before,
/// so at most one deadline is ever outstanding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timer {
    deadline: Option<DateTime<Utc>>,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deadlines past the last representable instant are clamped to it.
    pub fn arm(&mut self, now: DateTime<Utc>, delay: Duration) {
        let delay = delay.max(Duration::zero());
        let deadline = now.checked_add_signed(delay).unwrap_or_else(|| {
            tracing::warn!(%now, delay_ms = delay.num_milliseconds(), "deadline out of range; clamping");
            DateTime::<Utc>::MAX_UTC
        });
        self.deadline = Some(deadline);
    }

    pub fn cancel(&mut self) -> bool {
        self.deadline.take().is_some()
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.deadline
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    /// Disarms and returns true once `now` has reached the deadline.
    pub fn fire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    /// Time left until the deadline, zero when already due.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        self.deadline
            .map(|deadline| (deadline - now).to_std().unwrap_or_default())
    }
}

/// Fixed-period ticker that re-arms itself each time it fires.
#[derive(Debug, Clone)]
pub struct Interval {
    period: Duration,
    timer: Timer,
}

impl Interval {
    /// Starts due immediately so the first tick happens on the next check.
    pub fn new(period: std::time::Duration, now: DateTime<Utc>) -> Self {
        let mut timer = Timer::new();
        timer.arm(now, Duration::zero());
        Self {
            period: Duration::from_std(period).unwrap_or_else(|_| Duration::seconds(15)),
            timer,
        }
    }

    pub fn deadline(&self) -> Option<DateTime<Utc>> {
        self.timer.deadline()
    }

    pub fn tick(&mut self, now: DateTime<Utc>) -> bool {
        if self.timer.fire_if_due(now) {
            self.timer.arm(now, self.period);
            true
        } else {
            false
        }
    }
}

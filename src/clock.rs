use std::sync::Mutex;

use chrono::{Duration, NaiveDateTime, Timelike};

/// Source of the cafe-local wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;

    /// `now` with seconds and sub-seconds cleared; booking times have minute precision.
    fn now_minute(&self) -> NaiveDateTime {
        let now = self.now();
        now.with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(now)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FixedClock(Mutex<NaiveDateTime>);

impl FixedClock {
    pub fn new(at: NaiveDateTime) -> Self {
        Self(Mutex::new(at))
    }

    pub fn set(&self, at: NaiveDateTime) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.0.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_minute_truncates() {
        let t = NaiveDateTime::parse_from_str("2024-06-01 18:07:42", "%Y-%m-%d %H:%M:%S").unwrap();
        let clock = FixedClock::new(t);
        assert_eq!(clock.now_minute().to_string(), "2024-06-01 18:07:00");
        clock.advance(Duration::minutes(3));
        assert_eq!(clock.now_minute().to_string(), "2024-06-01 18:10:00");
    }
}

const MINUTES_PER_DAY: u32 = 24 * 60;

/// A cafe's opening schedule, as far as bookable start times are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSchedule {
    opening_hour: u32,
    operating_hours: u32,
    step_minutes: u32,
    reservation_minutes: u32,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ScheduleError {
    ZeroStep,
    OpeningHourOutOfRange(u32),
    OperatingHoursOutOfRange(u32),
}

impl std::fmt::Display for ScheduleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScheduleError::ZeroStep => write!(f, "slot step must be at least one minute"),
            ScheduleError::OpeningHourOutOfRange(h) => {
                write!(f, "opening hour {h} out of range 0..24")
            }
            ScheduleError::OperatingHoursOutOfRange(h) => {
                write!(f, "operating hours {h} out of range 0..=24")
            }
        }
    }
}

impl std::error::Error for ScheduleError {}

impl SlotSchedule {
    pub fn new(
        opening_hour: u32,
        operating_hours: u32,
        step_minutes: u32,
        reservation_minutes: u32,
    ) -> Result<Self, ScheduleError> {
        if step_minutes == 0 {
            return Err(ScheduleError::ZeroStep);
        }
        if opening_hour >= 24 {
            return Err(ScheduleError::OpeningHourOutOfRange(opening_hour));
        }
        if operating_hours > 24 {
            return Err(ScheduleError::OperatingHoursOutOfRange(operating_hours));
        }
        Ok(Self {
            opening_hour,
            operating_hours,
            step_minutes,
            reservation_minutes,
        })
    }

    pub fn reservation_minutes(&self) -> u32 {
        self.reservation_minutes
    }

    /// Number of bookable start times: every step from opening until a full
    /// reservation still fits before closing, both ends included. Never more
    /// than one day's worth, so a round-the-clock cafe repeats no time.
    pub fn len(&self) -> usize {
        let steps = i64::from(self.operating_hours * 60 / self.step_minutes)
            - i64::from(self.reservation_minutes / self.step_minutes);
        let per_day = MINUTES_PER_DAY.div_ceil(self.step_minutes) as usize;
        usize::try_from(steps + 1).unwrap_or(0).min(per_day)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ordered `HH:MM` start times. Wraps past midnight when the cafe does.
    pub fn slots(&self) -> Slots {
        Slots {
            next_minute: self.opening_hour * 60,
            step: self.step_minutes,
            remaining: self.len(),
        }
    }
}

impl Default for SlotSchedule {
    /// 11:00 opening, 15 hours (closes 02:00), 15 minute step, 90 minute sittings.
    fn default() -> Self {
        Self {
            opening_hour: 11,
            operating_hours: 15,
            step_minutes: 15,
            reservation_minutes: 90,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Slots {
    /// Minute of day of the next slot, always < 1440.
    next_minute: u32,
    step: u32,
    remaining: usize,
}

impl Iterator for Slots {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let current = self.next_minute;
        self.next_minute = (current + self.step) % MINUTES_PER_DAY;
        Some(format!("{:02}:{:02}", current / 60, current % 60))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for Slots {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConflictWindow, parse_booking_time, parse_time};

    #[test]
    fn default_schedule_runs_from_opening_to_last_full_sitting() {
        let slots: Vec<String> = SlotSchedule::default().slots().collect();
        assert_eq!(slots.len(), 55);
        assert_eq!(slots[0], "11:00");
        assert_eq!(slots[1], "11:15");
        assert_eq!(slots[4], "12:00");
        assert_eq!(slots.last().unwrap(), "00:30");
    }

    #[test]
    fn length_matches_formula() {
        for (open, hours, step, res) in [(11, 15, 15, 90), (8, 10, 30, 60), (0, 24, 5, 120), (18, 8, 20, 90)] {
            let s = SlotSchedule::new(open, hours, step, res).unwrap();
            let expected = (hours * 60 / step - res / step + 1) as usize;
            assert_eq!(s.slots().count(), expected, "{open} {hours} {step} {res}");
            assert_eq!(s.slots().len(), expected);
        }
    }

    #[test]
    fn zero_padding_on_both_fields() {
        let slots: Vec<String> = SlotSchedule::new(9, 16, 15, 0).unwrap().slots().collect();
        assert_eq!(slots[0], "09:00");
        assert_eq!(slots[1], "09:15");
        assert!(slots.contains(&"00:00".to_string()));
        for s in &slots {
            assert_eq!(s.len(), 5, "{s}");
            assert_eq!(&s[2..3], ":");
        }
    }

    #[test]
    fn wraps_hour_24_to_zero() {
        let slots: Vec<String> = SlotSchedule::new(23, 2, 30, 0).unwrap().slots().collect();
        assert_eq!(slots, vec!["23:00", "23:30", "00:00", "00:30", "01:00"]);
    }

    #[test]
    fn strictly_increasing_modulo_midnight_without_duplicates() {
        let slots: Vec<u32> = SlotSchedule::default()
            .slots()
            .map(|s| {
                let t = parse_time(&s).unwrap();
                chrono::Timelike::hour(&t) * 60 + chrono::Timelike::minute(&t)
            })
            .collect();
        let mut wraps = 0;
        for pair in slots.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            if b < a {
                wraps += 1;
                assert_eq!(b + 1440 - a, 15);
            } else {
                assert_eq!(b - a, 15);
            }
        }
        assert_eq!(wraps, 1);
        let mut dedup = slots.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), slots.len());
    }

    #[test]
    fn step_not_dividing_an_hour_still_carries() {
        let slots: Vec<String> = SlotSchedule::new(11, 2, 25, 0).unwrap().slots().collect();
        assert_eq!(slots, vec!["11:00", "11:25", "11:50", "12:15", "12:40"]);
    }

    #[test]
    fn operating_hours_are_bounded_by_a_day() {
        assert_eq!(
            SlotSchedule::new(11, 25, 15, 90),
            Err(ScheduleError::OperatingHoursOutOfRange(25))
        );
        assert_eq!(
            SlotSchedule::new(11, u32::MAX, 15, 90),
            Err(ScheduleError::OperatingHoursOutOfRange(u32::MAX))
        );

        let all_day: Vec<String> = SlotSchedule::new(0, 24, 30, 0).unwrap().slots().collect();
        assert_eq!(all_day.len(), 48);
        assert_eq!(all_day.first().map(String::as_str), Some("00:00"));
        assert_eq!(all_day.last().map(String::as_str), Some("23:30"));
    }

    #[test]
    fn restartable() {
        let s = SlotSchedule::default();
        let a: Vec<String> = s.slots().collect();
        let b: Vec<String> = s.slots().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn reservation_longer_than_opening_yields_nothing() {
        let s = SlotSchedule::new(11, 1, 15, 120).unwrap();
        assert!(s.is_empty());
        assert_eq!(s.slots().next(), None);
    }

    #[test]
    fn rejects_bad_schedules() {
        assert_eq!(SlotSchedule::new(11, 15, 0, 90), Err(ScheduleError::ZeroStep));
        assert_eq!(
            SlotSchedule::new(24, 15, 15, 90),
            Err(ScheduleError::OpeningHourOutOfRange(24))
        );
    }

    #[test]
    fn every_slot_lies_in_its_own_conflict_window() {
        let s = SlotSchedule::default();
        for slot in s.slots() {
            let at = parse_booking_time("2024-06-01", &slot).unwrap();
            let window = ConflictWindow::around(at, s.reservation_minutes());
            assert!(window.contains(at), "{slot}");
        }
    }
}

use chrono::{DateTime, NaiveTime, Utc, Weekday};

/// A daily, optionally weekday-scoped, session-time window. `None` means "no
/// window configured" i.e. a non-stop session.
#[derive(Debug, Clone)]
pub struct TimeRange {
    start: NaiveTime,
    end: NaiveTime,
    weekdays: Option<Vec<Weekday>>,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        TimeRange {
            start,
            end,
            weekdays: None,
        }
    }

    pub fn with_weekdays(mut self, weekdays: Vec<Weekday>) -> Self {
        self.weekdays = Some(weekdays);
        self
    }

    fn weekday_allowed(&self, now: DateTime<Utc>) -> bool {
        match &self.weekdays {
            Some(days) => days.contains(&now.date_naive().weekday()),
            None => true,
        }
    }

    /// Whether `now` falls inside this window. Windows that wrap past
    /// midnight (`start > end`) are treated as spanning the day boundary.
    pub fn is_in_range(&self, now: DateTime<Utc>) -> bool {
        if !self.weekday_allowed(now) {
            return false;
        }
        let t = now.time();
        if self.start <= self.end {
            t >= self.start && t < self.end
        } else {
            t >= self.start || t < self.end
        }
    }

    /// Whether `a` and `b` fall in the same occurrence of this window, used
    /// to decide whether a session's `creationTime` belongs to a prior window
    /// and should be rolled over.
    pub fn is_in_same_range(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        if !self.is_in_range(a) || !self.is_in_range(b) {
            return false;
        }
        if self.start <= self.end {
            a.date_naive() == b.date_naive()
        } else {
            // window spans midnight: a and b belong to the same occurrence
            // if they're adjacent calendar days straddling the boundary, or
            // the same day, whichever applies given which side of the
            // boundary each timestamp falls on.
            let a_before_midnight = a.time() >= self.start;
            let b_before_midnight = b.time() >= self.start;
            match (a_before_midnight, b_before_midnight) {
                (true, true) | (false, false) => a.date_naive() == b.date_naive(),
                (true, false) => b.date_naive() == a.date_naive() + chrono::Duration::days(1),
                (false, true) => a.date_naive() == b.date_naive() + chrono::Duration::days(1),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::TimeZone;

    fn dt(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_simple_daytime_range() {
        let range = TimeRange::new(
            NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
        );
        assert!(range.is_in_range(dt(2026, 7, 28, 12, 0, 0)));
        assert!(!range.is_in_range(dt(2026, 7, 28, 20, 0, 0)));
    }

    #[test]
    fn test_midnight_wrapping_range() {
        let range = TimeRange::new(
            NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
        );
        assert!(range.is_in_range(dt(2026, 7, 28, 23, 0, 0)));
        assert!(range.is_in_range(dt(2026, 7, 28, 2, 0, 0)));
        assert!(!range.is_in_range(dt(2026, 7, 28, 12, 0, 0)));
    }

    #[test]
    fn test_same_range_rollover_detection() {
        let range = TimeRange::new(
            NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
        );
        assert!(range.is_in_same_range(dt(2026, 7, 28, 9, 0, 0), dt(2026, 7, 28, 10, 0, 0)));
        assert!(!range.is_in_same_range(dt(2026, 7, 27, 9, 0, 0), dt(2026, 7, 28, 9, 0, 0)));
    }

    #[test]
    fn test_weekday_restriction() {
        let range = TimeRange::new(
            NaiveTime::from_hms_opt(0, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(23, 59, 59).unwrap(),
        )
        .with_weekdays(vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri]);
        // 2026-07-28 is a Tuesday
        assert!(range.is_in_range(dt(2026, 7, 28, 12, 0, 0)));
        // 2026-08-01 is a Saturday
        assert!(!range.is_in_range(dt(2026, 8, 1, 12, 0, 0)));
    }
}

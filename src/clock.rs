use chrono::{DateTime, Utc};

/// Injectable current-time source, so tests can drive timer ticks
/// deterministically instead of depending on wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use std::sync::Mutex;

    pub(crate) struct FixedClock(pub Mutex<DateTime<Utc>>);

    impl FixedClock {
        pub(crate) fn new(t: DateTime<Utc>) -> Self {
            FixedClock(Mutex::new(t))
        }
        pub(crate) fn advance(&self, d: chrono::Duration) {
            let mut t = self.0.lock().unwrap();
            *t += d;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    #[test]
    fn test_fixed_clock_advance() {
        let c = FixedClock::new(DateTime::UNIX_EPOCH);
        c.advance(chrono::Duration::seconds(5));
        assert_eq!(c.now(), DateTime::UNIX_EPOCH + chrono::Duration::seconds(5));
    }
}

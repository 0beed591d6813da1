use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A source of wall clock time, as time since the unix epoch. Injected so that time
/// limits can be tested deterministically.
pub trait Clock: fmt::Debug + Send + Sync {
    fn now(&self) -> Duration;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        duration_from_epoch_now()
    }
}

pub fn duration_from_epoch_now() -> Duration {
    // A clock set before 1970 reads as the epoch.
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

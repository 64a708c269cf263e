// src/task/timer.rs

//! Delay timers for retries and polling.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// A list of delays consumed one per `next()` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskActionTimer {
    pub delays: Vec<Duration>,
    /// How many delays have been consumed so far.
    pub num: usize,
    /// Delay currently in force.
    pub delay: Option<Duration>,
    /// When the current delay is up.
    pub timeout: Option<DateTime<Utc>>,
}

impl TaskActionTimer {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self {
            delays,
            ..Default::default()
        }
    }

    /// Replace the delay list, keeping the consumed count.
    pub fn set_delays(&mut self, delays: Vec<Duration>) {
        self.delays = delays;
    }

    /// Start the next delay; returns its timeout.
    ///
    /// With `no_exhaust`, the last delay repeats forever; otherwise running out
    /// of delays returns `None` and clears the timer.
    pub fn next(&mut self, now: DateTime<Utc>, no_exhaust: bool) -> Option<DateTime<Utc>> {
        let delay = match self.delays.get(self.num) {
            Some(d) => *d,
            None if no_exhaust && !self.delays.is_empty() => {
                *self.delays.last()?
            }
            None => {
                self.delay = None;
                self.timeout = None;
                return None;
            }
        };
        let timeout = now + TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
        self.delay = Some(delay);
        self.timeout = Some(timeout);
        self.num += 1;
        Some(timeout)
    }

    pub fn is_timeout_set(&self) -> bool {
        self.timeout.is_some()
    }

    pub fn is_delay_done(&self, now: DateTime<Utc>) -> bool {
        self.timeout.map(|t| now >= t).unwrap_or(false)
    }

    pub fn reset(&mut self) {
        self.num = 0;
        self.delay = None;
        self.timeout = None;
    }

    pub fn unset_timeout(&mut self) {
        self.timeout = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_000_000, 0).unwrap()
    }

    #[test]
    fn exhausts_after_all_delays() {
        let mut timer = TaskActionTimer::new(vec![Duration::from_secs(10), Duration::from_secs(20)]);
        assert_eq!(timer.next(t0(), false), Some(t0() + TimeDelta::seconds(10)));
        assert_eq!(timer.next(t0(), false), Some(t0() + TimeDelta::seconds(20)));
        assert_eq!(timer.num, 2);
        assert_eq!(timer.next(t0(), false), None);
        assert!(!timer.is_timeout_set());
    }

    #[test]
    fn no_exhaust_repeats_last_delay() {
        let mut timer = TaskActionTimer::new(vec![Duration::from_secs(5)]);
        timer.next(t0(), true);
        assert_eq!(timer.next(t0(), true), Some(t0() + TimeDelta::seconds(5)));
        assert!(timer.is_delay_done(t0() + TimeDelta::seconds(5)));
        assert!(!timer.is_delay_done(t0() + TimeDelta::seconds(4)));
    }

    #[test]
    fn empty_timer_never_fires() {
        let mut timer = TaskActionTimer::default();
        assert_eq!(timer.next(t0(), true), None);
        assert!(!timer.is_delay_done(t0()));
    }
}

//! Continuous-query scheduling with exponential backoff.
//!
//! Each browsed name gets its own timer: the first query fires immediately,
//! then the interval doubles from 1 second up to a 60 second steady-state
//! cap. Every scheduled interval is jittered by ±20% so that browsers started
//! at the same time do not stay synchronized.

use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};

use crate::name::DomainName;

const INITIAL_INTERVAL: Duration = Duration::from_secs(1);
const MAX_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct QueryTimer {
    /// Un-jittered backoff interval to apply after the next fire.
    interval: Duration,
    next_fire: Instant,
}

/// Timers for all names the engine periodically queries for.
#[derive(Debug, Default)]
pub struct QuerySchedule {
    timers: BTreeMap<DomainName, QueryTimer>,
}

impl QuerySchedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts querying for `name`. The first query is due immediately.
    /// Re-adding a name that is already scheduled does not reset its backoff.
    pub fn add(&mut self, name: DomainName, now: Instant) {
        self.timers.entry(name).or_insert(QueryTimer {
            interval: INITIAL_INTERVAL,
            next_fire: now,
        });
    }

    pub fn remove(&mut self, name: &DomainName) {
        self.timers.remove(name);
    }

    pub fn contains(&self, name: &DomainName) -> bool {
        self.timers.contains_key(name)
    }

    /// Returns the names whose timers have fired and advances them.
    pub fn due(&mut self, now: Instant) -> Vec<DomainName> {
        let mut due = Vec::new();
        for (name, timer) in &mut self.timers {
            if now >= timer.next_fire {
                due.push(name.clone());
                timer.next_fire = now + jitter(timer.interval);
                timer.interval = (timer.interval * 2).min(MAX_INTERVAL);
            }
        }
        due
    }

    /// The earliest pending timer, for the engine's `recv_timeout`.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.values().map(|t| t.next_fire).min()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.is_empty()
    }
}

/// Scales `interval` by a random factor in [0.8, 1.2].
fn jitter(interval: Duration) -> Duration {
    interval.mul_f64(0.8 + 0.4 * fastrand::f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> DomainName {
        s.parse().unwrap()
    }

    #[test]
    fn first_query_is_immediate() {
        let t0 = Instant::now();
        let mut sched = QuerySchedule::new();
        sched.add(name("_http._tcp.local."), t0);
        assert_eq!(sched.next_deadline(), Some(t0));
        assert_eq!(sched.due(t0), vec![name("_http._tcp.local.")]);
        assert!(sched.due(t0).is_empty(), "timer must advance after firing");
    }

    #[test]
    fn interval_doubles_to_cap() {
        fastrand::seed(7);
        let t0 = Instant::now();
        let mut sched = QuerySchedule::new();
        sched.add(name("_hap._tcp.local."), t0);

        let mut now = t0;
        let mut intervals = Vec::new();
        for _ in 0..10 {
            assert_eq!(sched.due(now).len(), 1);
            let next = sched.next_deadline().unwrap();
            intervals.push(next - now);
            now = next;
        }

        // Jitter keeps each interval within ±20% of the nominal backoff.
        let nominal = [1u64, 2, 4, 8, 16, 32, 60, 60, 60, 60];
        for (measured, nominal) in intervals.iter().zip(nominal) {
            let nominal = Duration::from_secs(nominal);
            assert!(
                *measured >= nominal.mul_f64(0.8) && *measured <= nominal.mul_f64(1.2),
                "interval {measured:?} outside jitter window of {nominal:?}"
            );
        }
    }

    #[test]
    fn re_add_does_not_reset_backoff() {
        let t0 = Instant::now();
        let mut sched = QuerySchedule::new();
        sched.add(name("_http._tcp.local."), t0);
        sched.due(t0);
        sched.due(sched.next_deadline().unwrap());
        let deadline = sched.next_deadline().unwrap();

        sched.add(name("_http._tcp.local."), t0);
        assert_eq!(sched.next_deadline(), Some(deadline));
    }

    #[test]
    fn remove_clears_timer() {
        let t0 = Instant::now();
        let mut sched = QuerySchedule::new();
        sched.add(name("_http._tcp.local."), t0);
        sched.remove(&name("_http._tcp.local."));
        assert!(sched.is_empty());
        assert_eq!(sched.next_deadline(), None);
    }

    #[test]
    fn independent_timers() {
        let t0 = Instant::now();
        let mut sched = QuerySchedule::new();
        sched.add(name("_http._tcp.local."), t0);
        sched.due(t0);

        // A type added later fires immediately without touching the first.
        let t1 = t0 + Duration::from_millis(100);
        sched.add(name("_ipp._tcp.local."), t1);
        assert_eq!(sched.due(t1), vec![name("_ipp._tcp.local.")]);
    }
}

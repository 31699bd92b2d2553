use fnv::FnvHashMap;
use std::{hash::Hash, time::Duration};
use tokio::time::Instant;

/// Per-key throttle for lazy lookups.
///
/// A key may be attempted once, then again only after `interval` has passed since the
/// previous attempt. Once a lookup succeeds the key is never attempted again until the
/// gate is cleared. Nothing is scheduled: a retry only happens when something asks.
#[derive(Debug, Clone)]
pub struct RetryGate<K> {
    interval: Duration,
    attempts: FnvHashMap<K, Attempt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    InFlight(Instant),
    Done,
}

impl<K> RetryGate<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            attempts: FnvHashMap::default(),
        }
    }

    /// Returns `true` if the caller may start a lookup for `key` now, and records the
    /// attempt.
    pub fn try_acquire(&mut self, key: &K, now: Instant) -> bool {
        match self.attempts.get(key) {
            Some(Attempt::Done) => false,
            Some(Attempt::InFlight(last)) if now.duration_since(*last) < self.interval => false,
            _ => {
                self.attempts.insert(key.clone(), Attempt::InFlight(now));
                true
            }
        }
    }

    /// Mark the lookup for `key` as complete.
    pub fn succeeded(&mut self, key: &K) {
        self.attempts.insert(key.clone(), Attempt::Done);
    }

    pub fn clear(&mut self) {
        self.attempts.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_gate() {
        let start = Instant::now();
        let interval = Duration::from_secs(30);
        let mut gate = RetryGate::new(interval);

        struct TestCase {
            key: &'static str,
            at: Duration,
            succeed: bool,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: first attempt allowed
                key: "F1",
                at: Duration::ZERO,
                succeed: false,
                expected: true,
            },
            TestCase {
                // TC1: immediate retry throttled
                key: "F1",
                at: Duration::from_secs(1),
                succeed: false,
                expected: false,
            },
            TestCase {
                // TC2: other keys are independent
                key: "F2",
                at: Duration::from_secs(1),
                succeed: true,
                expected: true,
            },
            TestCase {
                // TC3: retry allowed after interval
                key: "F1",
                at: Duration::from_secs(30),
                succeed: false,
                expected: true,
            },
            TestCase {
                // TC4: succeeded keys are never retried
                key: "F2",
                at: Duration::from_secs(600),
                succeed: false,
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let key = test.key.to_string();
            let actual = gate.try_acquire(&key, start + test.at);
            assert_eq!(actual, test.expected, "TC{} failed", index);
            if test.succeed {
                gate.succeeded(&key);
            }
        }

        gate.clear();
        assert!(gate.try_acquire(&"F2".to_string(), start));
    }
}

//! Bounded retry loop shared by the swarm runs and the orchestrator.
//!
//! An attempt yields `Some` to stop; `None` asks for another attempt until
//! the budget is spent. State kept across attempts (best run so far, last
//! status) lives in the caller's closure.
use log::debug;

/// Run `attempt` up to `attempts` times (at least once) and return the first
/// value it yields. The closure receives the 1-based attempt number.
pub fn retry<T>(attempts: usize, mut attempt: impl FnMut(usize) -> Option<T>) -> Option<T> {
    let n = attempts.max(1);
    for i in 1..=n {
        if let Some(value) = attempt(i) {
            return Some(value);
        }
        debug!("retry: attempt {i}/{n} failed");
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_the_first_success() {
        let mut calls = Vec::new();
        let out = retry(5, |i| {
            calls.push(i);
            (i == 3).then_some(i * 10)
        });
        assert_eq!(out, Some(30));
        assert_eq!(calls, vec![1, 2, 3]);
    }

    #[test]
    fn exhausts_the_budget() {
        let mut calls = 0;
        let out: Option<()> = retry(4, |_| {
            calls += 1;
            None
        });
        assert!(out.is_none());
        assert_eq!(calls, 4);
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let mut calls = 0;
        let _ = retry(0, |_| {
            calls += 1;
            None::<u8>
        });
        assert_eq!(calls, 1);
    }
}

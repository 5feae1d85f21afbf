//! Per-target attempt state machine.
//!
//! Retry-with-backoff is modeled as explicit state rather than nested
//! retry loops: the collector asks the machine what to do after every
//! failure and the machine owns the budgets.
//!
//! Budgets: transient failures get `max_retries` per strategy (so a
//! target may retry again after falling back). Challenge pages share a
//! single `max_retries` budget across both strategies, which caps
//! blocked retries at half of what generic transients can consume.

use std::time::Duration;

use crate::error::CollectError;
use crate::target::{RunConfig, Strategy};
use crate::util::XorShift64;

/// Where a target currently is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Attempting { strategy: Strategy, attempt: u32 },
    Retrying { strategy: Strategy },
    FallingBack { to: Strategy },
    Succeeded,
    Failed,
}

/// What the collector should do next with this target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextStep {
    /// Sleep, then attempt again with the current strategy.
    RetryAfter(Duration),
    /// Switch to the alternate strategy and attempt once more.
    FallBack(Strategy),
    /// Record the failure permanently; no further attempts.
    GiveUp,
}

#[derive(Debug, Clone)]
pub struct AttemptState {
    strategy: Strategy,
    phase: Phase,
    fell_back: bool,
    attempt_in_strategy: u32,
    retries_in_strategy: u32,
    blocked_retries: u32,
    retries_consumed: u32,
    max_retries: u32,
    base_backoff: Duration,
    max_backoff: Duration,
    rng: XorShift64,
}

impl AttemptState {
    pub fn new(hint: Strategy, config: &RunConfig) -> Self {
        Self::seeded(hint, config, XorShift64::from_entropy())
    }

    /// Deterministic variant for tests: jitter comes from the given
    /// generator.
    pub fn seeded(hint: Strategy, config: &RunConfig, rng: XorShift64) -> Self {
        Self {
            strategy: hint,
            phase: Phase::Pending,
            fell_back: false,
            attempt_in_strategy: 0,
            retries_in_strategy: 0,
            blocked_retries: 0,
            retries_consumed: 0,
            max_retries: config.max_retries,
            base_backoff: config.base_backoff,
            max_backoff: config.max_backoff,
            rng,
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Total retries consumed across both strategies, for the report.
    pub fn retries_consumed(&self) -> u32 {
        self.retries_consumed
    }

    /// Mark the start of a fetch attempt; returns the 1-based attempt
    /// number within the current strategy.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt_in_strategy += 1;
        self.phase = Phase::Attempting {
            strategy: self.strategy,
            attempt: self.attempt_in_strategy,
        };
        self.attempt_in_strategy
    }

    pub fn on_success(&mut self) {
        self.phase = Phase::Succeeded;
    }

    /// Advance the machine after a failed attempt.
    pub fn on_failure(&mut self, error: &CollectError) -> NextStep {
        if error.is_terminal_for_target() {
            self.phase = Phase::Failed;
            return NextStep::GiveUp;
        }

        if error.is_retryable() && self.retry_allowed(error) {
            self.retries_in_strategy += 1;
            self.retries_consumed += 1;
            if error.is_blocked() {
                self.blocked_retries += 1;
            }
            let delay = self.next_delay();
            self.phase = Phase::Retrying {
                strategy: self.strategy,
            };
            return NextStep::RetryAfter(delay);
        }

        if !self.fell_back {
            self.fell_back = true;
            self.strategy = self.strategy.alternate();
            self.attempt_in_strategy = 0;
            self.retries_in_strategy = 0;
            self.phase = Phase::FallingBack { to: self.strategy };
            return NextStep::FallBack(self.strategy);
        }

        self.phase = Phase::Failed;
        NextStep::GiveUp
    }

    fn retry_allowed(&self, error: &CollectError) -> bool {
        if self.retries_in_strategy >= self.max_retries {
            return false;
        }
        // Repeated attempts against a defense worsen detection, so the
        // blocked budget never resets on fallback.
        if error.is_blocked() && self.blocked_retries >= self.max_retries {
            return false;
        }
        true
    }

    /// Exponential backoff with jitter: base * 2^(retry-1), capped,
    /// plus a uniform jitter of up to half the delay.
    fn next_delay(&mut self) -> Duration {
        let exponent = self.retries_in_strategy.saturating_sub(1).min(16);
        let delay = self
            .base_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff);
        let jitter_ms = self.rng.next_below(delay.as_millis() as u64 / 2 + 1);
        delay + Duration::from_millis(jitter_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(retries: u32) -> RunConfig {
        RunConfig::default()
            .with_max_retries(retries)
            .with_backoff(Duration::from_millis(100), Duration::from_secs(5))
    }

    fn state(hint: Strategy, retries: u32) -> AttemptState {
        AttemptState::seeded(hint, &config(retries), XorShift64::seeded(1))
    }

    fn timeout() -> CollectError {
        CollectError::Timeout(30)
    }

    fn blocked() -> CollectError {
        CollectError::BlockedByDefense("https://example.com".into())
    }

    fn not_found() -> CollectError {
        CollectError::HttpStatus {
            status: 404,
            url: "https://example.com".into(),
        }
    }

    #[test]
    fn transient_failures_retry_up_to_budget_then_fall_back() {
        let mut state = state(Strategy::Http, 2);
        state.begin_attempt();
        assert!(matches!(state.on_failure(&timeout()), NextStep::RetryAfter(_)));
        state.begin_attempt();
        assert!(matches!(state.on_failure(&timeout()), NextStep::RetryAfter(_)));
        state.begin_attempt();
        assert_eq!(
            state.on_failure(&timeout()),
            NextStep::FallBack(Strategy::Browser)
        );
        assert_eq!(state.retries_consumed(), 2);
        assert_eq!(state.strategy(), Strategy::Browser);
    }

    #[test]
    fn fallback_strategy_gets_its_own_transient_budget() {
        let mut state = state(Strategy::Http, 1);
        state.begin_attempt();
        assert!(matches!(state.on_failure(&timeout()), NextStep::RetryAfter(_)));
        state.begin_attempt();
        assert!(matches!(state.on_failure(&timeout()), NextStep::FallBack(_)));
        // Fresh budget after fallback.
        state.begin_attempt();
        assert!(matches!(state.on_failure(&timeout()), NextStep::RetryAfter(_)));
        state.begin_attempt();
        assert_eq!(state.on_failure(&timeout()), NextStep::GiveUp);
        assert_eq!(state.retries_consumed(), 2);
    }

    #[test]
    fn blocked_budget_is_shared_across_strategies() {
        let mut state = state(Strategy::Browser, 2);
        state.begin_attempt();
        assert!(matches!(state.on_failure(&blocked()), NextStep::RetryAfter(_)));
        state.begin_attempt();
        assert!(matches!(state.on_failure(&blocked()), NextStep::RetryAfter(_)));
        state.begin_attempt();
        assert_eq!(
            state.on_failure(&blocked()),
            NextStep::FallBack(Strategy::Http)
        );
        // Blocked budget exhausted; the fallback attempt is the last.
        state.begin_attempt();
        assert_eq!(state.on_failure(&blocked()), NextStep::GiveUp);
        assert_eq!(state.retries_consumed(), 2);
        assert_eq!(state.strategy(), Strategy::Http);
    }

    #[test]
    fn terminal_status_falls_back_immediately() {
        let mut state = state(Strategy::Http, 3);
        state.begin_attempt();
        assert_eq!(
            state.on_failure(&not_found()),
            NextStep::FallBack(Strategy::Browser)
        );
        state.begin_attempt();
        assert_eq!(state.on_failure(&not_found()), NextStep::GiveUp);
        assert_eq!(state.retries_consumed(), 0);
    }

    #[test]
    fn parse_failure_falls_back_without_retry() {
        let mut state = state(Strategy::Http, 3);
        state.begin_attempt();
        let err = CollectError::ParseFailure("truncated body".into());
        assert_eq!(state.on_failure(&err), NextStep::FallBack(Strategy::Browser));
        state.begin_attempt();
        assert_eq!(state.on_failure(&err), NextStep::GiveUp);
        assert_eq!(state.retries_consumed(), 0);
    }

    #[test]
    fn extraction_failure_gives_up_without_fallback() {
        let mut state = state(Strategy::Http, 3);
        state.begin_attempt();
        let err = CollectError::ExtractionFailure {
            field: "player".into(),
        };
        assert_eq!(state.on_failure(&err), NextStep::GiveUp);
        assert_eq!(state.phase(), Phase::Failed);
    }

    #[test]
    fn backoff_grows_exponentially_within_jitter_bounds() {
        let mut state = state(Strategy::Http, 4);
        let mut delays = Vec::new();
        for _ in 0..3 {
            state.begin_attempt();
            match state.on_failure(&timeout()) {
                NextStep::RetryAfter(d) => delays.push(d),
                other => panic!("expected retry, got {other:?}"),
            }
        }
        // Retry n has base 100ms * 2^(n-1), jitter < delay/2 + 1ms.
        assert!(delays[0] >= Duration::from_millis(100));
        assert!(delays[0] < Duration::from_millis(151));
        assert!(delays[1] >= Duration::from_millis(200));
        assert!(delays[1] < Duration::from_millis(301));
        assert!(delays[2] >= Duration::from_millis(400));
        assert!(delays[2] < Duration::from_millis(601));
    }

    #[test]
    fn phases_track_lifecycle() {
        let mut state = state(Strategy::Http, 1);
        assert_eq!(state.phase(), Phase::Pending);
        state.begin_attempt();
        assert_eq!(
            state.phase(),
            Phase::Attempting {
                strategy: Strategy::Http,
                attempt: 1
            }
        );
        state.on_success();
        assert_eq!(state.phase(), Phase::Succeeded);
    }
}

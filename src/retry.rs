//! Retry policy and the runtime-agnostic backoff state machine.
//!
//! [`RetryMachine`] only decides; it never sleeps. The gateway and the token manager drive it
//! with `tokio::time::sleep`, but a blocking caller could drive it with `std::thread::sleep`
//! just as well.

// std
use std::collections::BTreeSet;
// crates.io
use rand::Rng;
// self
use crate::{_prelude::*, error::ConfigError};

/// Static retry configuration, read-only for the process lifetime.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
	/// Total attempts including the first one; at least 1.
	pub max_attempts: u32,
	/// Delay before the second attempt.
	pub base_delay: Duration,
	/// Growth factor applied per additional attempt; at least 1.0.
	pub backoff_multiplier: f64,
	/// Upper bound for computed delays. Upstream `Retry-After` hints may exceed it.
	pub max_delay: Duration,
	/// Upper bound for upstream `Retry-After` hints.
	pub max_retry_after: Duration,
	/// Upper bound, as a fraction of the computed delay, for random extra wait.
	pub jitter: f64,
	/// HTTP statuses that are worth another attempt.
	pub retryable_status_codes: BTreeSet<u16>,
}
impl RetryPolicy {
	/// Returns `true` when `status` is in the retryable set.
	pub fn is_retryable_status(&self, status: u16) -> bool {
		self.retryable_status_codes.contains(&status)
	}

	/// Overrides the attempt budget.
	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = max_attempts;

		self
	}

	/// Overrides the base delay.
	pub fn with_base_delay(mut self, delay: Duration) -> Self {
		self.base_delay = delay;

		self
	}

	/// Overrides the growth factor.
	pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
		self.backoff_multiplier = multiplier;

		self
	}

	/// Overrides the delay cap.
	pub fn with_max_delay(mut self, delay: Duration) -> Self {
		self.max_delay = delay;

		self
	}

	/// Overrides the ceiling applied to upstream `Retry-After` hints.
	pub fn with_max_retry_after(mut self, ceiling: Duration) -> Self {
		self.max_retry_after = ceiling;

		self
	}

	/// Enables random extra wait of up to `ratio` times the computed delay.
	pub fn with_jitter(mut self, ratio: f64) -> Self {
		self.jitter = ratio;

		self
	}

	/// Adds a status to the retryable set (e.g. `403` while permissions propagate).
	pub fn with_retryable_status(mut self, status: u16) -> Self {
		self.retryable_status_codes.insert(status);

		self
	}

	/// Removes a status from the retryable set.
	pub fn without_retryable_status(mut self, status: u16) -> Self {
		self.retryable_status_codes.remove(&status);

		self
	}

	/// Rejects budgets and factors that would make the machine misbehave.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_attempts == 0 {
			return Err(ConfigError::InvalidRetryPolicy { reason: "max_attempts must be at least 1" });
		}
		if self.base_delay.is_negative()
			|| self.max_delay.is_negative()
			|| self.max_retry_after.is_negative()
		{
			return Err(ConfigError::InvalidRetryPolicy { reason: "delays must not be negative" });
		}
		if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
			return Err(ConfigError::InvalidRetryPolicy {
				reason: "backoff_multiplier must be a finite value of at least 1.0",
			});
		}
		if !self.jitter.is_finite() || !(0.0..=1.0).contains(&self.jitter) {
			return Err(ConfigError::InvalidRetryPolicy { reason: "jitter must be within 0.0..=1.0" });
		}

		Ok(())
	}

	/// Deterministic delay preceding attempt `attempt + 1`, before jitter and hints.
	///
	/// Equals `base_delay * backoff_multiplier^(attempt - 1)` capped by `max_delay`.
	pub fn backoff_for(&self, attempt: u32) -> Duration {
		let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
		let nanos = (self.base_delay.whole_nanoseconds() as f64
			* self.backoff_multiplier.powi(exponent))
		.round();

		if !nanos.is_finite() || nanos >= self.max_delay.whole_nanoseconds() as f64 {
			return self.max_delay;
		}

		Duration::nanoseconds(nanos.max(0.0) as i64)
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		let mut retryable_status_codes: BTreeSet<u16> = (500..=599).collect();

		retryable_status_codes.insert(429);

		Self {
			max_attempts: 5,
			base_delay: Duration::milliseconds(500),
			backoff_multiplier: 2.0,
			max_delay: Duration::seconds(30),
			max_retry_after: Duration::minutes(2),
			jitter: 0.0,
			retryable_status_codes,
		}
	}
}

/// States of one retried operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryState {
	/// Attempt number `attempt` (1-based) is in flight.
	Attempting {
		/// Current attempt.
		attempt: u32,
	},
	/// Waiting `delay` before attempt `attempt + 1`.
	Waiting {
		/// Attempt that just failed.
		attempt: u32,
		/// Delay to observe.
		delay: Duration,
	},
	/// The operation succeeded on attempt `attempts`.
	Succeeded {
		/// Attempts performed.
		attempts: u32,
	},
	/// The operation failed and the budget is spent (or the failure was final).
	Exhausted {
		/// Attempts performed.
		attempts: u32,
	},
}

/// Drives one operation through [`RetryState`] transitions.
#[derive(Clone, Debug)]
pub struct RetryMachine<'a> {
	policy: &'a RetryPolicy,
	state: RetryState,
	delays: Vec<Duration>,
}
impl<'a> RetryMachine<'a> {
	/// Starts in [`RetryState::Attempting`] for the first attempt.
	pub fn new(policy: &'a RetryPolicy) -> Self {
		Self { policy, state: RetryState::Attempting { attempt: 1 }, delays: Vec::new() }
	}

	/// Current state.
	pub fn state(&self) -> RetryState {
		self.state
	}

	/// Attempt currently in flight or last performed.
	pub fn attempt(&self) -> u32 {
		match self.state {
			RetryState::Attempting { attempt } | RetryState::Waiting { attempt, .. } => attempt,
			RetryState::Succeeded { attempts } | RetryState::Exhausted { attempts } => attempts,
		}
	}

	/// Every delay handed out so far, in order.
	pub fn delays(&self) -> &[Duration] {
		&self.delays
	}

	/// Sum of all delays handed out so far.
	pub fn elapsed_delay(&self) -> Duration {
		self.delays.iter().fold(Duration::ZERO, |acc, delay| acc + *delay)
	}

	/// Records a success.
	pub fn succeed(&mut self) -> RetryState {
		self.state = RetryState::Succeeded { attempts: self.attempt() };

		self.state
	}

	/// Records a final failure that must not be retried.
	pub fn give_up(&mut self) -> RetryState {
		self.state = RetryState::Exhausted { attempts: self.attempt() };

		self.state
	}

	/// Records a retryable failure, moving to [`RetryState::Waiting`] while budget remains.
	///
	/// Delays never shrink from one wait to the next and are never shorter than the
	/// upstream `retry_after` hint, which is first capped at `max_retry_after`.
	pub fn fail(&mut self, retry_after: Option<Duration>) -> RetryState {
		let attempt = self.attempt();

		if attempt >= self.policy.max_attempts {
			return self.give_up();
		}

		let mut delay = self.policy.backoff_for(attempt);

		if self.policy.jitter > 0.0 && delay.is_positive() {
			let extra = rand::rng().random_range(0.0..=self.policy.jitter);

			delay += delay * extra;
		}
		let hint = retry_after.map(|hint| hint.min(self.policy.max_retry_after));

		if let Some(hint) = hint.filter(|hint| *hint > delay) {
			delay = hint;
		}
		if let Some(previous) = self.delays.last().filter(|previous| **previous > delay) {
			delay = *previous;
		}

		self.delays.push(delay);
		self.state = RetryState::Waiting { attempt, delay };

		self.state
	}

	/// Leaves [`RetryState::Waiting`] once the delay has elapsed.
	pub fn resume(&mut self) -> RetryState {
		if let RetryState::Waiting { attempt, .. } = self.state {
			self.state = RetryState::Attempting { attempt: attempt + 1 };
		}

		self.state
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn policy() -> RetryPolicy {
		RetryPolicy::default()
			.with_max_attempts(4)
			.with_base_delay(Duration::milliseconds(100))
			.with_max_delay(Duration::seconds(1))
	}

	#[test]
	fn default_policy_retries_rate_limits_and_server_errors() {
		let policy = RetryPolicy::default();

		assert!(policy.is_retryable_status(429));
		assert!(policy.is_retryable_status(500));
		assert!(policy.is_retryable_status(599));
		assert!(!policy.is_retryable_status(403));
		assert!(!policy.is_retryable_status(404));
		assert!(policy.with_retryable_status(403).is_retryable_status(403));
		assert!(RetryPolicy::default().validate().is_ok());
	}

	#[test]
	fn backoff_grows_geometrically_and_caps() {
		let policy = policy();

		assert_eq!(policy.backoff_for(1), Duration::milliseconds(100));
		assert_eq!(policy.backoff_for(2), Duration::milliseconds(200));
		assert_eq!(policy.backoff_for(3), Duration::milliseconds(400));
		assert_eq!(policy.backoff_for(5), Duration::seconds(1));
		assert_eq!(policy.backoff_for(u32::MAX), Duration::seconds(1));
	}

	#[test]
	fn machine_walks_through_states_until_exhausted() {
		let policy = policy();
		let mut machine = RetryMachine::new(&policy);

		assert_eq!(machine.state(), RetryState::Attempting { attempt: 1 });
		assert_eq!(
			machine.fail(None),
			RetryState::Waiting { attempt: 1, delay: Duration::milliseconds(100) }
		);
		assert_eq!(machine.resume(), RetryState::Attempting { attempt: 2 });

		machine.fail(None);
		machine.resume();
		machine.fail(None);
		machine.resume();

		assert_eq!(machine.fail(None), RetryState::Exhausted { attempts: 4 });
		assert_eq!(machine.delays().len(), 3);
		assert_eq!(machine.elapsed_delay(), Duration::milliseconds(700));
	}

	#[test]
	fn retry_after_hint_wins_and_delays_never_shrink() {
		let policy = policy();
		let mut machine = RetryMachine::new(&policy);

		machine.fail(Some(Duration::milliseconds(900)));
		machine.resume();

		assert_eq!(
			machine.fail(Some(Duration::milliseconds(10))),
			RetryState::Waiting { attempt: 2, delay: Duration::milliseconds(900) }
		);
		assert!(machine.delays().windows(2).all(|pair| pair[0] <= pair[1]));
	}

	#[test]
	fn oversized_retry_after_hints_are_capped() {
		let policy = policy().with_max_retry_after(Duration::seconds(5));
		let mut machine = RetryMachine::new(&policy);

		assert_eq!(
			machine.fail(Some(Duration::seconds(4_294_967_295))),
			RetryState::Waiting { attempt: 1, delay: Duration::seconds(5) }
		);
		assert!(
			RetryPolicy::default().with_max_retry_after(Duration::seconds(-1)).validate().is_err()
		);
	}

	#[test]
	fn success_and_final_failure_stop_the_machine() {
		let policy = policy();
		let mut machine = RetryMachine::new(&policy);

		assert_eq!(machine.succeed(), RetryState::Succeeded { attempts: 1 });

		let mut machine = RetryMachine::new(&policy);

		machine.fail(None);
		machine.resume();

		assert_eq!(machine.give_up(), RetryState::Exhausted { attempts: 2 });
		assert_eq!(machine.resume(), RetryState::Exhausted { attempts: 2 });
	}

	#[test]
	fn jitter_stays_within_bounds() {
		let policy = policy().with_jitter(0.5);
		let mut machine = RetryMachine::new(&policy);

		match machine.fail(None) {
			RetryState::Waiting { delay, .. } => {
				assert!(delay >= Duration::milliseconds(100));
				assert!(delay <= Duration::milliseconds(150));
			},
			other => panic!("Unexpected state {other:?}."),
		}
	}

	#[test]
	fn validation_rejects_nonsense() {
		assert!(RetryPolicy::default().with_max_attempts(0).validate().is_err());
		assert!(RetryPolicy::default().with_backoff_multiplier(0.5).validate().is_err());
		assert!(RetryPolicy::default().with_backoff_multiplier(f64::NAN).validate().is_err());
		assert!(RetryPolicy::default().with_jitter(2.0).validate().is_err());
		assert!(
			RetryPolicy::default().with_base_delay(Duration::seconds(-1)).validate().is_err()
		);
	}
}

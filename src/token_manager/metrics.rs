// std
use std::sync::atomic::{AtomicU64, Ordering};

/// Identity endpoint counters kept by one [`TokenManager`](super::TokenManager).
///
/// `requests` counts every POST to the token endpoint, retries included, so
/// `requests == successes + failures` once the manager is idle. `coalesced` counts callers that
/// queued behind another caller's refresh and took its result instead of sending their own.
#[derive(Debug, Default)]
pub struct TokenMetrics {
	requests: AtomicU64,
	successes: AtomicU64,
	failures: AtomicU64,
	coalesced: AtomicU64,
}
impl TokenMetrics {
	/// Token endpoint POSTs sent so far.
	pub fn requests(&self) -> u64 {
		self.requests.load(Ordering::Relaxed)
	}

	/// POSTs answered with a usable token.
	pub fn successes(&self) -> u64 {
		self.successes.load(Ordering::Relaxed)
	}

	/// POSTs that ended in an error, whether or not a retry followed.
	pub fn failures(&self) -> u64 {
		self.failures.load(Ordering::Relaxed)
	}

	/// Callers served by a refresh another caller performed.
	pub fn coalesced(&self) -> u64 {
		self.coalesced.load(Ordering::Relaxed)
	}

	pub(crate) fn record_request(&self) {
		bump(&self.requests);
	}

	pub(crate) fn record_success(&self) {
		bump(&self.successes);
	}

	pub(crate) fn record_failure(&self) {
		bump(&self.failures);
	}

	pub(crate) fn record_coalesced(&self) {
		bump(&self.coalesced);
	}
}

fn bump(counter: &AtomicU64) {
	counter.fetch_add(1, Ordering::Relaxed);
}

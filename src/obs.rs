//! Optional observability helpers for the token manager and the gateway.
//!
//! # Feature Flags
//!
//! - `tracing` (default) emits spans named `powerbi_gateway.op` with the `op` and `stage`
//!   fields, plus `debug`/`warn` events for attempts, retries, and forced refreshes. Bearer
//!   values and client secrets are never recorded.
//! - `metrics` increments `powerbi_gateway_op_total{op, outcome}` for every operation,
//!   records each scheduled wait in `powerbi_gateway_backoff_seconds{op}`, and counts PowerBI
//!   responses per status class in `powerbi_gateway_upstream_status_total{class}`.

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Operations observed by the gateway.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
	/// Token request against the identity endpoint.
	TokenAcquire,
	/// Token replacement forced by an upstream 401.
	TokenRefresh,
	/// Call against the PowerBI REST API.
	ApiRequest,
}
impl Operation {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Operation::TokenAcquire => "token_acquire",
			Operation::TokenRefresh => "token_refresh",
			Operation::ApiRequest => "api_request",
		}
	}
}
impl Display for Operation {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OpOutcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure reported to the caller.
	Failure,
}
impl OpOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			OpOutcome::Attempt => "attempt",
			OpOutcome::Success => "success",
			OpOutcome::Failure => "failure",
		}
	}
}
impl Display for OpOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

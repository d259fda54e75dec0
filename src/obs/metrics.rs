// self
use crate::{
	_prelude::*,
	obs::{OpOutcome, Operation},
};

/// Counts one token or API operation outcome as `powerbi_gateway_op_total{op, outcome}`.
pub fn record_op_outcome(op: Operation, outcome: OpOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"powerbi_gateway_op_total",
			"op" => op.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (op, outcome);
	}
}

/// Feeds a scheduled backoff into the `powerbi_gateway_backoff_seconds{op}` histogram.
pub fn record_backoff(op: Operation, delay: Duration) {
	#[cfg(feature = "metrics")]
	{
		metrics::histogram!("powerbi_gateway_backoff_seconds", "op" => op.as_str())
			.record(delay.as_seconds_f64());
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (op, delay);
	}
}

/// Counts a PowerBI response as `powerbi_gateway_upstream_status_total{class}`.
pub fn record_upstream_status(status: u16) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("powerbi_gateway_upstream_status_total", "class" => status_class(status))
			.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = status;
	}
}

#[cfg(any(feature = "metrics", test))]
fn status_class(status: u16) -> &'static str {
	match status {
		429 => "throttled",
		401 | 403 => "unauthorized",
		200..=299 => "2xx",
		400..=499 => "4xx",
		500..=599 => "5xx",
		_ => "other",
	}
}

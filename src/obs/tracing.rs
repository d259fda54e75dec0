// self
use crate::{_prelude::*, obs::Operation};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedOp<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedOp<F> = F;

/// A span builder used by the token manager and the gateway.
#[derive(Clone, Debug)]
pub struct OpSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl OpSpan {
	/// Creates a new span tagged with the provided operation + stage.
	pub fn new(op: Operation, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("powerbi_gateway.op", op = op.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (op, stage);

			Self {}
		}
	}

	/// Creates an API request span carrying the HTTP method and the relative path.
	pub fn request(method: &str, path: &str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!(
				"powerbi_gateway.op",
				op = Operation::ApiRequest.as_str(),
				stage = "execute",
				method,
				path
			);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (method, path);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedOp<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Emits a `debug` event when an attempt starts.
pub fn attempt_started(op: Operation, attempt: u32) {
	#[cfg(feature = "tracing")]
	{
		tracing::debug!(op = op.as_str(), attempt, "attempt started");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (op, attempt);
	}
}

/// Emits a `warn` event when a failed attempt will be retried after `delay`.
pub fn retry_scheduled(op: Operation, attempt: u32, delay: Duration, cause: &dyn Display) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(
			op = op.as_str(),
			attempt,
			delay_ms = delay.whole_milliseconds() as u64,
			%cause,
			"attempt failed, retrying"
		);
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (op, attempt, delay, cause);
	}
}

/// Emits a `warn` event when an operation fails for good.
pub fn gave_up(op: Operation, attempts: u32, cause: &dyn Display) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(op = op.as_str(), attempts, %cause, "operation failed");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = (op, attempts, cause);
	}
}

/// Emits a `warn` event when the API rejected a token that looked valid locally.
pub fn token_rejected(path: &str) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(path, "upstream rejected the bearer token, forcing a refresh");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = path;
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn events_are_safe_without_a_subscriber() {
		attempt_started(Operation::TokenAcquire, 1);
		retry_scheduled(Operation::ApiRequest, 1, Duration::milliseconds(5), &"429");
		gave_up(Operation::ApiRequest, 3, &"503");
		token_rejected("/groups");
	}

	#[tokio::test]
	async fn instrument_wraps_future() {
		let span = OpSpan::request("GET", "/groups");
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);
		assert_eq!(OpSpan::new(Operation::TokenRefresh, "test").instrument(async { 7 }).await, 7);
	}
}

//! Authenticated request pipeline in front of the PowerBI REST API.
//!
//! [`RequestGateway::execute`] never fails: every outcome, including token acquisition
//! problems, is folded into an [`Envelope`]. Retryable statuses and transport failures are
//! retried per [`RetryPolicy`]; a `401` triggers one forced token refresh that does not count
//! against the retry budget.

mod metrics;

pub use metrics::GatewayMetrics;
pub use reqwest::Method;

// std
use std::borrow::Cow;
// crates.io
use reqwest::{
	StatusCode,
	header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderValue},
};
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	auth::AccessToken,
	envelope::Envelope,
	error::ConfigError,
	http::{self, ReqwestHttpClient, TokenHttpClient},
	oauth::{ReqwestTransportErrorMapper, TransportErrorMapper},
	obs::{self, OpOutcome, OpSpan, Operation},
	retry::{RetryMachine, RetryPolicy, RetryState},
	token_manager::TokenManager,
};

/// Default PowerBI REST API root.
pub const DEFAULT_API_BASE_URL: &str = "https://api.powerbi.com/v1.0/myorg";

const MAX_MESSAGE_CHARS: usize = 256;

/// Diagnostics collected while executing one call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetryReport {
	/// HTTP requests sent, including the retry after a forced refresh.
	pub attempts: u32,
	/// Backoff waits observed, in order.
	pub delays: Vec<Duration>,
	/// Token refreshes forced by a `401`.
	pub forced_refreshes: u32,
}

struct RawResponse {
	status: StatusCode,
	retry_after: Option<Duration>,
	body: Vec<u8>,
}

/// Dispatches PowerBI API calls with a bearer token, retries, and envelope mapping.
pub struct RequestGateway<C = ReqwestHttpClient, M = ReqwestTransportErrorMapper>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Token source shared with every other gateway of the process.
	pub tokens: Arc<TokenManager<C, M>>,
	/// Retry policy applied to API calls.
	pub retry_policy: RetryPolicy,
	/// API call counters.
	pub metrics: Arc<GatewayMetrics>,
	http_client: ReqwestClient,
	base_url: Url,
}
impl<C, M> RequestGateway<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a gateway rooted at `base_url`.
	pub fn new(
		tokens: Arc<TokenManager<C, M>>,
		http_client: ReqwestClient,
		base_url: Url,
	) -> Result<Self, ConfigError> {
		if base_url.cannot_be_a_base() {
			return Err(ConfigError::InvalidUrl {
				url: base_url.to_string(),
				source: url::ParseError::RelativeUrlWithCannotBeABaseBase,
			});
		}

		Ok(Self {
			tokens,
			retry_policy: RetryPolicy::default(),
			metrics: Default::default(),
			http_client,
			base_url,
		})
	}

	/// Replaces the retry policy.
	pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.retry_policy = policy;

		self
	}

	/// API root every relative path is resolved against.
	pub fn base_url(&self) -> &Url {
		&self.base_url
	}

	/// Executes `method path` with an optional JSON body.
	///
	/// `path` is relative to the API root and may carry a query string.
	pub async fn execute(&self, method: Method, path: &str, body: Option<&Value>) -> Envelope {
		self.execute_with_report(method, path, body).await.0
	}

	/// Same as [`execute`](Self::execute) but also returns what the retry loop did.
	pub async fn execute_with_report(
		&self,
		method: Method,
		path: &str,
		body: Option<&Value>,
	) -> (Envelope, RetryReport) {
		let mut report = RetryReport::default();
		let span = OpSpan::request(method.as_str(), path);

		obs::record_op_outcome(Operation::ApiRequest, OpOutcome::Attempt);

		let result = span.instrument(self.dispatch(&method, path, body, &mut report)).await;
		let envelope = match result {
			Ok(data) => {
				obs::record_op_outcome(Operation::ApiRequest, OpOutcome::Success);

				Envelope::Success(data)
			},
			Err(e) => {
				self.metrics.record_failure();
				obs::record_op_outcome(Operation::ApiRequest, OpOutcome::Failure);

				Envelope::from(e)
			},
		};

		(envelope, report)
	}

	/// Races the call against `cancel`; whichever finishes first decides the outcome.
	///
	/// Dropping the call releases any wait or token refresh guard it was holding.
	pub async fn execute_with_cancel<F>(
		&self,
		method: Method,
		path: &str,
		body: Option<&Value>,
		cancel: F,
	) -> Envelope
	where
		F: Future<Output = ()>,
	{
		tokio::select! {
			biased;
			_ = cancel => {
				self.metrics.record_failure();
				obs::record_op_outcome(Operation::ApiRequest, OpOutcome::Failure);

				Envelope::from(Error::Cancelled)
			},
			envelope = self.execute(method, path, body) => envelope,
		}
	}

	async fn dispatch(
		&self,
		method: &Method,
		path: &str,
		body: Option<&Value>,
		report: &mut RetryReport,
	) -> Result<Value> {
		let url = self.resolve(path);
		let payload = body
			.map(serde_json::to_vec)
			.transpose()
			.map_err(|e| Error::Decode { reason: e.to_string() })?;
		let mut token = self.tokens.get_token().await?;
		let mut machine = RetryMachine::new(&self.retry_policy);
		let mut refreshed = false;

		loop {
			obs::attempt_started(Operation::ApiRequest, machine.attempt());
			self.metrics.record_request();

			report.attempts += 1;

			let response = match self.send(method, &url, payload.as_deref(), &token).await {
				Ok(response) => response,
				Err(e) => {
					let reason = describe_transport_error(&e);

					match machine.fail(None) {
						RetryState::Waiting { attempt, delay } => {
							obs::retry_scheduled(Operation::ApiRequest, attempt, delay, &reason);
							self.wait(delay, report).await;
							machine.resume();

							continue;
						},
						_ => {
							let attempts = machine.attempt();

							obs::gave_up(Operation::ApiRequest, attempts, &reason);

							return Err(Error::Network { attempts, reason });
						},
					}
				},
			};
			let status = response.status;

			obs::record_upstream_status(status.as_u16());

			if status.is_success() {
				machine.succeed();

				return Ok(parse_success_body(&response.body));
			}
			if status == StatusCode::UNAUTHORIZED && !refreshed {
				refreshed = true;
				report.forced_refreshes += 1;

				self.metrics.record_forced_refresh();
				obs::token_rejected(path);

				token = self.tokens.force_refresh(&token).await?;

				continue;
			}
			if self.retry_policy.is_retryable_status(status.as_u16()) {
				match machine.fail(response.retry_after) {
					RetryState::Waiting { attempt, delay } => {
						obs::retry_scheduled(Operation::ApiRequest, attempt, delay, &status);
						self.wait(delay, report).await;
						machine.resume();

						continue;
					},
					_ => {
						let attempts = machine.attempt();

						obs::gave_up(Operation::ApiRequest, attempts, &status);

						return Err(Error::UpstreamExhausted { attempts, status: status.as_u16() });
					},
				}
			}

			machine.give_up();

			let e = Error::UpstreamClient {
				status: status.as_u16(),
				message: upstream_message(status, &response.body),
			};

			obs::gave_up(Operation::ApiRequest, machine.attempt(), &e);

			return Err(e);
		}
	}

	async fn send(
		&self,
		method: &Method,
		url: &Url,
		payload: Option<&[u8]>,
		token: &AccessToken,
	) -> Result<RawResponse, ReqwestError> {
		let mut request = self
			.http_client
			.request(method.clone(), url.clone())
			.header(AUTHORIZATION, token.bearer_header())
			.header(ACCEPT, HeaderValue::from_static("application/json"));

		if let Some(payload) = payload {
			request = request
				.header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
				.body(payload.to_vec());
		}

		let response = request.send().await?;
		let status = response.status();
		let retry_after = http::parse_retry_after(response.headers());
		let body = response.bytes().await?.to_vec();

		Ok(RawResponse { status, retry_after, body })
	}

	async fn wait(&self, delay: Duration, report: &mut RetryReport) {
		self.metrics.record_retry();
		obs::record_backoff(Operation::ApiRequest, delay);

		report.delays.push(delay);

		tokio::time::sleep(http::to_std(delay)).await;
	}

	fn resolve(&self, path: &str) -> Url {
		join_path(&self.base_url, path)
	}
}
impl<C, M> Debug for RequestGateway<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestGateway")
			.field("base_url", &self.base_url.as_str())
			.field("retry_policy", &self.retry_policy)
			.field("tokens", &self.tokens)
			.finish()
	}
}

// Segments are decoded first and re-encoded by `url`, so callers may pass raw or escaped names.
fn join_path(base: &Url, path: &str) -> Url {
	let (path, query) = match path.split_once('?') {
		Some((path, query)) => (path, Some(query)),
		None => (path, None),
	};
	let mut url = base.clone();

	if let Ok(mut segments) = url.path_segments_mut() {
		segments.pop_if_empty().extend(
			path.split('/')
				.filter(|raw| !raw.is_empty())
				.map(|raw| urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw))),
		);
	}

	url.set_query(query);

	url
}

fn parse_success_body(body: &[u8]) -> Value {
	if body.iter().all(u8::is_ascii_whitespace) {
		return Value::Object(Default::default());
	}

	serde_json::from_slice(body)
		.unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

// PowerBI errors look like `{"error":{"code":"ItemNotFound","message":"..."}}`.
fn upstream_message(status: StatusCode, body: &[u8]) -> String {
	if let Ok(value) = serde_json::from_slice::<Value>(body) {
		let error = value.get("error");
		let pick = |key: &str| {
			error
				.and_then(|e| e.get(key))
				.and_then(Value::as_str)
				.map(str::trim)
				.filter(|s| !s.is_empty())
				.map(str::to_owned)
		};

		if let Some(message) = pick("message").or_else(|| pick("code")) {
			return message;
		}
		if let Some(message) = error.and_then(Value::as_str).filter(|s| !s.trim().is_empty()) {
			return message.trim().to_owned();
		}
	}

	let text = String::from_utf8_lossy(body);
	let text = text.trim();

	if !text.is_empty() {
		return text.chars().take(MAX_MESSAGE_CHARS).collect();
	}

	status.canonical_reason().unwrap_or("Unknown Status").to_owned()
}

fn describe_transport_error(e: &ReqwestError) -> String {
	if e.is_timeout() {
		return "request timed out".into();
	}

	let mut reason = e.to_string();
	let mut source = StdError::source(e);

	while let Some(inner) = source {
		reason.push_str(": ");
		reason.push_str(&inner.to_string());

		source = inner.source();
	}

	reason
}

#[cfg(test)]
mod tests {
	// crates.io
	use serde_json::json;
	// self
	use super::*;

	#[test]
	fn joined_paths_keep_every_name_inside_one_segment() {
		let base = Url::parse(DEFAULT_API_BASE_URL).expect("Default API URL should parse.");

		assert_eq!(
			join_path(&base, "/datasets/ds-1/tables/Sales%5C2024%20Q%271/measures").as_str(),
			"https://api.powerbi.com/v1.0/myorg/datasets/ds-1/tables/Sales%5C2024%20Q'1/measures"
		);
		assert_eq!(
			join_path(&base, "/datasets/a\\b/refreshes?$top=5").as_str(),
			"https://api.powerbi.com/v1.0/myorg/datasets/a%5Cb/refreshes?$top=5"
		);
		assert_eq!(
			join_path(&base, "/datasets/Sales%2F2024/../tables").path(),
			"/v1.0/myorg/datasets/Sales%2F2024/tables"
		);

		let trailing = Url::parse("http://127.0.0.1:8080/api/").expect("Loopback URL should parse.");

		assert_eq!(join_path(&trailing, "groups").as_str(), "http://127.0.0.1:8080/api/groups");
	}

	#[test]
	fn success_bodies_are_normalized() {
		assert_eq!(parse_success_body(b""), json!({}));
		assert_eq!(parse_success_body(b" \n"), json!({}));
		assert_eq!(parse_success_body(b"{\"value\":[1]}"), json!({"value": [1]}));
		assert_eq!(parse_success_body(b"Accepted"), json!("Accepted"));
	}

	#[test]
	fn upstream_messages_prefer_powerbi_error_fields() {
		let body = br#"{"error":{"code":"ItemNotFound","message":"Dataset not found"}}"#;

		assert_eq!(upstream_message(StatusCode::NOT_FOUND, body), "Dataset not found");

		let body = br#"{"error":{"code":"PowerBIEntityNotFound"}}"#;

		assert_eq!(upstream_message(StatusCode::NOT_FOUND, body), "PowerBIEntityNotFound");
		assert_eq!(upstream_message(StatusCode::BAD_REQUEST, b"  plain text  "), "plain text");
		assert_eq!(upstream_message(StatusCode::FORBIDDEN, b""), "Forbidden");

		let long = "x".repeat(1_000);

		assert_eq!(
			upstream_message(StatusCode::BAD_REQUEST, long.as_bytes()).len(),
			MAX_MESSAGE_CHARS
		);
	}
}

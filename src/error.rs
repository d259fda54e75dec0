//! Gateway-level error types shared by the token manager, the request gateway, and the tools.
//!
//! Only [`ConfigError`] is meant to escape to the process entry point. Every other variant is
//! folded into an [`Envelope`](crate::envelope::Envelope) failure message at the gateway
//! boundary, which is why the `Display` strings below double as user-visible text.

// self
use crate::{_prelude::*, auth::IdentifierError, identity::IdentityEndpointError};

/// Gateway-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical gateway error.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem; fatal at startup.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Token acquisition failed.
	#[error("authentication failed: {0}")]
	Auth(#[from] AuthError),
	/// Upstream rejected the request with a non-retryable status.
	#[error("{status}: {message}")]
	UpstreamClient {
		/// HTTP status code returned by the API.
		status: u16,
		/// Upstream-supplied message or the canonical reason phrase.
		message: String,
	},
	/// Upstream kept answering with a retryable status until the policy gave up.
	#[error("upstream rate-limited/unavailable after {attempts} attempts: {status}")]
	UpstreamExhausted {
		/// Attempts performed, including the first one.
		attempts: u32,
		/// Status of the final response.
		status: u16,
	},
	/// Transport failure (DNS, TCP, TLS, timeout) that outlived the retry budget.
	#[error("network failure: {reason}")]
	Network {
		/// Attempts performed, including the first one.
		attempts: u32,
		/// Description of the last transport failure.
		reason: String,
	},
	/// Caller aborted the operation.
	#[error("cancelled")]
	Cancelled,
	/// Upstream answered successfully but the payload did not have the expected shape.
	#[error("unexpected upstream payload: {reason}")]
	Decode {
		/// What was missing or malformed.
		reason: String,
	},
}

/// Configuration and validation failures raised while assembling the gateway.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// A required environment variable is absent or empty.
	#[error("Required environment variable `{name}` is not set.")]
	MissingVariable {
		/// Variable name.
		name: &'static str,
	},
	/// An optional environment variable holds a value that cannot be parsed.
	#[error("Environment variable `{name}` is invalid: {reason}.")]
	InvalidVariable {
		/// Variable name.
		name: &'static str,
		/// Parser feedback.
		reason: String,
	},
	/// Tenant or client identifier failed validation.
	#[error(transparent)]
	InvalidIdentifier(#[from] IdentifierError),
	/// Token endpoint could not be derived from the authority and tenant.
	#[error(transparent)]
	InvalidEndpoint(#[from] IdentityEndpointError),
	/// A configured base URL cannot be parsed or used.
	#[error("URL `{url}` is invalid.")]
	InvalidUrl {
		/// Offending URL text.
		url: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Retry policy values are out of range.
	#[error("Retry policy is invalid: {reason}.")]
	InvalidRetryPolicy {
		/// What is wrong with the policy.
		reason: &'static str,
	},
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Coarse taxonomy of [`AuthError`] values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthErrorKind {
	/// Credentials were rejected or the identity endpoint answered with something unusable.
	/// Never retried.
	InvalidCredentials,
	/// Identity endpoint was temporarily unreachable or overloaded.
	TransientNetworkFailure,
}

/// Token acquisition failures.
///
/// Values are cheap to clone so one failed refresh can be handed to every caller that was
/// waiting on it.
#[derive(Clone, Debug, ThisError)]
pub enum AuthError {
	/// Identity provider rejected the client id/secret pair or the tenant.
	#[error("identity provider rejected the client credentials: {reason}")]
	InvalidCredentials {
		/// Provider-supplied reason string.
		reason: String,
	},
	/// Token endpoint answered 2xx but the token cannot be used.
	#[error("token endpoint returned an unusable token: {reason}")]
	InvalidTokenResponse {
		/// What was wrong with the response.
		reason: String,
	},
	/// The token request itself could not be built.
	#[error("token request could not be built: {reason}")]
	RequestBuild {
		/// Builder feedback.
		reason: String,
	},
	/// Provider returned an unexpected but non-fatal response.
	#[error("token endpoint returned an unexpected response: {message}")]
	TokenEndpoint {
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with JSON that could not be parsed.
	#[error("token endpoint returned malformed JSON: {source}")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: Arc<serde_path_to_error::Error<serde_json::Error>>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Transport failure while calling the token endpoint.
	#[error("network error while calling the token endpoint: {message}")]
	Network {
		/// Transport-specific description.
		message: String,
	},
	/// Transient failures persisted for the whole retry budget.
	#[error("identity endpoint still failing after {attempts} attempts: {last}")]
	Exhausted {
		/// Attempts performed, including the first one.
		attempts: u32,
		/// Failure observed on the final attempt.
		last: Box<AuthError>,
	},
}
impl AuthError {
	/// Returns the coarse taxonomy bucket for this failure.
	pub fn kind(&self) -> AuthErrorKind {
		match self {
			Self::InvalidCredentials { .. }
			| Self::InvalidTokenResponse { .. }
			| Self::RequestBuild { .. } => AuthErrorKind::InvalidCredentials,
			Self::TokenEndpoint { .. }
			| Self::TokenResponseParse { .. }
			| Self::Network { .. }
			| Self::Exhausted { .. } => AuthErrorKind::TransientNetworkFailure,
		}
	}

	/// Returns `true` when another attempt may succeed.
	///
	/// [`AuthError::Exhausted`] is final even though its kind is transient.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			Self::TokenEndpoint { .. } | Self::TokenResponseParse { .. } | Self::Network { .. }
		)
	}

	/// Upstream Retry-After hint, if the failure carried one.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::TokenEndpoint { retry_after, .. } => *retry_after,
			_ => None,
		}
	}

	/// HTTP status associated with the failure, if any.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::TokenEndpoint { status, .. } | Self::TokenResponseParse { status, .. } => *status,
			Self::Exhausted { last, .. } => last.status(),
			_ => None,
		}
	}
}

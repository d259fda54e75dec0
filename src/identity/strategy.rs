//! Identity strategy hooks that decorate token requests and classify failures.

// self
use crate::_prelude::*;

/// Strategy hook that lets deployments adjust token requests and error classification.
///
/// Hooks work on crate-owned data so implementations never depend on the HTTP client.
pub trait IdentityStrategy: Send + Sync {
	/// Decides whether a failed token request is fatal or transient.
	fn classify_token_error(&self, ctx: &TokenErrorContext) -> TokenErrorKind;

	/// Adds custom form parameters before dispatching a token request.
	///
	/// The default implementation does nothing.
	fn augment_token_request(&self, _form: &mut BTreeMap<String, String>) {}
}

/// Classification produced by an [`IdentityStrategy`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenErrorKind {
	/// Credentials, tenant, or request were rejected; retrying cannot help.
	InvalidCredentials,
	/// Failure is temporary and should be retried.
	Transient,
}

/// Primitive description of a failed token request.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenErrorContext {
	/// HTTP status code returned by the endpoint, when available.
	pub http_status: Option<u16>,
	/// OAuth `error` field.
	pub oauth_error: Option<String>,
	/// OAuth `error_description` field (Azure AD prefixes it with an `AADSTS` code).
	pub error_description: Option<String>,
	/// Indicates the failure happened below HTTP.
	pub network_error: bool,
}
impl TokenErrorContext {
	/// Convenience constructor for transport-level failures.
	pub fn network_failure() -> Self {
		Self { network_error: true, ..Default::default() }
	}

	/// Adds an HTTP status code.
	pub fn with_http_status(mut self, status: u16) -> Self {
		self.http_status = Some(status);

		self
	}

	/// Adds the OAuth error code.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth error description.
	pub fn with_error_description(mut self, description: impl Into<String>) -> Self {
		self.error_description = Some(description.into());

		self
	}
}

/// Azure AD heuristics.
///
/// OAuth fields win over `AADSTS` codes, which win over the HTTP status. Network failures
/// are always transient.
#[derive(Debug, Default)]
pub struct AzureAdStrategy;
impl Display for AzureAdStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("azure-ad-strategy")
	}
}
impl IdentityStrategy for AzureAdStrategy {
	fn classify_token_error(&self, ctx: &TokenErrorContext) -> TokenErrorKind {
		if ctx.network_error {
			return TokenErrorKind::Transient;
		}

		ctx.oauth_error
			.as_deref()
			.and_then(classify_oauth_error)
			.or_else(|| ctx.error_description.as_deref().and_then(classify_aadsts))
			.unwrap_or_else(|| classify_status(ctx.http_status))
	}
}

fn classify_oauth_error(value: &str) -> Option<TokenErrorKind> {
	const FATAL: &[&str] = &[
		"invalid_client",
		"unauthorized_client",
		"invalid_grant",
		"invalid_scope",
		"invalid_request",
		"unsupported_grant_type",
		"access_denied",
	];
	const TRANSIENT: &[&str] = &["temporarily_unavailable", "server_error"];

	if FATAL.iter().any(|code| value.eq_ignore_ascii_case(code)) {
		Some(TokenErrorKind::InvalidCredentials)
	} else if TRANSIENT.iter().any(|code| value.eq_ignore_ascii_case(code)) {
		Some(TokenErrorKind::Transient)
	} else {
		None
	}
}

// AADSTS codes that are known to be throttling or service-side hiccups.
fn classify_aadsts(description: &str) -> Option<TokenErrorKind> {
	let upper = description.to_ascii_uppercase();
	let start = upper.find("AADSTS")?;
	let code: String = upper[start + 6..].chars().take_while(char::is_ascii_digit).collect();

	match code.as_str() {
		"" => None,
		"50196" | "90033" | "50089" => Some(TokenErrorKind::Transient),
		_ => Some(TokenErrorKind::InvalidCredentials),
	}
}

fn classify_status(status: Option<u16>) -> TokenErrorKind {
	match status {
		Some(400 | 401 | 403 | 404) => TokenErrorKind::InvalidCredentials,
		_ => TokenErrorKind::Transient,
	}
}

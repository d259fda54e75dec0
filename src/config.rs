//! Process configuration assembled from the environment or in code.

// self
use crate::{
	_prelude::*,
	auth::Credentials,
	error::ConfigError,
	gateway::{DEFAULT_API_BASE_URL, RequestGateway},
	http::ReqwestHttpClient,
	identity::{DEFAULT_AUTHORITY, IdentityEndpoint},
	retry::RetryPolicy,
	token_manager::TokenManager,
};

/// Environment variable holding the directory (tenant) id.
pub const ENV_TENANT_ID: &str = "POWERBI_TENANT_ID";
/// Environment variable holding the application (client) id.
pub const ENV_CLIENT_ID: &str = "POWERBI_CLIENT_ID";
/// Environment variable holding the client secret.
pub const ENV_CLIENT_SECRET: &str = "POWERBI_CLIENT_SECRET";
/// Optional override of the PowerBI API root.
pub const ENV_API_BASE_URL: &str = "POWERBI_API_BASE_URL";
/// Optional override of the Azure AD authority host.
pub const ENV_AUTHORITY_HOST: &str = "POWERBI_AUTHORITY_HOST";
/// Optional override of the attempt budget.
pub const ENV_MAX_ATTEMPTS: &str = "POWERBI_MAX_ATTEMPTS";
/// Optional flag adding `403` to the retryable statuses.
pub const ENV_RETRY_FORBIDDEN: &str = "POWERBI_RETRY_FORBIDDEN";

/// Everything needed to build a [`RequestGateway`].
#[derive(Clone, Debug)]
pub struct GatewayConfig {
	/// Service principal credentials.
	pub credentials: Credentials,
	/// PowerBI API root.
	pub api_base_url: Url,
	/// Azure AD authority host.
	pub authority: Url,
	/// Retry policy shared by token requests and API calls.
	pub retry_policy: RetryPolicy,
	/// Distance from expiry at which cached tokens are replaced.
	pub refresh_margin: Duration,
	/// Upper bound for a single HTTP attempt.
	pub request_timeout: Duration,
}
impl GatewayConfig {
	/// Default per-attempt HTTP timeout.
	pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::seconds(30);

	/// Creates a configuration pointing at the public PowerBI cloud.
	pub fn new(credentials: Credentials) -> Result<Self, ConfigError> {
		Ok(Self {
			credentials,
			api_base_url: parse_url(DEFAULT_API_BASE_URL)?,
			authority: parse_url(DEFAULT_AUTHORITY)?,
			retry_policy: RetryPolicy::default(),
			refresh_margin: TokenManager::<ReqwestHttpClient>::DEFAULT_REFRESH_MARGIN,
			request_timeout: Self::DEFAULT_REQUEST_TIMEOUT,
		})
	}

	/// Loads `.env` (if present) and reads the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		dotenvy::dotenv().ok();

		Self::from_env_with(|name| std::env::var(name).ok())
	}

	/// Reads configuration through `lookup`, which maps a variable name to its value.
	pub fn from_env_with<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let read = |name: &str| lookup(name).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
		let required = |name: &'static str| read(name).ok_or(ConfigError::MissingVariable { name });
		let credentials = Credentials::parse(
			required(ENV_TENANT_ID)?,
			required(ENV_CLIENT_ID)?,
			required(ENV_CLIENT_SECRET)?,
		)?;
		let mut config = Self::new(credentials)?;

		if let Some(url) = read(ENV_API_BASE_URL) {
			config.api_base_url = parse_url(&url)?;
		}
		if let Some(url) = read(ENV_AUTHORITY_HOST) {
			config.authority = parse_url(&url)?;
		}
		if let Some(raw) = read(ENV_MAX_ATTEMPTS) {
			let max_attempts = raw.parse::<u32>().map_err(|e| ConfigError::InvalidVariable {
				name: ENV_MAX_ATTEMPTS,
				reason: e.to_string(),
			})?;

			config.retry_policy = config.retry_policy.with_max_attempts(max_attempts);
		}
		if let Some(raw) = read(ENV_RETRY_FORBIDDEN) {
			if parse_flag(ENV_RETRY_FORBIDDEN, &raw)? {
				config.retry_policy = config.retry_policy.with_retryable_status(403);
			}
		}

		config.retry_policy.validate()?;

		Ok(config)
	}

	/// Overrides the PowerBI API root.
	pub fn with_api_base_url(mut self, url: Url) -> Self {
		self.api_base_url = url;

		self
	}

	/// Overrides the Azure AD authority host.
	pub fn with_authority(mut self, url: Url) -> Self {
		self.authority = url;

		self
	}

	/// Overrides the retry policy.
	pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.retry_policy = policy;

		self
	}

	/// Overrides the refresh margin.
	pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
		self.refresh_margin = margin;

		self
	}

	/// Overrides the per-attempt timeout.
	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout = timeout;

		self
	}

	/// Builds the token manager and gateway over one shared reqwest client.
	pub fn build_gateway(&self) -> Result<RequestGateway, ConfigError> {
		self.build_gateway_with(ReqwestHttpClient::with_timeout(self.request_timeout)?)
	}

	/// Same as [`build_gateway`](Self::build_gateway) with a caller-supplied client.
	pub fn build_gateway_with(
		&self,
		http_client: ReqwestHttpClient,
	) -> Result<RequestGateway, ConfigError> {
		self.retry_policy.validate()?;

		let endpoint = IdentityEndpoint::for_tenant(&self.authority, &self.credentials.tenant_id)?;
		let tokens = TokenManager::new(self.credentials.clone(), endpoint, http_client.clone())
			.with_retry_policy(self.retry_policy.clone())
			.with_refresh_margin(self.refresh_margin);

		Ok(RequestGateway::new(Arc::new(tokens), http_client.0, self.api_base_url.clone())?
			.with_retry_policy(self.retry_policy.clone()))
	}
}

fn parse_url(raw: &str) -> Result<Url, ConfigError> {
	Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { url: raw.to_owned(), source })
}

fn parse_flag(name: &'static str, raw: &str) -> Result<bool, ConfigError> {
	match raw.to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		_ => Err(ConfigError::InvalidVariable { name, reason: format!("`{raw}` is not a boolean") }),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
		move |name| pairs.iter().find(|(key, _)| *key == name).map(|(_, value)| value.to_string())
	}

	const REQUIRED: &[(&str, &str)] = &[
		(ENV_TENANT_ID, "contoso.onmicrosoft.com"),
		(ENV_CLIENT_ID, "00000000-0000-0000-0000-000000000001"),
		(ENV_CLIENT_SECRET, "s3cr3t"),
	];

	#[test]
	fn defaults_apply_when_only_credentials_are_set() {
		let config = GatewayConfig::from_env_with(lookup(REQUIRED)).expect("Config should load.");

		assert_eq!(config.api_base_url.as_str(), DEFAULT_API_BASE_URL);
		assert_eq!(config.authority.as_str(), "https://login.microsoftonline.com/");
		assert_eq!(config.retry_policy, RetryPolicy::default());
		assert_eq!(config.refresh_margin, Duration::seconds(60));
		assert_eq!(config.credentials.client_secret.expose(), "s3cr3t");
	}

	#[test]
	fn missing_secret_is_a_startup_error() {
		let err = GatewayConfig::from_env_with(lookup(&[
			(ENV_TENANT_ID, "contoso"),
			(ENV_CLIENT_ID, "app"),
			(ENV_CLIENT_SECRET, "   "),
		]))
		.expect_err("Blank secret should be rejected.");

		assert!(matches!(err, ConfigError::MissingVariable { name: ENV_CLIENT_SECRET }));
	}

	#[test]
	fn optional_variables_override_defaults() {
		let config = GatewayConfig::from_env_with(lookup(&[
			(ENV_TENANT_ID, "contoso"),
			(ENV_CLIENT_ID, "app"),
			(ENV_CLIENT_SECRET, "s3cr3t"),
			(ENV_API_BASE_URL, "http://127.0.0.1:9000/v1.0/myorg"),
			(ENV_MAX_ATTEMPTS, "3"),
			(ENV_RETRY_FORBIDDEN, "true"),
		]))
		.expect("Config should load.");

		assert_eq!(config.api_base_url.port(), Some(9000));
		assert_eq!(config.retry_policy.max_attempts, 3);
		assert!(config.retry_policy.is_retryable_status(403));
	}

	#[test]
	fn invalid_values_are_rejected() {
		let with = |name: &'static str, value: &'static str| {
			let mut pairs = REQUIRED.to_vec();

			pairs.push((name, value));

			let pairs: &'static [(&str, &str)] = Box::leak(pairs.into_boxed_slice());

			GatewayConfig::from_env_with(lookup(pairs))
		};

		assert!(matches!(
			with(ENV_MAX_ATTEMPTS, "many"),
			Err(ConfigError::InvalidVariable { name: ENV_MAX_ATTEMPTS, .. })
		));
		assert!(matches!(with(ENV_MAX_ATTEMPTS, "0"), Err(ConfigError::InvalidRetryPolicy { .. })));
		assert!(matches!(
			with(ENV_RETRY_FORBIDDEN, "maybe"),
			Err(ConfigError::InvalidVariable { .. })
		));
		assert!(matches!(with(ENV_API_BASE_URL, "not a url"), Err(ConfigError::InvalidUrl { .. })));
	}

	#[test]
	fn gateway_is_built_for_the_configured_tenant() {
		let config = GatewayConfig::from_env_with(lookup(REQUIRED)).expect("Config should load.");
		let gateway = config.build_gateway().expect("Gateway should build.");

		assert_eq!(
			gateway.tokens.endpoint.token_url.as_str(),
			"https://login.microsoftonline.com/contoso.onmicrosoft.com/oauth2/v2.0/token"
		);
		assert_eq!(gateway.base_url().as_str(), DEFAULT_API_BASE_URL);
	}
}

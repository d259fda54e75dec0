//! Token endpoint descriptor for the Azure AD v2.0 client-credentials grant.

// self
use crate::{_prelude::*, auth::TenantId};

/// Default Azure AD authority host.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
/// Resource scope granting app-only access to the PowerBI REST API.
pub const POWERBI_SCOPE: &str = "https://analysis.windows.net/powerbi/api/.default";

/// How the client proves its identity to the token endpoint.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ClientAuthMethod {
	/// Form body parameters `client_id`/`client_secret`.
	#[default]
	ClientSecretPost,
	/// HTTP Basic with `client_id`/`client_secret`.
	ClientSecretBasic,
}

/// Errors raised while constructing an [`IdentityEndpoint`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum IdentityEndpointError {
	/// The authority is not a valid base URL.
	#[error("Authority `{authority}` is not a valid base URL.")]
	InvalidAuthority {
		/// Offending authority text.
		authority: String,
	},
	/// Endpoints must use HTTPS unless they point at the local machine.
	#[error("The token endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// The requested scope is empty or contains whitespace.
	#[error("Scope `{scope}` is invalid.")]
	InvalidScope {
		/// Offending scope.
		scope: String,
	},
}

/// Validated token endpoint for one tenant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityEndpoint {
	/// Fully resolved `.../{tenant}/oauth2/v2.0/token` URL.
	pub token_url: Url,
	/// Scope requested with every grant.
	pub scope: String,
	/// Client authentication mode.
	pub client_auth: ClientAuthMethod,
}
impl IdentityEndpoint {
	/// Resolves the v2.0 token endpoint of `tenant` under `authority`.
	pub fn for_tenant(authority: &Url, tenant: &TenantId) -> Result<Self, IdentityEndpointError> {
		if authority.cannot_be_a_base() {
			return Err(IdentityEndpointError::InvalidAuthority {
				authority: authority.to_string(),
			});
		}

		let mut token_url = authority.clone();
		let base_path = authority.path().trim_end_matches('/');

		token_url.set_path(&format!("{base_path}/{tenant}/oauth2/v2.0/token"));
		token_url.set_query(None);
		token_url.set_fragment(None);

		Self::from_token_url(token_url)
	}

	/// Uses an explicit token URL (sovereign clouds, proxies, tests).
	pub fn from_token_url(token_url: Url) -> Result<Self, IdentityEndpointError> {
		validate_endpoint(&token_url)?;

		Ok(Self {
			token_url,
			scope: POWERBI_SCOPE.into(),
			client_auth: ClientAuthMethod::default(),
		})
	}

	/// Overrides the requested scope.
	pub fn with_scope(mut self, scope: impl Into<String>) -> Result<Self, IdentityEndpointError> {
		let scope = scope.into();

		if scope.is_empty() || scope.chars().any(char::is_whitespace) {
			return Err(IdentityEndpointError::InvalidScope { scope });
		}

		self.scope = scope;

		Ok(self)
	}

	/// Overrides the client authentication mode.
	pub fn with_client_auth(mut self, method: ClientAuthMethod) -> Self {
		self.client_auth = method;

		self
	}
}

fn validate_endpoint(url: &Url) -> Result<(), IdentityEndpointError> {
	match url.scheme() {
		"https" => Ok(()),
		"http" if is_loopback(url) => Ok(()),
		_ => Err(IdentityEndpointError::InsecureEndpoint { url: url.to_string() }),
	}
}

fn is_loopback(url: &Url) -> bool {
	match url.host() {
		Some(url::Host::Domain(domain)) => domain.eq_ignore_ascii_case("localhost"),
		Some(url::Host::Ipv4(ip)) => ip.is_loopback(),
		Some(url::Host::Ipv6(ip)) => ip.is_loopback(),
		None => false,
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn url(value: &str) -> Url {
		Url::parse(value).expect("Failed to parse fixture URL.")
	}

	#[test]
	fn resolves_tenant_token_endpoint() {
		let tenant = TenantId::new("contoso.onmicrosoft.com").expect("Tenant fixture is valid.");
		let endpoint = IdentityEndpoint::for_tenant(&url(DEFAULT_AUTHORITY), &tenant)
			.expect("Default authority should resolve.");

		assert_eq!(
			endpoint.token_url.as_str(),
			"https://login.microsoftonline.com/contoso.onmicrosoft.com/oauth2/v2.0/token"
		);
		assert_eq!(endpoint.scope, POWERBI_SCOPE);
		assert_eq!(endpoint.client_auth, ClientAuthMethod::ClientSecretPost);
	}

	#[test]
	fn authority_path_prefix_is_preserved() {
		let tenant = TenantId::new("t1").expect("Tenant fixture is valid.");
		let endpoint =
			IdentityEndpoint::for_tenant(&url("http://127.0.0.1:8080/aad/?x=1"), &tenant)
				.expect("Loopback authority should resolve.");

		assert_eq!(endpoint.token_url.as_str(), "http://127.0.0.1:8080/aad/t1/oauth2/v2.0/token");
	}

	#[test]
	fn rejects_plain_http_outside_loopback() {
		let tenant = TenantId::new("t1").expect("Tenant fixture is valid.");
		let err = IdentityEndpoint::for_tenant(&url("http://login.example.com"), &tenant)
			.expect_err("Remote plain HTTP must be rejected.");

		assert!(matches!(err, IdentityEndpointError::InsecureEndpoint { .. }));
		assert!(IdentityEndpoint::from_token_url(url("http://localhost:1/token")).is_ok());
	}

	#[test]
	fn scope_override_is_validated() {
		let endpoint = IdentityEndpoint::from_token_url(url("https://example.com/token"))
			.expect("HTTPS endpoint is valid.");

		assert!(endpoint.clone().with_scope("api://custom/.default").is_ok());
		assert!(endpoint.clone().with_scope("two scopes").is_err());
		assert!(endpoint.with_scope("").is_err());
	}
}

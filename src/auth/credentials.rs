//! Immutable client-credentials triple supplied once at startup.

// self
use crate::{
	_prelude::*,
	auth::{ClientId, ClientSecret, TenantId},
	error::ConfigError,
};

/// Service principal credentials used for the client-credentials grant.
///
/// The secret never appears in `Debug` output and the type cannot be serialized.
#[derive(Clone)]
pub struct Credentials {
	/// Directory the application is registered in.
	pub tenant_id: TenantId,
	/// Application (client) identifier.
	pub client_id: ClientId,
	/// Client secret presented in the token request body.
	pub client_secret: ClientSecret,
}
impl Credentials {
	/// Bundles already validated parts.
	pub fn new(tenant_id: TenantId, client_id: ClientId, client_secret: ClientSecret) -> Self {
		Self { tenant_id, client_id, client_secret }
	}

	/// Validates raw strings, typically read from the environment.
	pub fn parse(
		tenant_id: impl AsRef<str>,
		client_id: impl AsRef<str>,
		client_secret: impl Into<String>,
	) -> Result<Self, ConfigError> {
		let client_secret = client_secret.into();

		if client_secret.is_empty() {
			return Err(ConfigError::MissingVariable { name: "POWERBI_CLIENT_SECRET" });
		}

		Ok(Self::new(
			TenantId::new(tenant_id)?,
			ClientId::new(client_id)?,
			ClientSecret::new(client_secret),
		))
	}
}
impl Debug for Credentials {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Credentials")
			.field("tenant_id", &self.tenant_id)
			.field("client_id", &self.client_id)
			.field("client_secret", &"<redacted>")
			.finish()
	}
}

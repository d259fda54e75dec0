//! Runs the full pipeline against a local mock of Azure AD and the PowerBI API: configuration
//! from environment-style lookups, one token request, and two tool calls printed as envelope
//! JSON.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
// self
use powerbi_gateway::{config::GatewayConfig, powerbi::PowerBiTools};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/demo-tenant/oauth2/v2.0/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"demo-access\",\"token_type\":\"bearer\",\"expires_in\":3600}",
			);
		})
		.await;

	server
		.mock_async(|when, then| {
			when.method(GET).path("/v1.0/myorg/groups").header("authorization", "Bearer demo-access");
			then.status(200).header("content-type", "application/json").body(
				"{\"value\":[{\"id\":\"f089354e\",\"name\":\"Finance\"},{\"id\":\"3d9b93c6\",\"name\":\"Marketing\"}]}",
			);
		})
		.await;
	server
		.mock_async(|when, then| {
			when.method(GET).path("/v1.0/myorg/datasets/missing");
			then.status(404).header("content-type", "application/json").body(
				"{\"error\":{\"code\":\"ItemNotFound\",\"message\":\"Dataset missing is not available\"}}",
			);
		})
		.await;

	let authority = server.url("");
	let api_base_url = server.url("/v1.0/myorg");
	let config = GatewayConfig::from_env_with(|name| match name {
		"POWERBI_TENANT_ID" => Some("demo-tenant".into()),
		"POWERBI_CLIENT_ID" => Some("demo-client".into()),
		"POWERBI_CLIENT_SECRET" => Some("super-secret".into()),
		"POWERBI_AUTHORITY_HOST" => Some(authority.clone()),
		"POWERBI_API_BASE_URL" => Some(api_base_url.clone()),
		_ => None,
	})?;
	let tools = PowerBiTools::new(Arc::new(config.build_gateway()?));
	let workspaces = tools.get_workspaces().await;
	let missing = tools.get_dataset("missing", None).await;

	println!("{}", serde_json::to_string_pretty(&workspaces)?);
	println!("{}", serde_json::to_string_pretty(&missing)?);

	token_mock.assert_async().await;

	Ok(())
}

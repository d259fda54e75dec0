//! Authenticated PowerBI REST gateway: client-credentials token brokering with singleflight
//! refresh, rate-limit aware retries, and one uniform result envelope for every tool call.
//!
//! The pipeline is [`TokenManager`](token_manager::TokenManager) →
//! [`RequestGateway`](gateway::RequestGateway) → [`Envelope`](envelope::Envelope);
//! [`PowerBiTools`](powerbi::PowerBiTools) are thin call-sites on top of it.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod envelope;
pub mod error;
pub mod gateway;
pub mod http;
pub mod identity;
pub mod oauth;
pub mod obs;
pub mod powerbi;
pub mod retry;
pub mod token_manager;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		auth::Credentials,
		gateway::RequestGateway,
		http::ReqwestHttpClient,
		identity::IdentityEndpoint,
		retry::RetryPolicy,
		token_manager::ReqwestTokenManager,
	};

	/// Client id used by the test fixtures.
	pub const TEST_CLIENT_ID: &str = "00000000-0000-0000-0000-00000000c1d0";
	/// Client secret used by the test fixtures.
	pub const TEST_CLIENT_SECRET: &str = "fixture-secret";
	/// Tenant used by the test fixtures.
	pub const TEST_TENANT_ID: &str = "contoso.onmicrosoft.com";

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Fixture credentials.
	pub fn test_credentials() -> Credentials {
		Credentials::parse(TEST_TENANT_ID, TEST_CLIENT_ID, TEST_CLIENT_SECRET)
			.expect("Fixture credentials should be valid.")
	}

	/// Retry policy with millisecond delays so tests exercise backoff without slowing down.
	pub fn fast_retry_policy(max_attempts: u32) -> RetryPolicy {
		RetryPolicy::default()
			.with_max_attempts(max_attempts)
			.with_base_delay(Duration::milliseconds(10))
			.with_max_delay(Duration::milliseconds(80))
	}

	/// Token manager pointed at a mock token endpoint.
	pub fn build_test_token_manager(token_url: &str, max_attempts: u32) -> ReqwestTokenManager {
		let endpoint = IdentityEndpoint::from_token_url(
			Url::parse(token_url).expect("Mock token URL should parse."),
		)
		.expect("Mock token endpoint should be accepted.");

		ReqwestTokenManager::new(test_credentials(), endpoint, test_reqwest_http_client())
			.with_retry_policy(fast_retry_policy(max_attempts))
	}

	/// Gateway pointed at mock token and API endpoints, sharing one manager.
	pub fn build_test_gateway(
		token_url: &str,
		api_base_url: &str,
		max_attempts: u32,
	) -> Arc<RequestGateway> {
		let tokens = Arc::new(build_test_token_manager(token_url, max_attempts));
		let base_url = Url::parse(api_base_url).expect("Mock API URL should parse.");
		let gateway = RequestGateway::new(tokens, test_reqwest_http_client().0, base_url)
			.expect("Mock API URL should be a valid base.")
			.with_retry_policy(fast_retry_policy(max_attempts));

		Arc::new(gateway)
	}
}

mod _prelude {
	pub use std::{
		collections::BTreeMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::Duration as StdDuration,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::Mutex;
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use serde_json;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};

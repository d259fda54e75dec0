//! Client-credentials exchange on top of the `oauth2` crate.
//!
//! The facade converts every `oauth2` failure into an [`AuthError`], asking the configured
//! [`IdentityStrategy`] whether the identity provider rejected the credentials or merely
//! failed for now.

pub use oauth2;

// crates.io
use oauth2::{
	AuthType, ClientId as OAuthClientId, ClientSecret as OAuthClientSecret, EndpointNotSet,
	EndpointSet, HttpClientError, RequestTokenError, Scope, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError, BasicTokenResponse},
};
// self
use crate::{
	_prelude::*,
	auth::{AccessToken, Credentials},
	error::AuthError,
	http::{ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	identity::{ClientAuthMethod, IdentityEndpoint, IdentityStrategy, TokenErrorContext, TokenErrorKind},
};

type ConfiguredBasicClient =
	BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;
type FacadeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AuthError>> + 'a + Send>>;

/// Lifetime assumed when the identity endpoint omits `expires_in`.
pub const DEFAULT_EXPIRES_IN: Duration = Duration::seconds(3600);

/// Maps HTTP transport failures into [`AuthError`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport.
	fn map_transport_error(
		&self,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> AuthError;
}

/// Default mapper for reqwest-backed transports.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> AuthError {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(meta, *inner),
			HttpClientError::Http(inner) => AuthError::RequestBuild { reason: inner.to_string() },
			HttpClientError::Io(inner) => AuthError::Network { message: inner.to_string() },
			HttpClientError::Other(message) => AuthError::TokenEndpoint {
				message: format!("HTTP client error: {message}"),
				status: meta_status(meta),
				retry_after: meta_retry_after(meta),
			},
			_ => AuthError::TokenEndpoint {
				message: "HTTP client error".into(),
				status: meta_status(meta),
				retry_after: meta_retry_after(meta),
			},
		}
	}
}

/// One-shot client-credentials exchange against a single token endpoint.
pub(crate) struct ClientCredentialsFacade<C = ReqwestHttpClient, M = ReqwestTransportErrorMapper>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth_client: ConfiguredBasicClient,
	scope: String,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> ClientCredentialsFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	pub(crate) fn new(
		endpoint: &IdentityEndpoint,
		credentials: &Credentials,
		http_client: Arc<C>,
		error_mapper: Arc<M>,
	) -> Self {
		let mut oauth_client =
			BasicClient::new(OAuthClientId::new(credentials.client_id.to_string()))
				.set_client_secret(OAuthClientSecret::new(
					credentials.client_secret.expose().to_owned(),
				))
				.set_token_uri(TokenUrl::from_url(endpoint.token_url.clone()));

		if matches!(endpoint.client_auth, ClientAuthMethod::ClientSecretPost) {
			oauth_client = oauth_client.set_auth_type(AuthType::RequestBody);
		}

		Self { oauth_client, scope: endpoint.scope.clone(), http_client, error_mapper }
	}

	/// Performs one token request; retries are the caller's business.
	pub(crate) fn exchange<'a, 'strategy, 'params>(
		&'a self,
		strategy: &'strategy dyn IdentityStrategy,
		extra_params: &'params [(String, String)],
	) -> FacadeFuture<'a, AccessToken>
	where
		'strategy: 'a,
		'params: 'a,
	{
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let instrumented = self.http_client.with_metadata(meta.clone());
			let mut request = self
				.oauth_client
				.exchange_client_credentials()
				.add_scope(Scope::new(self.scope.clone()));

			for (key, value) in extra_params {
				request = request.add_extra_param(key, value);
			}

			let response = request.request_async(&instrumented).await.map_err(|err| {
				map_request_error(strategy, meta.take(), err, self.error_mapper.as_ref())
			})?;

			map_token_response(response)
		})
	}
}

fn map_token_response(response: BasicTokenResponse) -> Result<AccessToken, AuthError> {
	let expires_in = match response.expires_in() {
		Some(value) => Duration::seconds(i64::try_from(value.as_secs()).map_err(|_| {
			AuthError::InvalidTokenResponse { reason: "expires_in is out of range".into() }
		})?),
		None => DEFAULT_EXPIRES_IN,
	};

	if !expires_in.is_positive() {
		return Err(AuthError::InvalidTokenResponse {
			reason: "expires_in must be positive".into(),
		});
	}

	AccessToken::builder()
		.value(response.access_token().secret().to_owned())
		.issued_at(OffsetDateTime::now_utc())
		.expires_in(expires_in)
		.build()
		.map_err(|err| AuthError::InvalidTokenResponse { reason: err.to_string() })
}

fn map_request_error<E, M>(
	strategy: &dyn IdentityStrategy,
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<E>>,
	mapper: &M,
) -> AuthError
where
	E: 'static + Send + Sync + StdError,
	M: ?Sized + TransportErrorMapper<E>,
{
	let meta_ref = meta.as_ref();

	match err {
		RequestTokenError::ServerResponse(response) =>
			map_server_response_error(strategy, response, meta_ref),
		RequestTokenError::Request(error) => mapper.map_transport_error(meta_ref, error),
		RequestTokenError::Parse(error, _body) => {
			let status = meta_status(meta_ref);
			let ctx = status
				.map(|code| TokenErrorContext::default().with_http_status(code))
				.unwrap_or_default();

			match (status, strategy.classify_token_error(&ctx)) {
				(Some(code), TokenErrorKind::InvalidCredentials) => AuthError::InvalidCredentials {
					reason: format!("HTTP {code} with an unparseable body"),
				},
				_ => AuthError::TokenResponseParse { source: Arc::new(error), status },
			}
		},
		RequestTokenError::Other(message) => AuthError::TokenEndpoint {
			message,
			status: meta_status(meta_ref),
			retry_after: meta_retry_after(meta_ref),
		},
	}
}

fn map_server_response_error(
	strategy: &dyn IdentityStrategy,
	response: BasicErrorResponse,
	meta: Option<&ResponseMetadata>,
) -> AuthError {
	let mut ctx =
		TokenErrorContext::default().with_oauth_error(response.error().as_ref().to_string());

	if let Some(description) = response.error_description() {
		ctx = ctx.with_error_description(description.clone());
	}
	if let Some(status) = meta_status(meta) {
		ctx = ctx.with_http_status(status);
	}

	let message = match response.error_description() {
		Some(description) => format!("{}: {description}", response.error().as_ref()),
		None => response.error().as_ref().to_string(),
	};

	match strategy.classify_token_error(&ctx) {
		TokenErrorKind::InvalidCredentials => AuthError::InvalidCredentials { reason: message },
		TokenErrorKind::Transient => AuthError::TokenEndpoint {
			message,
			status: meta_status(meta),
			retry_after: meta_retry_after(meta),
		},
	}
}

fn map_reqwest_error(meta: Option<&ResponseMetadata>, err: ReqwestError) -> AuthError {
	if err.is_builder() {
		return AuthError::RequestBuild { reason: err.to_string() };
	}
	if err.is_timeout() {
		return AuthError::TokenEndpoint {
			message: "request timed out".into(),
			status: meta_status(meta).or_else(|| err.status().map(|code| code.as_u16())),
			retry_after: meta_retry_after(meta),
		};
	}

	AuthError::Network { message: err.to_string() }
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::identity::AzureAdStrategy;

	#[test]
	fn server_errors_follow_strategy_classification() {
		let meta = ResponseMetadata { status: Some(401), retry_after: None };
		let response: BasicErrorResponse = serde_json::from_str(
			"{\"error\":\"invalid_client\",\"error_description\":\"AADSTS7000215: Invalid client secret.\"}",
		)
		.expect("Error response fixture should parse.");
		let err = map_server_response_error(&AzureAdStrategy, response, Some(&meta));

		assert!(matches!(err, AuthError::InvalidCredentials { ref reason } if reason.contains("AADSTS7000215")));

		let meta = ResponseMetadata { status: Some(503), retry_after: Some(Duration::seconds(3)) };
		let response: BasicErrorResponse =
			serde_json::from_str("{\"error\":\"temporarily_unavailable\"}")
				.expect("Error response fixture should parse.");
		let err = map_server_response_error(&AzureAdStrategy, response, Some(&meta));

		assert!(err.is_retryable());
		assert_eq!(err.retry_after(), Some(Duration::seconds(3)));
		assert_eq!(err.status(), Some(503));
	}

	#[test]
	fn token_response_defaults_missing_lifetime() {
		let response: BasicTokenResponse =
			serde_json::from_str("{\"access_token\":\"abc\",\"token_type\":\"Bearer\"}")
				.expect("Token response fixture should parse.");
		let token = map_token_response(response).expect("Token should map successfully.");

		assert_eq!(token.secret.expose(), "abc");
		assert_eq!(token.expires_at - token.issued_at, DEFAULT_EXPIRES_IN);
	}

	#[test]
	fn token_response_rejects_zero_lifetime() {
		let response: BasicTokenResponse = serde_json::from_str(
			"{\"access_token\":\"abc\",\"token_type\":\"Bearer\",\"expires_in\":0}",
		)
		.expect("Token response fixture should parse.");

		assert!(matches!(
			map_token_response(response),
			Err(AuthError::InvalidTokenResponse { .. })
		));
	}
}

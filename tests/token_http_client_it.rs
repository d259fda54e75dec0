// self
use powerbi_gateway::{
	_preludet::*,
	error::AuthError,
	http::{ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	identity::{AzureAdStrategy, IdentityEndpoint, IdentityStrategy, TokenErrorContext, TokenErrorKind},
	oauth::{
		TransportErrorMapper,
		oauth2::{
			AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse,
			http::{HeaderValue, StatusCode, header::CONTENT_TYPE},
		},
	},
	token_manager::TokenManager,
};

#[derive(Debug)]
enum FakeTransportError {
	Throttled,
}
impl Display for FakeTransportError {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::Throttled => write!(f, "Transport throttled."),
		}
	}
}
impl StdError for FakeTransportError {}

#[derive(Clone, Copy, Debug)]
enum Behavior {
	Throttle { retry_after: Duration },
	Issue,
}

#[derive(Clone)]
struct FakeHttpClient {
	behavior: Behavior,
	bodies: Arc<Mutex<Vec<String>>>,
}
impl FakeHttpClient {
	fn new(behavior: Behavior) -> Self {
		Self { behavior, bodies: Default::default() }
	}

	fn recorded_bodies(&self) -> Vec<String> {
		self.bodies.lock().clone()
	}
}
impl TokenHttpClient for FakeHttpClient {
	type Handle = FakeHttpHandle;
	type TransportError = FakeTransportError;

	fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
		FakeHttpHandle { slot, behavior: self.behavior, bodies: self.bodies.clone() }
	}
}

struct FakeHttpHandle {
	slot: ResponseMetadataSlot,
	behavior: Behavior,
	bodies: Arc<Mutex<Vec<String>>>,
}
impl<'a> AsyncHttpClient<'a> for FakeHttpHandle {
	type Error = HttpClientError<FakeTransportError>;
	type Future =
		Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'a + Send + Sync>>;

	fn call(&'a self, request: HttpRequest) -> Self::Future {
		let slot = self.slot.clone();
		let behavior = self.behavior;

		self.bodies.lock().push(String::from_utf8_lossy(request.body()).into_owned());

		Box::pin(async move {
			assert!(
				slot.take().is_none(),
				"ResponseMetadataSlot must be clear before dispatching a request."
			);

			match behavior {
				Behavior::Throttle { retry_after } => {
					slot.store(ResponseMetadata {
						status: Some(429),
						retry_after: Some(retry_after),
					});

					Err(HttpClientError::Reqwest(Box::new(FakeTransportError::Throttled)))
				},
				Behavior::Issue => {
					slot.store(ResponseMetadata { status: Some(200), retry_after: None });

					let mut response = HttpResponse::new(
						b"{\"access_token\":\"fake-token\",\"token_type\":\"bearer\",\"expires_in\":600}"
							.to_vec(),
					);

					*response.status_mut() = StatusCode::OK;
					response
						.headers_mut()
						.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

					Ok(response)
				},
			}
		})
	}
}

#[derive(Clone, Default)]
struct RecordingTransportErrorMapper {
	metadata: Arc<Mutex<Vec<Option<ResponseMetadata>>>>,
}
impl RecordingTransportErrorMapper {
	fn recorded_metadata(&self) -> Vec<Option<ResponseMetadata>> {
		self.metadata.lock().clone()
	}
}
impl TransportErrorMapper<FakeTransportError> for RecordingTransportErrorMapper {
	fn map_transport_error(
		&self,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<FakeTransportError>,
	) -> AuthError {
		self.metadata.lock().push(meta.cloned());

		AuthError::TokenEndpoint {
			message: format!("Fake transport error: {err}"),
			status: meta.and_then(|value| value.status),
			retry_after: meta.and_then(|value| value.retry_after),
		}
	}
}

struct ResourceStrategy;
impl IdentityStrategy for ResourceStrategy {
	fn classify_token_error(&self, ctx: &TokenErrorContext) -> TokenErrorKind {
		AzureAdStrategy.classify_token_error(ctx)
	}

	fn augment_token_request(&self, form: &mut BTreeMap<String, String>) {
		form.insert("resource".into(), "https://analysis.windows.net/powerbi/api".into());
		form.insert("client_secret".into(), "hijacked".into());
	}
}

fn endpoint() -> IdentityEndpoint {
	IdentityEndpoint::for_tenant(
		&Url::parse("https://login.microsoftonline.com").expect("Authority should parse."),
		&test_credentials().tenant_id,
	)
	.expect("Token endpoint should resolve.")
}

#[tokio::test]
async fn throttled_transport_exhausts_retries_with_metadata() {
	let http_client = FakeHttpClient::new(Behavior::Throttle { retry_after: Duration::milliseconds(20) });
	let mapper = RecordingTransportErrorMapper::default();
	let manager: TokenManager<FakeHttpClient, RecordingTransportErrorMapper> =
		TokenManager::with_http_client(test_credentials(), endpoint(), http_client, mapper.clone())
			.with_retry_policy(fast_retry_policy(3));
	let err = manager.get_token().await.expect_err("Throttled transport should fail.");

	match err {
		AuthError::Exhausted { attempts, last } => {
			assert_eq!(attempts, 3);
			assert_eq!(last.status(), Some(429));
			assert_eq!(last.retry_after(), Some(Duration::milliseconds(20)));
		},
		other => panic!("Unexpected error variant: {other:?}."),
	}

	let observed = mapper.recorded_metadata();

	assert_eq!(observed.len(), 3, "Mapper must see every attempt.");
	assert!(observed.iter().all(|meta| meta.as_ref().and_then(|meta| meta.status) == Some(429)));
	assert_eq!(manager.metrics.requests(), 3);
	assert_eq!(manager.metrics.successes(), 0);
}

#[tokio::test]
async fn strategy_parameters_extend_but_never_override_the_grant() {
	let http_client = FakeHttpClient::new(Behavior::Issue);
	let manager: TokenManager<FakeHttpClient, RecordingTransportErrorMapper> =
		TokenManager::with_http_client(
			test_credentials(),
			endpoint(),
			http_client.clone(),
			RecordingTransportErrorMapper::default(),
		)
		.with_strategy(Arc::new(ResourceStrategy));
	let token = manager.get_token().await.expect("Fake transport should issue a token.");

	assert_eq!(token.secret.expose(), "fake-token");

	let bodies = http_client.recorded_bodies();

	assert_eq!(bodies.len(), 1);

	let body = &bodies[0];

	assert!(body.contains("grant_type=client_credentials"));
	assert!(body.contains("resource=https%3A%2F%2Fanalysis.windows.net%2Fpowerbi%2Fapi"));
	assert!(body.contains("client_secret=fixture-secret"));
	assert!(!body.contains("hijacked"));
}

//! Client-credentials token cache with singleflight refresh.
//!
//! [`TokenManager::get_token`] hands out the cached bearer token while it is outside the
//! refresh margin. Otherwise one caller performs the token request (retrying transient
//! failures per [`RetryPolicy`]) while concurrent callers queue on the same guard and pick up
//! whatever that request produced, token or error. The guard is an RAII lock, so a cancelled
//! caller releases it and the next waiter takes over.

mod metrics;

pub use metrics::TokenMetrics;

// self
use crate::{
	_prelude::*,
	auth::{AccessToken, Credentials},
	error::AuthError,
	http::{self, ReqwestHttpClient, TokenHttpClient},
	identity::{AzureAdStrategy, IdentityEndpoint, IdentityStrategy},
	oauth::{ClientCredentialsFacade, ReqwestTransportErrorMapper, TransportErrorMapper},
	obs::{self, OpOutcome, OpSpan, Operation},
	retry::{RetryMachine, RetryPolicy, RetryState},
};

/// Token manager specialized for the crate's default reqwest transport stack.
pub type ReqwestTokenManager = TokenManager<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Form keys owned by the grant itself; strategies cannot override them.
const RESERVED_FORM_KEYS: &[&str] = &["grant_type", "scope", "client_id", "client_secret"];

#[derive(Default)]
struct TokenCell {
	token: Option<AccessToken>,
	// Bumped after every completed token request.
	generation: u64,
	last_failure: Option<AuthError>,
}
impl TokenCell {
	fn usable(
		&self,
		now: OffsetDateTime,
		margin: Duration,
		stale: Option<&AccessToken>,
	) -> Option<AccessToken> {
		self.token
			.as_ref()
			.filter(|token| token.is_fresh_at(now, effective_margin(token, margin)))
			.filter(|token| stale.is_none_or(|stale| !token.same_value(stale)))
			.cloned()
	}
}

// Short-lived tokens get at most half their lifetime as margin, so a fresh one is always usable.
fn effective_margin(token: &AccessToken, margin: Duration) -> Duration {
	margin.min((token.expires_at - token.issued_at) / 2)
}

/// Acquires, caches, and refreshes the bearer token for one service principal.
pub struct TokenManager<C = ReqwestHttpClient, M = ReqwestTransportErrorMapper>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// HTTP client used for identity endpoint requests.
	pub http_client: Arc<C>,
	/// Mapper applied to transport-layer errors.
	pub transport_mapper: Arc<M>,
	/// Token endpoint and requested scope.
	pub endpoint: IdentityEndpoint,
	/// Error classification hook.
	pub strategy: Arc<dyn IdentityStrategy>,
	/// Retry policy for transient identity endpoint failures.
	pub retry_policy: RetryPolicy,
	/// Tokens closer than this to expiry are replaced before use.
	///
	/// Capped at half of each token's lifetime.
	pub refresh_margin: Duration,
	/// Identity endpoint request counters.
	pub metrics: Arc<TokenMetrics>,
	credentials: Credentials,
	cell: Mutex<TokenCell>,
	refresh_guard: AsyncMutex<()>,
}
impl<C, M> TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Default distance from expiry at which a cached token is replaced.
	pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::seconds(60);

	/// Creates a manager that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		credentials: Credentials,
		endpoint: IdentityEndpoint,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			endpoint,
			strategy: Arc::new(AzureAdStrategy),
			retry_policy: RetryPolicy::default(),
			refresh_margin: Self::DEFAULT_REFRESH_MARGIN,
			metrics: Default::default(),
			credentials,
			cell: Default::default(),
			refresh_guard: AsyncMutex::new(()),
		}
	}

	/// Replaces the error classification strategy.
	pub fn with_strategy(mut self, strategy: Arc<dyn IdentityStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	/// Replaces the retry policy used for identity endpoint requests.
	pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
		self.retry_policy = policy;

		self
	}

	/// Overrides the refresh margin; negative values are treated as zero.
	pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
		self.refresh_margin = if margin.is_negative() { Duration::ZERO } else { margin };

		self
	}

	/// Client identifier this manager authenticates as.
	pub fn credentials(&self) -> &Credentials {
		&self.credentials
	}

	/// Returns the cached token without contacting the identity endpoint.
	pub fn cached(&self) -> Option<AccessToken> {
		self.cell.lock().token.clone()
	}

	/// Returns a token that stays valid beyond the refresh margin.
	pub async fn get_token(&self) -> Result<AccessToken, AuthError> {
		self.obtain(None, Operation::TokenAcquire).await
	}

	/// Replaces `stale` after the API rejected it.
	///
	/// If another caller already swapped `stale` for a fresh token, that token is returned
	/// without a new request.
	pub async fn force_refresh(&self, stale: &AccessToken) -> Result<AccessToken, AuthError> {
		self.obtain(Some(stale), Operation::TokenRefresh).await
	}

	async fn obtain(
		&self,
		stale: Option<&AccessToken>,
		op: Operation,
	) -> Result<AccessToken, AuthError> {
		let observed = {
			let cell = self.cell.lock();

			if let Some(token) =
				cell.usable(OffsetDateTime::now_utc(), self.refresh_margin, stale)
			{
				return Ok(token);
			}

			cell.generation
		};
		let _singleflight = self.refresh_guard.lock().await;

		{
			let cell = self.cell.lock();

			if let Some(token) =
				cell.usable(OffsetDateTime::now_utc(), self.refresh_margin, stale)
			{
				if cell.generation != observed {
					self.metrics.record_coalesced();
				}

				return Ok(token);
			}
			// A request completed while this caller was queued; share its failure.
			if cell.generation != observed {
				if let Some(failure) = &cell.last_failure {
					self.metrics.record_coalesced();

					return Err(failure.clone());
				}
			}
		}

		let span = OpSpan::new(op, "request_token");

		obs::record_op_outcome(op, OpOutcome::Attempt);

		let result = span.instrument(self.request_with_retry(op)).await;
		let mut cell = self.cell.lock();

		cell.generation = cell.generation.wrapping_add(1);

		match &result {
			Ok(token) => {
				cell.token = Some(token.clone());
				cell.last_failure = None;

				obs::record_op_outcome(op, OpOutcome::Success);
			},
			Err(err) => {
				cell.last_failure = Some(err.clone());

				obs::record_op_outcome(op, OpOutcome::Failure);
			},
		}

		result
	}

	async fn request_with_retry(&self, op: Operation) -> Result<AccessToken, AuthError> {
		let facade = <ClientCredentialsFacade<C, M>>::new(
			&self.endpoint,
			&self.credentials,
			self.http_client.clone(),
			self.transport_mapper.clone(),
		);
		let extra_params = self.extra_params();
		let mut machine = RetryMachine::new(&self.retry_policy);

		loop {
			obs::attempt_started(op, machine.attempt());
			self.metrics.record_request();

			let err = match facade.exchange(self.strategy.as_ref(), &extra_params).await {
				Ok(token) => {
					machine.succeed();
					self.metrics.record_success();

					return Ok(token);
				},
				Err(err) => err,
			};

			self.metrics.record_failure();

			if !err.is_retryable() {
				machine.give_up();
				obs::gave_up(op, machine.attempt(), &err);

				return Err(err);
			}

			match machine.fail(err.retry_after()) {
				RetryState::Waiting { attempt, delay } => {
					obs::retry_scheduled(op, attempt, delay, &err);
					obs::record_backoff(op, delay);
					tokio::time::sleep(http::to_std(delay)).await;
					machine.resume();
				},
				_ => {
					let attempts = machine.attempt();

					obs::gave_up(op, attempts, &err);

					return Err(AuthError::Exhausted { attempts, last: Box::new(err) });
				},
			}
		}
	}

	fn extra_params(&self) -> Vec<(String, String)> {
		let mut form = BTreeMap::new();

		self.strategy.augment_token_request(&mut form);

		form.into_iter().filter(|(key, _)| !RESERVED_FORM_KEYS.contains(&key.as_str())).collect()
	}
}
impl TokenManager<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a manager backed by the given reqwest client.
	pub fn new(
		credentials: Credentials,
		endpoint: IdentityEndpoint,
		http_client: ReqwestHttpClient,
	) -> Self {
		Self::with_http_client(
			credentials,
			endpoint,
			http_client,
			Arc::new(ReqwestTransportErrorMapper),
		)
	}
}
impl<C, M> Debug for TokenManager<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenManager")
			.field("endpoint", &self.endpoint)
			.field("credentials", &self.credentials)
			.field("refresh_margin", &self.refresh_margin)
			.field("token_cached", &self.cell.lock().token.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn token(value: &str, expires_at: OffsetDateTime) -> AccessToken {
		AccessToken::builder()
			.value(value)
			.issued_at(expires_at - Duration::hours(1))
			.expires_at(expires_at)
			.build()
			.expect("Token fixture should build.")
	}

	#[test]
	fn cell_skips_expiring_and_stale_tokens() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let margin = Duration::seconds(60);
		let mut cell = TokenCell::default();

		assert!(cell.usable(now, margin, None).is_none());

		cell.token = Some(token("a", now + Duration::minutes(30)));

		let current = cell.usable(now, margin, None).expect("Fresh token should be usable.");

		assert_eq!(current.secret.expose(), "a");
		assert!(cell.usable(now, margin, Some(&current)).is_none());
		assert!(cell.usable(now, margin, Some(&token("b", now))).is_some());

		cell.token = Some(token("c", now + Duration::seconds(30)));

		assert!(cell.usable(now, margin, None).is_none());
	}

	#[test]
	fn short_lived_tokens_shrink_the_margin_to_half_their_lifetime() {
		let now = macros::datetime!(2025-01-01 00:00 UTC);
		let margin = Duration::seconds(60);
		let short = AccessToken::builder()
			.value("short")
			.issued_at(now)
			.expires_in(Duration::seconds(30))
			.build()
			.expect("Token fixture should build.");

		assert_eq!(effective_margin(&short, margin), Duration::seconds(15));
		assert_eq!(effective_margin(&token("long", now + Duration::hours(1)), margin), margin);

		let mut cell = TokenCell { token: Some(short), ..Default::default() };

		assert!(cell.usable(now, margin, None).is_some());
		assert!(cell.usable(now + Duration::seconds(14), margin, None).is_some());
		assert!(cell.usable(now + Duration::seconds(15), margin, None).is_none());

		cell.token = None;

		assert!(cell.usable(now, margin, None).is_none());
	}
}

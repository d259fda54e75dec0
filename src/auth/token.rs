//! Bearer token model, lifecycle helpers, and builder.

// self
use crate::{_prelude::*, auth::TokenSecret};

/// Lifecycle status of an [`AccessToken`] relative to a refresh margin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenStatus {
	/// Token is valid for longer than the refresh margin.
	Fresh,
	/// Token is still valid but inside the refresh margin; callers should replace it.
	Expiring,
	/// Token reached its expiry instant.
	Expired,
}

/// Errors produced by [`AccessTokenBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum AccessTokenBuilderError {
	/// Issued when no bearer value was provided.
	#[error("Access token value is required.")]
	MissingValue,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
	/// Issued when the expiry does not come after the issue instant.
	#[error("Expiry must be later than the issue instant.")]
	NonPositiveLifetime,
}

/// Bearer token issued by the identity provider.
#[derive(Clone)]
pub struct AccessToken {
	/// Bearer value; callers must avoid logging it.
	pub secret: TokenSecret,
	/// Instant the token was received.
	pub issued_at: OffsetDateTime,
	/// Instant the identity provider stops honoring the token.
	pub expires_at: OffsetDateTime,
}
impl AccessToken {
	/// Returns a builder for constructing tokens.
	pub fn builder() -> AccessTokenBuilder {
		AccessTokenBuilder::default()
	}

	/// Computes the lifecycle status at `now`, treating the last `margin` as expiring.
	pub fn status_at(&self, now: OffsetDateTime, margin: Duration) -> TokenStatus {
		if now >= self.expires_at {
			return TokenStatus::Expired;
		}
		if now >= self.expires_at - margin {
			return TokenStatus::Expiring;
		}

		TokenStatus::Fresh
	}

	/// Returns `true` when the token can be handed out at `now` without a refresh.
	pub fn is_fresh_at(&self, now: OffsetDateTime, margin: Duration) -> bool {
		matches!(self.status_at(now, margin), TokenStatus::Fresh)
	}

	/// Time left before expiry; negative once expired.
	pub fn remaining_at(&self, now: OffsetDateTime) -> Duration {
		self.expires_at - now
	}

	/// Formats the `Authorization` header value.
	pub fn bearer_header(&self) -> String {
		format!("Bearer {}", self.secret.expose())
	}

	/// Returns `true` when both tokens carry the same bearer value.
	pub fn same_value(&self, other: &AccessToken) -> bool {
		self.secret == other.secret
	}
}
impl Debug for AccessToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AccessToken")
			.field("secret", &"<redacted>")
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Builder for [`AccessToken`].
#[derive(Clone, Debug, Default)]
pub struct AccessTokenBuilder {
	secret: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl AccessTokenBuilder {
	/// Provides the bearer value.
	pub fn value(mut self, token: impl Into<String>) -> Self {
		self.secret = Some(TokenSecret::new(token));

		self
	}

	/// Sets the issued-at instant (defaults to the current clock).
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Consumes the builder and produces an [`AccessToken`].
	pub fn build(self) -> Result<AccessToken, AccessTokenBuilderError> {
		let secret = self.secret.ok_or(AccessTokenBuilderError::MissingValue)?;

		if secret.expose().is_empty() {
			return Err(AccessTokenBuilderError::MissingValue);
		}

		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at + delta,
			(None, None) => return Err(AccessTokenBuilderError::MissingExpiry),
		};

		if expires_at <= issued_at {
			return Err(AccessTokenBuilderError::NonPositiveLifetime);
		}

		Ok(AccessToken { secret, issued_at, expires_at })
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn status_honors_refresh_margin() {
		let token = AccessToken::builder()
			.value("bearer")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_in(Duration::hours(1))
			.build()
			.expect("Token builder should succeed.");
		let margin = Duration::seconds(60);

		assert_eq!(token.status_at(macros::datetime!(2025-01-01 00:30 UTC), margin), TokenStatus::Fresh);
		assert_eq!(
			token.status_at(macros::datetime!(2025-01-01 00:59:30 UTC), margin),
			TokenStatus::Expiring
		);
		assert_eq!(token.status_at(macros::datetime!(2025-01-01 01:00 UTC), margin), TokenStatus::Expired);
		assert!(!token.is_fresh_at(macros::datetime!(2025-01-01 00:59:00 UTC), margin));
		assert!(token.is_fresh_at(macros::datetime!(2025-01-01 00:58:59 UTC), margin));
	}

	#[test]
	fn builder_rejects_missing_or_inverted_lifetimes() {
		assert_eq!(
			AccessToken::builder().value("x").build().expect_err("Expiry is mandatory."),
			AccessTokenBuilderError::MissingExpiry
		);
		assert_eq!(
			AccessToken::builder()
				.value("")
				.expires_in(Duration::minutes(5))
				.build()
				.expect_err("Empty bearer values are rejected."),
			AccessTokenBuilderError::MissingValue
		);

		let issued = macros::datetime!(2025-01-01 00:00 UTC);

		assert_eq!(
			AccessToken::builder()
				.value("x")
				.issued_at(issued)
				.expires_at(issued)
				.build()
				.expect_err("Zero lifetime tokens are rejected."),
			AccessTokenBuilderError::NonPositiveLifetime
		);
	}

	#[test]
	fn bearer_header_and_debug() {
		let token = AccessToken::builder()
			.value("abc")
			.expires_in(Duration::minutes(10))
			.build()
			.expect("Token builder should succeed.");

		assert_eq!(token.bearer_header(), "Bearer abc");
		assert!(!format!("{token:?}").contains("abc"));
		assert!(token.remaining_at(token.issued_at) == Duration::minutes(10));
	}
}

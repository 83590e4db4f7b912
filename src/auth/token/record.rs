//! Immutable access-token records and their expiry arithmetic.

// self
use crate::{_prelude::*, auth::token::secret::TokenSecret};

/// Share of the declared lifetime (19/20, i.e. 95%) after which a record counts as expired.
const SAFETY_NUMERATOR: i32 = 19;
const SAFETY_DENOMINATOR: i32 = 20;
/// Refresh lead never exceeds `expires_in / MAX_LEAD_DIVISOR`, which lands before the margin.
const MAX_LEAD_DIVISOR: i32 = 10;

/// Errors produced by [`TokenRecordBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum TokenRecordBuilderError {
	/// No access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Lifetime was missing, zero, or negative.
	#[error("Token lifetime must be positive.")]
	NonPositiveLifetime,
}

/// Credential plus its issuance time and declared lifetime.
///
/// Records are replaced wholesale on refresh and never partially mutated.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenRecord {
	/// Bearer token sent with every call.
	pub access_token: TokenSecret,
	/// Instant the token was obtained.
	#[serde(with = "time::serde::rfc3339")]
	pub obtained_at: OffsetDateTime,
	/// Lifetime declared by the token endpoint.
	pub expires_in: Duration,
	/// Refresh token, if the endpoint issued one.
	pub refresh_token: Option<TokenSecret>,
}
impl TokenRecord {
	/// Returns a builder for constructing records.
	pub fn builder() -> TokenRecordBuilder {
		TokenRecordBuilder::default()
	}

	/// Instant the declared lifetime ends.
	pub fn expires_at(&self) -> OffsetDateTime {
		self.obtained_at + self.expires_in
	}

	/// Returns `true` once more than 95% of the declared lifetime elapsed at `now`.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		now - self.obtained_at > self.expires_in * SAFETY_NUMERATOR / SAFETY_DENOMINATOR
	}

	/// Returns `true` if the record is expired relative to the current clock.
	pub fn is_expired(&self) -> bool {
		self.is_expired_at(OffsetDateTime::now_utc())
	}

	/// Time left until the background loop should refresh, given a refresh `lead`.
	///
	/// The lead is capped at a tenth of the declared lifetime, so short-lived tokens are
	/// refreshed shortly before the safety margin rather than immediately after issuance.
	/// Never negative: an overdue refresh yields [`Duration::ZERO`].
	pub fn refresh_due_in(&self, lead: Duration, now: OffsetDateTime) -> Duration {
		let lead = lead.min(self.expires_in / MAX_LEAD_DIVISOR);
		let due = self.expires_at() - lead - now;

		if due.is_negative() { Duration::ZERO } else { due }
	}
}
impl Debug for TokenRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRecord")
			.field("access_token", &"<redacted>")
			.field("obtained_at", &self.obtained_at)
			.field("expires_in", &self.expires_in)
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.finish()
	}
}

/// Builder for [`TokenRecord`].
#[derive(Clone, Debug, Default)]
pub struct TokenRecordBuilder {
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	obtained_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl TokenRecordBuilder {
	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(TokenSecret::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(TokenSecret::new(token));

		self
	}

	/// Sets the instant the token was obtained (defaults to now).
	pub fn obtained_at(mut self, instant: OffsetDateTime) -> Self {
		self.obtained_at = Some(instant);

		self
	}

	/// Sets the declared lifetime.
	pub fn expires_in(mut self, lifetime: Duration) -> Self {
		self.expires_in = Some(lifetime);

		self
	}

	/// Consumes the builder and produces a [`TokenRecord`].
	pub fn build(self) -> Result<TokenRecord, TokenRecordBuilderError> {
		let access_token = self.access_token.ok_or(TokenRecordBuilderError::MissingAccessToken)?;
		let expires_in = self
			.expires_in
			.filter(|lifetime| lifetime.is_positive())
			.ok_or(TokenRecordBuilderError::NonPositiveLifetime)?;

		Ok(TokenRecord {
			access_token,
			obtained_at: self.obtained_at.unwrap_or_else(OffsetDateTime::now_utc),
			expires_in,
			refresh_token: self.refresh_token,
		})
	}
}

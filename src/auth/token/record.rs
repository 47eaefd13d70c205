//! Persisted credential records, lifecycle evaluation, and their builder.

// self
use crate::{
	_prelude::*,
	auth::{Identity, ProviderId, ScopeSet, TokenSecret},
};

/// Lifecycle status for a credential at a given instant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
	/// Issued-at instant is still in the future.
	Pending,
	/// Usable for longer than the safety margin.
	Active,
	/// Still valid but inside the safety margin; the next acquisition refreshes it.
	Expiring,
	/// Past its expiry instant.
	Expired,
	/// Revoked locally or rejected by the provider; only a new authorization revives it.
	Revoked,
}

/// Errors produced by [`TokenRecordBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TokenRecordBuilderError {
	/// No access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// No expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
}

/// Credential minted for one identity by one provider.
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenRecord {
	/// Identity that consented to the grant.
	pub identity: Identity,
	/// Provider that issued the tokens.
	pub issuer: ProviderId,
	/// Scopes actually granted, which may differ from the ones requested.
	pub scope: ScopeSet,
	/// Access token secret.
	pub access_token: TokenSecret,
	/// Refresh token secret, if the provider issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Issued-at instant.
	pub issued_at: OffsetDateTime,
	/// Instant at which the access token stops being accepted.
	pub expires_at: OffsetDateTime,
	/// Instant at which the record was marked dead.
	pub revoked_at: Option<OffsetDateTime>,
}
impl TokenRecord {
	/// Returns a builder for the given identity, issuer, and granted scopes.
	pub fn builder(identity: Identity, issuer: ProviderId, scope: ScopeSet) -> TokenRecordBuilder {
		TokenRecordBuilder::new(identity, issuer, scope)
	}

	/// Computes the lifecycle status at `instant`, treating the last `margin` before expiry
	/// as [`TokenStatus::Expiring`].
	pub fn status_at(&self, instant: OffsetDateTime, margin: Duration) -> TokenStatus {
		if self.revoked_at.is_some() {
			return TokenStatus::Revoked;
		}
		if instant < self.issued_at {
			return TokenStatus::Pending;
		}
		if instant >= self.expires_at {
			return TokenStatus::Expired;
		}
		if instant + margin >= self.expires_at {
			return TokenStatus::Expiring;
		}

		TokenStatus::Active
	}

	/// Returns `true` when the access token must be refreshed before use at `instant`.
	pub fn needs_refresh(&self, instant: OffsetDateTime, margin: Duration) -> bool {
		instant + margin >= self.expires_at
	}

	/// Latest instant at which callers should still rely on the access token.
	pub fn valid_until(&self, margin: Duration) -> OffsetDateTime {
		self.expires_at - margin
	}

	/// Returns `true` if the record has been revoked.
	pub fn is_revoked(&self) -> bool {
		self.revoked_at.is_some()
	}

	/// Marks the record as revoked.
	pub fn revoke(&mut self, instant: OffsetDateTime) {
		self.revoked_at = Some(instant);
	}
}
impl Debug for TokenRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRecord")
			.field("identity", &self.identity)
			.field("issuer", &self.issuer)
			.field("scope", &self.scope)
			.field("access_token", &self.access_token)
			.field("refresh_token", &self.refresh_token)
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.field("revoked_at", &self.revoked_at)
			.finish()
	}
}

/// Builder for [`TokenRecord`].
#[derive(Clone, Debug)]
pub struct TokenRecordBuilder {
	identity: Identity,
	issuer: ProviderId,
	scope: ScopeSet,
	access_token: Option<TokenSecret>,
	refresh_token: Option<TokenSecret>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl TokenRecordBuilder {
	fn new(identity: Identity, issuer: ProviderId, scope: ScopeSet) -> Self {
		Self {
			identity,
			issuer,
			scope,
			access_token: None,
			refresh_token: None,
			issued_at: None,
			expires_at: None,
			expires_in: None,
		}
	}

	/// Sets the issued-at instant.
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

	/// Carries an existing refresh secret forward, typically when a refresh response omits it.
	pub fn refresh_secret(mut self, secret: Option<TokenSecret>) -> Self {
		self.refresh_token = secret;

		self
	}

	/// Consumes the builder and produces a [`TokenRecord`].
	pub fn build(self) -> Result<TokenRecord, TokenRecordBuilderError> {
		let access_token = self.access_token.ok_or(TokenRecordBuilderError::MissingAccessToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at + delta,
			(None, None) => return Err(TokenRecordBuilderError::MissingExpiry),
		};

		Ok(TokenRecord {
			identity: self.identity,
			issuer: self.issuer,
			scope: self.scope,
			access_token,
			refresh_token: self.refresh_token,
			issued_at,
			expires_at,
			revoked_at: None,
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn builder() -> TokenRecordBuilder {
		TokenRecord::builder(
			Identity::new("ada@example.com").expect("Identity fixture should be valid."),
			ProviderId::new("google").expect("Provider fixture should be valid."),
			ScopeSet::new(["openid", "email"]).expect("Scope fixture should be valid."),
		)
	}

	#[test]
	fn status_honors_the_safety_margin() {
		let margin = Duration::minutes(5);
		let mut record = builder()
			.access_token("access")
			.refresh_token("refresh")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_at(macros::datetime!(2025-01-01 01:00 UTC))
			.build()
			.expect("Token record builder should succeed.");

		assert_eq!(
			record.status_at(macros::datetime!(2024-12-31 23:59 UTC), margin),
			TokenStatus::Pending
		);
		assert_eq!(
			record.status_at(macros::datetime!(2025-01-01 00:30 UTC), margin),
			TokenStatus::Active
		);
		assert_eq!(
			record.status_at(macros::datetime!(2025-01-01 00:55 UTC), margin),
			TokenStatus::Expiring
		);
		assert_eq!(
			record.status_at(macros::datetime!(2025-01-01 01:00 UTC), margin),
			TokenStatus::Expired
		);

		record.revoke(macros::datetime!(2025-01-01 00:10 UTC));

		assert_eq!(
			record.status_at(macros::datetime!(2025-01-01 00:30 UTC), margin),
			TokenStatus::Revoked
		);
	}

	#[test]
	fn refresh_decision_and_validity_window_share_the_margin() {
		let margin = Duration::seconds(60);
		let record = builder()
			.access_token("secret")
			.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
			.expires_in(Duration::minutes(30))
			.build()
			.expect("Builder should support relative expiry.");

		assert_eq!(record.expires_at, macros::datetime!(2025-01-01 00:30 UTC));
		assert_eq!(record.valid_until(margin), macros::datetime!(2025-01-01 00:29 UTC));
		assert!(!record.needs_refresh(macros::datetime!(2025-01-01 00:28:59 UTC), margin));
		assert!(record.needs_refresh(macros::datetime!(2025-01-01 00:29 UTC), margin));
	}

	#[test]
	fn builder_requires_access_token_and_expiry() {
		assert_eq!(
			builder().expires_in(Duration::minutes(1)).build().map(|_| ()),
			Err(TokenRecordBuilderError::MissingAccessToken)
		);
		assert_eq!(
			builder().access_token("a").build().map(|_| ()),
			Err(TokenRecordBuilderError::MissingExpiry)
		);
	}

	#[test]
	fn debug_output_redacts_secrets() {
		let record = builder()
			.access_token("ya29.visible")
			.refresh_token("1//visible")
			.expires_in(Duration::hours(1))
			.build()
			.expect("Token record builder should succeed.");
		let rendered = format!("{record:?}");

		assert!(!rendered.contains("visible"));
		assert!(rendered.contains("ada@example.com"));
	}
}

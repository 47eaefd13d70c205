//! Credential acquisition with scope checks and single-flight refresh.
//!
//! [`CredentialBroker::acquire`] is the only way the rest of the crate obtains an access token.
//! It reads the identity's record from the [`TokenStore`], rejects missing, dead, or
//! under-scoped credentials, and refreshes credentials inside the safety margin. Refreshes are
//! deduplicated per identity through the in-flight registry and persisted with a
//! compare-and-swap on the refresh secret, so a rotation racing a new authorization never
//! overwrites the newer credential.

mod inflight;
mod metrics;

pub use metrics::RefreshMetrics;

// crates.io
use reqwest::RequestBuilder;
// self
use crate::{
	_prelude::*,
	auth::{Identity, ProviderId, ScopeSet, TokenRecord, TokenSecret, TokenStatus},
	broker::inflight::InflightRefreshes,
	flows::TokenAuthority,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::{CompareAndSwapOutcome, TokenStore},
};

/// Credential lifecycle settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerPolicy {
	/// Seconds before expiry at which a credential is refreshed instead of used.
	pub safety_margin_secs: u64,
	/// Seconds an authorization session stays valid.
	pub session_ttl_secs: u64,
}
impl BrokerPolicy {
	/// Safety margin as a [`Duration`].
	pub fn safety_margin(&self) -> Duration {
		Duration::seconds(i64::try_from(self.safety_margin_secs).unwrap_or(i64::MAX))
	}

	/// Session lifetime as a [`Duration`].
	pub fn session_ttl(&self) -> Duration {
		Duration::seconds(i64::try_from(self.session_ttl_secs).unwrap_or(i64::MAX))
	}
}
impl Default for BrokerPolicy {
	fn default() -> Self {
		Self { safety_margin_secs: 60, session_ttl_secs: 600 }
	}
}

/// Access token cleared for one operation.
///
/// Only produced by [`CredentialBroker::acquire`], so holding one means the scope check passed and
/// the token is good until at least [`valid_until`](Self::valid_until).
#[derive(Clone)]
pub struct ValidCredential {
	/// Identity the token belongs to.
	pub identity: Identity,
	/// Provider that issued the token.
	pub issuer: ProviderId,
	/// Scopes granted to the token.
	pub scope: ScopeSet,
	/// Provider-reported expiry.
	pub expires_at: OffsetDateTime,
	/// Expiry minus the safety margin.
	pub valid_until: OffsetDateTime,
	access_token: TokenSecret,
}
impl ValidCredential {
	fn new(record: TokenRecord, margin: Duration) -> Self {
		let valid_until = record.valid_until(margin);

		Self {
			identity: record.identity,
			issuer: record.issuer,
			scope: record.scope,
			expires_at: record.expires_at,
			valid_until,
			access_token: record.access_token,
		}
	}

	/// Raw access token value.
	pub fn access_token(&self) -> &str {
		self.access_token.expose()
	}

	/// `Authorization` header value.
	pub fn bearer(&self) -> String {
		format!("Bearer {}", self.access_token.expose())
	}

	/// Attaches the bearer token to an outgoing request.
	pub fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
		request.bearer_auth(self.access_token.expose())
	}
}
impl Debug for ValidCredential {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ValidCredential")
			.field("identity", &self.identity)
			.field("issuer", &self.issuer)
			.field("scope", &self.scope)
			.field("access_token", &self.access_token)
			.field("expires_at", &self.expires_at)
			.field("valid_until", &self.valid_until)
			.finish()
	}
}

/// Diagnostic view of a stored credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CredentialStatus {
	/// Identity the credential belongs to.
	pub identity: Identity,
	/// Granted scopes.
	pub scope: ScopeSet,
	/// Lifecycle status under the broker's safety margin.
	pub status: TokenStatus,
	/// Provider-reported expiry.
	pub expires_at: OffsetDateTime,
	/// Whether a refresh token is on file.
	pub refreshable: bool,
}

/// Hands out valid credentials, refreshing them at most once per identity at a time.
#[derive(Clone)]
pub struct CredentialBroker {
	store: Arc<dyn TokenStore>,
	authority: Arc<dyn TokenAuthority>,
	safety_margin: Duration,
	inflight: Arc<InflightRefreshes>,
	metrics: Arc<RefreshMetrics>,
}
impl CredentialBroker {
	/// Creates a broker over `store` that refreshes through `authority`.
	pub fn new(store: Arc<dyn TokenStore>, authority: Arc<dyn TokenAuthority>) -> Self {
		Self {
			store,
			authority,
			safety_margin: BrokerPolicy::default().safety_margin(),
			inflight: Default::default(),
			metrics: Default::default(),
		}
	}

	/// Overrides the safety margin (negative values are treated as zero).
	pub fn with_safety_margin(mut self, margin: Duration) -> Self {
		self.safety_margin = if margin.is_negative() { Duration::ZERO } else { margin };

		self
	}

	/// Safety margin applied to every expiry check.
	pub fn safety_margin(&self) -> Duration {
		self.safety_margin
	}

	/// Refresh counters.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	/// Total refreshes started so far.
	pub fn refresh_count(&self) -> u64 {
		self.metrics.attempts()
	}

	/// Returns a credential for `identity` that covers `required`.
	///
	/// # Errors
	///
	/// - [`Error::NotAuthenticated`] when nothing is stored for the identity.
	/// - [`Error::ReauthenticationRequired`] when the credential is dead or its refresh is
	///   rejected; the record is marked revoked in the latter case.
	/// - [`Error::InsufficientScope`] when `required` is not covered by the granted scopes.
	/// - Token endpoint failures (transient, transport, rate limit) from a refresh, unchanged.
	pub async fn acquire(&self, identity: &Identity, required: &ScopeSet) -> Result<ValidCredential> {
		const KIND: FlowKind = FlowKind::Acquire;

		let span = FlowSpan::new(KIND, "acquire");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async {
				let record = self
					.store
					.fetch(identity)
					.await?
					.ok_or_else(|| not_authenticated(identity))?;

				ensure_alive(&record)?;
				ensure_scope(&record, required)?;

				let record = if record.needs_refresh(OffsetDateTime::now_utc(), self.safety_margin)
				{
					let refreshed = self.refresh(identity).await?;

					ensure_scope(&refreshed, required)?;

					refreshed
				} else {
					record
				};

				Ok(ValidCredential::new(record, self.safety_margin))
			})
			.await;

		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

		result
	}

	/// Revokes the identity's grant at the provider (best effort) and forgets the credential.
	///
	/// A second call fails with [`Error::NotAuthenticated`].
	pub async fn revoke(&self, identity: &Identity) -> Result<()> {
		const KIND: FlowKind = FlowKind::Revoke;

		let span = FlowSpan::new(KIND, "revoke");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async {
				let record = self
					.store
					.fetch(identity)
					.await?
					.ok_or_else(|| not_authenticated(identity))?;

				if !record.is_revoked()
					&& let Err(e) = self.authority.revoke(&record).await
				{
					tracing::warn!(identity = %identity, error = %e, "Provider revocation failed.");
				}

				self.store.remove(identity).await?.ok_or_else(|| not_authenticated(identity))?;

				tracing::info!(identity = %identity, "Credential revoked.");

				Ok(())
			})
			.await;

		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

		result
	}

	/// Describes the stored credential, if any.
	pub async fn status(&self, identity: &Identity) -> Result<Option<CredentialStatus>> {
		let now = OffsetDateTime::now_utc();
		let status = self.store.fetch(identity).await?.map(|record| CredentialStatus {
			status: record.status_at(now, self.safety_margin),
			refreshable: record.refresh_token.is_some(),
			expires_at: record.expires_at,
			scope: record.scope,
			identity: record.identity,
		});

		Ok(status)
	}

	async fn refresh(&self, identity: &Identity) -> Result<TokenRecord> {
		let store = self.store.clone();
		let authority = self.authority.clone();
		let metrics = self.metrics.clone();
		let margin = self.safety_margin;
		let owned = identity.clone();
		let (shared, spawned) = self.inflight.join_or_spawn(identity, move || {
			refresh_record(store, authority, metrics, owned, margin)
		});

		if !spawned {
			self.metrics.record_coalesced();

			tracing::debug!(identity = %identity, "Joined in-flight refresh.");
		}

		shared.await.map_err(|e| e.replicate())
	}
}
impl Debug for CredentialBroker {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialBroker")
			.field("provider", &self.authority.descriptor().id)
			.field("safety_margin", &self.safety_margin)
			.field("inflight", &self.inflight.len())
			.field("metrics", &self.metrics)
			.finish()
	}
}

async fn refresh_record(
	store: Arc<dyn TokenStore>,
	authority: Arc<dyn TokenAuthority>,
	metrics: Arc<RefreshMetrics>,
	identity: Identity,
	margin: Duration,
) -> Result<TokenRecord> {
	// Re-read: a refresh that finished just before this one registered may have landed already.
	let current = store.fetch(&identity).await?.ok_or_else(|| not_authenticated(&identity))?;

	ensure_alive(&current)?;

	if !current.needs_refresh(OffsetDateTime::now_utc(), margin) {
		return Ok(current);
	}

	metrics.record_attempt();
	tracing::info!(identity = %identity, expires_at = %current.expires_at, "Refreshing credential.");

	let refreshed = match authority.refresh(&current).await {
		Ok(record) => record,
		Err(e) => {
			metrics.record_failure();

			if matches!(e, Error::ReauthenticationRequired { .. })
				&& let Err(store_err) = store.revoke(&identity, OffsetDateTime::now_utc()).await
			{
				tracing::warn!(
					identity = %identity,
					error = %store_err,
					"Failed to mark rejected credential as revoked."
				);
			}

			tracing::warn!(identity = %identity, error = %e, "Credential refresh failed.");

			return Err(e);
		},
	};
	let expected = current.refresh_token.as_ref().map(TokenSecret::expose);
	let outcome = store
		.compare_and_swap_refresh(&identity, expected, refreshed.clone())
		.await
		.inspect_err(|_| metrics.record_failure())?;

	match outcome {
		CompareAndSwapOutcome::Updated => {
			metrics.record_success();

			Ok(refreshed)
		},
		CompareAndSwapOutcome::Missing => {
			metrics.record_failure();

			Err(not_authenticated(&identity))
		},
		CompareAndSwapOutcome::RefreshMismatch => {
			// The credential was replaced meanwhile (new consent); the replacement wins.
			let existing =
				store.fetch(&identity).await?.ok_or_else(|| not_authenticated(&identity))?;

			ensure_alive(&existing)?;
			metrics.record_success();

			Ok(existing)
		},
	}
}

fn not_authenticated(identity: &Identity) -> Error {
	Error::NotAuthenticated { identity: identity.to_string() }
}

fn ensure_alive(record: &TokenRecord) -> Result<()> {
	if record.is_revoked() {
		Err(Error::ReauthenticationRequired { reason: "credential was revoked".into() })
	} else {
		Ok(())
	}
}

fn ensure_scope(record: &TokenRecord, required: &ScopeSet) -> Result<()> {
	let missing = required.missing_from(&record.scope);

	if missing.is_empty() { Ok(()) } else { Err(Error::InsufficientScope { missing }) }
}

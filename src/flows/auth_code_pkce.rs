//! Authorization Code + PKCE flow controller with in-memory session tracking.

mod session;

pub use session::*;

// std
use std::sync::Weak;
// crates.io
use tokio::task::JoinHandle;
// self
use crate::{
	_prelude::*,
	auth::{Identity, ScopeSet, TokenRecord},
	flows::TokenAuthority,
	oauth::CodeExchange,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::TokenStore,
};

/// Default lifetime of an authorization session.
pub const DEFAULT_SESSION_TTL: Duration = Duration::minutes(10);

/// Opens and completes Authorization Code + PKCE flows.
///
/// At most one live session exists per identity. Sessions are keyed by their `state` nonce,
/// removed on completion whatever the outcome, and swept once older than the session TTL.
pub struct AuthFlowController {
	authority: Arc<dyn TokenAuthority>,
	store: Arc<dyn TokenStore>,
	redirect_uri: Url,
	session_ttl: Duration,
	base_scope: ScopeSet,
	sessions: Mutex<SessionTable>,
}
impl AuthFlowController {
	/// Creates a controller that redirects users back to `redirect_uri`.
	pub fn new(
		authority: Arc<dyn TokenAuthority>,
		store: Arc<dyn TokenStore>,
		redirect_uri: Url,
	) -> Self {
		Self {
			authority,
			store,
			redirect_uri,
			session_ttl: DEFAULT_SESSION_TTL,
			base_scope: ScopeSet::default(),
			sessions: Default::default(),
		}
	}

	/// Overrides the session lifetime.
	pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
		self.session_ttl = ttl;

		self
	}

	/// Sets the scopes requested on every flow regardless of the tools asking.
	pub fn with_base_scope(mut self, scope: ScopeSet) -> Self {
		self.base_scope = scope;

		self
	}

	/// Redirect URI embedded in authorize URLs.
	pub fn redirect_uri(&self) -> &Url {
		&self.redirect_uri
	}

	/// Opens a session for `identity` and returns it; send the user to its `authorize_url`.
	///
	/// The requested scopes are unioned with the base scopes and with whatever the identity's
	/// stored credential already grants, so incremental consent never drops a scope. A live
	/// session for the same identity yields [`Error::FlowAlreadyActive`] unless `restart` is set.
	pub async fn start(
		&self,
		identity: &Identity,
		requested: &ScopeSet,
		restart: bool,
	) -> Result<AuthorizationSession> {
		const KIND: FlowKind = FlowKind::AuthorizationCode;

		let span = FlowSpan::new(KIND, "start");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async {
				let granted = match self.store.fetch(identity).await? {
					Some(record) if !record.is_revoked() => record.scope,
					_ => ScopeSet::default(),
				};
				let scope = self.base_scope.union(requested).union(&granted);

				self.open_session(identity, scope, restart, OffsetDateTime::now_utc())
			})
			.await;

		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

		result
	}

	/// Completes the flow identified by `state` with the authorization `code`.
	///
	/// The session is consumed before the exchange, so a second callback with the same state
	/// fails with [`Error::UnknownOrExpiredSession`]. On success the new credential replaces
	/// whatever the store held for the identity.
	pub async fn complete(&self, state: &str, code: &str) -> Result<TokenRecord> {
		const KIND: FlowKind = FlowKind::AuthorizationCode;

		let span = FlowSpan::new(KIND, "complete");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result: Result<TokenRecord> = span
			.instrument(async {
				let session = self.take_session(state, OffsetDateTime::now_utc())?;
				let exchange = CodeExchange {
					identity: &session.identity,
					code,
					pkce_verifier: session.pkce_verifier(),
					requested_scope: &session.scope,
					redirect_uri: &session.redirect_uri,
				};
				let record = self.authority.exchange_code(exchange).await?;

				self.store.save(record.clone()).await?;

				tracing::info!(
					identity = %record.identity,
					scope = %record.scope,
					"Authorization flow completed."
				);

				Ok(record)
			})
			.await;

		if let Err(e) = &result {
			tracing::warn!(error = %e, "Authorization flow failed to complete.");
		}

		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

		result
	}

	/// Drops every session older than the TTL at `instant`, returning how many were dropped.
	pub fn sweep_expired(&self, instant: OffsetDateTime) -> usize {
		let mut table = self.sessions.lock();
		let expired = table
			.by_state
			.iter()
			.filter(|(_, session)| session.is_expired_at(instant, self.session_ttl))
			.map(|(state, _)| state.clone())
			.collect::<Vec<_>>();

		for state in &expired {
			table.remove(state);
		}

		expired.len()
	}

	/// Spawns a task that sweeps expired sessions every `period`.
	///
	/// The task holds a weak reference and exits once the controller is dropped.
	pub fn spawn_sweeper(self: &Arc<Self>, period: StdDuration) -> JoinHandle<()> {
		let controller: Weak<Self> = Arc::downgrade(self);

		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(period);

			loop {
				ticker.tick().await;

				let Some(strong) = controller.upgrade() else { break };
				let swept = strong.sweep_expired(OffsetDateTime::now_utc());

				if swept > 0 {
					tracing::debug!(swept, "Expired authorization sessions dropped.");
				}
			}
		})
	}

	/// Number of sessions currently tracked, expired ones included until swept.
	pub fn active_sessions(&self) -> usize {
		self.sessions.lock().by_state.len()
	}

	fn open_session(
		&self,
		identity: &Identity,
		scope: ScopeSet,
		restart: bool,
		now: OffsetDateTime,
	) -> Result<AuthorizationSession> {
		let mut table = self.sessions.lock();

		if let Some(state) = table.by_identity.get(identity).cloned() {
			let live = table
				.by_state
				.get(&state)
				.is_some_and(|session| !session.is_expired_at(now, self.session_ttl));

			if live && !restart {
				return Err(Error::FlowAlreadyActive { identity: identity.to_string() });
			}

			table.remove(&state);
		}

		let session = session::build_session(
			self.authority.descriptor(),
			self.authority.client_id(),
			identity.clone(),
			scope,
			self.redirect_uri.clone(),
			now,
		);

		table.by_identity.insert(identity.clone(), session.state.clone());
		table.by_state.insert(session.state.clone(), session.clone());

		tracing::info!(identity = %identity, scope = %session.scope, restart, "Authorization flow started.");

		Ok(session)
	}

	fn take_session(&self, state: &str, now: OffsetDateTime) -> Result<AuthorizationSession> {
		let session = self.sessions.lock().remove(state).ok_or(Error::UnknownOrExpiredSession)?;

		if session.is_expired_at(now, self.session_ttl) {
			return Err(Error::UnknownOrExpiredSession);
		}

		Ok(session)
	}
}
impl Debug for AuthFlowController {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthFlowController")
			.field("provider", &self.authority.descriptor().id)
			.field("redirect_uri", &self.redirect_uri)
			.field("session_ttl", &self.session_ttl)
			.field("active_sessions", &self.active_sessions())
			.finish()
	}
}

#[derive(Default)]
struct SessionTable {
	by_state: HashMap<String, AuthorizationSession>,
	by_identity: HashMap<Identity, String>,
}
impl SessionTable {
	fn remove(&mut self, state: &str) -> Option<AuthorizationSession> {
		let session = self.by_state.remove(state)?;

		if self.by_identity.get(&session.identity).is_some_and(|current| current == state) {
			self.by_identity.remove(&session.identity);
		}

		Some(session)
	}
}

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	auth::{Identity, ScopeSet},
	flows::common,
	provider::ProviderDescriptor,
};

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;

/// Supported PKCE challenge methods surfaced via [`AuthorizationSession`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceCodeChallengeMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	S256,
}
impl PkceCodeChallengeMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub fn as_str(self) -> &'static str {
		match self {
			PkceCodeChallengeMethod::S256 => "S256",
		}
	}
}

/// In-flight Authorization Code + PKCE handshake returned by
/// [`AuthFlowController::start`](crate::flows::AuthFlowController::start).
///
/// The controller keeps its own copy keyed by `state`; the copy handed to callers only exists so
/// they can redirect the user to [`authorize_url`](Self::authorize_url).
#[derive(Clone)]
pub struct AuthorizationSession {
	/// Identity the resulting credential will belong to.
	pub identity: Identity,
	/// Requested scope set, already unioned with base and previously granted scopes.
	pub scope: ScopeSet,
	/// Opaque nonce that must round-trip via the redirect handler.
	pub state: String,
	/// Redirect URI embedded in the authorize URL.
	pub redirect_uri: Url,
	/// Fully-formed authorize URL that callers should send end-users to.
	pub authorize_url: Url,
	/// Instant the session was opened.
	pub created_at: OffsetDateTime,
	pkce: PkcePair,
}
impl AuthorizationSession {
	/// PKCE code challenge derived from the secret verifier.
	pub fn code_challenge(&self) -> &str {
		&self.pkce.challenge
	}

	/// PKCE challenge method (currently always `S256`).
	pub fn code_challenge_method(&self) -> PkceCodeChallengeMethod {
		self.pkce.method
	}

	/// Returns `true` once the session is older than `ttl`.
	pub fn is_expired_at(&self, instant: OffsetDateTime, ttl: Duration) -> bool {
		instant - self.created_at > ttl
	}

	pub(crate) fn pkce_verifier(&self) -> &str {
		&self.pkce.verifier
	}
}
impl Debug for AuthorizationSession {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationSession")
			.field("identity", &self.identity)
			.field("scope", &self.scope)
			.field("state", &self.state)
			.field("redirect_uri", &self.redirect_uri)
			.field("authorize_url", &self.authorize_url)
			.field("created_at", &self.created_at)
			.field("code_challenge", &self.pkce.challenge)
			.field("code_challenge_method", &self.pkce.method)
			.finish()
	}
}

#[derive(Clone)]
struct PkcePair {
	verifier: String,
	challenge: String,
	method: PkceCodeChallengeMethod,
}
impl PkcePair {
	fn generate() -> Self {
		let verifier = random_string(PKCE_VERIFIER_LEN);
		let challenge = compute_pkce_challenge(&verifier);

		Self { verifier, challenge, method: PkceCodeChallengeMethod::S256 }
	}
}

pub(super) fn build_session(
	descriptor: &ProviderDescriptor,
	client_id: &str,
	identity: Identity,
	scope: ScopeSet,
	redirect_uri: Url,
	created_at: OffsetDateTime,
) -> AuthorizationSession {
	let state = random_string(STATE_LEN);
	let pkce = PkcePair::generate();
	let authorize_url =
		build_authorize_url(descriptor, client_id, &identity, &redirect_uri, &scope, &state, &pkce);

	AuthorizationSession { identity, scope, state, redirect_uri, authorize_url, created_at, pkce }
}

fn build_authorize_url(
	descriptor: &ProviderDescriptor,
	client_id: &str,
	identity: &Identity,
	redirect_uri: &Url,
	scope: &ScopeSet,
	state: &str,
	pkce: &PkcePair,
) -> Url {
	let mut url = descriptor.endpoints.authorization.clone();
	let mut pairs = url.query_pairs_mut();

	pairs.append_pair("response_type", "code");
	pairs.append_pair("client_id", client_id);
	pairs.append_pair("redirect_uri", redirect_uri.as_str());

	if let Some(scope_value) = common::format_scope(scope, descriptor.quirks.scope_delimiter) {
		pairs.append_pair("scope", &scope_value);
	}

	pairs.append_pair("state", state);
	pairs.append_pair("code_challenge", &pkce.challenge);
	pairs.append_pair("code_challenge_method", pkce.method.as_str());
	pairs.append_pair("login_hint", identity.as_str());

	for (key, value) in descriptor.quirks.authorize_params() {
		pairs.append_pair(key, value);
	}

	drop(pairs);

	url
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

fn compute_pkce_challenge(verifier: &str) -> String {
	let digest = Sha256::digest(verifier.as_bytes());

	URL_SAFE_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn session() -> AuthorizationSession {
		let descriptor = ProviderDescriptor::google().expect("Google preset should build.");

		build_session(
			&descriptor,
			"client-123",
			Identity::new("Dana@Example.com").expect("Identity fixture should be valid."),
			ScopeSet::new(["openid", "https://www.googleapis.com/auth/gmail.readonly"])
				.expect("Scope fixture should be valid."),
			Url::parse("http://localhost:8000/oauth2callback")
				.expect("Redirect fixture should parse."),
			OffsetDateTime::now_utc(),
		)
	}

	#[test]
	fn authorize_url_carries_pkce_and_offline_access() {
		let session = session();
		let pairs: HashMap<_, _> = session.authorize_url.query_pairs().into_owned().collect();

		assert_eq!(session.state.len(), STATE_LEN);
		assert_eq!(session.pkce_verifier().len(), PKCE_VERIFIER_LEN);
		assert_eq!(pairs.get("state"), Some(&session.state));
		assert_eq!(pairs.get("code_challenge").map(String::as_str), Some(session.code_challenge()));
		assert_eq!(pairs.get("code_challenge_method").map(String::as_str), Some("S256"));
		assert_eq!(pairs.get("access_type").map(String::as_str), Some("offline"));
		assert_eq!(pairs.get("prompt").map(String::as_str), Some("consent"));
		assert_eq!(pairs.get("login_hint").map(String::as_str), Some("dana@example.com"));
		assert_eq!(
			pairs.get("scope").map(String::as_str),
			Some("https://www.googleapis.com/auth/gmail.readonly openid")
		);
	}

	#[test]
	fn challenge_is_s256_of_verifier() {
		// RFC 7636 appendix B.
		assert_eq!(
			compute_pkce_challenge("dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk"),
			"E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
		);
	}

	#[test]
	fn expiry_is_relative_to_creation() {
		let session = session();
		let ttl = Duration::minutes(10);

		assert!(!session.is_expired_at(session.created_at + Duration::minutes(9), ttl));
		assert!(session.is_expired_at(session.created_at + Duration::minutes(11), ttl));
	}

	#[test]
	fn debug_output_hides_verifier() {
		let session = session();

		assert!(!format!("{session:?}").contains(session.pkce_verifier()));
	}
}

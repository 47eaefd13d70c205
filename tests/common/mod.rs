//! Fixtures shared by the integration tests.

#![allow(dead_code)]

pub use std::sync::Arc;

pub use httpmock::prelude::*;
pub use serde_json::{Value, json};
pub use time::{Duration, OffsetDateTime};
pub use url::Url;

// self
use workspace_broker::{
	auth::{Identity, ProviderId, ScopeSet, TokenRecord},
	config::CoreConfig,
	flows::ReqwestOAuthClient,
	http::ReqwestHttpClient,
	oauth::ReqwestTransportErrorMapper,
	provider::{ClientAuthMethod, GrantType, ProviderDescriptor},
	server::BrokerCore,
	store::{MemoryStore, TokenStore},
};

pub const CLIENT_ID: &str = "client-it";
pub const CLIENT_SECRET: &str = "secret-it";

/// Builds a reqwest client that accepts the self-signed certificates served by `httpmock`.
pub fn test_reqwest_http_client() -> ReqwestHttpClient {
	let client = reqwest::Client::builder()
		.danger_accept_invalid_certs(true)
		.danger_accept_invalid_hostnames(true)
		.build()
		.expect("Failed to build insecure Reqwest client for tests.");

	ReqwestHttpClient::with_client(client)
}

/// Descriptor whose endpoints live on `base` (`/authorize`, `/token`, `/revoke`).
pub fn descriptor_at(base: &str) -> ProviderDescriptor {
	let url = |path: &str| {
		Url::parse(&format!("{base}{path}")).expect("Mock endpoint should parse successfully.")
	};

	ProviderDescriptor::builder(
		ProviderId::new("mock-google").expect("Provider identifier fixture should be valid."),
	)
	.authorization_endpoint(url("/authorize"))
	.token_endpoint(url("/token"))
	.revocation_endpoint(url("/revoke"))
	.support_grant(GrantType::AuthorizationCode)
	.support_grant(GrantType::RefreshToken)
	.preferred_client_auth_method(ClientAuthMethod::ClientSecretPost)
	.build()
	.expect("Provider descriptor should build successfully.")
}

/// OAuth client talking to `server`.
pub fn mock_client(server: &MockServer) -> Arc<ReqwestOAuthClient> {
	let client = ReqwestOAuthClient::with_http_client(
		descriptor_at(&server.url("")),
		CLIENT_ID,
		test_reqwest_http_client(),
		ReqwestTransportErrorMapper,
	)
	.with_client_secret(CLIENT_SECRET);

	Arc::new(client)
}

/// OAuth client pointing at an address no test ever reaches.
pub fn offline_client() -> Arc<ReqwestOAuthClient> {
	let client = ReqwestOAuthClient::with_http_client(
		descriptor_at("https://auth.invalid"),
		CLIENT_ID,
		test_reqwest_http_client(),
		ReqwestTransportErrorMapper,
	)
	.with_client_secret(CLIENT_SECRET);

	Arc::new(client)
}

/// Core wired to `store` and `client` with the given configuration.
pub fn core_with(
	config: &CoreConfig,
	store: Arc<MemoryStore>,
	client: Arc<ReqwestOAuthClient>,
) -> BrokerCore {
	BrokerCore::with_authority(config, store, client).expect("Core should assemble successfully.")
}

pub fn identity(raw: &str) -> Identity {
	Identity::new(raw).expect("Identity fixture should be valid.")
}

pub fn scopes(values: &[&str]) -> ScopeSet {
	ScopeSet::new(values.iter().copied()).expect("Scope fixture should be valid.")
}

/// Stores a credential expiring `expires_in` from now.
pub async fn seed(
	store: &MemoryStore,
	identity: &Identity,
	scope: &ScopeSet,
	access: &str,
	refresh: &str,
	expires_in: Duration,
) -> TokenRecord {
	let issued = OffsetDateTime::now_utc() - Duration::minutes(5);
	let record = TokenRecord::builder(
		identity.clone(),
		ProviderId::new("mock-google").expect("Provider identifier fixture should be valid."),
		scope.clone(),
	)
	.access_token(access)
	.refresh_token(refresh)
	.issued_at(issued)
	.expires_at(OffsetDateTime::now_utc() + expires_in)
	.build()
	.expect("Token record fixture should build successfully.");

	store.save(record.clone()).await.expect("Failed to seed record into the store.");

	record
}

/// Token endpoint JSON body.
pub fn token_body(access: &str, refresh: Option<&str>, scope: Option<&str>) -> String {
	let mut body = json!({
		"access_token": access,
		"token_type": "Bearer",
		"expires_in": 3600,
	});

	if let Some(refresh) = refresh {
		body["refresh_token"] = json!(refresh);
	}
	if let Some(scope) = scope {
		body["scope"] = json!(scope);
	}

	body.to_string()
}

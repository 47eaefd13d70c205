mod common;

// std
use std::collections::HashMap;
// self
use common::*;
use workspace_broker::{
	config::CoreConfig,
	error::Error,
	flows::PkceCodeChallengeMethod,
	service::scopes::{CALENDAR_FULL, GMAIL_READONLY, OPENID},
	store::{MemoryStore, TokenStore},
};

#[tokio::test]
async fn start_complete_then_acquire_checks_scopes() {
	let server = MockServer::start_async().await;
	let store = Arc::new(MemoryStore::default());
	let core = core_with(&CoreConfig::default(), store.clone(), mock_client(&server));
	let ada = identity("ada@example.com");
	let read_mail = scopes(&[GMAIL_READONLY]);
	let err = core
		.broker()
		.acquire(&ada, &read_mail)
		.await
		.expect_err("Acquire without a stored credential should fail.");

	assert!(matches!(err, Error::NotAuthenticated { .. }));

	let session = core
		.flows()
		.start(&ada, &read_mail, false)
		.await
		.expect("Authorization session should start successfully.");

	assert_eq!(session.code_challenge_method(), PkceCodeChallengeMethod::S256);
	assert!(session.scope.contains(GMAIL_READONLY));
	assert!(session.scope.contains(OPENID));

	let pairs: HashMap<_, _> = session.authorize_url.query_pairs().into_owned().collect();

	assert_eq!(pairs.get("response_type").map(String::as_str), Some("code"));
	assert_eq!(pairs.get("client_id").map(String::as_str), Some(CLIENT_ID));
	assert_eq!(
		pairs.get("redirect_uri").map(String::as_str),
		Some("http://localhost:8000/oauth2callback")
	);
	assert_eq!(pairs.get("state"), Some(&session.state));
	assert_eq!(pairs.get("code_challenge_method").map(String::as_str), Some("S256"));
	assert_eq!(pairs.get("code_challenge").map(String::as_str), Some(session.code_challenge()));

	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.form_urlencoded_tuple("grant_type", "authorization_code")
				.form_urlencoded_tuple("code", "valid-code");
			then.status(200)
				.header("content-type", "application/json")
				.body(token_body("access-1", Some("refresh-1"), None));
		})
		.await;
	let record = core
		.flows()
		.complete(&session.state, "valid-code")
		.await
		.expect("Authorization code exchange should succeed.");

	mock.assert_calls_async(1).await;

	assert_eq!(record.access_token.expose(), "access-1");
	assert_eq!(record.scope, session.scope);
	assert_eq!(core.flows().active_sessions(), 0);

	let stored = store
		.fetch(&ada)
		.await
		.expect("Store fetch should succeed.")
		.expect("Exchanged credential should be stored.");

	assert_eq!(stored.access_token.expose(), "access-1");

	let credential = core
		.broker()
		.acquire(&ada, &read_mail)
		.await
		.expect("Acquire should succeed for a granted scope.");

	assert_eq!(credential.access_token(), "access-1");

	let err = core
		.broker()
		.acquire(&ada, &scopes(&[CALENDAR_FULL]))
		.await
		.expect_err("Acquire should fail for a scope that was never granted.");

	assert!(matches!(err, Error::InsufficientScope { missing } if missing.contains(CALENDAR_FULL)));
}

#[tokio::test]
async fn completed_or_rejected_sessions_cannot_be_replayed() {
	let server = MockServer::start_async().await;
	let store = Arc::new(MemoryStore::default());
	let core = core_with(&CoreConfig::default(), store.clone(), mock_client(&server));
	let bob = identity("bob@example.com");
	let session = core
		.flows()
		.start(&bob, &scopes(&[GMAIL_READONLY]), false)
		.await
		.expect("Authorization session should start successfully.");
	let err = core
		.flows()
		.start(&bob, &scopes(&[GMAIL_READONLY]), false)
		.await
		.expect_err("A second live flow for the same identity should be refused.");

	assert!(matches!(err, Error::FlowAlreadyActive { .. }));

	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(400)
				.header("content-type", "application/json")
				.body(r#"{"error":"invalid_grant","error_description":"code already used"}"#);
		})
		.await;
	let err = core
		.flows()
		.complete(&session.state, "stale-code")
		.await
		.expect_err("A rejected code should fail the exchange.");

	assert!(matches!(err, Error::AuthorizationDenied { .. }));

	mock.assert_calls_async(1).await;

	let err = core
		.flows()
		.complete(&session.state, "stale-code")
		.await
		.expect_err("A consumed session should not be reusable.");

	assert!(matches!(err, Error::UnknownOrExpiredSession));
	assert!(store.is_empty());
}

#[tokio::test]
async fn incremental_consent_keeps_granted_scopes() {
	let server = MockServer::start_async().await;
	let store = Arc::new(MemoryStore::default());
	let core = core_with(&CoreConfig::default(), store.clone(), mock_client(&server));
	let carol = identity("carol@example.com");

	seed(&store, &carol, &scopes(&[GMAIL_READONLY]), "access-0", "refresh-0", Duration::hours(1))
		.await;

	let session = core
		.flows()
		.start(&carol, &scopes(&[CALENDAR_FULL]), false)
		.await
		.expect("Authorization session should start successfully.");

	assert!(session.scope.contains(GMAIL_READONLY));
	assert!(session.scope.contains(CALENDAR_FULL));

	let restarted = core
		.flows()
		.start(&carol, &scopes(&[CALENDAR_FULL]), true)
		.await
		.expect("Restart should replace the live session.");

	assert_ne!(restarted.state, session.state);
	assert_eq!(core.flows().active_sessions(), 1);
}

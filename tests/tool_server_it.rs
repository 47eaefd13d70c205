mod common;

// std
use std::{
	collections::BTreeMap,
	sync::atomic::{AtomicU32, Ordering},
};
// self
use common::*;
use workspace_broker::{
	auth::Identity,
	batch::{BatchConfig, BatchItem, BatchResponse, BatchSubmitter, SubmitFuture},
	broker::ValidCredential,
	config::CoreConfig,
	dispatch::{RetryPolicy, UpstreamError},
	error::ErrorKind,
	registry::{
		ItemOutcome, ToolArguments, ToolContext, ToolDescriptor, ToolFuture, ToolHandler,
		ToolOutput, ToolRegistry,
	},
	server::{BrokerCore, ToolRequest, ToolResponse},
	service::{
		Service,
		scopes::{CALENDAR_FULL, DRIVE_FULL, GMAIL_READONLY, GMAIL_SEND, OPENID},
	},
	store::MemoryStore,
};

const GET_MESSAGE: &str = "messages.get";

/// Returns the bearer header and counts invocations.
#[derive(Default)]
struct WhoAmI {
	calls: AtomicU32,
}
impl ToolHandler for WhoAmI {
	fn invoke<'a>(&'a self, context: ToolContext<'a>, arguments: ToolArguments) -> ToolFuture<'a> {
		Box::pin(async move {
			self.calls.fetch_add(1, Ordering::SeqCst);

			let bearer = context
				.execute(|credential| async move { Ok(credential.bearer()) })
				.await?;

			Ok(ToolOutput::Single(json!({
				"identity": context.identity().as_str(),
				"bearer": bearer,
				"arguments": arguments,
			})))
		})
	}
}

/// Never finishes within any reasonable timeout.
struct Stalls;
impl ToolHandler for Stalls {
	fn invoke<'a>(&'a self, _: ToolContext<'a>, _: ToolArguments) -> ToolFuture<'a> {
		Box::pin(async move {
			tokio::time::sleep(std::time::Duration::from_secs(3_600)).await;

			Ok(ToolOutput::Single(Value::Null))
		})
	}
}

/// Calls upstream once per attempt, failing with a 503 while the `fail` argument is set.
#[derive(Default)]
struct Flaky {
	attempts: AtomicU32,
}
impl ToolHandler for Flaky {
	fn invoke<'a>(&'a self, context: ToolContext<'a>, arguments: ToolArguments) -> ToolFuture<'a> {
		Box::pin(async move {
			let fail = arguments.get("fail").and_then(Value::as_bool).unwrap_or_default();
			let value = context
				.execute(|_| {
					self.attempts.fetch_add(1, Ordering::SeqCst);

					async move {
						if fail {
							Err(UpstreamError::status(503, "Backend Error"))
						} else {
							Ok(json!("done"))
						}
					}
				})
				.await?;

			Ok(ToolOutput::Single(value))
		})
	}
}

/// Fetches every id in the `ids` argument through the batch executor.
struct GetMessages;
impl ToolHandler for GetMessages {
	fn invoke<'a>(&'a self, context: ToolContext<'a>, arguments: ToolArguments) -> ToolFuture<'a> {
		Box::pin(async move {
			let ids = arguments
				.get("ids")
				.and_then(Value::as_array)
				.cloned()
				.unwrap_or_default()
				.into_iter()
				.filter_map(|id| id.as_str().map(|id| (id.to_owned(), json!({ "id": id }))));
			let outcomes = context.submit_all(GET_MESSAGE, ids).await;

			Ok(ToolOutput::Batch(outcomes))
		})
	}
}

/// Echoes ids back, answering `missing` with a 404.
struct Mailbox;
impl BatchSubmitter for Mailbox {
	fn submit<'a>(&'a self, _: &'a ValidCredential, items: &'a [BatchItem]) -> SubmitFuture<'a> {
		Box::pin(async move {
			let response: BatchResponse = items
				.iter()
				.map(|item| {
					let result = match item.payload["id"].as_str() {
						Some("missing") => Err(UpstreamError::status(
							404,
							"Requested entity was not found.",
						)),
						_ => Ok(json!({ "id": item.payload["id"], "subject": "hello" })),
					};

					(item.id, result)
				})
				.collect();

			Ok(response)
		})
	}
}

async fn seeded_core(config: &CoreConfig) -> (BrokerCore, Identity) {
	let store = Arc::new(MemoryStore::default());
	let core = core_with(config, store.clone(), offline_client());
	let ada = identity("ada@example.com");

	seed(&store, &ada, &scopes(&[GMAIL_READONLY]), "access", "refresh", Duration::hours(1)).await;

	(core, ada)
}

#[tokio::test]
async fn successful_tools_answer_with_their_payload() {
	let (core, ada) = seeded_core(&CoreConfig::default()).await;
	let handler = Arc::new(WhoAmI::default());
	let registry = ToolRegistry::builder()
		.tool(ToolDescriptor::new(
			"whoami",
			Service::Gmail,
			scopes(&[GMAIL_READONLY]),
			handler.clone(),
		))
		.build()
		.expect("Registry should build successfully.");
	let server = core.tool_server(registry, None);
	let response =
		server.invoke(&ada, ToolRequest::new("whoami").with_argument("verbose", true)).await;

	assert_eq!(
		response,
		ToolResponse::Success(json!({
			"identity": "ada@example.com",
			"bearer": "Bearer access",
			"arguments": { "verbose": true },
		}))
	);
	assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn unknown_tools_and_missing_scopes_never_reach_a_handler() {
	let (core, ada) = seeded_core(&CoreConfig::default()).await;
	let handler = Arc::new(WhoAmI::default());
	let registry = ToolRegistry::builder()
		.tool(ToolDescriptor::new(
			"calendar_whoami",
			Service::Calendar,
			scopes(&[CALENDAR_FULL]),
			handler.clone(),
		))
		.build()
		.expect("Registry should build successfully.");
	let server = core.tool_server(registry, None);
	let response = server.invoke(&ada, ToolRequest::new("nope")).await;

	assert!(matches!(response, ToolResponse::Error { error_kind: ErrorKind::UnknownTool, .. }));

	let response = server.invoke(&ada, ToolRequest::new("calendar_whoami")).await;

	assert!(matches!(
		response,
		ToolResponse::Error { error_kind: ErrorKind::InsufficientScope, ref message }
			if message.contains(CALENDAR_FULL)
	));

	let stranger = identity("stranger@example.com");
	let response = server.invoke(&stranger, ToolRequest::new("calendar_whoami")).await;

	assert!(matches!(
		response,
		ToolResponse::Error { error_kind: ErrorKind::NotAuthenticated, .. }
	));
	assert_eq!(handler.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn slow_tools_are_cancelled_at_the_timeout() {
	let config = CoreConfig { tool_timeout_ms: Some(500), ..Default::default() };
	let (core, ada) = seeded_core(&config).await;
	let registry = ToolRegistry::builder()
		.tool(ToolDescriptor::new(
			"stall",
			Service::Gmail,
			scopes(&[GMAIL_READONLY]),
			Arc::new(Stalls),
		))
		.build()
		.expect("Registry should build successfully.");
	let server = core.tool_server(registry, None);
	let response = server.invoke(&ada, ToolRequest::new("stall")).await;

	assert!(matches!(response, ToolResponse::Error { error_kind: ErrorKind::Cancelled, .. }));
}

#[tokio::test(start_paused = true)]
async fn batch_shaped_tools_report_each_item() {
	let config = CoreConfig {
		batch: BatchConfig {
			window_ms: 20,
			item_limits: BTreeMap::from([(Service::Gmail, 10)]),
		},
		..Default::default()
	};
	let (core, ada) = seeded_core(&config).await;
	let executor = core
		.batch_executor()
		.submitter(Service::Gmail, GET_MESSAGE, Arc::new(Mailbox))
		.build()
		.expect("Executor should build for a batch-capable service.");
	let registry = ToolRegistry::builder()
		.tool(ToolDescriptor::new(
			"get_messages",
			Service::Gmail,
			scopes(&[GMAIL_READONLY]),
			Arc::new(GetMessages),
		))
		.build()
		.expect("Registry should build successfully.");
	let server = core.tool_server(registry, Some(executor.clone()));
	let response = server
		.invoke(&ada, ToolRequest::new("get_messages").with_argument("ids", json!(["a", "missing", "b"])))
		.await;
	let ToolResponse::Batch(items) = response else {
		panic!("Expected a batch response, got {response:?}.");
	};

	assert_eq!(items.len(), 3);
	assert_eq!(
		items.get("a"),
		Some(&ItemOutcome::Success { value: json!({ "id": "a", "subject": "hello" }) })
	);
	assert!(matches!(
		items.get("missing"),
		Some(ItemOutcome::Error { error_kind: ErrorKind::PermanentUpstreamFailure, .. })
	));
	assert!(matches!(items.get("b"), Some(ItemOutcome::Success { .. })));
	assert_eq!(executor.submissions(), 1);
}

#[tokio::test]
async fn batch_tools_without_an_executor_fail_per_item() {
	let (core, ada) = seeded_core(&CoreConfig::default()).await;
	let registry = ToolRegistry::builder()
		.tool(ToolDescriptor::new(
			"get_messages",
			Service::Gmail,
			scopes(&[GMAIL_READONLY]),
			Arc::new(GetMessages),
		))
		.build()
		.expect("Registry should build successfully.");
	let server = core.tool_server(registry, None);
	let response = server
		.invoke(&ada, ToolRequest::new("get_messages").with_argument("ids", json!(["a"])))
		.await;

	assert!(matches!(
		response,
		ToolResponse::Batch(ref items)
			if matches!(items.get("a"), Some(ItemOutcome::Error { error_kind: ErrorKind::Configuration, .. }))
	));
}

#[tokio::test(start_paused = true)]
async fn timeouts_cancel_a_retry_backoff_without_touching_other_calls() {
	let config = CoreConfig {
		retry: RetryPolicy {
			max_attempts: 3,
			initial_backoff_ms: 10_000,
			max_backoff_ms: 60_000,
			multiplier: 2.0,
			jitter_ratio: 0.0,
		},
		tool_timeout_ms: Some(500),
		..Default::default()
	};
	let (core, ada) = seeded_core(&config).await;
	let handler = Arc::new(Flaky::default());
	let registry = ToolRegistry::builder()
		.tool(ToolDescriptor::new(
			"flaky",
			Service::Gmail,
			scopes(&[GMAIL_READONLY]),
			handler.clone(),
		))
		.build()
		.expect("Registry should build successfully.");
	let server = core.tool_server(registry, None);
	let (stuck, healthy) = tokio::join!(
		server.invoke(&ada, ToolRequest::new("flaky").with_argument("fail", true)),
		server.invoke(&ada, ToolRequest::new("flaky")),
	);

	assert!(matches!(stuck, ToolResponse::Error { error_kind: ErrorKind::Cancelled, .. }));
	assert_eq!(healthy, ToolResponse::Success(json!("done")));
	// One attempt each; the failing call never got past its first backoff.
	assert_eq!(handler.attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn consent_covers_the_catalog_and_tool_scopes_of_enabled_services() {
	let config = CoreConfig {
		enabled_services: vec![Service::Gmail, Service::Calendar],
		..Default::default()
	};
	let (core, _) = seeded_core(&config).await;
	let registry = ToolRegistry::builder()
		.tool(ToolDescriptor::new(
			"whoami",
			Service::Gmail,
			scopes(&[GMAIL_READONLY]),
			Arc::new(WhoAmI::default()),
		))
		.tool(ToolDescriptor::new(
			"list_files",
			Service::Drive,
			scopes(&[DRIVE_FULL]),
			Arc::new(WhoAmI::default()),
		))
		.build()
		.expect("Registry should build successfully.");
	let consent = core.consent_scopes(&registry).expect("Catalog scopes should be valid.");

	assert!(consent.contains(OPENID));
	assert!(consent.contains(GMAIL_READONLY));
	// Catalog scopes reach consent even when no tool declares them.
	assert!(consent.contains(GMAIL_SEND));
	assert!(consent.contains(CALENDAR_FULL));
	assert!(!consent.contains(DRIVE_FULL));
}

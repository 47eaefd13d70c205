//! Transport-facing tool invocation surface and the assembly of the core components.

// crates.io
use serde_json::Value;
// self
use crate::{
	_prelude::*,
	auth::{Identity, ScopeSet},
	batch::{BatchExecutor, BatchExecutorBuilder},
	broker::CredentialBroker,
	config::CoreConfig,
	dispatch::RequestDispatcher,
	error::{ConfigError, ErrorKind},
	flows::{AuthFlowController, ReqwestOAuthClient, TokenAuthority},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	provider::ProviderDescriptor,
	ratelimit::RateLimiter,
	registry::{ItemOutcome, ToolArguments, ToolContext, ToolOutput, ToolRegistry},
	service::{self, scopes},
	store::TokenStore,
};

/// One tool call as received from the transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
	/// Registered tool name.
	pub tool_name: String,
	/// Named arguments.
	#[serde(default)]
	pub arguments: ToolArguments,
}
impl ToolRequest {
	/// Request without arguments.
	pub fn new(tool_name: impl Into<String>) -> Self {
		Self { tool_name: tool_name.into(), arguments: ToolArguments::new() }
	}

	/// Adds one named argument.
	pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.arguments.insert(name.into(), value.into());

		self
	}
}

/// Terminal answer handed back to the transport.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolResponse {
	/// Payload of a single-item tool.
	Success(Value),
	/// Structured failure.
	Error {
		/// Stable error label.
		error_kind: ErrorKind,
		/// Human-readable description.
		message: String,
	},
	/// Per-item outcomes of a batch-shaped tool keyed by input identifier.
	Batch(BTreeMap<String, ItemOutcome>),
}
impl ToolResponse {
	/// Renders `error` as a structured failure.
	pub fn from_error(error: &Error) -> Self {
		Self::Error { error_kind: error.kind(), message: error.to_string() }
	}

	/// Returns `true` unless the response is [`ToolResponse::Error`].
	pub fn is_success(&self) -> bool {
		!matches!(self, Self::Error { .. })
	}
}
impl From<Result<ToolOutput>> for ToolResponse {
	fn from(result: Result<ToolOutput>) -> Self {
		match result {
			Ok(ToolOutput::Single(value)) => Self::Success(value),
			Ok(ToolOutput::Batch(items)) => Self::Batch(items),
			Err(e) => Self::from_error(&e),
		}
	}
}

/// Runs registered tools for authenticated identities.
///
/// Each invocation looks the tool up, checks the identity's credential against the tool's scopes
/// before any handler code runs, then hands the handler a [`ToolContext`]. Failures never escape
/// as panics or propagate to other invocations; they become [`ToolResponse::Error`].
#[derive(Clone, Debug)]
pub struct ToolServer {
	registry: Arc<ToolRegistry>,
	dispatcher: RequestDispatcher,
	batch: Option<BatchExecutor>,
	timeout: Option<StdDuration>,
}
impl ToolServer {
	/// Creates a server over a frozen registry.
	pub fn new(registry: impl Into<Arc<ToolRegistry>>, dispatcher: RequestDispatcher) -> Self {
		Self { registry: registry.into(), dispatcher, batch: None, timeout: None }
	}

	/// Enables batch coalescing for handlers that submit items.
	pub fn with_batch_executor(mut self, batch: BatchExecutor) -> Self {
		self.batch = Some(batch);

		self
	}

	/// Bounds every invocation; expiry yields [`Error::Cancelled`].
	pub fn with_timeout(mut self, timeout: StdDuration) -> Self {
		self.timeout = Some(timeout);

		self
	}

	/// Tool catalog.
	pub fn registry(&self) -> &ToolRegistry {
		&self.registry
	}

	/// Invokes `request` for `identity`.
	pub async fn invoke(&self, identity: &Identity, request: ToolRequest) -> ToolResponse {
		self.call(identity, request).await.into()
	}

	/// Invokes `request` for `identity`, keeping the typed error.
	pub async fn call(&self, identity: &Identity, request: ToolRequest) -> Result<ToolOutput> {
		const KIND: FlowKind = FlowKind::Tool;

		let span = FlowSpan::new(KIND, "invoke");
		let tool = request.tool_name.clone();

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let run = span.instrument(self.run(identity, request));
		let result = match self.timeout {
			Some(limit) => tokio::time::timeout(limit, run).await.unwrap_or(Err(Error::Cancelled)),
			None => run.await,
		};

		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

		if let Err(e) = &result {
			tracing::warn!(
				tool = %tool,
				identity = %identity,
				kind = %e.kind(),
				error = %e,
				"Tool invocation failed."
			);
		}

		result
	}

	async fn run(&self, identity: &Identity, request: ToolRequest) -> Result<ToolOutput> {
		let descriptor = self.registry.lookup(&request.tool_name)?;

		// Scope and credential problems surface before the handler does any work.
		self.dispatcher.broker().acquire(identity, descriptor.required_scopes()).await?;

		let context =
			ToolContext::new(identity, descriptor, &self.dispatcher, self.batch.as_ref());

		descriptor.handler().invoke(context, request.arguments).await
	}
}

/// The assembled credential and dispatch components for one OAuth client.
#[derive(Clone, Debug)]
pub struct BrokerCore {
	config: CoreConfig,
	flows: Arc<AuthFlowController>,
	broker: CredentialBroker,
	dispatcher: RequestDispatcher,
}
impl BrokerCore {
	/// Assembles the core against Google's OAuth endpoints.
	pub fn from_config(config: &CoreConfig, store: Arc<dyn TokenStore>) -> Result<Self> {
		config.validate()?;

		let client_id =
			config.client_id.clone().ok_or(ConfigError::MissingSetting { name: "client_id" })?;
		let descriptor = ProviderDescriptor::google().map_err(ConfigError::from)?;
		let mut client = ReqwestOAuthClient::new(descriptor, client_id);

		if let Some(secret) = config.client_secret.as_deref().filter(|secret| !secret.is_empty()) {
			client = client.with_client_secret(secret);
		}

		Self::with_authority(config, store, Arc::new(client))
	}

	/// Assembles the core around an existing token authority.
	pub fn with_authority(
		config: &CoreConfig,
		store: Arc<dyn TokenStore>,
		authority: Arc<dyn TokenAuthority>,
	) -> Result<Self> {
		config.retry.validate()?;
		config.batch.validate()?;

		let provider = authority.descriptor().id.clone();
		let base_scope = ScopeSet::new(scopes::BASE.iter().copied()).map_err(ConfigError::from)?;
		let flows = AuthFlowController::new(authority.clone(), store.clone(), config.redirect_uri()?)
			.with_session_ttl(config.broker.session_ttl())
			.with_base_scope(base_scope);
		let broker = CredentialBroker::new(store, authority)
			.with_safety_margin(config.broker.safety_margin());
		let limiter = Arc::new(RateLimiter::new(&config.rate_limits)?);
		let dispatcher = RequestDispatcher::new(broker.clone(), limiter, config.retry.clone());

		tracing::info!(
			provider = %provider,
			services = ?config.enabled_services,
			"Credential core assembled."
		);

		Ok(Self { config: config.clone(), flows: Arc::new(flows), broker, dispatcher })
	}

	/// Configuration the core was built from.
	pub fn config(&self) -> &CoreConfig {
		&self.config
	}

	/// Authorization flow controller.
	pub fn flows(&self) -> &Arc<AuthFlowController> {
		&self.flows
	}

	/// Credential broker.
	pub fn broker(&self) -> &CredentialBroker {
		&self.broker
	}

	/// Request dispatcher.
	pub fn dispatcher(&self) -> &RequestDispatcher {
		&self.dispatcher
	}

	/// Starts a batch executor builder over the core's dispatcher and batch settings.
	pub fn batch_executor(&self) -> BatchExecutorBuilder {
		BatchExecutor::builder(self.dispatcher.clone(), self.config.batch.clone())
	}

	/// Scopes to request on first consent so every enabled tool works without another prompt.
	///
	/// The base identity scopes and the catalog scopes of each enabled service are unioned with
	/// whatever the registered tools of those services declare.
	pub fn consent_scopes(&self, registry: &ToolRegistry) -> Result<ScopeSet> {
		let enabled = &self.config.enabled_services;
		let catalog = service::scopes_for_services(enabled).map_err(ConfigError::from)?;

		Ok(catalog.union(&registry.scopes_for_services(enabled)))
	}

	/// Creates a tool server over `registry` with the configured timeout.
	pub fn tool_server(&self, registry: ToolRegistry, batch: Option<BatchExecutor>) -> ToolServer {
		let mut server = ToolServer::new(registry, self.dispatcher.clone());

		if let Some(batch) = batch {
			server = server.with_batch_executor(batch);
		}
		if let Some(timeout) = self.config.tool_timeout() {
			server = server.with_timeout(timeout);
		}

		server
	}
}

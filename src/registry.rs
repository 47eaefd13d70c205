//! Static catalog of tools and the context handed to their handlers.

// std
use std::collections::BTreeSet;
// crates.io
use futures::future;
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	auth::{Identity, ScopeSet},
	batch::BatchExecutor,
	broker::ValidCredential,
	dispatch::{RequestDispatcher, UpstreamError},
	error::{ConfigError, ErrorKind},
	service::Service,
};

/// Named tool arguments as received from the transport.
pub type ToolArguments = Map<String, Value>;

/// Boxed future returned by [`ToolHandler::invoke`].
pub type ToolFuture<'a> = Pin<Box<dyn Future<Output = Result<ToolOutput>> + 'a + Send>>;

/// Service-specific glue that turns tool arguments into upstream calls.
pub trait ToolHandler
where
	Self: Send + Sync,
{
	/// Runs the tool for the identity carried by `context`.
	fn invoke<'a>(&'a self, context: ToolContext<'a>, arguments: ToolArguments) -> ToolFuture<'a>;
}

/// Value produced by a tool handler.
#[derive(Clone, Debug, PartialEq)]
pub enum ToolOutput {
	/// Result of a single-item tool.
	Single(Value),
	/// Per-item outcomes of a batch-shaped tool keyed by input identifier.
	Batch(BTreeMap<String, ItemOutcome>),
}

/// Terminal result of one item of a batch-shaped tool.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
	/// The item succeeded.
	Success {
		/// Item payload.
		value: Value,
	},
	/// The item failed.
	Error {
		/// Stable error label.
		error_kind: ErrorKind,
		/// Human-readable description.
		message: String,
	},
}
impl From<Result<Value>> for ItemOutcome {
	fn from(result: Result<Value>) -> Self {
		match result {
			Ok(value) => Self::Success { value },
			Err(e) => Self::Error { error_kind: e.kind(), message: e.to_string() },
		}
	}
}

/// Registration record of one tool.
#[derive(Clone)]
pub struct ToolDescriptor {
	name: String,
	description: String,
	service: Service,
	required_scopes: ScopeSet,
	handler: Arc<dyn ToolHandler>,
}
impl ToolDescriptor {
	/// Describes a tool named `name` that calls `service` with `required_scopes`.
	pub fn new(
		name: impl Into<String>,
		service: Service,
		required_scopes: ScopeSet,
		handler: Arc<dyn ToolHandler>,
	) -> Self {
		Self { name: name.into(), description: String::new(), service, required_scopes, handler }
	}

	/// Attaches the human-readable description advertised to clients.
	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = description.into();

		self
	}

	/// Tool name.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Human-readable description.
	pub fn description(&self) -> &str {
		&self.description
	}

	/// Upstream service the tool calls.
	pub fn service(&self) -> Service {
		self.service
	}

	/// Scopes the credential must grant before the handler runs.
	pub fn required_scopes(&self) -> &ScopeSet {
		&self.required_scopes
	}

	/// Handler invoked for the tool.
	pub fn handler(&self) -> &dyn ToolHandler {
		self.handler.as_ref()
	}
}
impl Debug for ToolDescriptor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ToolDescriptor")
			.field("name", &self.name)
			.field("service", &self.service)
			.field("required_scopes", &self.required_scopes)
			.finish_non_exhaustive()
	}
}

/// Collects tool registrations before the registry is frozen.
#[derive(Debug, Default)]
pub struct ToolRegistryBuilder {
	tools: Vec<ToolDescriptor>,
	enabled: Option<BTreeSet<Service>>,
}
impl ToolRegistryBuilder {
	/// Registers a tool.
	pub fn tool(mut self, descriptor: ToolDescriptor) -> Self {
		self.tools.push(descriptor);

		self
	}

	/// Keeps only tools whose service is in `services`; all services are kept by default.
	pub fn enabled_services<I>(mut self, services: I) -> Self
	where
		I: IntoIterator<Item = Service>,
	{
		self.enabled = Some(services.into_iter().collect());

		self
	}

	/// Freezes the registry.
	///
	/// Duplicate names are rejected even when one of the duplicates would be filtered out.
	pub fn build(self) -> Result<ToolRegistry, ConfigError> {
		let mut tools = BTreeMap::new();

		for descriptor in self.tools {
			if tools.contains_key(&descriptor.name) {
				return Err(ConfigError::DuplicateTool { name: descriptor.name });
			}

			tools.insert(descriptor.name.clone(), descriptor);
		}

		if let Some(enabled) = &self.enabled {
			tools.retain(|_, descriptor| enabled.contains(&descriptor.service));
		}

		Ok(ToolRegistry { tools })
	}
}

/// Immutable map from tool name to [`ToolDescriptor`].
#[derive(Debug)]
pub struct ToolRegistry {
	tools: BTreeMap<String, ToolDescriptor>,
}
impl ToolRegistry {
	/// Starts an empty builder.
	pub fn builder() -> ToolRegistryBuilder {
		ToolRegistryBuilder::default()
	}

	/// Finds the tool registered under `name`.
	pub fn lookup(&self, name: &str) -> Result<&ToolDescriptor> {
		self.tools.get(name).ok_or_else(|| Error::UnknownTool { name: name.to_owned() })
	}

	/// Scopes required by the tool registered under `name`, for preflight checks.
	pub fn required_scopes(&self, name: &str) -> Result<&ScopeSet> {
		self.lookup(name).map(ToolDescriptor::required_scopes)
	}

	/// Registered tool names in lexical order.
	pub fn names(&self) -> impl Iterator<Item = &str> {
		self.tools.keys().map(String::as_str)
	}

	/// Number of registered tools.
	pub fn len(&self) -> usize {
		self.tools.len()
	}

	/// Returns `true` when no tool is registered.
	pub fn is_empty(&self) -> bool {
		self.tools.is_empty()
	}

	/// Union of the scopes required by every tool of the given services.
	///
	/// Useful to request all grants a user will need in one consent screen.
	pub fn scopes_for_services(&self, services: &[Service]) -> ScopeSet {
		self.tools
			.values()
			.filter(|descriptor| services.contains(&descriptor.service))
			.fold(ScopeSet::default(), |acc, descriptor| acc.union(&descriptor.required_scopes))
	}
}

/// Everything a handler needs for one invocation.
#[derive(Clone, Copy)]
pub struct ToolContext<'a> {
	identity: &'a Identity,
	descriptor: &'a ToolDescriptor,
	dispatcher: &'a RequestDispatcher,
	batch: Option<&'a BatchExecutor>,
}
impl<'a> ToolContext<'a> {
	/// Binds the invocation to its collaborators.
	pub fn new(
		identity: &'a Identity,
		descriptor: &'a ToolDescriptor,
		dispatcher: &'a RequestDispatcher,
		batch: Option<&'a BatchExecutor>,
	) -> Self {
		Self { identity, descriptor, dispatcher, batch }
	}

	/// Identity the tool runs for.
	pub fn identity(&self) -> &'a Identity {
		self.identity
	}

	/// Descriptor of the running tool.
	pub fn descriptor(&self) -> &'a ToolDescriptor {
		self.descriptor
	}

	/// Dispatcher for calls the helpers below do not cover.
	pub fn dispatcher(&self) -> &'a RequestDispatcher {
		self.dispatcher
	}

	/// Runs one upstream call with the tool's scopes and service.
	pub async fn execute<T, F, Fut>(&self, call: F) -> Result<T>
	where
		F: Fn(ValidCredential) -> Fut,
		Fut: Future<Output = Result<T, UpstreamError>>,
	{
		self.dispatcher
			.execute(self.identity, &self.descriptor.required_scopes, self.descriptor.service, call)
			.await
	}

	/// Enqueues one item of `operation` into the batch executor.
	pub async fn submit(&self, operation: &str, payload: Value) -> Result<Value> {
		let batch = self.batch.ok_or_else(|| ConfigError::BatchUnsupported {
			service: self.descriptor.service.as_str(),
			operation: operation.to_owned(),
		})?;

		batch
			.submit(
				self.identity,
				&self.descriptor.required_scopes,
				self.descriptor.service,
				operation,
				payload,
			)
			.await
	}

	/// Enqueues every `(input id, payload)` pair concurrently and collects per-item outcomes.
	pub async fn submit_all<I>(&self, operation: &str, items: I) -> BTreeMap<String, ItemOutcome>
	where
		I: IntoIterator<Item = (String, Value)>,
	{
		let pending = items.into_iter().map(|(key, payload)| async move {
			let outcome = ItemOutcome::from(self.submit(operation, payload).await);

			(key, outcome)
		});

		future::join_all(pending).await.into_iter().collect()
	}
}
impl Debug for ToolContext<'_> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ToolContext")
			.field("identity", self.identity)
			.field("tool", &self.descriptor.name)
			.field("batching", &self.batch.is_some())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	struct Echo;
	impl ToolHandler for Echo {
		fn invoke<'a>(&'a self, _: ToolContext<'a>, arguments: ToolArguments) -> ToolFuture<'a> {
			Box::pin(async move { Ok(ToolOutput::Single(Value::Object(arguments))) })
		}
	}

	fn scopes(values: &[&str]) -> ScopeSet {
		ScopeSet::new(values.iter().copied()).expect("Scope fixture should be valid.")
	}

	fn descriptor(name: &str, service: Service, required: &[&str]) -> ToolDescriptor {
		ToolDescriptor::new(name, service, scopes(required), Arc::new(Echo))
	}

	#[test]
	fn lookup_and_required_scopes() {
		let registry = ToolRegistry::builder()
			.tool(descriptor("search_gmail_messages", Service::Gmail, &["gmail.readonly"]))
			.tool(descriptor("list_calendars", Service::Calendar, &["calendar.readonly"]))
			.build()
			.expect("Registry should build.");

		assert_eq!(registry.len(), 2);
		assert_eq!(
			registry.lookup("list_calendars").expect("Tool should exist.").service(),
			Service::Calendar
		);
		assert_eq!(
			registry.required_scopes("search_gmail_messages").expect("Tool should exist."),
			&scopes(&["gmail.readonly"])
		);
		assert!(matches!(
			registry.lookup("send_fax"),
			Err(Error::UnknownTool { name }) if name == "send_fax"
		));
		assert_eq!(
			registry.names().collect::<Vec<_>>(),
			vec!["list_calendars", "search_gmail_messages"]
		);
	}

	#[test]
	fn duplicate_names_fail_the_build() {
		let result = ToolRegistry::builder()
			.tool(descriptor("get_events", Service::Calendar, &["calendar.readonly"]))
			.tool(descriptor("get_events", Service::Calendar, &["calendar.events"]))
			.build();

		assert!(matches!(result, Err(ConfigError::DuplicateTool { name }) if name == "get_events"));
	}

	#[test]
	fn disabled_services_are_filtered_and_scopes_unioned() {
		let registry = ToolRegistry::builder()
			.tool(descriptor("get_message", Service::Gmail, &["gmail.readonly"]))
			.tool(descriptor("send_message", Service::Gmail, &["gmail.send"]))
			.tool(descriptor("list_tasks", Service::Tasks, &["tasks.readonly"]))
			.enabled_services([Service::Gmail])
			.build()
			.expect("Registry should build.");

		assert!(registry.lookup("list_tasks").is_err());
		assert_eq!(
			registry.scopes_for_services(&[Service::Gmail, Service::Tasks]),
			scopes(&["gmail.readonly", "gmail.send"])
		);
		assert!(registry.scopes_for_services(&[Service::Drive]).is_empty());
	}

	#[test]
	fn item_outcomes_carry_error_kinds() {
		let ok = ItemOutcome::from(Ok(Value::from(7)));
		let failed = ItemOutcome::from(Err(Error::PermanentUpstreamFailure {
			status: Some(404),
			message: "Not Found".into(),
		}));

		assert_eq!(ok, ItemOutcome::Success { value: Value::from(7) });
		assert!(matches!(
			failed,
			ItemOutcome::Error { error_kind: ErrorKind::PermanentUpstreamFailure, .. }
		));
		assert_eq!(
			serde_json::to_value(&ok).expect("Outcome should serialize."),
			serde_json::json!({ "status": "success", "value": 7 })
		);
	}
}

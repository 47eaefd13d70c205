//! Request coalescing into upstream batch submissions.
//!
//! Items for the same service, operation, identity and required scopes that arrive within the
//! coalescing window share one upstream call. A batch closes when it reaches the service item
//! limit or when its window timer fires, whichever comes first; both paths hand the batch to a
//! detached flush task so no caller's control flow decides when a batch goes out. The flush runs
//! through the [`RequestDispatcher`], so the whole batch is rate limited and retried as one call,
//! and each caller receives exactly one result demultiplexed by [`CorrelationId`].

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use serde_json::Value;
use tokio::sync::oneshot;
// self
use crate::{
	_prelude::*,
	auth::{Identity, ScopeSet},
	broker::ValidCredential,
	dispatch::{RequestDispatcher, UpstreamError},
	error::ConfigError,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	service::Service,
};

/// Per-item results of one submission keyed by the items' correlation ids.
pub type BatchResponse = HashMap<CorrelationId, Result<Value, UpstreamError>>;

/// Boxed future returned by [`BatchSubmitter::submit`].
pub type SubmitFuture<'a> =
	Pin<Box<dyn Future<Output = Result<BatchResponse, UpstreamError>> + 'a + Send>>;

/// Sends one batch of items for a single service operation.
///
/// A whole-submission failure is returned as `Err`; item-level failures go inside the
/// [`BatchResponse`]. Items absent from the response fail with
/// [`Error::BatchTransportFailure`].
pub trait BatchSubmitter
where
	Self: Send + Sync,
{
	/// Submits `items` with `credential`.
	fn submit<'a>(&'a self, credential: &'a ValidCredential, items: &'a [BatchItem])
	-> SubmitFuture<'a>;
}

/// Identifier assigned to each item at enqueue time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(u64);
impl CorrelationId {
	/// Wraps a raw identifier.
	pub const fn new(value: u64) -> Self {
		Self(value)
	}

	/// Raw identifier.
	pub const fn get(self) -> u64 {
		self.0
	}
}
impl Display for CorrelationId {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "item-{}", self.0)
	}
}

/// One enqueued request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
	/// Correlation id used to route the result back.
	pub id: CorrelationId,
	/// Operation-specific request payload.
	pub payload: Value,
}

/// Coalescing settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
	/// Coalescing window in milliseconds, measured from a batch's first item.
	pub window_ms: u64,
	/// Per-service overrides of the item limit.
	pub item_limits: BTreeMap<Service, usize>,
}
impl BatchConfig {
	/// Coalescing window as a [`StdDuration`].
	pub fn window(&self) -> StdDuration {
		StdDuration::from_millis(self.window_ms)
	}

	/// Effective item limit, or `None` when the service cannot batch.
	pub fn item_limit(&self, service: Service) -> Option<usize> {
		let default = service.item_limit()?;

		Some(self.item_limits.get(&service).copied().unwrap_or(default))
	}

	/// Rejects zero item limits and limits above what the service accepts per batch.
	pub fn validate(&self) -> Result<(), ConfigError> {
		for (service, limit) in &self.item_limits {
			if *limit == 0 {
				return Err(ConfigError::OutOfRange {
					name: "batch.item_limits",
					reason: "item limits must be at least 1",
				});
			}
			if service.item_limit().is_none_or(|max| *limit > max) {
				return Err(ConfigError::OutOfRange {
					name: "batch.item_limits",
					reason: "item limits cannot exceed the service batch maximum",
				});
			}
		}

		Ok(())
	}
}
impl Default for BatchConfig {
	fn default() -> Self {
		Self { window_ms: 50, item_limits: BTreeMap::new() }
	}
}

/// Builder for [`BatchExecutor`].
pub struct BatchExecutorBuilder {
	dispatcher: RequestDispatcher,
	config: BatchConfig,
	submitters: HashMap<(Service, String), Arc<dyn BatchSubmitter>>,
}
impl BatchExecutorBuilder {
	/// Registers the submitter for `service`/`operation`, replacing any earlier one.
	pub fn submitter(
		mut self,
		service: Service,
		operation: impl Into<String>,
		submitter: Arc<dyn BatchSubmitter>,
	) -> Self {
		self.submitters.insert((service, operation.into()), submitter);

		self
	}

	/// Validates the configuration and every registration.
	pub fn build(self) -> Result<BatchExecutor, ConfigError> {
		self.config.validate()?;

		if let Some((service, operation)) =
			self.submitters.keys().find(|(service, _)| !service.batch_capable())
		{
			return Err(ConfigError::BatchUnsupported {
				service: service.as_str(),
				operation: operation.clone(),
			});
		}

		Ok(BatchExecutor {
			inner: Arc::new(ExecutorInner {
				dispatcher: self.dispatcher,
				config: self.config,
				submitters: self.submitters,
				open: Default::default(),
				next_id: AtomicU64::new(0),
				generations: AtomicU64::new(0),
				submissions: AtomicU64::new(0),
			}),
		})
	}
}

/// Coalesces item requests into upstream batch submissions.
#[derive(Clone)]
pub struct BatchExecutor {
	inner: Arc<ExecutorInner>,
}
impl BatchExecutor {
	/// Starts a builder around `dispatcher`.
	pub fn builder(dispatcher: RequestDispatcher, config: BatchConfig) -> BatchExecutorBuilder {
		BatchExecutorBuilder { dispatcher, config, submitters: HashMap::new() }
	}

	/// Enqueues `payload` and waits for its own result.
	///
	/// # Errors
	///
	/// - [`ConfigError::BatchUnsupported`] when no submitter is registered for the pair.
	/// - The item's classified upstream failure (never retried on its own).
	/// - [`Error::BatchTransportFailure`] when the submission failed as a whole or lost the item;
	///   credential and rate-limit failures of the whole submission keep their own kind.
	pub async fn submit(
		&self,
		identity: &Identity,
		scopes: &ScopeSet,
		service: Service,
		operation: &str,
		payload: Value,
	) -> Result<Value> {
		let unsupported = || ConfigError::BatchUnsupported {
			service: service.as_str(),
			operation: operation.to_owned(),
		};
		let submitter = self
			.inner
			.submitters
			.get(&(service, operation.to_owned()))
			.cloned()
			.ok_or_else(unsupported)?;
		let limit = self.inner.config.item_limit(service).ok_or_else(unsupported)?;
		let key = BatchKey {
			service,
			operation: operation.to_owned(),
			identity: identity.clone(),
			scopes: scopes.clone(),
		};
		let (tx, rx) = oneshot::channel();
		let id = CorrelationId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
		let full = {
			let mut open = self.inner.open.lock();
			let batch = open.entry(key.clone()).or_insert_with(|| {
				let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);

				self.inner.arm_timer(key.clone(), generation);

				OpenBatch { generation, submitter, pending: Vec::new() }
			});

			batch.pending.push((BatchItem { id, payload }, tx));

			if batch.pending.len() >= limit { open.remove(&key) } else { None }
		};

		if let Some(batch) = full {
			tokio::spawn(ExecutorInner::flush(self.inner.clone(), key, batch));
		}

		rx.await.unwrap_or_else(|_| {
			Err(Error::BatchTransportFailure {
				message: "batch was abandoned before a result arrived".into(),
			})
		})
	}

	/// Upstream batch calls made so far, retries included.
	///
	/// Batches that fail before reaching the submitter (missing credential, local rate limit) are
	/// not counted.
	pub fn submissions(&self) -> u64 {
		self.inner.submissions.load(Ordering::Relaxed)
	}

	/// Batches currently accepting items.
	pub fn open_batches(&self) -> usize {
		self.inner.open.lock().len()
	}
}
impl Debug for BatchExecutor {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("BatchExecutor")
			.field("config", &self.inner.config)
			.field("operations", &self.inner.submitters.len())
			.field("submissions", &self.submissions())
			.finish()
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct BatchKey {
	service: Service,
	operation: String,
	identity: Identity,
	// Items that need different scopes never share a credential check.
	scopes: ScopeSet,
}

struct OpenBatch {
	generation: u64,
	submitter: Arc<dyn BatchSubmitter>,
	pending: Vec<(BatchItem, oneshot::Sender<Result<Value>>)>,
}

struct ExecutorInner {
	dispatcher: RequestDispatcher,
	config: BatchConfig,
	submitters: HashMap<(Service, String), Arc<dyn BatchSubmitter>>,
	open: Mutex<HashMap<BatchKey, OpenBatch>>,
	next_id: AtomicU64,
	generations: AtomicU64,
	submissions: AtomicU64,
}
impl ExecutorInner {
	fn arm_timer(self: &Arc<Self>, key: BatchKey, generation: u64) {
		let inner = self.clone();
		let window = self.config.window();

		tokio::spawn(async move {
			tokio::time::sleep(window).await;

			// A batch that filled up early is gone, or replaced by a newer generation.
			let expired = {
				let mut open = inner.open.lock();

				match open.get(&key) {
					Some(batch) if batch.generation == generation => open.remove(&key),
					_ => None,
				}
			};

			if let Some(batch) = expired {
				Self::flush(inner, key, batch).await;
			}
		});
	}

	async fn flush(inner: Arc<Self>, key: BatchKey, batch: OpenBatch) {
		const KIND: FlowKind = FlowKind::Batch;

		let span = FlowSpan::new(KIND, key.service.as_str());
		let OpenBatch { submitter, pending, .. } = batch;
		let (items, waiters): (Vec<_>, Vec<_>) = pending.into_iter().unzip();

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		tracing::debug!(
			service = %key.service,
			operation = %key.operation,
			identity = %key.identity,
			items = items.len(),
			"Flushing batch."
		);

		let items = &items;
		let submitter = &submitter;
		let submissions = &inner.submissions;
		let result = span
			.instrument(inner.dispatcher.execute(
				&key.identity,
				&key.scopes,
				key.service,
				|credential| async move {
					submissions.fetch_add(1, Ordering::Relaxed);

					submitter.submit(&credential, items).await
				},
			))
			.await;

		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

		match result {
			Ok(mut responses) =>
				for (item, waiter) in items.iter().zip(waiters) {
					let outcome = match responses.remove(&item.id) {
						Some(Ok(value)) => Ok(value),
						Some(Err(failure)) => Err(failure.into_error(1)),
						None => Err(Error::BatchTransportFailure {
							message: format!("response carried no result for {}", item.id),
						}),
					};
					let _ = waiter.send(outcome);
				},
			Err(e) => {
				tracing::warn!(
					service = %key.service,
					operation = %key.operation,
					error = %e,
					"Batch submission failed."
				);

				for waiter in waiters {
					let _ = waiter.send(Err(e.for_batch_member()));
				}
			},
		}
	}
}

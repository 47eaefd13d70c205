//! Upstream call execution: credential, rate permit, call, classified retry.

pub mod retry;
pub mod upstream;

pub use retry::RetryPolicy;
pub use upstream::{UpstreamClass, UpstreamError};

// self
use crate::{
	_prelude::*,
	auth::{Identity, ScopeSet},
	broker::{CredentialBroker, ValidCredential},
	error::TransientError,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	ratelimit::RateLimiter,
	service::Service,
};

/// Runs upstream calls on behalf of an identity with retries and rate limiting.
///
/// Every attempt re-acquires the credential (so a refresh between attempts is picked up) and
/// takes a fresh rate permit. The dispatcher keeps no per-call state.
#[derive(Clone)]
pub struct RequestDispatcher {
	broker: CredentialBroker,
	limiter: Arc<RateLimiter>,
	policy: RetryPolicy,
}
impl RequestDispatcher {
	/// Creates a dispatcher from its collaborators.
	pub fn new(broker: CredentialBroker, limiter: Arc<RateLimiter>, policy: RetryPolicy) -> Self {
		Self { broker, limiter, policy }
	}

	/// Credential broker used for every attempt.
	pub fn broker(&self) -> &CredentialBroker {
		&self.broker
	}

	/// Shared rate limiter.
	pub fn limiter(&self) -> &RateLimiter {
		&self.limiter
	}

	/// Retry policy applied to every call.
	pub fn policy(&self) -> &RetryPolicy {
		&self.policy
	}

	/// Executes `call` with a unit rate cost.
	///
	/// See [`execute_weighted`](Self::execute_weighted).
	pub async fn execute<T, F, Fut>(
		&self,
		identity: &Identity,
		scopes: &ScopeSet,
		service: Service,
		call: F,
	) -> Result<T>
	where
		F: Fn(ValidCredential) -> Fut,
		Fut: Future<Output = Result<T, UpstreamError>>,
	{
		self.execute_weighted(identity, scopes, service, 1, call).await
	}

	/// Executes `call`, paying `cost` rate tokens per attempt.
	///
	/// Transient failures and rate signals are retried with backoff until the policy's attempt
	/// budget runs out, then reported as [`Error::TransientUpstreamFailure`] or
	/// [`Error::RateLimited`]. Credential errors other than token endpoint hiccups, local rate
	/// limit rejections, and permanent upstream failures are returned at once. Successful
	/// results are returned unmodified.
	pub async fn execute_weighted<T, F, Fut>(
		&self,
		identity: &Identity,
		scopes: &ScopeSet,
		service: Service,
		cost: u32,
		call: F,
	) -> Result<T>
	where
		F: Fn(ValidCredential) -> Fut,
		Fut: Future<Output = Result<T, UpstreamError>>,
	{
		const KIND: FlowKind = FlowKind::Dispatch;

		let span = FlowSpan::new(KIND, service.as_str());

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span.instrument(self.run(identity, scopes, service, cost, call)).await;

		obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

		result
	}

	async fn run<T, F, Fut>(
		&self,
		identity: &Identity,
		scopes: &ScopeSet,
		service: Service,
		cost: u32,
		call: F,
	) -> Result<T>
	where
		F: Fn(ValidCredential) -> Fut,
		Fut: Future<Output = Result<T, UpstreamError>>,
	{
		let max_attempts = self.policy.max_attempts.max(1);
		let mut attempt = 0;

		loop {
			attempt += 1;

			let credential = match self.broker.acquire(identity, scopes).await {
				Ok(credential) => credential,
				Err(e) if e.is_transient() && attempt < max_attempts => {
					let delay = self.policy.delay_for(attempt, token_retry_hint(&e));

					tracing::warn!(
						%service,
						attempt,
						delay_ms = delay.as_millis() as u64,
						error = %e,
						"Credential refresh failed transiently; retrying."
					);
					obs::record_retry(service.as_str());
					tokio::time::sleep(delay).await;

					continue;
				},
				Err(e) if e.is_transient() =>
					return Err(Error::TransientUpstreamFailure {
						attempts: attempt,
						status: token_status(&e),
						message: e.to_string(),
					}),
				Err(e) => return Err(e),
			};

			self.limiter.acquire(service, cost).await?;

			let mut failure = match call(credential).await {
				Ok(value) => return Ok(value),
				Err(failure) => failure,
			};
			let class = failure.class();

			if !matches!(class, UpstreamClass::Transient | UpstreamClass::RateSignal)
				|| attempt >= max_attempts
			{
				tracing::warn!(%service, attempt, error = %failure, "Upstream call failed.");

				// An exhausted rate signal always carries a suggested delay.
				if class == UpstreamClass::RateSignal && failure.retry_after.is_none() {
					failure.retry_after = Some(self.policy.delay_for(attempt, None));
				}

				return Err(failure.into_error(attempt));
			}

			let delay = self.policy.delay_for(attempt, failure.retry_after);

			tracing::warn!(
				%service,
				attempt,
				?class,
				delay_ms = delay.as_millis() as u64,
				error = %failure,
				"Upstream call failed; retrying."
			);
			obs::record_retry(service.as_str());
			tokio::time::sleep(delay).await;
		}
	}
}
impl Debug for RequestDispatcher {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestDispatcher")
			.field("broker", &self.broker)
			.field("limiter", &self.limiter)
			.field("policy", &self.policy)
			.finish()
	}
}

fn token_retry_hint(error: &Error) -> Option<StdDuration> {
	match error {
		Error::Transient(TransientError::TokenEndpoint { retry_after, .. }) =>
			retry_after.map(Duration::unsigned_abs),
		_ => None,
	}
}

fn token_status(error: &Error) -> Option<u16> {
	match error {
		Error::Transient(
			TransientError::TokenEndpoint { status, .. }
			| TransientError::TokenResponseParse { status, .. },
		) => *status,
		_ => None,
	}
}

//! Per-service token buckets shared by every identity.
//!
//! Each [`Service`] owns one GCRA limiter from `governor`. Callers wait for capacity up to the
//! configured maximum; a wait that would overrun it fails fast with [`Error::RateLimited`] so the
//! caller can surface the delay instead of hanging.
//!
//! The limiters read time from the tokio clock, the same clock the waits sleep on, so a paused
//! test runtime advances both together.

// std
use std::num::NonZeroU32;
// crates.io
use governor::{
	Quota, RateLimiter as GcraLimiter,
	clock::Clock,
	middleware::NoOpMiddleware,
	nanos::Nanos,
	state::{InMemoryState, NotKeyed},
};
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	error::ConfigError,
	service::{Service, ServiceQuota},
};

type DirectLimiter = GcraLimiter<NotKeyed, InMemoryState, TokioClock, NoOpMiddleware<Nanos>>;

/// Nanoseconds elapsed on the tokio clock since the limiter was built.
#[derive(Clone, Copy, Debug)]
struct TokioClock {
	origin: Instant,
}
impl Clock for TokioClock {
	type Instant = Nanos;

	fn now(&self) -> Nanos {
		Nanos::from(self.origin.elapsed())
	}
}

/// Rate limiter settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
	/// Longest a caller may wait for capacity, in milliseconds.
	pub max_wait_ms: u64,
	/// Per-service overrides of the built-in quotas.
	pub services: BTreeMap<Service, ServiceQuota>,
}
impl RateLimitConfig {
	/// Effective quota for `service`.
	pub fn quota_for(&self, service: Service) -> ServiceQuota {
		self.services.get(&service).copied().unwrap_or_else(|| service.default_quota())
	}

	/// Maximum wait as a [`StdDuration`].
	pub fn max_wait(&self) -> StdDuration {
		StdDuration::from_millis(self.max_wait_ms)
	}

	/// Rejects zero capacities and zero refill intervals.
	pub fn validate(&self) -> Result<(), ConfigError> {
		for quota in self.services.values() {
			if quota.capacity == 0 {
				return Err(ConfigError::OutOfRange {
					name: "rate_limits.services.capacity",
					reason: "capacity must be at least 1",
				});
			}
			if quota.refill_interval_ms == 0 {
				return Err(ConfigError::OutOfRange {
					name: "rate_limits.services.refill_interval_ms",
					reason: "refill interval must be at least 1ms",
				});
			}
		}

		Ok(())
	}
}
impl Default for RateLimitConfig {
	fn default() -> Self {
		Self { max_wait_ms: 30_000, services: BTreeMap::new() }
	}
}

/// Proof that capacity was reserved for one upstream call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RatePermit {
	/// Service the capacity was taken from.
	pub service: Service,
	/// Tokens consumed.
	pub cost: u32,
	/// Time spent waiting for capacity.
	pub waited: StdDuration,
}

struct Bucket {
	limiter: DirectLimiter,
	capacity: NonZeroU32,
}

/// Token-bucket limiter keyed by service.
pub struct RateLimiter {
	buckets: HashMap<Service, Bucket>,
	max_wait: StdDuration,
	clock: TokioClock,
}
impl RateLimiter {
	/// Builds one bucket per service from `config`.
	pub fn new(config: &RateLimitConfig) -> Result<Self, ConfigError> {
		config.validate()?;

		let clock = TokioClock { origin: Instant::now() };
		let mut buckets = HashMap::with_capacity(Service::ALL.len());

		for service in Service::ALL {
			let quota = config.quota_for(service);
			let capacity = NonZeroU32::new(quota.capacity).ok_or(ConfigError::OutOfRange {
				name: "rate_limits.services.capacity",
				reason: "capacity must be at least 1",
			})?;
			let gcra = Quota::with_period(quota.refill_interval())
				.ok_or(ConfigError::OutOfRange {
					name: "rate_limits.services.refill_interval_ms",
					reason: "refill interval must be at least 1ms",
				})?
				.allow_burst(capacity);

			buckets.insert(
				service,
				Bucket { limiter: DirectLimiter::direct_with_clock(gcra, &clock), capacity },
			);
		}

		Ok(Self { buckets, max_wait: config.max_wait(), clock })
	}

	/// Burst capacity configured for `service`.
	pub fn capacity(&self, service: Service) -> u32 {
		self.buckets.get(&service).map(|bucket| bucket.capacity.get()).unwrap_or(u32::MAX)
	}

	/// Longest wait [`acquire`](Self::acquire) accepts.
	pub fn max_wait(&self) -> StdDuration {
		self.max_wait
	}

	/// Takes `cost` tokens from the service bucket, waiting for refills when needed.
	///
	/// Fails with [`Error::RateLimited`] when the projected wait would exceed the maximum wait,
	/// or when `cost` exceeds the bucket capacity (no hint in that case). A zero cost is always
	/// granted. Dropping the returned future abandons the wait without consuming tokens.
	pub async fn acquire(&self, service: Service, cost: u32) -> Result<RatePermit> {
		let Some(bucket) = self.buckets.get(&service) else {
			return Ok(RatePermit { service, cost, waited: StdDuration::ZERO });
		};
		let Some(n) = NonZeroU32::new(cost) else {
			return Ok(RatePermit { service, cost, waited: StdDuration::ZERO });
		};
		let started = Instant::now();

		loop {
			match bucket.limiter.check_n(n) {
				Ok(Ok(())) =>
					return Ok(RatePermit { service, cost, waited: started.elapsed() }),
				Ok(Err(not_until)) => {
					let wait = not_until.wait_time_from(self.clock.now());

					if started.elapsed() + wait > self.max_wait {
						tracing::debug!(
							%service,
							cost,
							wait_ms = wait.as_millis() as u64,
							"Rate limit wait exceeds the allowed maximum."
						);

						return Err(Error::RateLimited { retry_after: Some(wait) });
					}

					tokio::time::sleep(wait).await;
				},
				Err(_) => {
					tracing::warn!(
						%service,
						cost,
						capacity = bucket.capacity.get(),
						"Requested cost exceeds bucket capacity."
					);

					return Err(Error::RateLimited { retry_after: None });
				},
			}
		}
	}
}
impl Debug for RateLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let capacities = self
			.buckets
			.iter()
			.map(|(service, bucket)| (service.as_str(), bucket.capacity.get()))
			.collect::<BTreeMap<_, _>>();

		f.debug_struct("RateLimiter")
			.field("capacities", &capacities)
			.field("max_wait", &self.max_wait)
			.finish()
	}
}

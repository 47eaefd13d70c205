//! Exponential backoff with jitter.

// crates.io
use rand::Rng;
// self
use crate::{_prelude::*, error::ConfigError};

/// Retry budget and backoff curve for upstream calls.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
	/// Attempts per call, the first one included.
	pub max_attempts: u32,
	/// Delay before the second attempt, and the floor for every delay.
	pub initial_backoff_ms: u64,
	/// Ceiling for every delay, upstream hints included.
	pub max_backoff_ms: u64,
	/// Growth factor between consecutive delays.
	pub multiplier: f64,
	/// Upper bound of the random extra delay, as a fraction of the base delay.
	pub jitter_ratio: f64,
}
impl RetryPolicy {
	/// Policy that never retries.
	pub fn no_retry() -> Self {
		Self { max_attempts: 1, ..Default::default() }
	}

	/// Floor delay as a [`StdDuration`].
	pub fn initial_backoff(&self) -> StdDuration {
		StdDuration::from_millis(self.initial_backoff_ms)
	}

	/// Ceiling delay as a [`StdDuration`].
	pub fn max_backoff(&self) -> StdDuration {
		StdDuration::from_millis(self.max_backoff_ms)
	}

	/// Base delay after failed attempt number `attempt` (1-based), before jitter.
	pub fn backoff_for(&self, attempt: u32) -> StdDuration {
		let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
		let millis = self.initial_backoff_ms as f64 * self.multiplier.powi(exponent);

		if !millis.is_finite() || millis >= self.max_backoff_ms as f64 {
			self.max_backoff()
		} else {
			StdDuration::from_millis(millis as u64)
		}
	}

	/// Delay to sleep after failed attempt number `attempt`.
	///
	/// The jittered base delay is raised to `hint` when the upstream asked for longer, then kept
	/// within `[initial_backoff, max_backoff]`.
	pub fn delay_for(&self, attempt: u32, hint: Option<StdDuration>) -> StdDuration {
		let base = self.backoff_for(attempt);
		let jitter = if self.jitter_ratio > 0.0 {
			base.mul_f64(rand::rng().random_range(0.0..=self.jitter_ratio))
		} else {
			StdDuration::ZERO
		};
		let delay = (base + jitter).max(hint.unwrap_or_default());

		delay.min(self.max_backoff()).max(self.initial_backoff())
	}

	/// Rejects policies that cannot produce a sane schedule.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_attempts == 0 {
			return Err(ConfigError::OutOfRange {
				name: "retry.max_attempts",
				reason: "at least one attempt is required",
			});
		}
		if !(self.multiplier >= 1.0 && self.multiplier.is_finite()) {
			return Err(ConfigError::OutOfRange {
				name: "retry.multiplier",
				reason: "multiplier must be a finite number of at least 1",
			});
		}
		if !(0.0..=1.0).contains(&self.jitter_ratio) {
			return Err(ConfigError::OutOfRange {
				name: "retry.jitter_ratio",
				reason: "jitter ratio must be between 0 and 1",
			});
		}
		if self.initial_backoff_ms > self.max_backoff_ms {
			return Err(ConfigError::OutOfRange {
				name: "retry.initial_backoff_ms",
				reason: "initial backoff cannot exceed the maximum backoff",
			});
		}

		Ok(())
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 4,
			initial_backoff_ms: 500,
			max_backoff_ms: 30_000,
			multiplier: 2.0,
			jitter_ratio: 0.25,
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn backoff_grows_until_ceiling() {
		let policy = RetryPolicy { max_backoff_ms: 3_000, ..Default::default() };

		assert_eq!(policy.backoff_for(1), StdDuration::from_millis(500));
		assert_eq!(policy.backoff_for(2), StdDuration::from_millis(1_000));
		assert_eq!(policy.backoff_for(3), StdDuration::from_millis(2_000));
		assert_eq!(policy.backoff_for(4), StdDuration::from_millis(3_000));
		assert_eq!(policy.backoff_for(64), StdDuration::from_millis(3_000));
	}

	#[test]
	fn jitter_stays_within_ratio() {
		let policy = RetryPolicy::default();

		for _ in 0..256 {
			let delay = policy.delay_for(2, None);

			assert!(delay >= StdDuration::from_millis(1_000));
			assert!(delay <= StdDuration::from_millis(1_250));
		}
	}

	#[test]
	fn hints_raise_delay_but_respect_ceiling() {
		let policy = RetryPolicy { jitter_ratio: 0.0, ..Default::default() };

		assert_eq!(policy.delay_for(1, Some(StdDuration::from_secs(4))), StdDuration::from_secs(4));
		assert_eq!(
			policy.delay_for(1, Some(StdDuration::from_secs(600))),
			StdDuration::from_secs(30)
		);
		assert_eq!(policy.delay_for(1, Some(StdDuration::ZERO)), StdDuration::from_millis(500));
	}

	#[test]
	fn validation_rejects_nonsense() {
		assert!(RetryPolicy::default().validate().is_ok());
		assert!(RetryPolicy { max_attempts: 0, ..Default::default() }.validate().is_err());
		assert!(RetryPolicy { multiplier: 0.5, ..Default::default() }.validate().is_err());
		assert!(RetryPolicy { jitter_ratio: 1.5, ..Default::default() }.validate().is_err());
		assert!(
			RetryPolicy { initial_backoff_ms: 60_000, ..Default::default() }.validate().is_err()
		);
	}
}

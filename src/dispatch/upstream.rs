//! Upstream API failures and their retry classification.

// crates.io
use reqwest::Response;
use serde_json::Value;
// self
use crate::{_prelude::*, http};

/// How the dispatcher treats an [`UpstreamError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamClass {
	/// Network failure, timeout, or server error; retried with backoff.
	Transient,
	/// The upstream asked the caller to slow down; retried with backoff, honoring hints.
	RateSignal,
	/// The access token was rejected.
	Auth,
	/// The request itself is wrong; never retried.
	Permanent,
}

/// Failure reported by one upstream call (or one item of a batch).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamError {
	/// HTTP status, absent for network failures.
	pub status: Option<u16>,
	/// Machine-readable reason such as `rateLimitExceeded` or `RESOURCE_EXHAUSTED`.
	pub reason: Option<String>,
	/// Human-readable description.
	pub message: String,
	/// `Retry-After` hint.
	pub retry_after: Option<StdDuration>,
	/// Whether the request never produced a response.
	pub network: bool,
}
impl UpstreamError {
	/// Failure that produced an HTTP response with `status`.
	pub fn status(status: u16, message: impl Into<String>) -> Self {
		Self {
			status: Some(status),
			reason: None,
			message: message.into(),
			retry_after: None,
			network: false,
		}
	}

	/// Failure that never reached the upstream service.
	pub fn network(message: impl Into<String>) -> Self {
		Self {
			status: None,
			reason: None,
			message: message.into(),
			retry_after: None,
			network: true,
		}
	}

	/// Attaches a machine-readable reason.
	pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
		self.reason = Some(reason.into());

		self
	}

	/// Attaches a retry hint.
	pub fn with_retry_after(mut self, retry_after: StdDuration) -> Self {
		self.retry_after = Some(retry_after);

		self
	}

	/// Converts a reqwest failure.
	pub fn from_reqwest(error: &ReqwestError) -> Self {
		match error.status() {
			Some(status) => Self::status(status.as_u16(), error.to_string()),
			None => Self::network(error.to_string()),
		}
	}

	/// Reads a non-success response, extracting the Google API error envelope when present.
	pub async fn from_response(response: Response) -> Self {
		let status = response.status().as_u16();
		let retry_after = http::parse_retry_after(response.headers()).map(Duration::unsigned_abs);
		let body = response.text().await.unwrap_or_default();
		let mut error = Self::status(status, body.trim());

		error.retry_after = retry_after;

		if let Ok(envelope) = serde_json::from_str::<Value>(&body)
			&& let Some(detail) = envelope.get("error")
		{
			let reason = detail
				.pointer("/errors/0/reason")
				.or_else(|| detail.get("status"))
				.and_then(Value::as_str);

			error.reason = reason.map(str::to_owned);

			if let Some(message) = detail.get("message").and_then(Value::as_str) {
				error.message = message.to_owned();
			}
		}
		if error.message.is_empty() {
			error.message = format!("HTTP {status}");
		}

		error
	}

	/// Retry classification.
	///
	/// Network failures, 408, and 5xx are transient; 429 and quota-flavored 403s are rate
	/// signals; 401 means the token was rejected; every other status is permanent.
	pub fn class(&self) -> UpstreamClass {
		if self.network {
			return UpstreamClass::Transient;
		}

		match self.status {
			None | Some(408) | Some(500..=599) => UpstreamClass::Transient,
			Some(429) => UpstreamClass::RateSignal,
			Some(403) if self.is_quota_reason() => UpstreamClass::RateSignal,
			Some(401) => UpstreamClass::Auth,
			Some(_) => UpstreamClass::Permanent,
		}
	}

	/// Converts the failure into the terminal error reported after `attempts` attempts.
	pub fn into_error(self, attempts: u32) -> Error {
		match self.class() {
			UpstreamClass::Transient => Error::TransientUpstreamFailure {
				attempts,
				status: self.status,
				message: self.message,
			},
			UpstreamClass::RateSignal => Error::RateLimited { retry_after: self.retry_after },
			UpstreamClass::Auth => Error::ReauthenticationRequired {
				reason: format!("upstream rejected the access token: {}", self.message),
			},
			UpstreamClass::Permanent =>
				Error::PermanentUpstreamFailure { status: self.status, message: self.message },
		}
	}

	fn is_quota_reason(&self) -> bool {
		matches!(
			self.reason.as_deref(),
			Some("rateLimitExceeded" | "userRateLimitExceeded" | "RESOURCE_EXHAUSTED")
		)
	}
}
impl Display for UpstreamError {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match (self.status, &self.reason) {
			(Some(status), Some(reason)) => write!(f, "HTTP {status} ({reason}): {}", self.message),
			(Some(status), None) => write!(f, "HTTP {status}: {}", self.message),
			(None, _) => write!(f, "Network error: {}", self.message),
		}
	}
}
impl StdError for UpstreamError {}

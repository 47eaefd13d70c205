//! Structured spans and optional counters for credential and dispatch flows.
//!
//! # Feature Flags
//!
//! - Spans named `workspace_broker.flow` are always emitted through `tracing`, carrying the
//!   `flow` and `stage` fields.
//! - Enable `metrics` to increment `workspace_broker_flow_total` (labeled by `flow` + `outcome`)
//!   and `workspace_broker_retry_total` (labeled by `service`).

mod metrics;
mod tracing;

pub use metrics::*;
pub use tracing::*;

// self
use crate::_prelude::*;

/// Flows observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Authorization Code + PKCE start and completion.
	AuthorizationCode,
	/// Refresh token exchange.
	Refresh,
	/// Credential acquisition for an operation.
	Acquire,
	/// Credential revocation.
	Revoke,
	/// Upstream call through the retry loop.
	Dispatch,
	/// Batch submission.
	Batch,
	/// Tool invocation.
	Tool,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::AuthorizationCode => "authorization_code",
			FlowKind::Refresh => "refresh",
			FlowKind::Acquire => "acquire",
			FlowKind::Revoke => "revoke",
			FlowKind::Dispatch => "dispatch",
			FlowKind::Batch => "batch",
			FlowKind::Tool => "tool",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a flow.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}

	/// Maps a result onto its outcome label.
	pub fn of<T, E>(result: &Result<T, E>) -> Self {
		if result.is_ok() { FlowOutcome::Success } else { FlowOutcome::Failure }
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

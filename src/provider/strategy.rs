//! Classification of token endpoint failures.
//!
//! Strategies only see crate-owned data (status, OAuth `error` fields), so they stay independent
//! of the HTTP client that produced the failure.

// self
use crate::{_prelude::*, provider::descriptor::GrantType};

/// Maps token endpoint failures onto broad categories.
pub trait ProviderStrategy: Send + Sync {
	/// Classifies a failed token request.
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind;
}

/// Categories produced by [`ProviderStrategy::classify_token_error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderErrorKind {
	/// The code or refresh token is invalid, expired, or revoked.
	InvalidGrant,
	/// The user or provider denied access.
	AccessDenied,
	/// Requested scopes are not acceptable.
	InvalidScope,
	/// Client authentication failed.
	InvalidClient,
	/// The token endpoint throttled the client.
	RateLimited,
	/// Failure is temporary and should be retried.
	Transient,
}

/// Context handed to strategies when classifying token errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderErrorContext {
	/// Grant type associated with the failing request.
	pub grant_type: GrantType,
	/// HTTP status code returned by the provider, when available.
	pub http_status: Option<u16>,
	/// Provider-supplied OAuth `error` field.
	pub oauth_error: Option<String>,
	/// Provider-supplied OAuth `error_description` field.
	pub error_description: Option<String>,
}
impl ProviderErrorContext {
	/// Creates a new context scoped to the provided grant type.
	pub fn new(grant_type: GrantType) -> Self {
		Self { grant_type, http_status: None, oauth_error: None, error_description: None }
	}

	/// Adds an HTTP status code.
	pub fn with_http_status(mut self, status: Option<u16>) -> Self {
		self.http_status = status;

		self
	}

	/// Adds the OAuth error code string returned by the provider.
	pub fn with_oauth_error(mut self, error: impl Into<String>) -> Self {
		self.oauth_error = Some(error.into());

		self
	}

	/// Adds the OAuth `error_description` field.
	pub fn with_error_description(mut self, description: Option<String>) -> Self {
		self.error_description = description;

		self
	}
}

/// Strategy following RFC 6749 error codes, falling back to the HTTP status.
#[derive(Debug, Default)]
pub struct DefaultProviderStrategy;
impl ProviderStrategy for DefaultProviderStrategy {
	fn classify_token_error(&self, ctx: &ProviderErrorContext) -> ProviderErrorKind {
		ctx.oauth_error
			.as_deref()
			.and_then(classify_oauth_error)
			.unwrap_or_else(|| classify_status(ctx.http_status))
	}
}

fn classify_oauth_error(code: &str) -> Option<ProviderErrorKind> {
	let kind = match code.to_ascii_lowercase().as_str() {
		"invalid_grant" | "invalid_request" => ProviderErrorKind::InvalidGrant,
		"access_denied" => ProviderErrorKind::AccessDenied,
		"invalid_scope" | "insufficient_scope" => ProviderErrorKind::InvalidScope,
		"invalid_client" | "unauthorized_client" => ProviderErrorKind::InvalidClient,
		"slow_down" | "rate_limit_exceeded" => ProviderErrorKind::RateLimited,
		"temporarily_unavailable" | "server_error" => ProviderErrorKind::Transient,
		_ => return None,
	};

	Some(kind)
}

fn classify_status(status: Option<u16>) -> ProviderErrorKind {
	match status {
		Some(400 | 404 | 410) => ProviderErrorKind::InvalidGrant,
		Some(401) => ProviderErrorKind::InvalidClient,
		Some(403) => ProviderErrorKind::AccessDenied,
		Some(429) => ProviderErrorKind::RateLimited,
		_ => ProviderErrorKind::Transient,
	}
}

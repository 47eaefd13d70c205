//! Error taxonomy shared by flows, the credential broker, dispatch, batching, and tools.

// self
use crate::{_prelude::*, auth::ScopeSet};

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Temporary token endpoint failure; retry with backoff.
	#[error(transparent)]
	Transient(#[from] TransientError),
	/// Transport failure (DNS, TCP, TLS) while talking to the token endpoint.
	#[error(transparent)]
	Transport(#[from] TransportError),

	/// No credential exists for the identity.
	#[error("No credential is stored for {identity}; start an authorization flow.")]
	NotAuthenticated {
		/// Identity that lacks a credential.
		identity: String,
	},
	/// The credential is dead (refresh rejected, refresh token missing, or upstream 401).
	#[error("Re-authentication is required: {reason}.")]
	ReauthenticationRequired {
		/// Provider- or broker-supplied reason.
		reason: String,
	},
	/// The credential does not cover the scopes an operation needs.
	#[error("Credential lacks the required scopes: {missing}.")]
	InsufficientScope {
		/// Scopes that must be added through incremental consent.
		missing: ScopeSet,
	},
	/// The provider or the user refused the authorization grant.
	#[error("Authorization was denied: {reason}.")]
	AuthorizationDenied {
		/// Provider- or broker-supplied reason.
		reason: String,
	},
	/// The callback referenced a flow session that does not exist or has expired.
	#[error("Authorization session is unknown or has expired.")]
	UnknownOrExpiredSession,
	/// A live authorization flow already exists for the identity.
	#[error("An authorization flow is already active for {identity}.")]
	FlowAlreadyActive {
		/// Identity owning the live flow.
		identity: String,
	},
	/// Client authentication failed at the token endpoint.
	#[error("Client authentication failed: {reason}.")]
	InvalidClient {
		/// Provider- or broker-supplied reason.
		reason: String,
	},
	/// A local or upstream rate limit could not be satisfied in time.
	#[error("Rate limit exceeded{}.", retry_hint(.retry_after))]
	RateLimited {
		/// Suggested wait before retrying, when known.
		retry_after: Option<StdDuration>,
	},
	/// The upstream service kept failing transiently until attempts ran out.
	#[error("Upstream service failed after {attempts} attempt(s): {message}.")]
	TransientUpstreamFailure {
		/// Attempts made, the first one included.
		attempts: u32,
		/// HTTP status of the last failure, when available.
		status: Option<u16>,
		/// Description of the last failure.
		message: String,
	},
	/// The upstream service rejected the request in a way retries cannot fix.
	#[error("Upstream service rejected the request: {message}.")]
	PermanentUpstreamFailure {
		/// HTTP status, when available.
		status: Option<u16>,
		/// Upstream-supplied description.
		message: String,
	},
	/// The batch carrying this item failed as a whole or lost the item's result.
	#[error("Batch submission failed: {message}.")]
	BatchTransportFailure {
		/// Description of the batch-level failure.
		message: String,
	},
	/// No tool is registered under the requested name.
	#[error("Unknown tool `{name}`.")]
	UnknownTool {
		/// Requested tool name.
		name: String,
	},
	/// The invocation was abandoned before it completed.
	#[error("Operation was cancelled.")]
	Cancelled,
}
impl Error {
	/// Stable classification of the error for tool responses and metrics.
	pub fn kind(&self) -> ErrorKind {
		match self {
			Self::Storage(_) => ErrorKind::Storage,
			Self::Config(_) => ErrorKind::Configuration,
			Self::Transient(_) | Self::Transport(_) | Self::TransientUpstreamFailure { .. } =>
				ErrorKind::TransientUpstreamFailure,
			Self::NotAuthenticated { .. } => ErrorKind::NotAuthenticated,
			Self::ReauthenticationRequired { .. } => ErrorKind::ReauthenticationRequired,
			Self::InsufficientScope { .. } => ErrorKind::InsufficientScope,
			Self::AuthorizationDenied { .. } => ErrorKind::AuthorizationDenied,
			Self::UnknownOrExpiredSession => ErrorKind::UnknownOrExpiredSession,
			Self::FlowAlreadyActive { .. } => ErrorKind::FlowAlreadyActive,
			Self::InvalidClient { .. } => ErrorKind::InvalidClient,
			Self::RateLimited { .. } => ErrorKind::RateLimited,
			Self::PermanentUpstreamFailure { .. } => ErrorKind::PermanentUpstreamFailure,
			Self::BatchTransportFailure { .. } => ErrorKind::BatchTransportFailure,
			Self::UnknownTool { .. } => ErrorKind::UnknownTool,
			Self::Cancelled => ErrorKind::Cancelled,
		}
	}

	/// Returns `true` when repeating the same operation later may succeed.
	pub fn is_retryable(&self) -> bool {
		matches!(
			self,
			Self::Transient(_)
				| Self::Transport(_)
				| Self::TransientUpstreamFailure { .. }
				| Self::RateLimited { .. }
				| Self::BatchTransportFailure { .. }
		)
	}

	/// Returns `true` for token endpoint hiccups that the dispatcher retries in place.
	pub(crate) fn is_transient(&self) -> bool {
		matches!(self, Self::Transient(_) | Self::Transport(_))
	}

	/// Produces an equivalent, independently owned error.
	///
	/// Used when one failure fans out to several waiters. Variants wrapping non-cloneable sources
	/// keep their kind and message but drop the source chain.
	pub(crate) fn replicate(&self) -> Self {
		match self {
			Self::Storage(e) => Self::Storage(e.clone()),
			Self::Config(e) => Self::Config(ConfigError::Other { message: e.to_string() }),
			Self::Transient(e) => Self::Transient(e.replicate()),
			Self::Transport(e) => Self::Transient(TransientError::TokenEndpoint {
				message: e.to_string(),
				status: None,
				retry_after: None,
			}),
			Self::NotAuthenticated { identity } =>
				Self::NotAuthenticated { identity: identity.clone() },
			Self::ReauthenticationRequired { reason } =>
				Self::ReauthenticationRequired { reason: reason.clone() },
			Self::InsufficientScope { missing } =>
				Self::InsufficientScope { missing: missing.clone() },
			Self::AuthorizationDenied { reason } =>
				Self::AuthorizationDenied { reason: reason.clone() },
			Self::UnknownOrExpiredSession => Self::UnknownOrExpiredSession,
			Self::FlowAlreadyActive { identity } =>
				Self::FlowAlreadyActive { identity: identity.clone() },
			Self::InvalidClient { reason } => Self::InvalidClient { reason: reason.clone() },
			Self::RateLimited { retry_after } => Self::RateLimited { retry_after: *retry_after },
			Self::TransientUpstreamFailure { attempts, status, message } =>
				Self::TransientUpstreamFailure {
					attempts: *attempts,
					status: *status,
					message: message.clone(),
				},
			Self::PermanentUpstreamFailure { status, message } =>
				Self::PermanentUpstreamFailure { status: *status, message: message.clone() },
			Self::BatchTransportFailure { message } =>
				Self::BatchTransportFailure { message: message.clone() },
			Self::UnknownTool { name } => Self::UnknownTool { name: name.clone() },
			Self::Cancelled => Self::Cancelled,
		}
	}

	/// Maps a failure of a whole batch onto the error every member item receives.
	///
	/// Credential and rate-limit failures keep their kind since they describe the caller's
	/// situation rather than the batch. Everything else becomes [`Error::BatchTransportFailure`].
	pub(crate) fn for_batch_member(&self) -> Self {
		match self {
			Self::NotAuthenticated { .. }
			| Self::ReauthenticationRequired { .. }
			| Self::InsufficientScope { .. }
			| Self::RateLimited { .. } => self.replicate(),
			other => Self::BatchTransportFailure { message: other.to_string() },
		}
	}
}

/// Stable, serializable error classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	/// See [`Error::Storage`].
	Storage,
	/// See [`Error::Config`].
	Configuration,
	/// See [`Error::NotAuthenticated`].
	NotAuthenticated,
	/// See [`Error::ReauthenticationRequired`].
	ReauthenticationRequired,
	/// See [`Error::InsufficientScope`].
	InsufficientScope,
	/// See [`Error::AuthorizationDenied`].
	AuthorizationDenied,
	/// See [`Error::UnknownOrExpiredSession`].
	UnknownOrExpiredSession,
	/// See [`Error::FlowAlreadyActive`].
	FlowAlreadyActive,
	/// See [`Error::InvalidClient`].
	InvalidClient,
	/// See [`Error::RateLimited`].
	RateLimited,
	/// See [`Error::TransientUpstreamFailure`].
	TransientUpstreamFailure,
	/// See [`Error::PermanentUpstreamFailure`].
	PermanentUpstreamFailure,
	/// See [`Error::BatchTransportFailure`].
	BatchTransportFailure,
	/// See [`Error::UnknownTool`].
	UnknownTool,
	/// See [`Error::Cancelled`].
	Cancelled,
}
impl ErrorKind {
	/// Snake-case label used in tool responses, logs, and metric labels.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Storage => "storage",
			Self::Configuration => "configuration",
			Self::NotAuthenticated => "not_authenticated",
			Self::ReauthenticationRequired => "reauthentication_required",
			Self::InsufficientScope => "insufficient_scope",
			Self::AuthorizationDenied => "authorization_denied",
			Self::UnknownOrExpiredSession => "unknown_or_expired_session",
			Self::FlowAlreadyActive => "flow_already_active",
			Self::InvalidClient => "invalid_client",
			Self::RateLimited => "rate_limited",
			Self::TransientUpstreamFailure => "transient_upstream_failure",
			Self::PermanentUpstreamFailure => "permanent_upstream_failure",
			Self::BatchTransportFailure => "batch_transport_failure",
			Self::UnknownTool => "unknown_tool",
			Self::Cancelled => "cancelled",
		}
	}
}
impl Display for ErrorKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Provider descriptor contains an invalid URL.
	#[error("Descriptor contains an invalid URL.")]
	InvalidDescriptor {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// Provider descriptor failed validation.
	#[error(transparent)]
	Descriptor(#[from] crate::provider::ProviderDescriptorError),
	/// Redirect URI cannot be parsed.
	#[error("Redirect URI is invalid.")]
	InvalidRedirect {
		/// Underlying parsing failure.
		#[source]
		source: oauth2::url::ParseError,
	},
	/// Descriptor does not enable the requested grant.
	#[error("Descriptor `{descriptor}` does not enable the {grant} grant.")]
	UnsupportedGrant {
		/// Provider identifier string.
		descriptor: String,
		/// Disabled grant label.
		grant: &'static str,
	},
	/// Request scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Identifier failed validation.
	#[error(transparent)]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
	/// Token record builder validation failed.
	#[error("Unable to build token record.")]
	TokenBuild(#[from] crate::auth::TokenRecordBuilderError),
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned an excessively large `expires_in`.
	#[error("The expires_in value exceeds the supported range.")]
	ExpiresInOutOfRange,
	/// Token endpoint returned a non-positive duration.
	#[error("The expires_in value must be positive.")]
	NonPositiveExpiresIn,
	/// Configuration document failed to parse.
	#[error("Configuration is invalid at `{path}`: {message}.")]
	Parse {
		/// Path to the offending field.
		path: String,
		/// Parser message.
		message: String,
	},
	/// Environment variable holds an unusable value.
	#[error("Environment variable {name} has an invalid value.")]
	InvalidEnv {
		/// Variable name.
		name: &'static str,
	},
	/// Required setting is absent.
	#[error("Missing required setting `{name}`.")]
	MissingSetting {
		/// Setting name.
		name: &'static str,
	},
	/// Setting holds a value outside its allowed range.
	#[error("Setting `{name}` is out of range: {reason}.")]
	OutOfRange {
		/// Setting name.
		name: &'static str,
		/// Why the value was rejected.
		reason: &'static str,
	},
	/// Service name does not match any supported service.
	#[error("Unknown service `{name}`.")]
	UnknownService {
		/// Rejected name.
		name: String,
	},
	/// No batch submitter is registered for the service operation.
	#[error("No batch submitter is registered for {service}/{operation}.")]
	BatchUnsupported {
		/// Service label.
		service: &'static str,
		/// Operation name.
		operation: String,
	},
	/// A tool name was registered twice.
	#[error("Tool `{name}` is registered more than once.")]
	DuplicateTool {
		/// Tool name.
		name: String,
	},
	/// Configuration failure carried as a rendered message.
	#[error("{message}")]
	Other {
		/// Rendered original failure.
		message: String,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Temporary token endpoint failures (safe to retry).
#[derive(Debug, ThisError)]
pub enum TransientError {
	/// Provider returned an unexpected but non-fatal response.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	TokenEndpoint {
		/// Provider- or broker-supplied message summarizing the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	TokenResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
}
impl TransientError {
	fn replicate(&self) -> Self {
		match self {
			Self::TokenEndpoint { message, status, retry_after } => Self::TokenEndpoint {
				message: message.clone(),
				status: *status,
				retry_after: *retry_after,
			},
			Self::TokenResponseParse { source, status } => Self::TokenEndpoint {
				message: format!("malformed JSON at {}", source.path()),
				status: *status,
				retry_after: None,
			},
		}
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the token endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the token endpoint.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

fn retry_hint(retry_after: &Option<StdDuration>) -> String {
	match retry_after {
		Some(wait) => format!("; retry after {}ms", wait.as_millis()),
		None => String::new(),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn kinds_render_as_snake_case() {
		let error = Error::FlowAlreadyActive { identity: "gail@example.com".into() };

		assert_eq!(error.kind(), ErrorKind::FlowAlreadyActive);
		assert_eq!(error.kind().to_string(), "flow_already_active");
		assert_eq!(
			serde_json::to_string(&ErrorKind::TransientUpstreamFailure)
				.expect("Error kind should serialize."),
			"\"transient_upstream_failure\""
		);
	}

	#[test]
	fn rate_limited_message_includes_hint() {
		let hinted = Error::RateLimited { retry_after: Some(StdDuration::from_millis(1500)) };
		let bare = Error::RateLimited { retry_after: None };

		assert_eq!(hinted.to_string(), "Rate limit exceeded; retry after 1500ms.");
		assert_eq!(bare.to_string(), "Rate limit exceeded.");
	}

	#[test]
	fn replicate_preserves_kind_and_message() {
		let originals = [
			Error::ReauthenticationRequired { reason: "invalid_grant".into() },
			Error::Transport(TransportError::Io(std::io::Error::other("reset"))),
			Error::Config(ConfigError::MissingExpiresIn),
			Error::PermanentUpstreamFailure { status: Some(404), message: "gone".into() },
		];

		for original in originals {
			let copy = original.replicate();

			assert_eq!(copy.kind(), original.kind());
		}

		let transport = Error::Transport(TransportError::Io(std::io::Error::other("reset")));

		assert!(transport.replicate().is_transient());
	}

	#[test]
	fn batch_members_keep_credential_kinds_only() {
		let denied = Error::ReauthenticationRequired { reason: "revoked".into() };
		let upstream =
			Error::TransientUpstreamFailure { attempts: 3, status: Some(503), message: "x".into() };

		assert_eq!(denied.for_batch_member().kind(), ErrorKind::ReauthenticationRequired);
		assert_eq!(upstream.for_batch_member().kind(), ErrorKind::BatchTransportFailure);
		assert!(!Error::UnknownTool { name: "nope".into() }.is_retryable());
	}
}

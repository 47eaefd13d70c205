//! Configuration consumed by the core: OAuth client, policies, and enabled services.
//!
//! Settings load from a JSON document (every field optional) and are then overlaid with the
//! environment:
//!
//! | Variable | Field |
//! | --- | --- |
//! | `GOOGLE_OAUTH_CLIENT_ID` | `client_id` |
//! | `GOOGLE_OAUTH_CLIENT_SECRET` | `client_secret` |
//! | `MCP_ENABLE_OAUTH21` | `oauth21` |
//! | `WORKSPACE_EXTERNAL_URL` | `external_base_url` |

// self
use crate::{
	_prelude::*,
	batch::BatchConfig,
	broker::BrokerPolicy,
	dispatch::RetryPolicy,
	error::ConfigError,
	ratelimit::RateLimitConfig,
	service::Service,
};

/// Environment variable holding the OAuth client identifier.
pub const ENV_CLIENT_ID: &str = "GOOGLE_OAUTH_CLIENT_ID";
/// Environment variable holding the OAuth client secret.
pub const ENV_CLIENT_SECRET: &str = "GOOGLE_OAUTH_CLIENT_SECRET";
/// Environment variable enabling the OAuth 2.1 public-client variant.
pub const ENV_OAUTH21: &str = "MCP_ENABLE_OAUTH21";
/// Environment variable holding the externally visible base URL.
pub const ENV_EXTERNAL_URL: &str = "WORKSPACE_EXTERNAL_URL";

/// Path appended to the external base URL to form the OAuth redirect URI.
pub const CALLBACK_PATH: &str = "oauth2callback";

/// Everything the core needs to assemble its components.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
	/// OAuth client identifier.
	pub client_id: Option<String>,
	/// OAuth client secret; optional for OAuth 2.1 public clients.
	pub client_secret: Option<String>,
	/// Enables the OAuth 2.1 variant (PKCE-only public client allowed).
	pub oauth21: bool,
	/// Base URL users reach the server at, possibly behind a reverse proxy.
	pub external_base_url: String,
	/// Credential safety margin and session lifetime.
	pub broker: BrokerPolicy,
	/// Upstream retry policy.
	pub retry: RetryPolicy,
	/// Per-service token buckets.
	pub rate_limits: RateLimitConfig,
	/// Batch coalescing settings.
	pub batch: BatchConfig,
	/// Services whose tools are exposed.
	pub enabled_services: Vec<Service>,
	/// Per-invocation timeout in milliseconds; unbounded when absent.
	pub tool_timeout_ms: Option<u64>,
}
impl CoreConfig {
	/// Parses a JSON document, reporting the path of the first offending field.
	pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
		let de = &mut serde_json::Deserializer::from_str(raw);

		serde_path_to_error::deserialize(de).map_err(|e| ConfigError::Parse {
			path: e.path().to_string(),
			message: e.inner().to_string(),
		})
	}

	/// Overlays values from the process environment.
	pub fn apply_env(self) -> Result<Self, ConfigError> {
		self.apply_env_with(|name| std::env::var(name).ok())
	}

	/// Overlays values returned by `lookup`; variables it does not know are left untouched.
	pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		if let Some(value) = lookup(ENV_CLIENT_ID) {
			self.client_id = Some(value);
		}
		if let Some(value) = lookup(ENV_CLIENT_SECRET) {
			self.client_secret = Some(value);
		}
		if let Some(value) = lookup(ENV_OAUTH21) {
			self.oauth21 = parse_flag(&value).ok_or(ConfigError::InvalidEnv { name: ENV_OAUTH21 })?;
		}
		if let Some(value) = lookup(ENV_EXTERNAL_URL) {
			if Url::parse(&value).is_err() {
				return Err(ConfigError::InvalidEnv { name: ENV_EXTERNAL_URL });
			}

			self.external_base_url = value;
		}

		Ok(self)
	}

	/// Checks the settings as a whole.
	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.client_id.as_deref().is_none_or(str::is_empty) {
			return Err(ConfigError::MissingSetting { name: "client_id" });
		}
		if !self.oauth21 && self.client_secret.as_deref().is_none_or(str::is_empty) {
			return Err(ConfigError::MissingSetting { name: "client_secret" });
		}
		if self.enabled_services.is_empty() {
			return Err(ConfigError::OutOfRange {
				name: "enabled_services",
				reason: "at least one service must be enabled",
			});
		}

		self.redirect_uri()?;
		self.retry.validate()?;
		self.rate_limits.validate()?;
		self.batch.validate()?;

		Ok(())
	}

	/// OAuth callback URL derived from the external base URL.
	pub fn redirect_uri(&self) -> Result<Url, ConfigError> {
		let mut base = Url::parse(&self.external_base_url)
			.map_err(|source| ConfigError::InvalidRedirect { source })?;

		if !base.path().ends_with('/') {
			let path = format!("{}/", base.path());

			base.set_path(&path);
		}

		base.join(CALLBACK_PATH).map_err(|source| ConfigError::InvalidRedirect { source })
	}

	/// Per-invocation timeout, if configured.
	pub fn tool_timeout(&self) -> Option<StdDuration> {
		self.tool_timeout_ms.map(StdDuration::from_millis)
	}
}
impl Default for CoreConfig {
	fn default() -> Self {
		Self {
			client_id: None,
			client_secret: None,
			oauth21: false,
			external_base_url: "http://localhost:8000".into(),
			broker: BrokerPolicy::default(),
			retry: RetryPolicy::default(),
			rate_limits: RateLimitConfig::default(),
			batch: BatchConfig::default(),
			enabled_services: Service::ALL.to_vec(),
			tool_timeout_ms: None,
		}
	}
}
impl Debug for CoreConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CoreConfig")
			.field("client_id", &self.client_id)
			.field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
			.field("oauth21", &self.oauth21)
			.field("external_base_url", &self.external_base_url)
			.field("broker", &self.broker)
			.field("retry", &self.retry)
			.field("rate_limits", &self.rate_limits)
			.field("batch", &self.batch)
			.field("enabled_services", &self.enabled_services)
			.field("tool_timeout_ms", &self.tool_timeout_ms)
			.finish()
	}
}

fn parse_flag(raw: &str) -> Option<bool> {
	match raw.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" | "" => Some(false),
		_ => None,
	}
}

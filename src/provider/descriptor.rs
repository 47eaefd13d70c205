//! Validated provider metadata consumed by the OAuth client.

/// Builder API for assembling provider descriptors.
pub mod builder;
/// Grant flags wired into provider descriptors.
pub mod grant;
/// Provider-specific behavior toggles.
pub mod quirks;

pub use builder::*;
pub use grant::*;
pub use quirks::*;

// self
use crate::{_prelude::*, auth::ProviderId};

const GOOGLE_AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_REVOCATION_ENDPOINT: &str = "https://oauth2.googleapis.com/revoke";

/// Client authentication modes for token endpoint calls.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientAuthMethod {
	/// HTTP Basic with `client_id`/`client_secret`.
	ClientSecretBasic,
	#[default]
	/// Form POST body parameters for `client_id`/`client_secret`.
	ClientSecretPost,
	/// Public clients that prove possession via PKCE only.
	NoneWithPkce,
}

/// Endpoint set declared by a provider descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoints {
	/// Authorization endpoint the user is redirected to.
	pub authorization: Url,
	/// Token endpoint used for code exchanges and refreshes.
	pub token: Url,
	/// Revocation endpoint, when the provider offers one.
	pub revocation: Option<Url>,
}

/// Immutable provider descriptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
	/// Descriptor identifier, recorded as the issuer of minted credentials.
	pub id: ProviderId,
	/// Endpoint definitions exposed by the provider.
	pub endpoints: ProviderEndpoints,
	/// Supported grant flags.
	pub supported_grants: SupportedGrants,
	/// Client authentication mechanism.
	pub preferred_client_auth_method: ClientAuthMethod,
	/// Provider-specific quirks.
	pub quirks: ProviderQuirks,
}
impl ProviderDescriptor {
	/// Creates a new builder for the provided identifier.
	pub fn builder(id: ProviderId) -> ProviderDescriptorBuilder {
		ProviderDescriptorBuilder::new(id)
	}

	/// Google accounts descriptor: PKCE, offline access, and incremental consent.
	pub fn google() -> Result<Self, ProviderDescriptorError> {
		let id = ProviderId::new("google")
			.map_err(|_| ProviderDescriptorError::InvalidUrl { url: "google".into() })?;

		Self::builder(id)
			.authorization_endpoint(parse_endpoint(GOOGLE_AUTHORIZATION_ENDPOINT)?)
			.token_endpoint(parse_endpoint(GOOGLE_TOKEN_ENDPOINT)?)
			.revocation_endpoint(parse_endpoint(GOOGLE_REVOCATION_ENDPOINT)?)
			.support_grant(GrantType::AuthorizationCode)
			.support_grant(GrantType::RefreshToken)
			.quirks(ProviderQuirks {
				pkce_required: true,
				offline_access: true,
				include_granted_scopes: true,
				scope_delimiter: ' ',
			})
			.build()
	}

	/// Checks whether the descriptor supports a given grant.
	pub fn supports(&self, grant: GrantType) -> bool {
		self.supported_grants.supports(grant)
	}
}

fn parse_endpoint(raw: &str) -> Result<Url, ProviderDescriptorError> {
	Url::parse(raw).map_err(|_| ProviderDescriptorError::InvalidUrl { url: raw.into() })
}

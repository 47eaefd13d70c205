// self
use crate::_prelude::*;

/// Provider-specific toggles applied when building authorization requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderQuirks {
	/// PKCE must be supplied even for confidential clients.
	pub pkce_required: bool,
	/// Ask for a refresh token (`access_type=offline`) and force the consent screen so one is
	/// issued again on re-authorization.
	pub offline_access: bool,
	/// Send `include_granted_scopes=true` so new grants accumulate previous ones.
	pub include_granted_scopes: bool,
	/// Character used to join scopes in the authorization URL.
	pub scope_delimiter: char,
}
impl ProviderQuirks {
	/// Extra authorization URL parameters implied by the quirks.
	pub fn authorize_params(&self) -> Vec<(&'static str, &'static str)> {
		let mut params = Vec::new();

		if self.offline_access {
			params.push(("access_type", "offline"));
			params.push(("prompt", "consent"));
		}
		if self.include_granted_scopes {
			params.push(("include_granted_scopes", "true"));
		}

		params
	}
}
impl Default for ProviderQuirks {
	fn default() -> Self {
		Self {
			pkce_required: true,
			offline_access: false,
			include_granted_scopes: false,
			scope_delimiter: ' ',
		}
	}
}

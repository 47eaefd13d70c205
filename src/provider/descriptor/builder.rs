// self
use crate::{
	_prelude::*,
	auth::ProviderId,
	provider::{
		ClientAuthMethod, GrantType, ProviderDescriptor, ProviderEndpoints, ProviderQuirks,
		SupportedGrants,
	},
};

/// Errors raised while constructing or validating descriptors.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ProviderDescriptorError {
	/// Authorization endpoint was not supplied.
	#[error("Missing authorization endpoint.")]
	MissingAuthorizationEndpoint,
	/// Token endpoint was not supplied.
	#[error("Missing token endpoint.")]
	MissingTokenEndpoint,
	/// The Authorization Code grant is the only way credentials enter the system.
	#[error("Descriptor must enable the authorization_code grant.")]
	AuthorizationCodeDisabled,
	/// Endpoint could not be parsed.
	#[error("Endpoint URL is invalid: {url}.")]
	InvalidUrl {
		/// Raw value that failed to parse.
		url: String,
	},
	/// Endpoints must use HTTPS.
	#[error("The {endpoint} endpoint must use HTTPS: {url}.")]
	InsecureEndpoint {
		/// Which endpoint failed validation.
		endpoint: &'static str,
		/// Endpoint URL that failed validation.
		url: String,
	},
	/// Scope delimiter must be printable.
	#[error("Scope delimiter must be a printable character.")]
	InvalidScopeDelimiter {
		/// Invalid delimiter that was supplied.
		delimiter: char,
	},
}

/// Builder for [`ProviderDescriptor`] values.
#[derive(Debug)]
pub struct ProviderDescriptorBuilder {
	id: ProviderId,
	authorization_endpoint: Option<Url>,
	token_endpoint: Option<Url>,
	revocation_endpoint: Option<Url>,
	supported_grants: SupportedGrants,
	preferred_client_auth_method: ClientAuthMethod,
	quirks: ProviderQuirks,
}
impl ProviderDescriptorBuilder {
	/// Creates a new builder seeded with the provided identifier.
	pub fn new(id: ProviderId) -> Self {
		Self {
			id,
			authorization_endpoint: None,
			token_endpoint: None,
			revocation_endpoint: None,
			supported_grants: SupportedGrants::default(),
			preferred_client_auth_method: ClientAuthMethod::default(),
			quirks: ProviderQuirks::default(),
		}
	}

	/// Sets the authorization endpoint.
	pub fn authorization_endpoint(mut self, url: Url) -> Self {
		self.authorization_endpoint = Some(url);

		self
	}

	/// Sets the token endpoint.
	pub fn token_endpoint(mut self, url: Url) -> Self {
		self.token_endpoint = Some(url);

		self
	}

	/// Sets the revocation endpoint.
	pub fn revocation_endpoint(mut self, url: Url) -> Self {
		self.revocation_endpoint = Some(url);

		self
	}

	/// Marks a grant type as supported.
	pub fn support_grant(mut self, grant: GrantType) -> Self {
		self.supported_grants = self.supported_grants.enable(grant);

		self
	}

	/// Overrides the client authentication method.
	pub fn preferred_client_auth_method(mut self, method: ClientAuthMethod) -> Self {
		self.preferred_client_auth_method = method;

		self
	}

	/// Overrides the provider quirks.
	pub fn quirks(mut self, quirks: ProviderQuirks) -> Self {
		self.quirks = quirks;

		self
	}

	/// Consumes the builder and validates the resulting descriptor.
	pub fn build(self) -> Result<ProviderDescriptor, ProviderDescriptorError> {
		let authorization = self
			.authorization_endpoint
			.ok_or(ProviderDescriptorError::MissingAuthorizationEndpoint)?;
		let token = self.token_endpoint.ok_or(ProviderDescriptorError::MissingTokenEndpoint)?;

		if !self.supported_grants.supports(GrantType::AuthorizationCode) {
			return Err(ProviderDescriptorError::AuthorizationCodeDisabled);
		}

		validate_endpoint("authorization", &authorization)?;
		validate_endpoint("token", &token)?;

		if let Some(revocation) = self.revocation_endpoint.as_ref() {
			validate_endpoint("revocation", revocation)?;
		}
		if self.quirks.scope_delimiter.is_control() {
			return Err(ProviderDescriptorError::InvalidScopeDelimiter {
				delimiter: self.quirks.scope_delimiter,
			});
		}

		Ok(ProviderDescriptor {
			id: self.id,
			endpoints: ProviderEndpoints {
				authorization,
				token,
				revocation: self.revocation_endpoint,
			},
			supported_grants: self.supported_grants,
			preferred_client_auth_method: self.preferred_client_auth_method,
			quirks: self.quirks,
		})
	}
}

fn validate_endpoint(name: &'static str, url: &Url) -> Result<(), ProviderDescriptorError> {
	if url.scheme() != "https" {
		Err(ProviderDescriptorError::InsecureEndpoint { endpoint: name, url: url.to_string() })
	} else {
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn builder() -> ProviderDescriptorBuilder {
		ProviderDescriptor::builder(ProviderId::new("mock").expect("Provider id should be valid."))
			.authorization_endpoint(
				Url::parse("https://auth.example.com/authorize").expect("URL should parse."),
			)
			.token_endpoint(Url::parse("https://auth.example.com/token").expect("URL should parse."))
	}

	#[test]
	fn authorization_code_grant_is_mandatory() {
		assert_eq!(
			builder().support_grant(GrantType::RefreshToken).build(),
			Err(ProviderDescriptorError::AuthorizationCodeDisabled)
		);
		assert!(builder().support_grant(GrantType::AuthorizationCode).build().is_ok());
	}

	#[test]
	fn plain_http_endpoints_are_rejected() {
		let result = builder()
			.support_grant(GrantType::AuthorizationCode)
			.revocation_endpoint(
				Url::parse("http://auth.example.com/revoke").expect("URL should parse."),
			)
			.build();

		assert!(matches!(
			result,
			Err(ProviderDescriptorError::InsecureEndpoint { endpoint: "revocation", .. })
		));
	}
}

//! Facade over the `oauth2` client that turns token endpoint responses into [`TokenRecord`]s and
//! failures into the crate's error taxonomy.

pub use oauth2;

// std
use std::borrow::Cow;
// crates.io
use oauth2::{
	AuthType, AuthUrl, AuthorizationCode, ClientId, ClientSecret, EndpointMaybeSet,
	EndpointNotSet, EndpointSet, HttpClientError, PkceCodeVerifier, RedirectUrl, RefreshToken,
	RequestTokenError, RevocationUrl, StandardRevocableToken, TokenResponse, TokenUrl,
	basic::{BasicClient, BasicErrorResponse, BasicRequestTokenError, BasicTokenResponse},
};
// self
use crate::{
	_prelude::*,
	auth::{Identity, ProviderId, ScopeSet, TokenRecord, TokenSecret},
	error::{ConfigError, TransientError, TransportError},
	http::{ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot, TokenHttpClient},
	provider::{
		ClientAuthMethod, GrantType, ProviderDescriptor, ProviderErrorContext, ProviderErrorKind,
		ProviderStrategy,
	},
};

type ConfiguredBasicClient =
	BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointMaybeSet, EndpointSet>;
type FacadeFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// Maps HTTP transport failures into crate [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted by the transport into an [`Error`].
	fn map_transport_error(
		&self,
		grant: GrantType,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		_grant: GrantType,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(meta, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(inner) => TransportError::Io(inner).into(),
			HttpClientError::Other(message) => transient(
				meta,
				format!("HTTP client error occurred while calling the token endpoint: {message}"),
			),
			_ => transient(meta, "HTTP client error occurred while calling the token endpoint"),
		}
	}
}

/// Inputs of an authorization code exchange.
#[derive(Clone, Copy, Debug)]
pub struct CodeExchange<'a> {
	/// Identity the resulting credential belongs to.
	pub identity: &'a Identity,
	/// Authorization code returned on the redirect.
	pub code: &'a str,
	/// PKCE verifier generated when the flow started.
	pub pkce_verifier: &'a str,
	/// Scopes requested when the flow started, used when the provider omits `scope`.
	pub requested_scope: &'a ScopeSet,
	/// Redirect URI sent in the authorization request.
	pub redirect_uri: &'a Url,
}

pub(crate) struct BasicFacade<C = ReqwestHttpClient, M = ReqwestTransportErrorMapper>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	oauth_client: ConfiguredBasicClient,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
}
impl<C, M> BasicFacade<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	pub(crate) fn from_descriptor(
		descriptor: &ProviderDescriptor,
		client_id: &str,
		client_secret: Option<&str>,
		http_client: Arc<C>,
		error_mapper: Arc<M>,
	) -> Result<Self> {
		let auth_url = AuthUrl::new(descriptor.endpoints.authorization.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let token_url = TokenUrl::new(descriptor.endpoints.token.to_string())
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let revocation_url = descriptor
			.endpoints
			.revocation
			.as_ref()
			.map(|url| RevocationUrl::new(url.to_string()))
			.transpose()
			.map_err(|source| ConfigError::InvalidDescriptor { source })?;
		let mut oauth_client = BasicClient::new(ClientId::new(client_id.to_owned()))
			.set_auth_uri(auth_url)
			.set_token_uri(token_url)
			.set_revocation_url_option(revocation_url);

		match (descriptor.preferred_client_auth_method, client_secret) {
			(ClientAuthMethod::NoneWithPkce, _) | (_, None) => {},
			(method, Some(secret)) => {
				oauth_client = oauth_client.set_client_secret(ClientSecret::new(secret.to_owned()));

				if matches!(method, ClientAuthMethod::ClientSecretPost) {
					oauth_client = oauth_client.set_auth_type(AuthType::RequestBody);
				}
			},
		}

		Ok(Self { oauth_client, http_client, error_mapper })
	}

	pub(crate) fn exchange_authorization_code<'a>(
		&'a self,
		strategy: &'a dyn ProviderStrategy,
		issuer: &'a ProviderId,
		exchange: CodeExchange<'a>,
	) -> FacadeFuture<'a, TokenRecord> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let instrumented = self.http_client.with_metadata(meta.clone());
			let redirect_url = RedirectUrl::new(exchange.redirect_uri.to_string())
				.map_err(|source| ConfigError::InvalidRedirect { source })?;
			let response = self
				.oauth_client
				.exchange_code(AuthorizationCode::new(exchange.code.to_owned()))
				.set_pkce_verifier(PkceCodeVerifier::new(exchange.pkce_verifier.to_owned()))
				.set_redirect_uri(Cow::Owned(redirect_url))
				.request_async(&instrumented)
				.await
				.map_err(|err| {
					map_request_error(
						strategy,
						GrantType::AuthorizationCode,
						meta.take(),
						err,
						self.error_mapper.as_ref(),
					)
				})?;

			build_record(
				exchange.identity.clone(),
				issuer.clone(),
				exchange.requested_scope,
				None,
				response,
			)
		})
	}

	pub(crate) fn refresh_token<'a>(
		&'a self,
		strategy: &'a dyn ProviderStrategy,
		current: &'a TokenRecord,
		refresh_secret: &'a TokenSecret,
	) -> FacadeFuture<'a, TokenRecord> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let instrumented = self.http_client.with_metadata(meta.clone());
			let refresh_token = RefreshToken::new(refresh_secret.expose().to_owned());
			let response = self
				.oauth_client
				.exchange_refresh_token(&refresh_token)
				.request_async(&instrumented)
				.await
				.map_err(|err| {
					map_request_error(
						strategy,
						GrantType::RefreshToken,
						meta.take(),
						err,
						self.error_mapper.as_ref(),
					)
				})?;

			build_record(
				current.identity.clone(),
				current.issuer.clone(),
				&current.scope,
				Some(refresh_secret.clone()),
				response,
			)
		})
	}

	pub(crate) fn revoke_token<'a>(&'a self, record: &'a TokenRecord) -> FacadeFuture<'a, ()> {
		let meta = ResponseMetadataSlot::default();

		Box::pin(async move {
			let token = match record.refresh_token.as_ref() {
				Some(refresh) => StandardRevocableToken::RefreshToken(RefreshToken::new(
					refresh.expose().to_owned(),
				)),
				None => StandardRevocableToken::AccessToken(oauth2::AccessToken::new(
					record.access_token.expose().to_owned(),
				)),
			};
			let request = self
				.oauth_client
				.revoke_token(token)
				.map_err(|e| ConfigError::Other { message: e.to_string() })?;
			let instrumented = self.http_client.with_metadata(meta.clone());

			request.request_async(&instrumented).await.map_err(|err| {
				let meta = meta.take();

				transient(meta.as_ref(), format!("Token revocation failed: {err}"))
			})
		})
	}
}

fn build_record(
	identity: Identity,
	issuer: ProviderId,
	fallback_scope: &ScopeSet,
	fallback_refresh: Option<TokenSecret>,
	response: BasicTokenResponse,
) -> Result<TokenRecord> {
	let expires_in = response.expires_in().ok_or(ConfigError::MissingExpiresIn)?.as_secs();
	let expires_in = i64::try_from(expires_in).map_err(|_| ConfigError::ExpiresInOutOfRange)?;

	if expires_in <= 0 {
		return Err(ConfigError::NonPositiveExpiresIn.into());
	}

	// The provider may grant fewer or more scopes than requested; the response wins.
	let scope = match response.scopes() {
		Some(scopes) =>
			ScopeSet::new(scopes.iter().map(|scope| scope.as_ref())).map_err(ConfigError::from)?,
		None => fallback_scope.clone(),
	};
	let refresh = response
		.refresh_token()
		.map(|token| TokenSecret::new(token.secret().to_owned()))
		.or(fallback_refresh);

	TokenRecord::builder(identity, issuer, scope)
		.access_token(response.access_token().secret().to_owned())
		.refresh_secret(refresh)
		.issued_at(OffsetDateTime::now_utc())
		.expires_in(Duration::seconds(expires_in))
		.build()
		.map_err(|err| ConfigError::from(err).into())
}

fn map_request_error<E, M>(
	strategy: &dyn ProviderStrategy,
	grant: GrantType,
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<E>>,
	mapper: &M,
) -> Error
where
	E: 'static + Send + Sync + StdError,
	M: ?Sized + TransportErrorMapper<E>,
{
	let meta = meta.as_ref();

	match err {
		RequestTokenError::ServerResponse(response) =>
			map_server_response_error(strategy, grant, response, meta),
		RequestTokenError::Request(error) => mapper.map_transport_error(grant, meta, error),
		RequestTokenError::Parse(error, _body) =>
			TransientError::TokenResponseParse { source: error, status: meta_status(meta) }.into(),
		RequestTokenError::Other(message) => transient(meta, message),
	}
}

fn map_server_response_error(
	strategy: &dyn ProviderStrategy,
	grant: GrantType,
	response: BasicErrorResponse,
	meta: Option<&ResponseMetadata>,
) -> Error {
	let ctx = ProviderErrorContext::new(grant)
		.with_oauth_error(response.error().as_ref())
		.with_error_description(response.error_description().cloned())
		.with_http_status(meta_status(meta));
	let reason = match response.error_description() {
		Some(description) => format!("{}: {description}", response.error().as_ref()),
		None => response.error().as_ref().to_owned(),
	};

	match strategy.classify_token_error(&ctx) {
		ProviderErrorKind::InvalidGrant
		| ProviderErrorKind::AccessDenied
		| ProviderErrorKind::InvalidScope => match grant {
			GrantType::AuthorizationCode => Error::AuthorizationDenied { reason },
			GrantType::RefreshToken => Error::ReauthenticationRequired { reason },
		},
		ProviderErrorKind::InvalidClient => Error::InvalidClient { reason },
		ProviderErrorKind::RateLimited => Error::RateLimited {
			retry_after: meta_retry_after(meta).map(Duration::unsigned_abs),
		},
		ProviderErrorKind::Transient => transient(meta, reason),
	}
}

fn map_reqwest_error(meta: Option<&ResponseMetadata>, err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return TransientError::TokenEndpoint {
			message: "Request timed out while calling the token endpoint".into(),
			status: meta_status(meta).or_else(|| err.status().map(|code| code.as_u16())),
			retry_after: meta_retry_after(meta),
		}
		.into();
	}

	TransportError::from(err).into()
}

fn transient(meta: Option<&ResponseMetadata>, message: impl Into<String>) -> Error {
	TransientError::TokenEndpoint {
		message: message.into(),
		status: meta_status(meta),
		retry_after: meta_retry_after(meta),
	}
	.into()
}

fn meta_status(meta: Option<&ResponseMetadata>) -> Option<u16> {
	meta.and_then(|value| value.status)
}

fn meta_retry_after(meta: Option<&ResponseMetadata>) -> Option<Duration> {
	meta.and_then(|value| value.retry_after)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::provider::DefaultProviderStrategy;

	fn descriptor(method: ClientAuthMethod) -> ProviderDescriptor {
		ProviderDescriptor::builder(
			ProviderId::new("test-provider").expect("Failed to construct provider identifier."),
		)
		.authorization_endpoint(
			Url::parse("https://example.com/oauth2/authorize")
				.expect("Failed to parse authorization endpoint URL."),
		)
		.token_endpoint(
			Url::parse("https://example.com/oauth2/token")
				.expect("Failed to parse token endpoint URL."),
		)
		.support_grant(GrantType::AuthorizationCode)
		.preferred_client_auth_method(method)
		.build()
		.expect("Failed to build provider descriptor.")
	}

	#[test]
	fn facade_builds_for_every_auth_method() {
		for method in [
			ClientAuthMethod::ClientSecretBasic,
			ClientAuthMethod::ClientSecretPost,
			ClientAuthMethod::NoneWithPkce,
		] {
			let result = <BasicFacade<ReqwestHttpClient, ReqwestTransportErrorMapper>>::from_descriptor(
				&descriptor(method),
				"client-id",
				Some("secret"),
				Arc::new(ReqwestHttpClient::default()),
				Arc::new(ReqwestTransportErrorMapper),
			);

			assert!(result.is_ok(), "Facade should build for {method:?}.");
		}
	}

	#[test]
	fn rejected_grants_map_by_grant_type() {
		let response: BasicErrorResponse = serde_json::from_str(
			r#"{"error":"invalid_grant","error_description":"Token has been expired or revoked."}"#,
		)
		.expect("Error response fixture should parse.");
		let strategy = DefaultProviderStrategy;
		let on_refresh = map_server_response_error(
			&strategy,
			GrantType::RefreshToken,
			response.clone(),
			None,
		);
		let on_exchange =
			map_server_response_error(&strategy, GrantType::AuthorizationCode, response, None);

		assert!(matches!(on_refresh, Error::ReauthenticationRequired { ref reason } if reason.contains("revoked")));
		assert!(matches!(on_exchange, Error::AuthorizationDenied { .. }));
	}

	#[test]
	fn throttled_token_endpoint_reports_retry_hint() {
		let response: BasicErrorResponse =
			serde_json::from_str(r#"{"error":"slow_down"}"#).expect("Fixture should parse.");
		let meta = ResponseMetadata { status: Some(429), retry_after: Some(Duration::seconds(3)) };
		let error = map_server_response_error(
			&DefaultProviderStrategy,
			GrantType::RefreshToken,
			response,
			Some(&meta),
		);

		assert!(matches!(
			error,
			Error::RateLimited { retry_after: Some(wait) } if wait == StdDuration::from_secs(3)
		));
	}
}

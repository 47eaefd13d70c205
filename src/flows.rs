//! Token authority abstraction and the authorization flow controller built on it.

pub mod auth_code_pkce;
pub mod common;

pub use auth_code_pkce::*;

// self
use crate::{
	_prelude::*,
	auth::{TokenRecord, TokenSecret},
	error::ConfigError,
	http::{ReqwestHttpClient, TokenHttpClient},
	oauth::{BasicFacade, CodeExchange, ReqwestTransportErrorMapper, TransportErrorMapper},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	provider::{DefaultProviderStrategy, GrantType, ProviderDescriptor, ProviderStrategy},
};

/// Boxed future returned by [`TokenAuthority`] operations.
pub type AuthorityFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + 'a + Send>>;

/// OAuth client specialized for the crate's default reqwest transport stack.
pub type ReqwestOAuthClient = OAuthClient<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Token endpoint operations needed by the credential lifecycle.
///
/// [`OAuthClient`] is the production implementation. The trait exists so the flow controller and
/// the credential broker can share one authority behind an `Arc<dyn TokenAuthority>`.
pub trait TokenAuthority
where
	Self: Send + Sync,
{
	/// Descriptor of the provider this authority talks to.
	fn descriptor(&self) -> &ProviderDescriptor;

	/// OAuth client identifier placed in authorization URLs.
	fn client_id(&self) -> &str;

	/// Exchanges an authorization code (plus PKCE verifier) for a credential.
	fn exchange_code<'a>(&'a self, exchange: CodeExchange<'a>) -> AuthorityFuture<'a, TokenRecord>;

	/// Uses the refresh secret of `current` to mint a replacement credential.
	fn refresh<'a>(&'a self, current: &'a TokenRecord) -> AuthorityFuture<'a, TokenRecord>;

	/// Asks the provider to revoke the grant behind `record`.
	fn revoke<'a>(&'a self, record: &'a TokenRecord) -> AuthorityFuture<'a, ()>;
}

/// Confidential or public OAuth client bound to one provider descriptor.
#[derive(Clone)]
pub struct OAuthClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	http_client: Arc<C>,
	transport_mapper: Arc<M>,
	descriptor: ProviderDescriptor,
	strategy: Arc<dyn ProviderStrategy>,
	client_id: String,
	client_secret: Option<String>,
}
impl<C, M> OAuthClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a client that reuses the caller-provided transport + mapper pair.
	pub fn with_http_client(
		descriptor: ProviderDescriptor,
		client_id: impl Into<String>,
		http_client: impl Into<Arc<C>>,
		mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			http_client: http_client.into(),
			transport_mapper: mapper.into(),
			descriptor,
			strategy: Arc::new(DefaultProviderStrategy),
			client_id: client_id.into(),
			client_secret: None,
		}
	}

	/// Sets the client secret used by confidential clients.
	pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
		self.client_secret = Some(secret.into());

		self
	}

	/// Replaces the token error classifier.
	pub fn with_strategy(mut self, strategy: Arc<dyn ProviderStrategy>) -> Self {
		self.strategy = strategy;

		self
	}

	fn facade(&self) -> Result<BasicFacade<C, M>> {
		BasicFacade::from_descriptor(
			&self.descriptor,
			&self.client_id,
			self.client_secret.as_deref(),
			self.http_client.clone(),
			self.transport_mapper.clone(),
		)
	}

	fn ensure_supported(&self, grant: GrantType) -> Result<()> {
		if self.descriptor.supports(grant) {
			Ok(())
		} else {
			Err(ConfigError::UnsupportedGrant {
				descriptor: self.descriptor.id.to_string(),
				grant: grant.as_str(),
			}
			.into())
		}
	}
}
impl ReqwestOAuthClient {
	/// Creates a client that provisions its own reqwest transport.
	pub fn new(descriptor: ProviderDescriptor, client_id: impl Into<String>) -> Self {
		Self::with_http_client(
			descriptor,
			client_id,
			ReqwestHttpClient::default(),
			ReqwestTransportErrorMapper,
		)
	}
}
impl<C, M> TokenAuthority for OAuthClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn descriptor(&self) -> &ProviderDescriptor {
		&self.descriptor
	}

	fn client_id(&self) -> &str {
		&self.client_id
	}

	fn exchange_code<'a>(&'a self, exchange: CodeExchange<'a>) -> AuthorityFuture<'a, TokenRecord> {
		Box::pin(async move {
			self.ensure_supported(GrantType::AuthorizationCode)?;

			let facade = self.facade()?;

			facade
				.exchange_authorization_code(self.strategy.as_ref(), &self.descriptor.id, exchange)
				.await
		})
	}

	fn refresh<'a>(&'a self, current: &'a TokenRecord) -> AuthorityFuture<'a, TokenRecord> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "token_endpoint");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		Box::pin(span.instrument(async move {
			let result = async {
				self.ensure_supported(GrantType::RefreshToken)?;

				let secret: &TokenSecret =
					current.refresh_token.as_ref().ok_or_else(|| {
						Error::ReauthenticationRequired {
							reason: "credential has no refresh token".into(),
						}
					})?;
				let facade = self.facade()?;

				facade.refresh_token(self.strategy.as_ref(), current, secret).await
			}
			.await;

			obs::record_flow_outcome(KIND, FlowOutcome::of(&result));

			result
		}))
	}

	fn revoke<'a>(&'a self, record: &'a TokenRecord) -> AuthorityFuture<'a, ()> {
		Box::pin(async move {
			if self.descriptor.endpoints.revocation.is_none() {
				tracing::debug!(provider = %self.descriptor.id, "Provider has no revocation endpoint.");

				return Ok(());
			}

			self.facade()?.revoke_token(record).await
		})
	}
}
impl<C, M> Debug for OAuthClient<C, M>
where
	C: ?Sized + TokenHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuthClient")
			.field("descriptor", &self.descriptor)
			.field("client_id", &self.client_id)
			.field("client_secret_set", &self.client_secret.is_some())
			.finish()
	}
}

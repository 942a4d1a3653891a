//! OpenID Connect authorization-code relying party.
//!
//! [`OidcFlow`] owns the discovery cache, the pending anti-CSRF states, and the calls made
//! during a login: code exchange, identity-token claim extraction, and userinfo lookup.

pub mod claims;
pub mod discovery;
pub mod state;

pub use claims::{UserInfo, decode_id_token};
pub use discovery::DiscoveryDocument;
pub use state::STATE_TTL;

// self
use crate::{
	_prelude::*,
	auth::StateNonce,
	clock::{self, Clock},
	config::OidcSettings,
	error::{ConfigError, DecodeError, Stage, UpstreamError},
	http::{self, AuthHttpClient},
	oauth::{self, CodeExchange, TokenSet, TransportErrorMapper},
	obs::{FlowKind, FlowSpan, trace_event},
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};
use state::PendingStates;

/// Timeout applied to discovery, exchange, and userinfo calls by the default transport.
pub const DEFAULT_OIDC_TIMEOUT: StdDuration = StdDuration::from_secs(30);

/// OIDC flow backed by the default reqwest transport.
#[cfg(feature = "reqwest")]
pub type ReqwestOidcFlow = OidcFlow<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Coordinates discovery, state, and token calls for one OIDC provider.
pub struct OidcFlow<C, M>
where
	C: ?Sized + AuthHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	settings: OidcSettings,
	discovery: AsyncRwLock<Option<Arc<DiscoveryDocument>>>,
	states: PendingStates,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
	clock: Arc<dyn Clock>,
}
#[cfg(feature = "reqwest")]
impl OidcFlow<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a flow over a reqwest transport with a thirty-second timeout.
	pub fn new(settings: OidcSettings) -> Result<Self> {
		let http_client = ReqwestHttpClient::with_timeout(DEFAULT_OIDC_TIMEOUT)?;

		Ok(Self::with_http_client(settings, http_client, ReqwestTransportErrorMapper))
	}
}
impl<C, M> OidcFlow<C, M>
where
	C: ?Sized + AuthHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a flow over a caller-supplied transport and error mapper.
	pub fn with_http_client(
		settings: OidcSettings,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Self {
		Self {
			settings,
			discovery: AsyncRwLock::new(None),
			states: PendingStates::new(STATE_TTL),
			http_client: http_client.into(),
			error_mapper: error_mapper.into(),
			clock: clock::system(),
		}
	}

	/// Overrides the time source.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Relying-party settings.
	pub fn settings(&self) -> &OidcSettings {
		&self.settings
	}

	/// Returns `true` when provider URL, client id, and client secret are all set.
	pub fn is_configured(&self) -> bool {
		self.settings.is_configured()
	}

	/// Number of issued states not yet presented.
	pub fn pending_states(&self) -> usize {
		self.states.len()
	}

	/// Draws a fresh state value from the OS random source.
	pub fn generate_state(&self) -> Result<StateNonce> {
		Ok(StateNonce::generate()?)
	}

	/// Returns the provider metadata, fetching it on first use.
	///
	/// A successful fetch is cached for the lifetime of the flow; a failed one leaves the
	/// cache empty so the next caller retries.
	pub async fn discovery(&self) -> Result<Arc<DiscoveryDocument>> {
		if !self.is_configured() {
			return Err(ConfigError::NotConfigured.into());
		}
		if let Some(doc) = self.discovery.read().await.as_ref() {
			return Ok(doc.clone());
		}

		let mut cached = self.discovery.write().await;

		if let Some(doc) = cached.as_ref() {
			return Ok(doc.clone());
		}

		let span = FlowSpan::start(FlowKind::Discovery, "fetch");

		let result = span.instrument(self.fetch_discovery()).await;

		span.finish(&result);

		let doc = Arc::new(result?);

		*cached = Some(doc.clone());

		Ok(doc)
	}

	/// Registers `state` and returns the provider redirect carrying it.
	pub async fn authorization_url(&self, state: &str) -> Result<Url> {
		let doc = self.discovery().await?;

		self.states.issue(state, self.clock.now());

		Ok(doc.authorization_url(&self.settings.client_id, &self.settings.redirect_url, state))
	}

	/// Consumes `state`, returning `true` only if it was issued and has not expired.
	pub fn validate_state(&self, state: &str) -> bool {
		let valid = self.states.consume(state, self.clock.now());

		if !valid {
			trace_event!(warn, "Rejected unknown, reused, or expired login state.");
		}

		valid
	}

	/// Exchanges an authorization code at the token endpoint.
	pub async fn exchange_code(&self, code: &str) -> Result<TokenSet> {
		let doc = self.discovery().await?;

		oauth::exchange_authorization_code(
			self.http_client.as_ref(),
			self.error_mapper.as_ref(),
			CodeExchange {
				token_endpoint: &doc.token_endpoint,
				client_id: &self.settings.client_id,
				client_secret: &self.settings.client_secret,
				redirect_url: &self.settings.redirect_url,
				code,
			},
		)
		.await
	}

	/// Reads identity claims from the identity token without verifying its signature.
	pub fn user_info_from_id_token(&self, id_token: &str) -> Result<UserInfo, DecodeError> {
		decode_id_token(id_token)
	}

	/// Fetches identity claims from the userinfo endpoint with a bearer token.
	pub async fn user_info(&self, access_token: &str) -> Result<UserInfo> {
		let doc = self.discovery().await?;
		let endpoint = doc.userinfo_endpoint.as_ref().ok_or(UpstreamError::MissingEndpoint {
			stage: Stage::Userinfo,
			endpoint: "userinfo_endpoint",
		})?;
		let request = http::get_json_request(endpoint, Some(access_token))?;
		let response = http::execute(
			self.http_client.as_ref(),
			self.error_mapper.as_ref(),
			Stage::Userinfo,
			request,
		)
		.await?;

		http::decode_json(Stage::Userinfo, &response)
	}

	async fn fetch_discovery(&self) -> Result<DiscoveryDocument> {
		let url = self.settings.discovery_url()?;
		let request = http::get_json_request(&url, None)?;
		let response = http::execute(
			self.http_client.as_ref(),
			self.error_mapper.as_ref(),
			Stage::Discovery,
			request,
		)
		.await?;
		let doc: DiscoveryDocument = http::decode_json(Stage::Discovery, &response)?;

		trace_event!(info, issuer = %doc.issuer, "OIDC discovery document cached.");

		Ok(doc)
	}
}
impl<C, M> Debug for OidcFlow<C, M>
where
	C: ?Sized + AuthHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OidcFlow")
			.field("provider_url", &self.settings.provider_url)
			.field("client_id", &self.settings.client_id)
			.field("pending_states", &self.states.len())
			.finish_non_exhaustive()
	}
}

#[cfg(all(test, feature = "reqwest"))]
mod tests {
	// self
	use super::*;
	use crate::_preludet::{ScriptedErrorMapper, ScriptedHttpClient, ScriptedReply, test_oidc_settings};

	type ScriptedFlow = OidcFlow<ScriptedHttpClient, ScriptedErrorMapper>;

	const DISCOVERY: &str = r#"{
		"issuer": "https://idp.example.com",
		"authorization_endpoint": "https://idp.example.com/authorize",
		"token_endpoint": "https://idp.example.com/token"
	}"#;

	#[tokio::test]
	async fn unconfigured_flow_fails_fast() {
		let transport = ScriptedHttpClient::default();
		let mut settings = test_oidc_settings("https://idp.example.com");

		settings.client_secret = Default::default();

		let flow = ScriptedFlow::with_http_client(settings, transport.clone(), ScriptedErrorMapper);
		let err = flow.authorization_url("s").await.expect_err("Unconfigured flow must fail.");

		assert!(matches!(err, Error::Config(ConfigError::NotConfigured)));
		assert_eq!(transport.calls(), 0);
		assert_eq!(flow.pending_states(), 0);
	}

	#[tokio::test]
	async fn failed_discovery_is_retried() {
		let transport = ScriptedHttpClient::default();

		transport.push(ScriptedReply::status(503, "down"));
		transport.push(ScriptedReply::ok(DISCOVERY));

		let flow = ScriptedFlow::with_http_client(
			test_oidc_settings("https://idp.example.com/"),
			transport.clone(),
			ScriptedErrorMapper,
		);
		let err = flow.discovery().await.expect_err("A 503 must fail discovery.");

		assert!(matches!(
			err,
			Error::Upstream(UpstreamError::Status { stage: Stage::Discovery, status: 503, .. })
		));
		assert_eq!(flow.pending_states(), 0);

		flow.authorization_url("s").await.expect("Second attempt should succeed.");
		flow.discovery().await.expect("Cached discovery should be served.");

		assert_eq!(transport.calls(), 2);
		assert_eq!(
			transport.uris()[0],
			"https://idp.example.com/.well-known/openid-configuration"
		);
	}

	#[tokio::test]
	async fn missing_userinfo_endpoint_is_reported() {
		let transport = ScriptedHttpClient::default();

		transport.push(ScriptedReply::ok(DISCOVERY));

		let flow = ScriptedFlow::with_http_client(
			test_oidc_settings("https://idp.example.com"),
			transport,
			ScriptedErrorMapper,
		);
		let err = flow.user_info("token").await.expect_err("Userinfo needs an endpoint.");

		assert!(matches!(
			err,
			Error::Upstream(UpstreamError::MissingEndpoint { stage: Stage::Userinfo, .. })
		));
	}
}

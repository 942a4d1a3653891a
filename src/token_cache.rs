//! Self-refreshing cache for the third-party bearer token used by outbound dispatch.
//!
//! Readers take the shared lock and return the cached token while it is non-empty and
//! `now + buffer < expires_at`. Otherwise they queue on the exclusive lock, re-check, and
//! only the first writer performs the upstream call. Later writers observe its result, so
//! at most one refresh is in flight per cache. Failed refreshes leave the cache unchanged.

mod metrics;

pub use metrics::TokenCacheMetrics;

// self
use crate::{
	_prelude::*,
	auth::Secret,
	clock::{self, Clock},
	config::UpstreamSettings,
	error::{ConfigError, Stage, UpstreamError},
	http::{self, AuthHttpClient},
	obs::{FlowKind, FlowSpan, trace_event},
	oauth::TransportErrorMapper,
};
#[cfg(feature = "reqwest")]
use crate::{http::ReqwestHttpClient, oauth::ReqwestTransportErrorMapper};

/// Refresh window applied ahead of the upstream expiry instant.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::minutes(5);
/// Timeout applied to upstream token calls by the default transport.
pub const DEFAULT_REFRESH_TIMEOUT: StdDuration = StdDuration::from_secs(10);

/// Boxed future returned by [`AccessTokenSource::access_token`].
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<String>> + 'a + Send>>;

/// Token cache type backed by the default reqwest transport.
#[cfg(feature = "reqwest")]
pub type ReqwestTokenCache = ExternalTokenCache<ReqwestHttpClient, ReqwestTransportErrorMapper>;

/// Narrow view of a token cache handed to the dispatch collaborator.
pub trait AccessTokenSource
where
	Self: Send + Sync,
{
	/// Returns a bearer token valid for at least the refresh buffer.
	fn access_token(&self) -> TokenFuture<'_>;
}

/// Token currently held by an [`ExternalTokenCache`].
#[derive(Clone, Debug)]
pub struct CachedToken {
	/// Bearer token value.
	pub access_token: Secret,
	/// Upstream expiry instant.
	pub expires_at: OffsetDateTime,
}

#[derive(Debug)]
struct CacheState {
	app_id: String,
	app_secret: Secret,
	token: Option<CachedToken>,
}

#[derive(Debug, Deserialize)]
struct UpstreamTokenResponse {
	#[serde(default)]
	access_token: String,
	#[serde(default)]
	expires_in: i64,
	#[serde(default)]
	errcode: i64,
	#[serde(default)]
	errmsg: String,
}

/// Caches one upstream bearer token and refreshes it ahead of expiry.
pub struct ExternalTokenCache<C, M>
where
	C: ?Sized + AuthHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	state: AsyncRwLock<CacheState>,
	token_url: Url,
	buffer: Duration,
	http_client: Arc<C>,
	error_mapper: Arc<M>,
	clock: Arc<dyn Clock>,
	metrics: Arc<TokenCacheMetrics>,
}
#[cfg(feature = "reqwest")]
impl ExternalTokenCache<ReqwestHttpClient, ReqwestTransportErrorMapper> {
	/// Creates a cache over a reqwest transport with a ten-second timeout.
	pub fn new(settings: UpstreamSettings) -> Result<Self> {
		let http_client = ReqwestHttpClient::with_timeout(DEFAULT_REFRESH_TIMEOUT)?;

		Self::with_http_client(settings, http_client, ReqwestTransportErrorMapper)
	}
}
impl<C, M> ExternalTokenCache<C, M>
where
	C: ?Sized + AuthHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates a cache over a caller-supplied transport and error mapper.
	pub fn with_http_client(
		settings: UpstreamSettings,
		http_client: impl Into<Arc<C>>,
		error_mapper: impl Into<Arc<M>>,
	) -> Result<Self> {
		let token_url = Url::parse(&settings.token_url)
			.map_err(|source| ConfigError::InvalidUrl { field: "token_url", source })?;

		Ok(Self {
			state: AsyncRwLock::new(CacheState {
				app_id: settings.app_id,
				app_secret: settings.app_secret,
				token: None,
			}),
			token_url,
			buffer: DEFAULT_REFRESH_BUFFER,
			http_client: http_client.into(),
			error_mapper: error_mapper.into(),
			clock: clock::system(),
			metrics: Default::default(),
		})
	}

	/// Overrides the time source.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Overrides the refresh buffer.
	pub fn with_buffer(mut self, buffer: Duration) -> Self {
		self.buffer = buffer;

		self
	}

	/// Shared counters for hits and refreshes.
	pub fn metrics(&self) -> Arc<TokenCacheMetrics> {
		self.metrics.clone()
	}

	/// Returns a token valid for at least the buffer window, refreshing when needed.
	pub async fn access_token(&self) -> Result<String> {
		{
			let state = self.state.read().await;

			if let Some(token) = self.fresh_token(&state) {
				self.metrics.record_hit();

				return Ok(token);
			}
		}

		let mut state = self.state.write().await;

		if let Some(token) = self.fresh_token(&state) {
			self.metrics.record_hit();

			return Ok(token);
		}

		self.refresh_locked(&mut state).await
	}

	/// Discards the cached token and fetches a new one in one exclusive section.
	pub async fn force_refresh(&self) -> Result<String> {
		let mut state = self.state.write().await;

		state.token = None;

		self.refresh_locked(&mut state).await
	}

	/// Returns `true` when the next [`access_token`](Self::access_token) call must refresh.
	pub async fn is_expired(&self) -> bool {
		let state = self.state.read().await;

		self.fresh_token(&state).is_none()
	}

	/// Expiry instant of the cached token, if any.
	pub async fn expires_at(&self) -> Option<OffsetDateTime> {
		self.state.read().await.token.as_ref().map(|token| token.expires_at)
	}

	/// Replaces the app credentials and invalidates the cached token.
	pub async fn update_credentials(&self, app_id: impl Into<String>, app_secret: Secret) {
		let mut state = self.state.write().await;

		state.app_id = app_id.into();
		state.app_secret = app_secret;
		state.token = None;

		trace_event!(info, "Upstream credentials replaced; cached token discarded.");
	}

	/// Primes the cache with a token obtained out of band.
	///
	/// A lifetime that is not positive, or that overflows the clock, is rejected and the
	/// cache is left unchanged.
	pub async fn install_token(
		&self,
		access_token: impl Into<String>,
		expires_in: Duration,
	) -> Result<()> {
		let expires_at = Some(expires_in)
			.filter(|lifetime| lifetime.is_positive())
			.and_then(|lifetime| self.clock.now().checked_add(lifetime))
			.ok_or_else(|| ConfigError::InvalidSetting {
				field: "expires_in",
				reason: format!("{expires_in} is not a usable token lifetime"),
			})?;

		self.state.write().await.token =
			Some(CachedToken { access_token: Secret::new(access_token), expires_at });

		Ok(())
	}

	/// App id currently used for refreshes.
	pub async fn app_id(&self) -> String {
		self.state.read().await.app_id.clone()
	}

	fn fresh_token(&self, state: &CacheState) -> Option<String> {
		let token = state.token.as_ref()?;

		if token.access_token.is_empty() || self.clock.now() + self.buffer >= token.expires_at {
			return None;
		}

		Some(token.access_token.expose().to_owned())
	}

	async fn refresh_locked(&self, state: &mut CacheState) -> Result<String> {
		let span = FlowSpan::start(FlowKind::TokenRefresh, "refresh");

		self.metrics.record_attempt();

		let result = span.instrument(self.fetch(state)).await;

		match &result {
			Ok(_) => self.metrics.record_success(),
			Err(_e) => {
				self.metrics.record_failure();

				trace_event!(warn, error = %_e, "Upstream token refresh failed.");
			},
		}

		span.finish(&result);

		result
	}

	async fn fetch(&self, state: &mut CacheState) -> Result<String> {
		let mut url = self.token_url.clone();

		url.query_pairs_mut()
			.append_pair("grant_type", "client_credential")
			.append_pair("appid", &state.app_id)
			.append_pair("secret", state.app_secret.expose());

		let request = http::get_json_request(&url, None)?;
		let response = http::execute(
			self.http_client.as_ref(),
			self.error_mapper.as_ref(),
			Stage::Refresh,
			request,
		)
		.await?;
		let payload: UpstreamTokenResponse = http::decode_json(Stage::Refresh, &response)?;

		if payload.errcode != 0 {
			return Err(UpstreamError::Provider {
				stage: Stage::Refresh,
				code: payload.errcode,
				message: payload.errmsg,
			}
			.into());
		}
		if payload.access_token.is_empty() {
			return Err(UpstreamError::EmptyToken { stage: Stage::Refresh }.into());
		}

		let expires_at = Some(payload.expires_in)
			.filter(|secs| *secs > 0)
			.and_then(|secs| self.clock.now().checked_add(Duration::seconds(secs)))
			.ok_or(UpstreamError::InvalidExpiry {
				stage: Stage::Refresh,
				expires_in: payload.expires_in,
			})?;

		trace_event!(info, expires_in = payload.expires_in, "Upstream token refreshed.");

		state.token = Some(CachedToken {
			access_token: Secret::new(payload.access_token.clone()),
			expires_at,
		});

		Ok(payload.access_token)
	}
}
impl<C, M> AccessTokenSource for ExternalTokenCache<C, M>
where
	C: ?Sized + AuthHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn access_token(&self) -> TokenFuture<'_> {
		Box::pin(ExternalTokenCache::access_token(self))
	}
}
impl<C, M> Debug for ExternalTokenCache<C, M>
where
	C: ?Sized + AuthHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ExternalTokenCache")
			.field("token_url", &self.token_url.as_str())
			.field("buffer", &self.buffer)
			.field("metrics", &self.metrics)
			.finish_non_exhaustive()
	}
}

//! Authentication and token-lifecycle core for a notification dispatch service: browser
//! sessions, an OpenID Connect authorization-code login, a self-refreshing upstream bearer
//! token cache, and token-bucket admission control for public ingress.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod clock;
pub mod config;
pub mod cookies;
pub mod error;
pub mod http;
pub mod login;
pub mod oauth;
pub mod obs;
pub mod oidc;
pub mod rate_limit;
pub mod session;
pub mod store;
pub mod token_cache;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::{
		collections::VecDeque,
		sync::atomic::{AtomicUsize, Ordering},
	};
	// crates.io
	use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse, http::StatusCode};
	// self
	use crate::{
		auth::Secret,
		clock::{Clock, ManualClock},
		config::{OidcSettings, UpstreamSettings},
		http::{AuthHttpClient, ReqwestHttpClient, ResponseMetadata, ResponseMetadataSlot},
		oauth::{ReqwestTransportErrorMapper, TransportErrorMapper},
		oidc::OidcFlow,
		token_cache::ExternalTokenCache,
	};

	/// OIDC flow type alias used by reqwest-backed integration tests.
	pub type ReqwestTestFlow = OidcFlow<ReqwestHttpClient, ReqwestTransportErrorMapper>;
	/// Token cache type alias used by scripted-transport tests.
	pub type ScriptedTokenCache = ExternalTokenCache<ScriptedHttpClient, ScriptedErrorMapper>;

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.timeout(StdDuration::from_secs(5))
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// OIDC settings pointing at `provider_url` with fixed test credentials.
	pub fn test_oidc_settings(provider_url: &str) -> OidcSettings {
		OidcSettings {
			provider_url: provider_url.into(),
			client_id: "test-client".into(),
			client_secret: Secret::new("test-secret"),
			redirect_url: "http://localhost:8080/auth/callback".into(),
		}
	}

	/// Upstream credential settings pointing at `token_url`.
	pub fn test_upstream_settings(token_url: &str) -> UpstreamSettings {
		UpstreamSettings {
			app_id: "test-app".into(),
			app_secret: Secret::new("test-app-secret"),
			token_url: token_url.into(),
		}
	}

	/// Constructs an [`OidcFlow`] backed by the insecure reqwest transport and a manual clock.
	pub fn build_reqwest_test_flow(provider_url: &str) -> (ReqwestTestFlow, Arc<ManualClock>) {
		let clock = Arc::new(ManualClock::default());
		let flow = ReqwestTestFlow::with_http_client(
			test_oidc_settings(provider_url),
			test_reqwest_http_client(),
			ReqwestTransportErrorMapper,
		)
		.with_clock(clock.clone() as Arc<dyn Clock>);

		(flow, clock)
	}

	/// Constructs an [`ExternalTokenCache`] over a scripted transport and a manual clock.
	pub fn build_scripted_token_cache(
		transport: ScriptedHttpClient,
	) -> Result<(ScriptedTokenCache, Arc<ManualClock>)> {
		let clock = Arc::new(ManualClock::default());
		let cache = ScriptedTokenCache::with_http_client(
			test_upstream_settings("https://upstream.example.com/cgi-bin/token"),
			transport,
			ScriptedErrorMapper,
		)?
		.with_clock(clock.clone() as Arc<dyn Clock>);

		Ok((cache, clock))
	}

	/// Canned reply served by [`ScriptedHttpClient`].
	#[derive(Clone, Debug)]
	pub struct ScriptedReply {
		/// HTTP status code.
		pub status: u16,
		/// Raw response body.
		pub body: String,
		/// Artificial latency applied before replying.
		pub delay: StdDuration,
	}
	impl ScriptedReply {
		/// A `200 OK` JSON reply.
		pub fn ok(body: impl Into<String>) -> Self {
			Self { status: 200, body: body.into(), delay: StdDuration::ZERO }
		}

		/// A reply with an arbitrary status.
		pub fn status(status: u16, body: impl Into<String>) -> Self {
			Self { status, body: body.into(), delay: StdDuration::ZERO }
		}

		/// Delays the reply, widening race windows in concurrency tests.
		pub fn delayed(mut self, delay: StdDuration) -> Self {
			self.delay = delay;

			self
		}
	}

	/// Transport failure raised when a [`ScriptedHttpClient`] runs out of replies.
	#[derive(Debug, ThisError)]
	#[error("Scripted transport has no reply queued.")]
	pub struct ScriptExhausted;

	#[derive(Debug, Default)]
	struct Script {
		replies: Mutex<VecDeque<ScriptedReply>>,
		fallback: Mutex<Option<ScriptedReply>>,
		requests: Mutex<Vec<HttpRequest>>,
		calls: AtomicUsize,
	}

	/// In-process [`AuthHttpClient`] serving queued replies and recording every request.
	#[derive(Clone, Debug, Default)]
	pub struct ScriptedHttpClient(Arc<Script>);
	impl ScriptedHttpClient {
		/// Queues a one-shot reply.
		pub fn push(&self, reply: ScriptedReply) -> &Self {
			self.0.replies.lock().push_back(reply);

			self
		}

		/// Serves `reply` whenever the queue is empty.
		pub fn always(&self, reply: ScriptedReply) -> &Self {
			*self.0.fallback.lock() = Some(reply);

			self
		}

		/// Number of requests dispatched so far.
		pub fn calls(&self) -> usize {
			self.0.calls.load(Ordering::SeqCst)
		}

		/// Request URIs in dispatch order.
		pub fn uris(&self) -> Vec<String> {
			self.0.requests.lock().iter().map(|request| request.uri().to_string()).collect()
		}
	}
	impl AuthHttpClient for ScriptedHttpClient {
		type Handle = ScriptedHandle;
		type TransportError = ScriptExhausted;

		fn with_metadata(&self, slot: ResponseMetadataSlot) -> Self::Handle {
			ScriptedHandle { script: self.0.clone(), slot }
		}
	}

	/// Per-request handle returned by [`ScriptedHttpClient`].
	pub struct ScriptedHandle {
		script: Arc<Script>,
		slot: ResponseMetadataSlot,
	}
	impl<'c> AsyncHttpClient<'c> for ScriptedHandle {
		type Error = HttpClientError<ScriptExhausted>;
		type Future =
			Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + 'c + Send>>;

		fn call(&'c self, request: HttpRequest) -> Self::Future {
			let script = self.script.clone();
			let slot = self.slot.clone();

			Box::pin(async move {
				slot.take();
				script.calls.fetch_add(1, Ordering::SeqCst);
				script.requests.lock().push(request);

				let queued = script.replies.lock().pop_front();
				let reply = match queued.or_else(|| script.fallback.lock().clone()) {
					Some(reply) => reply,
					None => return Err(HttpClientError::Reqwest(Box::new(ScriptExhausted))),
				};

				if !reply.delay.is_zero() {
					tokio::time::sleep(reply.delay).await;
				}

				slot.store(ResponseMetadata { status: Some(reply.status), retry_after: None });

				let mut response = HttpResponse::new(reply.body.into_bytes());

				*response.status_mut() =
					StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

				Ok(response)
			})
		}
	}

	/// Maps scripted transport failures into network errors.
	#[derive(Clone, Debug, Default)]
	pub struct ScriptedErrorMapper;
	impl TransportErrorMapper<ScriptExhausted> for ScriptedErrorMapper {
		fn map_transport_error(
			&self,
			stage: crate::error::Stage,
			_metadata: Option<&ResponseMetadata>,
			error: HttpClientError<ScriptExhausted>,
		) -> Error {
			crate::error::UpstreamError::network(stage, error).into()
		}
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
		time::Duration as StdDuration,
	};

	pub use async_lock::RwLock as AsyncRwLock;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize, de::DeserializeOwned};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use cookie;
#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))]
use {color_eyre as _, dispatch_auth as _, httpmock as _};

//! Login, callback, logout, and request authentication on top of [`OidcFlow`] and
//! [`SessionStore`].

// crates.io
use cookie::Cookie;
// self
use crate::{
	_prelude::*,
	cookies,
	error::{ConfigError, ErrorPayload, StateError},
	http::AuthHttpClient,
	oauth::TransportErrorMapper,
	obs::{FlowKind, FlowSpan, trace_event},
	oidc::{OidcFlow, UserInfo},
	session::{Session, SessionStore},
};

/// Login entry point browsers are sent to when unauthenticated.
pub const LOGIN_PATH: &str = "/auth/login";
/// Destination after a successful login.
pub const POST_LOGIN_PATH: &str = "/";

/// How the caller expects failures to be presented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestStyle {
	/// Script or API client; receives a JSON error payload.
	Api,
	/// Top-level browser navigation; receives a redirect to [`LOGIN_PATH`].
	Browser,
}
impl RequestStyle {
	/// Classifies a request by its `Accept` and `X-Requested-With` headers.
	pub fn from_headers(accept: Option<&str>, requested_with: Option<&str>) -> Self {
		let wants_json = accept.is_some_and(|value| {
			value.split(',').any(|range| {
				range.split(';').next().is_some_and(|media| media.trim() == "application/json")
			})
		});
		let is_xhr =
			requested_with.is_some_and(|value| value.trim().eq_ignore_ascii_case("XMLHttpRequest"));

		if wants_json || is_xhr { Self::Api } else { Self::Browser }
	}
}

/// User-visible response for a rejected request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Rejection {
	/// Structured error body with an HTTP status.
	Json {
		/// HTTP status code.
		status: u16,
		/// Response body.
		payload: ErrorPayload,
	},
	/// `302 Found` to `location`.
	Redirect {
		/// Redirect target.
		location: String,
	},
}
impl Rejection {
	/// Rejection for a request without a valid session.
	pub fn unauthorized(style: RequestStyle) -> Self {
		match style {
			RequestStyle::Api => Self::Json {
				status: 401,
				payload: ErrorPayload { error: "Unauthorized".into(), code: "UNAUTHORIZED".into() },
			},
			RequestStyle::Browser => Self::Redirect { location: LOGIN_PATH.into() },
		}
	}

	/// Rejection presenting `error` to the caller.
	pub fn from_error(error: &Error, style: RequestStyle) -> Self {
		match style {
			RequestStyle::Api => Self::Json { status: error.http_status(), payload: error.payload() },
			RequestStyle::Browser => Self::Redirect { location: LOGIN_PATH.into() },
		}
	}

	/// HTTP status of the response.
	pub fn status(&self) -> u16 {
		match self {
			Self::Json { status, .. } => *status,
			Self::Redirect { .. } => 302,
		}
	}
}

/// Query parameters of the provider callback.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackParams {
	/// Authorization code.
	pub code: String,
	/// Echoed state.
	pub state: String,
	/// OAuth error code reported by the provider.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	/// OAuth error description reported by the provider.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error_description: Option<String>,
}

/// Redirect issued when a login starts.
#[derive(Clone, Debug)]
pub struct LoginRedirect {
	/// Provider authorization URL.
	pub authorization_url: Url,
	/// Cookie pinning the state to this browser.
	pub state_cookie: Cookie<'static>,
}

/// Outcome of a successful callback.
#[derive(Clone, Debug)]
pub struct LoginSuccess {
	/// Newly created session.
	pub session: Session,
	/// Cookie carrying the session id.
	pub session_cookie: Cookie<'static>,
	/// Removal cookie for the spent state.
	pub clear_state_cookie: Cookie<'static>,
	/// Where to send the browser next.
	pub redirect_to: &'static str,
}

/// Enforces the login callback contract and gates protected requests on sessions.
pub struct Authenticator<C, M>
where
	C: ?Sized + AuthHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	flow: Arc<OidcFlow<C, M>>,
	sessions: Arc<SessionStore>,
	secure_cookies: bool,
}
impl<C, M> Authenticator<C, M>
where
	C: ?Sized + AuthHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	/// Creates an authenticator over a shared flow and session store.
	pub fn new(flow: Arc<OidcFlow<C, M>>, sessions: Arc<SessionStore>) -> Self {
		Self { flow, sessions, secure_cookies: false }
	}

	/// Marks issued cookies `Secure`.
	pub fn with_secure_cookies(mut self, secure: bool) -> Self {
		self.secure_cookies = secure;

		self
	}

	/// Underlying OIDC flow.
	pub fn flow(&self) -> &Arc<OidcFlow<C, M>> {
		&self.flow
	}

	/// Underlying session store.
	pub fn sessions(&self) -> &Arc<SessionStore> {
		&self.sessions
	}

	/// Starts a login: issues a state and returns the provider redirect.
	pub async fn begin_login(&self) -> Result<LoginRedirect> {
		if !self.flow.is_configured() {
			return Err(ConfigError::NotConfigured.into());
		}

		let span = FlowSpan::start(FlowKind::Login, "begin");

		let result = span
			.instrument(async {
				let state = self.flow.generate_state()?;
				let authorization_url = self.flow.authorization_url(&state).await?;

				Ok::<_, Error>(LoginRedirect {
					authorization_url,
					state_cookie: cookies::state_cookie(&state, self.secure_cookies),
				})
			})
			.await;

		span.finish(&result);

		result
	}

	/// Completes a login from the provider callback.
	///
	/// Every state check runs before any network call. Identity comes from the identity token
	/// when it decodes, otherwise from the userinfo endpoint.
	pub async fn complete_callback(
		&self,
		params: &CallbackParams,
		state_cookie: Option<&str>,
	) -> Result<LoginSuccess> {
		let span = FlowSpan::start(FlowKind::Callback, "complete");

		let result = span.instrument(self.complete_callback_inner(params, state_cookie)).await;

		span.finish(&result);

		result
	}

	/// Deletes the session, if any, and returns the removal cookie.
	pub fn logout(&self, session_id: Option<&str>) -> Cookie<'static> {
		if let Some(id) = session_id.filter(|id| !id.is_empty()) {
			self.sessions.delete_session(id);
		}

		cookies::clear_session_cookie(self.secure_cookies)
	}

	/// Resolves the session named by the session cookie value.
	pub fn authenticate(
		&self,
		session_id: Option<&str>,
		style: RequestStyle,
	) -> Result<Session, Rejection> {
		session_id
			.filter(|id| !id.is_empty())
			.and_then(|id| self.sessions.get_session(id))
			.ok_or_else(|| Rejection::unauthorized(style))
	}

	/// Resolves the session from raw request headers.
	pub fn authenticate_headers(
		&self,
		cookie_header: Option<&str>,
		accept: Option<&str>,
		requested_with: Option<&str>,
	) -> Result<Session, Rejection> {
		let session_id =
			cookie_header.and_then(|header| cookies::find_cookie(header, cookies::SESSION_COOKIE_NAME));

		self.authenticate(session_id.as_deref(), RequestStyle::from_headers(accept, requested_with))
	}

	async fn complete_callback_inner(
		&self,
		params: &CallbackParams,
		state_cookie: Option<&str>,
	) -> Result<LoginSuccess> {
		if let Some(error) = params.error.as_ref().filter(|error| !error.is_empty()) {
			return Err(StateError::Provider {
				error: error.clone(),
				description: params.error_description.clone().filter(|d| !d.is_empty()),
			}
			.into());
		}
		if params.code.is_empty() {
			return Err(StateError::MissingCode.into());
		}
		if params.state.is_empty() || state_cookie != Some(params.state.as_str()) {
			return Err(StateError::Mismatch.into());
		}
		if !self.flow.validate_state(&params.state) {
			return Err(StateError::Rejected.into());
		}

		let tokens = self.flow.exchange_code(&params.code).await?;
		let decoded =
			tokens.id_token.as_ref().map(|token| self.flow.user_info_from_id_token(token.expose()));
		let identity = match decoded {
			Some(Ok(info)) => info,
			Some(Err(_e)) => {
				trace_event!(warn, error = %_e, "Identity token unusable; falling back to userinfo.");

				self.flow.user_info(tokens.access_token.expose()).await?
			},
			None => self.flow.user_info(tokens.access_token.expose()).await?,
		};

		self.open_session(identity)
	}

	fn open_session(&self, identity: UserInfo) -> Result<LoginSuccess> {
		let session = self.sessions.create_session(identity.sub, identity.email)?;
		let session_cookie =
			cookies::session_cookie(&session.id, self.sessions.ttl(), self.secure_cookies);

		trace_event!(info, session = %session.id.fingerprint(), "Login completed.");

		Ok(LoginSuccess {
			session,
			session_cookie,
			clear_state_cookie: cookies::clear_state_cookie(self.secure_cookies),
			redirect_to: POST_LOGIN_PATH,
		})
	}
}
impl<C, M> Debug for Authenticator<C, M>
where
	C: ?Sized + AuthHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Authenticator")
			.field("flow", &self.flow)
			.field("sessions", &self.sessions)
			.field("secure_cookies", &self.secure_cookies)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn api_style_detection() {
		assert_eq!(RequestStyle::from_headers(Some("application/json"), None), RequestStyle::Api);
		assert_eq!(
			RequestStyle::from_headers(Some("application/json, text/plain, */*"), None),
			RequestStyle::Api
		);
		assert_eq!(RequestStyle::from_headers(None, Some("XMLHttpRequest")), RequestStyle::Api);
		assert_eq!(
			RequestStyle::from_headers(Some("text/html,application/xhtml+xml"), None),
			RequestStyle::Browser
		);
		assert_eq!(RequestStyle::from_headers(None, None), RequestStyle::Browser);
	}

	#[test]
	fn unauthorized_rejections() {
		match Rejection::unauthorized(RequestStyle::Api) {
			Rejection::Json { status, payload } => {
				assert_eq!(status, 401);
				assert_eq!(payload.error, "Unauthorized");
				assert_eq!(payload.code, "UNAUTHORIZED");
			},
			other => panic!("Unexpected rejection: {other:?}."),
		}

		assert_eq!(
			Rejection::unauthorized(RequestStyle::Browser),
			Rejection::Redirect { location: "/auth/login".into() }
		);
	}

	#[test]
	fn error_rejections_follow_style() {
		let err: Error = StateError::Rejected.into();

		assert_eq!(Rejection::from_error(&err, RequestStyle::Api).status(), 400);
		assert_eq!(Rejection::from_error(&err, RequestStyle::Browser).status(), 302);
	}

	#[test]
	fn callback_params_deserialize_from_partial_query() {
		let params: CallbackParams =
			serde_json::from_str(r#"{"error":"access_denied"}"#).expect("Params should parse.");

		assert!(params.code.is_empty());
		assert_eq!(params.error.as_deref(), Some("access_denied"));
	}
}

//! Walks a browser login against a mock OpenID provider: redirect, callback, session lookup,
//! and logout.

// std
use std::sync::Arc;
// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use color_eyre::{Result, eyre::eyre};
use httpmock::prelude::*;
// self
use dispatch_auth::{
	auth::Secret,
	config::OidcSettings,
	cookies::{self, SESSION_COOKIE_NAME, STATE_COOKIE_NAME},
	http::ReqwestHttpClient,
	login::{Authenticator, CallbackParams, RequestStyle},
	oauth::ReqwestTransportErrorMapper,
	oidc::ReqwestOidcFlow,
	reqwest::Client,
	session::SessionStore,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let discovery_body = format!(
		"{{\"issuer\":\"{}\",\"authorization_endpoint\":\"{}\",\"token_endpoint\":\"{}\",\"userinfo_endpoint\":\"{}\"}}",
		server.base_url(),
		server.url("/authorize"),
		server.url("/token"),
		server.url("/userinfo"),
	);
	let id_token = format!(
		"{}.{}.unsigned",
		URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256"}"#),
		URL_SAFE_NO_PAD.encode(br#"{"sub":"demo-user","email":"demo@example.com"}"#),
	);
	let token_body = format!(
		"{{\"access_token\":\"demo-access\",\"token_type\":\"Bearer\",\"expires_in\":3600,\"id_token\":\"{id_token}\"}}"
	);
	let _discovery = server
		.mock_async(|when, then| {
			when.method(GET).path("/.well-known/openid-configuration");
			then.status(200).header("content-type", "application/json").body(discovery_body);
		})
		.await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200).header("content-type", "application/json").body(token_body);
		})
		.await;
	let settings = OidcSettings {
		provider_url: server.base_url(),
		client_id: "demo-client".into(),
		client_secret: Secret::new("demo-secret"),
		redirect_url: "http://localhost:8080/auth/callback".into(),
	};
	let http_client = ReqwestHttpClient::with_client(
		Client::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()?,
	);
	let flow = ReqwestOidcFlow::with_http_client(settings, http_client, ReqwestTransportErrorMapper);
	let authenticator = Authenticator::new(Arc::new(flow), Arc::new(SessionStore::new()));
	let redirect = authenticator.begin_login().await?;

	println!("Redirect the browser to {}.", redirect.authorization_url);
	println!("Set-Cookie: {}", redirect.state_cookie);

	let browser_cookies = format!("{STATE_COOKIE_NAME}={}", redirect.state_cookie.value());
	let state = cookies::find_cookie(&browser_cookies, STATE_COOKIE_NAME)
		.ok_or_else(|| eyre!("State cookie should round-trip."))?;
	let params = CallbackParams { code: "demo-code".into(), state: state.clone(), ..Default::default() };
	let success = authenticator.complete_callback(&params, Some(state.as_str())).await?;

	token_mock.assert_async().await;

	println!("Logged in as {} <{}>.", success.session.subject, success.session.email);
	println!("Set-Cookie: {}", success.session_cookie);

	let request_cookies = format!("{SESSION_COOKIE_NAME}={}", success.session.id);
	let session = authenticator
		.authenticate_headers(Some(request_cookies.as_str()), Some("application/json"), None)
		.map_err(|rejection| eyre!("Session should authenticate: {rejection:?}."))?;

	println!("Session valid until {}.", session.expires_at);

	let cleared = authenticator.logout(Some(session.id.as_ref()));

	println!("Set-Cookie: {cleared}");
	println!(
		"After logout the browser is rejected with status {}.",
		authenticator
			.authenticate(Some(session.id.as_ref()), RequestStyle::Browser)
			.err()
			.map(|rejection| rejection.status())
			.unwrap_or_default()
	);

	Ok(())
}

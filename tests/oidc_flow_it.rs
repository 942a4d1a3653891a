#![cfg(feature = "reqwest")]

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use httpmock::prelude::*;
// self
use dispatch_auth::{
	_preludet::*,
	error::{Stage, UpstreamError},
	oidc::OidcFlow,
};

type ScriptedFlow = OidcFlow<ScriptedHttpClient, ScriptedErrorMapper>;

fn discovery_body(server: &MockServer) -> String {
	format!(
		"{{\"issuer\":\"{issuer}\",\"authorization_endpoint\":\"{authorize}\",\"token_endpoint\":\"{token}\",\"userinfo_endpoint\":\"{userinfo}\"}}",
		issuer = server.base_url(),
		authorize = server.url("/authorize"),
		token = server.url("/token"),
		userinfo = server.url("/userinfo"),
	)
}

fn unsigned_id_token(claims: &str) -> String {
	format!(
		"{}.{}.signature",
		URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#),
		URL_SAFE_NO_PAD.encode(claims.as_bytes()),
	)
}

async fn mock_discovery(server: &MockServer) -> httpmock::Mock<'_> {
	let body = discovery_body(server);

	server
		.mock_async(|when, then| {
			when.method(GET).path("/.well-known/openid-configuration");
			then.status(200).header("content-type", "application/json").body(body);
		})
		.await
}

#[tokio::test]
async fn discovery_is_fetched_once_and_drives_the_redirect() {
	let server = MockServer::start_async().await;
	let discovery = mock_discovery(&server).await;
	let (flow, _clock) = build_reqwest_test_flow(&server.base_url());
	let first = flow.authorization_url("state-one").await.expect("Redirect should build.");
	let second = flow.authorization_url("state-two").await.expect("Redirect should build.");

	discovery.assert_calls_async(1).await;

	assert_eq!(first.path(), "/authorize");

	let pairs: HashMap<_, _> = first.query_pairs().into_owned().collect();

	assert_eq!(pairs.get("client_id"), Some(&"test-client".into()));
	assert_eq!(pairs.get("redirect_uri"), Some(&"http://localhost:8080/auth/callback".into()));
	assert_eq!(pairs.get("response_type"), Some(&"code".into()));
	assert_eq!(pairs.get("scope"), Some(&"openid".into()));
	assert_eq!(pairs.get("state"), Some(&"state-one".into()));
	assert!(second.as_str().contains("state=state-two"));
	assert_eq!(flow.pending_states(), 2);
}

#[tokio::test]
async fn issued_state_validates_exactly_once() {
	let server = MockServer::start_async().await;
	let _discovery = mock_discovery(&server).await;
	let (flow, clock) = build_reqwest_test_flow(&server.base_url());

	flow.authorization_url("once").await.expect("Redirect should build.");
	flow.authorization_url("late").await.expect("Redirect should build.");

	assert!(flow.validate_state("once"));
	assert!(!flow.validate_state("once"));
	assert!(!flow.validate_state("never-issued"));

	clock.advance(Duration::minutes(10) + Duration::SECOND);

	assert!(!flow.validate_state("late"));
	assert_eq!(flow.pending_states(), 0);
}

#[tokio::test]
async fn code_exchange_and_userinfo_use_discovered_endpoints() {
	let server = MockServer::start_async().await;
	let discovery = mock_discovery(&server).await;
	let id_token = unsigned_id_token(r#"{"sub":"user-1","email":"user@example.com"}"#);
	let token_body = format!(
		"{{\"access_token\":\"access-1\",\"token_type\":\"Bearer\",\"expires_in\":3600,\"id_token\":\"{id_token}\"}}"
	);
	let token = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/token")
				.header("content-type", "application/x-www-form-urlencoded")
				.form_urlencoded_tuple("grant_type", "authorization_code")
				.form_urlencoded_tuple("code", "auth-code")
				.form_urlencoded_tuple("redirect_uri", "http://localhost:8080/auth/callback")
				.form_urlencoded_tuple("client_id", "test-client")
				.form_urlencoded_tuple("client_secret", "test-secret");
			then.status(200).header("content-type", "application/json").body(token_body);
		})
		.await;
	let userinfo = server
		.mock_async(|when, then| {
			when.method(GET).path("/userinfo").header("authorization", "Bearer access-1");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"sub":"user-1","email":"user@example.com","name":"User One"}"#);
		})
		.await;
	let (flow, _clock) = build_reqwest_test_flow(&server.base_url());
	let tokens = flow.exchange_code("auth-code").await.expect("Exchange should succeed.");

	token.assert_async().await;

	assert_eq!(tokens.access_token.expose(), "access-1");
	assert_eq!(tokens.expires_in, Some(Duration::hours(1)));

	let from_token = flow
		.user_info_from_id_token(
			tokens.id_token.as_ref().expect("Identity token should be returned.").expose(),
		)
		.expect("Identity token should decode.");

	assert_eq!(from_token.sub, "user-1");
	assert_eq!(from_token.email, "user@example.com");

	let from_endpoint = flow.user_info("access-1").await.expect("Userinfo should succeed.");

	userinfo.assert_async().await;
	discovery.assert_calls_async(1).await;

	assert_eq!(from_endpoint.name.as_deref(), Some("User One"));
}

#[tokio::test]
async fn token_endpoint_rejection_is_tagged_with_exchange_stage() {
	let server = MockServer::start_async().await;
	let _discovery = mock_discovery(&server).await;
	let _token = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(400)
				.header("content-type", "application/json")
				.body(r#"{"error":"invalid_grant","error_description":"Code expired."}"#);
		})
		.await;
	let (flow, _clock) = build_reqwest_test_flow(&server.base_url());
	let err = flow.exchange_code("stale").await.expect_err("Rejected code must fail.");

	assert!(matches!(
		&err,
		Error::Upstream(UpstreamError::OAuth { stage: Stage::Exchange, error, .. }) if error == "invalid_grant"
	));
	assert_eq!(err.code(), "TOKEN_EXCHANGE_FAILED");
	assert_eq!(err.payload().error, "Failed to exchange the authorization code.");
	assert_eq!(err.http_status(), 502);
	assert!(err.is_retryable());
}

#[tokio::test]
async fn malformed_userinfo_reports_the_failing_field() {
	let server = MockServer::start_async().await;
	let _discovery = mock_discovery(&server).await;
	let _userinfo = server
		.mock_async(|when, then| {
			when.method(GET).path("/userinfo");
			then.status(200).header("content-type", "application/json").body(r#"{"sub":42}"#);
		})
		.await;
	let (flow, _clock) = build_reqwest_test_flow(&server.base_url());
	let err = flow.user_info("access").await.expect_err("Numeric subject must not parse.");

	match err {
		Error::Upstream(UpstreamError::Parse { stage, source, .. }) => {
			assert_eq!(stage, Stage::Userinfo);
			assert_eq!(source.path().to_string(), "sub");
		},
		other => panic!("Unexpected error: {other:?}."),
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_discovery_fetches_once() {
	let transport = ScriptedHttpClient::default();

	transport.always(
		ScriptedReply::ok(
			r#"{
				"issuer": "https://idp.example.com",
				"authorization_endpoint": "https://idp.example.com/authorize",
				"token_endpoint": "https://idp.example.com/token"
			}"#,
		)
		.delayed(StdDuration::from_millis(100)),
	);

	let flow = Arc::new(ScriptedFlow::with_http_client(
		test_oidc_settings("https://idp.example.com"),
		transport.clone(),
		ScriptedErrorMapper,
	));
	let handles = (0..16)
		.map(|_| {
			let flow = flow.clone();

			tokio::spawn(async move { flow.discovery().await })
		})
		.collect::<Vec<_>>();
	let mut documents = Vec::new();

	for handle in handles {
		documents.push(
			handle
				.await
				.expect("Discovery task should not panic.")
				.expect("Discovery should succeed."),
		);
	}

	assert_eq!(transport.calls(), 1);
	assert!(documents.iter().all(|doc| Arc::ptr_eq(doc, &documents[0])));
}

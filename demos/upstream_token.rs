//! Serves an upstream bearer token from a mock provider, rotates the app credentials through a
//! config store, and shows the ingress rate limiter admitting a burst.

// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
// self
use dispatch_auth::{
	auth::Secret,
	config::UpstreamSettings,
	http::ReqwestHttpClient,
	oauth::ReqwestTransportErrorMapper,
	rate_limit::{RateLimitDecision, RateLimiter},
	reqwest::Client,
	store::{CredentialRecord, MemoryConfigStore},
	token_cache::ReqwestTokenCache,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let first = server
		.mock_async(|when, then| {
			when.method(GET).path("/cgi-bin/token").query_param("appid", "demo-app");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"access_token":"first-token","expires_in":7200}"#);
		})
		.await;
	let rotated = server
		.mock_async(|when, then| {
			when.method(GET).path("/cgi-bin/token").query_param("appid", "rotated-app");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"access_token":"rotated-token","expires_in":7200}"#);
		})
		.await;
	let settings = UpstreamSettings {
		app_id: "demo-app".into(),
		app_secret: Secret::new("demo-secret"),
		token_url: server.url("/cgi-bin/token"),
	};
	let http_client = ReqwestHttpClient::with_client(
		Client::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()?,
	);
	let cache =
		ReqwestTokenCache::with_http_client(settings, http_client, ReqwestTransportErrorMapper)?;

	println!("Token: {}.", cache.access_token().await?);
	println!("Token again (cached): {}.", cache.access_token().await?);

	let store = MemoryConfigStore::default();
	let record =
		CredentialRecord::save(&store, &cache, "rotated-app", Secret::new("rotated-secret")).await?;

	println!("Stored credentials: {:?}.", record.masked());
	println!("Token after rotation: {}.", cache.access_token().await?);

	first.assert_calls_async(1).await;
	rotated.assert_calls_async(1).await;

	let limiter = RateLimiter::webhook();
	let admitted = (0..25).filter(|_| limiter.allow("203.0.113.9")).count();

	println!("Admitted {admitted} of 25 webhook requests.");

	if let RateLimitDecision::Delay(directive) = limiter.check("203.0.113.9") {
		println!("Retry-After: {}", directive.retry_after_secs());
	}

	Ok(())
}

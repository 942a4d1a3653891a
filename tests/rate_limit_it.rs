// std
use std::sync::Arc;
// crates.io
use time::Duration;
// self
use dispatch_auth::{
	clock::{Clock, ManualClock},
	error::{ConfigError, Error},
	rate_limit::{RateLimitDecision, RateLimitedPayload, RateLimiter},
};

#[test]
fn webhook_preset_admits_burst_and_refills_per_second() {
	let clock = Arc::new(ManualClock::default());
	let limiter = RateLimiter::webhook().with_clock(clock.clone() as Arc<dyn Clock>);

	assert_eq!((0..20).filter(|_| limiter.allow("198.51.100.1")).count(), 20);
	assert!(!limiter.allow("198.51.100.1"));

	clock.advance(Duration::SECOND);

	assert_eq!((0..20).filter(|_| limiter.allow("198.51.100.1")).count(), 10);
}

#[test]
fn keys_are_limited_independently() {
	let clock = Arc::new(ManualClock::default());
	let limiter = RateLimiter::new(1, Duration::minutes(1), 1)
		.expect("Limiter should build.")
		.with_clock(clock.clone() as Arc<dyn Clock>);

	assert!(limiter.allow("a"));
	assert!(!limiter.allow("a"));
	assert!(limiter.allow("b"));
	assert_eq!(limiter.tracked_keys(), 2);
}

#[test]
fn denied_request_reports_retry_after() {
	let clock = Arc::new(ManualClock::default());
	let limiter = RateLimiter::new(5, Duration::seconds(3), 1)
		.expect("Limiter should build.")
		.with_clock(clock.clone() as Arc<dyn Clock>);

	assert!(limiter.check("k").is_allowed());

	clock.advance(Duration::milliseconds(500));

	match limiter.check("k") {
		RateLimitDecision::Delay(directive) => {
			assert_eq!(directive.retry_after_secs(), 3);
			assert_eq!(directive.earliest_retry_at, clock.now() + Duration::milliseconds(2500));
		},
		RateLimitDecision::Allow => panic!("Empty bucket must not admit."),
	}
}

#[test]
fn zero_settings_are_rejected() {
	for (rate, interval, burst) in
		[(0, Duration::SECOND, 1), (1, Duration::ZERO, 1), (1, Duration::SECOND, 0)]
	{
		let err = RateLimiter::new(rate, interval, burst).expect_err("Zero settings must fail.");

		assert!(matches!(err, Error::Config(ConfigError::InvalidSetting { .. })));
	}
}

#[test]
fn rejection_payload_matches_ingress_contract() {
	let json = serde_json::to_value(RateLimitedPayload::default())
		.expect("Payload should serialize.");

	assert_eq!(
		json,
		serde_json::json!({
			"success": false,
			"error": "Too many requests, please try again later",
			"code": "RATE_LIMITED"
		})
	);
}

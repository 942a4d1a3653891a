//! Per-key token-bucket admission control for public ingress endpoints.

// self
use crate::{
	_prelude::*,
	clock::{self, Clock},
	error::ConfigError,
};

/// Error code reported to callers rejected by a [`RateLimiter`].
pub const RATE_LIMITED_CODE: &str = "RATE_LIMITED";

/// Result of a [`RateLimiter::check`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
	/// The request may proceed immediately.
	Allow,
	/// The request should be rejected and retried later.
	Delay(RetryDirective),
}
impl RateLimitDecision {
	/// Returns `true` for [`RateLimitDecision::Allow`].
	pub fn is_allowed(&self) -> bool {
		matches!(self, Self::Allow)
	}
}

/// Advises callers when to retry after a [`RateLimitDecision::Delay`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryDirective {
	/// Instant of the next refill.
	pub earliest_retry_at: OffsetDateTime,
	/// Time remaining until the next refill.
	pub recommended_backoff: Duration,
}
impl RetryDirective {
	/// Whole seconds suitable for a `Retry-After` header, never below one.
	pub fn retry_after_secs(&self) -> u64 {
		let nanos = self.recommended_backoff.whole_nanoseconds().max(1);
		let secs = (nanos + 999_999_999) / 1_000_000_000;

		u64::try_from(secs).unwrap_or(u64::MAX)
	}
}

/// JSON body returned with `429 Too Many Requests`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitedPayload {
	/// Always `false`.
	pub success: bool,
	/// Human-readable message.
	pub error: String,
	/// Always [`RATE_LIMITED_CODE`].
	pub code: String,
}
impl Default for RateLimitedPayload {
	fn default() -> Self {
		Self {
			success: false,
			error: "Too many requests, please try again later".into(),
			code: RATE_LIMITED_CODE.into(),
		}
	}
}

#[derive(Clone, Copy, Debug)]
struct RateBucket {
	tokens: u32,
	last: OffsetDateTime,
}

/// Token bucket keyed by caller identity (typically the client IP).
///
/// A key's first request is admitted and leaves `burst - 1` tokens. Later requests add
/// `floor(elapsed / interval) * rate` tokens capped at `burst`, then consume one. Denied
/// requests leave the bucket untouched. Buckets are never evicted.
pub struct RateLimiter {
	buckets: Mutex<HashMap<String, RateBucket>>,
	rate: u32,
	interval: Duration,
	burst: u32,
	clock: Arc<dyn Clock>,
}
impl RateLimiter {
	/// Creates a limiter that adds `rate` tokens every `interval`, holding at most `burst`.
	pub fn new(rate: u32, interval: Duration, burst: u32) -> Result<Self> {
		if rate == 0 {
			return Err(invalid("rate", "must be greater than zero"));
		}
		if !interval.is_positive() {
			return Err(invalid("interval", "must be a positive duration"));
		}
		if burst == 0 {
			return Err(invalid("burst", "must be greater than zero"));
		}

		Ok(Self { buckets: Mutex::new(HashMap::new()), rate, interval, burst, clock: clock::system() })
	}

	/// Ten requests per second with a burst of twenty, the public webhook policy.
	pub fn webhook() -> Self {
		Self {
			buckets: Mutex::new(HashMap::new()),
			rate: 10,
			interval: Duration::SECOND,
			burst: 20,
			clock: clock::system(),
		}
	}

	/// Overrides the time source.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Admits or denies one request for `key`.
	pub fn allow(&self, key: &str) -> bool {
		self.check(key).is_allowed()
	}

	/// Admits one request for `key`, or reports when the next token arrives.
	pub fn check(&self, key: &str) -> RateLimitDecision {
		let now = self.clock.now();
		let mut buckets = self.buckets.lock();
		let Some(bucket) = buckets.get_mut(key) else {
			buckets.insert(key.to_owned(), RateBucket { tokens: self.burst - 1, last: now });

			return RateLimitDecision::Allow;
		};
		let tokens = bucket.tokens.saturating_add(self.refill(now - bucket.last)).min(self.burst);

		if tokens > 0 {
			bucket.tokens = tokens - 1;
			bucket.last = now;

			return RateLimitDecision::Allow;
		}

		let earliest_retry_at = bucket.last + self.interval;

		RateLimitDecision::Delay(RetryDirective {
			earliest_retry_at,
			recommended_backoff: earliest_retry_at - now,
		})
	}

	/// Number of keys with a bucket.
	pub fn tracked_keys(&self) -> usize {
		self.buckets.lock().len()
	}

	fn refill(&self, elapsed: Duration) -> u32 {
		if !elapsed.is_positive() {
			return 0;
		}

		let intervals = elapsed.whole_nanoseconds() / self.interval.whole_nanoseconds();

		u32::try_from(intervals).unwrap_or(u32::MAX).saturating_mul(self.rate)
	}
}
impl Debug for RateLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateLimiter")
			.field("rate", &self.rate)
			.field("interval", &self.interval)
			.field("burst", &self.burst)
			.finish_non_exhaustive()
	}
}

fn invalid(field: &'static str, reason: &str) -> Error {
	ConfigError::InvalidSetting { field, reason: reason.into() }.into()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::clock::ManualClock;

	fn limiter(rate: u32, interval: Duration, burst: u32) -> (RateLimiter, Arc<ManualClock>) {
		let clock = Arc::new(ManualClock::default());
		let limiter = RateLimiter::new(rate, interval, burst)
			.expect("Limiter fixture should be valid.")
			.with_clock(clock.clone());

		(limiter, clock)
	}

	#[test]
	fn webhook_policy_admits_burst_then_refills() {
		let clock = Arc::new(ManualClock::default());
		let limiter = RateLimiter::webhook().with_clock(clock.clone());
		let admitted = (0..25).filter(|_| limiter.allow("203.0.113.7")).count();

		assert_eq!(admitted, 20);

		clock.advance(Duration::SECOND);

		let refilled = (0..25).filter(|_| limiter.allow("203.0.113.7")).count();

		assert_eq!(refilled, 10);
	}

	#[test]
	fn keys_are_isolated() {
		let (limiter, _clock) = limiter(1, Duration::SECOND, 1);

		assert!(limiter.allow("a"));
		assert!(!limiter.allow("a"));
		assert!(limiter.allow("b"));
		assert_eq!(limiter.tracked_keys(), 2);
	}

	#[test]
	fn partial_intervals_do_not_refill() {
		let (limiter, clock) = limiter(5, Duration::SECOND, 2);

		assert!(limiter.allow("k"));
		assert!(limiter.allow("k"));

		clock.advance(Duration::milliseconds(999));

		assert!(!limiter.allow("k"));

		clock.advance(Duration::milliseconds(1));

		let admitted = (0..5).filter(|_| limiter.allow("k")).count();

		assert_eq!(admitted, 2, "Refill must be capped at burst.");
	}

	#[test]
	fn denial_reports_next_refill() {
		let (limiter, clock) = limiter(1, Duration::seconds(10), 1);

		assert!(limiter.allow("k"));

		let start = clock.now();

		clock.advance(Duration::seconds(4));

		match limiter.check("k") {
			RateLimitDecision::Delay(directive) => {
				assert_eq!(directive.earliest_retry_at, start + Duration::seconds(10));
				assert_eq!(directive.recommended_backoff, Duration::seconds(6));
				assert_eq!(directive.retry_after_secs(), 6);
			},
			RateLimitDecision::Allow => panic!("Empty bucket must not admit."),
		}
	}

	#[test]
	fn construction_rejects_degenerate_policies() {
		assert!(RateLimiter::new(0, Duration::SECOND, 1).is_err());
		assert!(RateLimiter::new(1, Duration::ZERO, 1).is_err());
		assert!(RateLimiter::new(1, Duration::SECOND, 0).is_err());
	}

	#[test]
	fn rejection_payload_matches_wire_shape() {
		let payload =
			serde_json::to_value(RateLimitedPayload::default()).expect("Payload should serialize.");

		assert_eq!(payload["success"], false);
		assert_eq!(payload["code"], "RATE_LIMITED");
	}
}

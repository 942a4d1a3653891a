//! Settings for the OIDC client, upstream credentials, sessions, and ingress limits.

// self
use crate::{_prelude::*, auth::Secret, error::ConfigError, rate_limit::RateLimiter};

/// Default OIDC callback URL.
pub const DEFAULT_REDIRECT_URL: &str = "http://localhost:8080/auth/callback";
/// Default upstream token endpoint.
pub const DEFAULT_TOKEN_URL: &str = "https://api.weixin.qq.com/cgi-bin/token";

/// Complete authentication configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
	/// OIDC relying-party settings.
	pub oidc: OidcSettings,
	/// Upstream bearer-token credentials.
	pub upstream: UpstreamSettings,
	/// Session lifetime.
	pub session: SessionSettings,
	/// Public webhook rate limit.
	pub webhook: RateLimitSettings,
	/// Whether cookies carry the `Secure` attribute.
	pub cookie_secure: bool,
}
impl AuthSettings {
	/// Loads settings from process environment variables.
	pub fn from_env() -> Result<Self> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	/// Loads settings through `lookup`, falling back to defaults for absent keys.
	pub fn from_lookup<F>(lookup: F) -> Result<Self>
	where
		F: Fn(&str) -> Option<String>,
	{
		let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_owned());
		let defaults = Self::default();

		Ok(Self {
			oidc: OidcSettings {
				provider_url: text("OIDC_PROVIDER_URL", ""),
				client_id: text("OIDC_CLIENT_ID", ""),
				client_secret: Secret::new(text("OIDC_CLIENT_SECRET", "")),
				redirect_url: text("OIDC_REDIRECT_URL", DEFAULT_REDIRECT_URL),
			},
			upstream: UpstreamSettings {
				app_id: text("UPSTREAM_APP_ID", ""),
				app_secret: Secret::new(text("UPSTREAM_APP_SECRET", "")),
				token_url: text("UPSTREAM_TOKEN_URL", DEFAULT_TOKEN_URL),
			},
			session: SessionSettings {
				ttl_secs: parse(&lookup, "SESSION_TTL_SECS", defaults.session.ttl_secs)?,
			},
			webhook: RateLimitSettings {
				rate: parse(&lookup, "WEBHOOK_RATE", defaults.webhook.rate)?,
				interval_ms: parse(&lookup, "WEBHOOK_INTERVAL_MS", defaults.webhook.interval_ms)?,
				burst: parse(&lookup, "WEBHOOK_BURST", defaults.webhook.burst)?,
			},
			cookie_secure: parse(&lookup, "COOKIE_SECURE", defaults.cookie_secure)?,
		})
	}
}

/// OIDC relying-party settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcSettings {
	/// Issuer base URL; discovery is fetched from `/.well-known/openid-configuration` below it.
	pub provider_url: String,
	/// Registered client identifier.
	pub client_id: String,
	/// Registered client secret.
	pub client_secret: Secret,
	/// Callback URL registered with the provider.
	pub redirect_url: String,
}
impl OidcSettings {
	/// Returns `true` when provider URL, client id, and client secret are all non-empty.
	pub fn is_configured(&self) -> bool {
		!self.provider_url.is_empty() && !self.client_id.is_empty() && !self.client_secret.is_empty()
	}

	/// Discovery document URL derived from the provider URL.
	pub fn discovery_url(&self) -> Result<Url> {
		let base = self.provider_url.trim_end_matches('/');

		Url::parse(&format!("{base}/.well-known/openid-configuration"))
			.map_err(|source| ConfigError::InvalidUrl { field: "provider_url", source }.into())
	}
}
impl Default for OidcSettings {
	fn default() -> Self {
		Self {
			provider_url: String::new(),
			client_id: String::new(),
			client_secret: Secret::default(),
			redirect_url: DEFAULT_REDIRECT_URL.into(),
		}
	}
}

/// Credentials for the third-party bearer-token endpoint.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamSettings {
	/// Application identifier.
	pub app_id: String,
	/// Application secret.
	pub app_secret: Secret,
	/// Token endpoint URL.
	pub token_url: String,
}
impl Default for UpstreamSettings {
	fn default() -> Self {
		Self { app_id: String::new(), app_secret: Secret::default(), token_url: DEFAULT_TOKEN_URL.into() }
	}
}

/// Session lifetime settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
	/// Session lifetime in seconds.
	pub ttl_secs: u32,
}
impl SessionSettings {
	/// Session lifetime as a duration.
	pub fn ttl(&self) -> Duration {
		Duration::seconds(self.ttl_secs.into())
	}
}
impl Default for SessionSettings {
	fn default() -> Self {
		Self { ttl_secs: 86_400 }
	}
}

/// Token-bucket policy settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitSettings {
	/// Tokens added per interval.
	pub rate: u32,
	/// Refill interval in milliseconds.
	pub interval_ms: u32,
	/// Bucket capacity.
	pub burst: u32,
}
impl RateLimitSettings {
	/// Builds a limiter enforcing these settings.
	pub fn build(&self) -> Result<RateLimiter> {
		RateLimiter::new(self.rate, Duration::milliseconds(self.interval_ms.into()), self.burst)
	}
}
impl Default for RateLimitSettings {
	fn default() -> Self {
		Self { rate: 10, interval_ms: 1_000, burst: 20 }
	}
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T>
where
	F: Fn(&str) -> Option<String>,
	T: FromStr,
{
	match lookup(key) {
		None => Ok(default),
		Some(raw) => raw.trim().parse().map_err(|_| {
			ConfigError::InvalidSetting { field: key, reason: format!("cannot parse `{raw}`") }
				.into()
		}),
	}
}

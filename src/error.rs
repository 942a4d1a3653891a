//! Error taxonomy shared by sessions, the OIDC flow, the upstream token cache, and stores.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical error exposed by public APIs.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Local configuration problem; fail fast, do not retry.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Missing, mismatched, expired, or reused CSRF state on the login callback.
	#[error(transparent)]
	State(#[from] StateError),
	/// Discovery, exchange, userinfo, or refresh call failed.
	#[error(transparent)]
	Upstream(#[from] UpstreamError),
	/// Identity token payload could not be decoded.
	#[error(transparent)]
	Decode(#[from] DecodeError),
	/// Local infrastructure failure (randomness).
	#[error(transparent)]
	Infra(#[from] InfraError),
	/// Configuration store failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
}
impl Error {
	/// Stable machine-readable code used in structured error payloads.
	pub fn code(&self) -> String {
		match self {
			Self::Config(ConfigError::NotConfigured) => "OIDC_NOT_CONFIGURED".into(),
			Self::Config(_) => "CONFIGURATION_ERROR".into(),
			Self::State(StateError::Provider { error, .. }) => error.clone(),
			Self::State(StateError::MissingCode) => "MISSING_CODE".into(),
			Self::State(StateError::Mismatch) => "INVALID_STATE".into(),
			Self::State(StateError::Rejected) => "STATE_VALIDATION_FAILED".into(),
			Self::Upstream(err) => match err.stage() {
				Stage::Discovery => "DISCOVERY_FAILED".into(),
				Stage::Exchange => "TOKEN_EXCHANGE_FAILED".into(),
				Stage::Userinfo => "USERINFO_FAILED".into(),
				Stage::Refresh => "TOKEN_REFRESH_FAILED".into(),
			},
			Self::Decode(_) => "ID_TOKEN_INVALID".into(),
			Self::Infra(_) => "RANDOM_SOURCE_UNAVAILABLE".into(),
			Self::Storage(_) => "DATABASE_ERROR".into(),
		}
	}

	/// HTTP status an API-style caller should receive for this error.
	pub fn http_status(&self) -> u16 {
		match self {
			Self::Config(ConfigError::NotConfigured) => 503,
			Self::State(_) => 400,
			Self::Upstream(_) | Self::Decode(_) => 502,
			Self::Config(_) | Self::Infra(_) | Self::Storage(_) => 500,
		}
	}

	/// Structured payload returned to API-style callers.
	pub fn payload(&self) -> ErrorPayload {
		let error = match self {
			Self::State(StateError::Provider { description: Some(description), .. }) =>
				description.clone(),
			Self::Upstream(err) => err.stage().public_message().into(),
			other => other.to_string(),
		};

		ErrorPayload { error, code: self.code() }
	}

	/// Returns `true` when a later attempt may succeed without operator action.
	pub fn is_retryable(&self) -> bool {
		matches!(self, Self::Upstream(_))
	}
}

/// JSON body surfaced to API clients for a failed request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
	/// Human-readable message.
	pub error: String,
	/// Stable error code.
	pub code: String,
}

/// Call stage an upstream failure originated from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
	/// OIDC discovery document fetch.
	Discovery,
	/// Authorization-code exchange at the token endpoint.
	Exchange,
	/// Userinfo endpoint fetch.
	Userinfo,
	/// Third-party bearer token refresh.
	Refresh,
}
impl Stage {
	/// Returns a stable label suitable for logs and error messages.
	pub const fn as_str(self) -> &'static str {
		match self {
			Stage::Discovery => "discovery",
			Stage::Exchange => "exchange",
			Stage::Userinfo => "userinfo",
			Stage::Refresh => "refresh",
		}
	}

	/// Caller-facing message for a failure at this stage; upstream detail stays in logs.
	pub const fn public_message(self) -> &'static str {
		match self {
			Stage::Discovery => "Failed to fetch OIDC provider metadata.",
			Stage::Exchange => "Failed to exchange the authorization code.",
			Stage::Userinfo => "Failed to fetch user information.",
			Stage::Refresh => "Failed to refresh the upstream access token.",
		}
	}
}
impl Display for Stage {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Configuration and validation failures.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// Provider URL, client id, or client secret is missing.
	#[error("OIDC provider is not configured.")]
	NotConfigured,
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// A configured URL cannot be parsed.
	#[error("The {field} setting is not a valid URL.")]
	InvalidUrl {
		/// Setting that failed to parse.
		field: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// A configured value is out of range or malformed.
	#[error("The {field} setting is invalid: {reason}.")]
	InvalidSetting {
		/// Setting that failed validation.
		field: &'static str,
		/// Why the value was rejected.
		reason: String,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Login callback rejections; no session is created and the attempt must restart.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum StateError {
	/// The provider redirected back with an `error` parameter.
	#[error("Identity provider returned an error: {error}.")]
	Provider {
		/// OAuth `error` parameter.
		error: String,
		/// OAuth `error_description` parameter, when supplied.
		description: Option<String>,
	},
	/// The callback carried no authorization code.
	#[error("Missing authorization code.")]
	MissingCode,
	/// The presented state is empty or differs from the anti-CSRF cookie.
	#[error("Invalid state parameter.")]
	Mismatch,
	/// The state was never issued, already consumed, or expired.
	#[error("State validation failed.")]
	Rejected,
}

/// Upstream HTTP failures, each tagged with the originating [`Stage`].
#[derive(Debug, ThisError)]
pub enum UpstreamError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred during the {stage} call.")]
	Network {
		/// Originating stage.
		stage: Stage,
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred during the {stage} call.")]
	Io {
		/// Originating stage.
		stage: Stage,
		/// IO failure.
		#[source]
		source: std::io::Error,
	},
	/// The call exceeded the transport timeout.
	#[error("The {stage} call timed out.")]
	Timeout {
		/// Originating stage.
		stage: Stage,
	},
	/// The HTTP client failed without a more specific classification.
	#[error("The {stage} call failed: {message}.")]
	Transport {
		/// Originating stage.
		stage: Stage,
		/// Client-supplied message.
		message: String,
	},
	/// The endpoint answered with a non-success status.
	#[error("The {stage} call returned HTTP {status}: {body}.")]
	Status {
		/// Originating stage.
		stage: Stage,
		/// HTTP status code.
		status: u16,
		/// Truncated response body.
		body: String,
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// The endpoint answered with JSON that could not be decoded.
	#[error("The {stage} call returned malformed JSON.")]
	Parse {
		/// Originating stage.
		stage: Stage,
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// The token endpoint answered with an OAuth error object.
	#[error("The {stage} call was rejected with OAuth error {error}.")]
	OAuth {
		/// Originating stage.
		stage: Stage,
		/// OAuth `error` field.
		error: String,
		/// OAuth `error_description` field.
		description: Option<String>,
	},
	/// The third-party API reported a non-zero `errcode`.
	#[error("The {stage} call failed with provider code {code}: {message}.")]
	Provider {
		/// Originating stage.
		stage: Stage,
		/// Provider `errcode`.
		code: i64,
		/// Provider `errmsg`.
		message: String,
	},
	/// The response carried no access token.
	#[error("The {stage} call returned an empty access token.")]
	EmptyToken {
		/// Originating stage.
		stage: Stage,
	},
	/// The response carried a lifetime that is not positive or overflows the clock.
	#[error("The {stage} call returned an unusable expires_in of {expires_in} seconds.")]
	InvalidExpiry {
		/// Originating stage.
		stage: Stage,
		/// Lifetime as reported upstream.
		expires_in: i64,
	},
	/// The discovery document does not advertise a required endpoint.
	#[error("Discovery document does not advertise the {endpoint} required by the {stage} call.")]
	MissingEndpoint {
		/// Stage that needed the endpoint.
		stage: Stage,
		/// Discovery field name.
		endpoint: &'static str,
	},
}
impl UpstreamError {
	/// Wraps a transport-specific network error.
	pub fn network(stage: Stage, src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { stage, source: Box::new(src) }
	}

	/// Stage the failure originated from.
	pub fn stage(&self) -> Stage {
		match self {
			Self::Network { stage, .. }
			| Self::Io { stage, .. }
			| Self::Timeout { stage }
			| Self::Transport { stage, .. }
			| Self::Status { stage, .. }
			| Self::Parse { stage, .. }
			| Self::OAuth { stage, .. }
			| Self::Provider { stage, .. }
			| Self::EmptyToken { stage }
			| Self::InvalidExpiry { stage, .. }
			| Self::MissingEndpoint { stage, .. } => *stage,
		}
	}
}

/// Malformed identity token payloads; callers fall back to the userinfo endpoint.
#[derive(Debug, ThisError)]
pub enum DecodeError {
	/// The token does not have exactly three dot-separated segments.
	#[error("ID token must have three segments, found {segments}.")]
	Format {
		/// Number of segments found.
		segments: usize,
	},
	/// The payload segment is not valid base64 in either alphabet.
	#[error("ID token payload is not valid base64.")]
	Base64(#[from] base64::DecodeError),
	/// The payload is not a JSON claims object.
	#[error("ID token claims could not be parsed.")]
	Claims(#[from] serde_json::Error),
	/// The claims carry no `sub`.
	#[error("ID token claims do not name a subject.")]
	MissingSubject,
}

/// Infrastructure failures fatal to the current request.
#[derive(Debug, ThisError)]
pub enum InfraError {
	/// The operating system random source failed.
	#[error("Secure random source is unavailable.")]
	Random {
		/// Underlying RNG failure.
		#[source]
		source: BoxError,
	},
}
impl InfraError {
	/// Wraps a random-source failure.
	pub fn random(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Random { source: Box::new(src) }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn upstream_errors_carry_their_stage() {
		let err: Error = UpstreamError::Timeout { stage: Stage::Refresh }.into();

		assert!(err.is_retryable());
		assert_eq!(err.http_status(), 502);
		assert_eq!(err.code(), "TOKEN_REFRESH_FAILED");
		assert_eq!(err.to_string(), "The refresh call timed out.");
	}

	#[test]
	fn provider_callback_errors_surface_description() {
		let err: Error = StateError::Provider {
			error: "access_denied".into(),
			description: Some("User cancelled the login.".into()),
		}
		.into();
		let payload = err.payload();

		assert_eq!(payload.code, "access_denied");
		assert_eq!(payload.error, "User cancelled the login.");
		assert_eq!(err.http_status(), 400);
		assert!(!err.is_retryable());
	}

	#[test]
	fn upstream_payload_hides_response_body() {
		let err: Error = UpstreamError::Status {
			stage: Stage::Refresh,
			status: 503,
			body: "internal host db-7 unreachable".into(),
			retry_after: None,
		}
		.into();
		let payload = err.payload();

		assert_eq!(payload.error, "Failed to refresh the upstream access token.");
		assert_eq!(payload.code, "TOKEN_REFRESH_FAILED");
		assert!(err.to_string().contains("db-7"));
	}

	#[test]
	fn missing_configuration_is_service_unavailable() {
		let err: Error = ConfigError::NotConfigured.into();
		let payload = serde_json::to_value(err.payload()).expect("Payload should serialize.");

		assert_eq!(err.http_status(), 503);
		assert_eq!(payload["code"], "OIDC_NOT_CONFIGURED");
	}

	#[test]
	fn storage_error_keeps_source() {
		let store_error = crate::store::StoreError::Backend { message: "disk full".into() };
		let err: Error = store_error.clone().into();
		let source = StdError::source(&err).expect("Storage errors should expose their source.");

		assert_eq!(source.to_string(), store_error.to_string());
		assert_eq!(err.code(), "DATABASE_ERROR");
	}
}

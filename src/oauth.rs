//! Authorization-code exchange over the `oauth2` crate plus transport error mapping.

pub use oauth2;

// std
use std::borrow::Cow;
// crates.io
use oauth2::{
	AuthType, AuthorizationCode, Client, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
	ExtraTokenFields, HttpClientError, RedirectUrl, RequestTokenError, StandardRevocableToken,
	StandardTokenResponse, TokenResponse, TokenUrl,
	basic::{
		BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
		BasicTokenType,
	},
};
// self
use crate::{
	_prelude::*,
	auth::Secret,
	error::{ConfigError, Stage, UpstreamError},
	http::{AuthHttpClient, ResponseMetadata, ResponseMetadataSlot},
};

type CodeTokenResponse = StandardTokenResponse<IdTokenFields, BasicTokenType>;
type CodeExchangeClient = Client<
	BasicErrorResponse,
	CodeTokenResponse,
	BasicTokenIntrospectionResponse,
	StandardRevocableToken,
	BasicRevocationErrorResponse,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointSet,
>;

/// Maps HTTP transport failures into crate [`Error`] values.
pub trait TransportErrorMapper<E>
where
	Self: 'static + Send + Sync,
	E: 'static + Send + Sync + StdError,
{
	/// Converts an [`HttpClientError`] emitted during `stage` into a crate error.
	fn map_transport_error(
		&self,
		stage: Stage,
		metadata: Option<&ResponseMetadata>,
		error: HttpClientError<E>,
	) -> Error;
}

/// Default mapper for reqwest-backed transports.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransportErrorMapper;
#[cfg(feature = "reqwest")]
impl TransportErrorMapper<ReqwestError> for ReqwestTransportErrorMapper {
	fn map_transport_error(
		&self,
		stage: Stage,
		meta: Option<&ResponseMetadata>,
		err: HttpClientError<ReqwestError>,
	) -> Error {
		match err {
			HttpClientError::Reqwest(inner) => map_reqwest_error(stage, *inner),
			HttpClientError::Http(inner) => ConfigError::from(inner).into(),
			HttpClientError::Io(source) => UpstreamError::Io { stage, source }.into(),
			HttpClientError::Other(message) => UpstreamError::Transport { stage, message }.into(),
			_ => UpstreamError::Transport {
				stage,
				message: match meta.and_then(|m| m.status) {
					Some(status) => format!("unclassified HTTP client failure after status {status}"),
					None => "unclassified HTTP client failure".into(),
				},
			}
			.into(),
		}
	}
}

/// Extra token response fields carrying the OIDC identity token.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct IdTokenFields {
	/// Compact-serialized identity token, when issued.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id_token: Option<String>,
}
impl ExtraTokenFields for IdTokenFields {}

/// Decoded token endpoint response from an authorization-code exchange.
#[derive(Clone, Debug)]
pub struct TokenSet {
	/// Bearer access token.
	pub access_token: Secret,
	/// Token type reported by the provider (normally `bearer`).
	pub token_type: String,
	/// Relative lifetime of the access token.
	pub expires_in: Option<Duration>,
	/// Refresh token; stored by nothing in this crate.
	pub refresh_token: Option<Secret>,
	/// Compact-serialized identity token.
	pub id_token: Option<Secret>,
}

/// Inputs for one authorization-code exchange.
pub(crate) struct CodeExchange<'a> {
	pub(crate) token_endpoint: &'a Url,
	pub(crate) client_id: &'a str,
	pub(crate) client_secret: &'a Secret,
	pub(crate) redirect_url: &'a str,
	pub(crate) code: &'a str,
}

/// Posts a form-encoded `authorization_code` grant with credentials in the request body.
pub(crate) async fn exchange_authorization_code<C, M>(
	http_client: &C,
	error_mapper: &M,
	exchange: CodeExchange<'_>,
) -> Result<TokenSet>
where
	C: ?Sized + AuthHttpClient,
	M: ?Sized + TransportErrorMapper<C::TransportError>,
{
	let token_url = TokenUrl::new(exchange.token_endpoint.to_string())
		.map_err(|source| ConfigError::InvalidUrl { field: "token_endpoint", source })?;
	let redirect_url = RedirectUrl::new(exchange.redirect_url.to_owned())
		.map_err(|source| ConfigError::InvalidUrl { field: "redirect_url", source })?;
	let oauth_client: CodeExchangeClient = Client::new(ClientId::new(exchange.client_id.to_owned()))
		.set_client_secret(ClientSecret::new(exchange.client_secret.expose().to_owned()))
		.set_auth_type(AuthType::RequestBody)
		.set_token_uri(token_url);
	let meta = ResponseMetadataSlot::default();
	let instrumented = http_client.with_metadata(meta.clone());
	let response = oauth_client
		.exchange_code(AuthorizationCode::new(exchange.code.to_owned()))
		.set_redirect_uri(Cow::Owned(redirect_url))
		.request_async(&instrumented)
		.await
		.map_err(|err| map_request_error(Stage::Exchange, meta.take(), err, error_mapper))?;

	Ok(map_code_token_response(response))
}

fn map_code_token_response(response: CodeTokenResponse) -> TokenSet {
	TokenSet {
		access_token: Secret::new(response.access_token().secret().to_owned()),
		token_type: response.token_type().as_ref().to_owned(),
		expires_in: response.expires_in().and_then(|lifetime| Duration::try_from(lifetime).ok()),
		refresh_token: response.refresh_token().map(|token| Secret::new(token.secret().to_owned())),
		id_token: response.extra_fields().id_token.clone().map(Secret::new),
	}
}

fn map_request_error<E, M>(
	stage: Stage,
	meta: Option<ResponseMetadata>,
	err: RequestTokenError<HttpClientError<E>, BasicErrorResponse>,
	mapper: &M,
) -> Error
where
	E: 'static + Send + Sync + StdError,
	M: ?Sized + TransportErrorMapper<E>,
{
	let meta_ref = meta.as_ref();

	match err {
		RequestTokenError::ServerResponse(response) => UpstreamError::OAuth {
			stage,
			error: response.error().as_ref().to_owned(),
			description: response.error_description().cloned(),
		}
		.into(),
		RequestTokenError::Request(error) => mapper.map_transport_error(stage, meta_ref, error),
		RequestTokenError::Parse(source, _body) =>
			UpstreamError::Parse { stage, source, status: meta_ref.and_then(|m| m.status) }.into(),
		RequestTokenError::Other(message) => match meta_ref.and_then(|m| m.status) {
			Some(status) if !(200..300).contains(&status) => UpstreamError::Status {
				stage,
				status,
				body: message,
				retry_after: meta_ref.and_then(|m| m.retry_after),
			}
			.into(),
			_ => UpstreamError::Transport { stage, message }.into(),
		},
	}
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(stage: Stage, err: ReqwestError) -> Error {
	if err.is_builder() {
		return ConfigError::from(err).into();
	}
	if err.is_timeout() {
		return UpstreamError::Timeout { stage }.into();
	}

	UpstreamError::network(stage, err).into()
}

#[cfg(test)]
mod tests {
	// crates.io
	use oauth2::{AccessToken, basic::BasicErrorResponseType};
	// self
	use super::*;

	#[test]
	fn token_response_maps_identity_token() {
		let mut response = CodeTokenResponse::new(
			AccessToken::new("access-1".into()),
			BasicTokenType::Bearer,
			IdTokenFields { id_token: Some("a.b.c".into()) },
		);

		response.set_expires_in(Some(&StdDuration::from_secs(3600)));

		let tokens = map_code_token_response(response);

		assert_eq!(tokens.access_token.expose(), "access-1");
		assert_eq!(tokens.token_type, "bearer");
		assert_eq!(tokens.expires_in, Some(Duration::hours(1)));
		assert_eq!(tokens.id_token.as_ref().map(Secret::expose), Some("a.b.c"));
		assert!(tokens.refresh_token.is_none());
	}

	#[cfg(feature = "reqwest")]
	#[test]
	fn server_errors_keep_oauth_code() {
		let response = BasicErrorResponse::new(
			BasicErrorResponseType::InvalidGrant,
			Some("Code already used.".into()),
			None,
		);
		let err = map_request_error::<ReqwestError, _>(
			Stage::Exchange,
			Some(ResponseMetadata { status: Some(400), retry_after: None }),
			RequestTokenError::ServerResponse(response),
			&ReqwestTransportErrorMapper,
		);

		match err {
			Error::Upstream(UpstreamError::OAuth { stage, error, description }) => {
				assert_eq!(stage, Stage::Exchange);
				assert_eq!(error, "invalid_grant");
				assert_eq!(description.as_deref(), Some("Code already used."));
			},
			other => panic!("Unexpected error: {other:?}."),
		}
	}

	#[cfg(feature = "reqwest")]
	#[test]
	fn unexpected_responses_keep_status() {
		let err = map_request_error::<ReqwestError, _>(
			Stage::Exchange,
			Some(ResponseMetadata { status: Some(502), retry_after: Some(Duration::seconds(3)) }),
			RequestTokenError::Other("bad gateway".into()),
			&ReqwestTransportErrorMapper,
		);

		assert!(matches!(
			err,
			Error::Upstream(UpstreamError::Status { status: 502, retry_after: Some(_), .. })
		));
	}
}

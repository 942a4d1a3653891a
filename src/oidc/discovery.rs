//! OIDC provider metadata.

// self
use crate::_prelude::*;

/// Provider metadata served at `/.well-known/openid-configuration`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDocument {
	/// Issuer identifier.
	pub issuer: String,
	/// Browser-facing authorization endpoint.
	pub authorization_endpoint: Url,
	/// Token endpoint used for the code exchange.
	pub token_endpoint: Url,
	/// Userinfo endpoint used when the identity token is unusable.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub userinfo_endpoint: Option<Url>,
	/// Signing key set location.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub jwks_uri: Option<Url>,
}
impl DiscoveryDocument {
	/// Builds the provider redirect for `state`.
	///
	/// Query parameters are appended in the order `client_id`, `redirect_uri`,
	/// `response_type`, `scope`, `state`.
	pub fn authorization_url(&self, client_id: &str, redirect_url: &str, state: &str) -> Url {
		let mut url = self.authorization_endpoint.clone();

		url.query_pairs_mut()
			.append_pair("client_id", client_id)
			.append_pair("redirect_uri", redirect_url)
			.append_pair("response_type", "code")
			.append_pair("scope", "openid")
			.append_pair("state", state);

		url
	}
}

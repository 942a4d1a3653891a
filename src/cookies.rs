//! Session and login-state cookies.

// crates.io
use cookie::{Cookie, SameSite};
// self
use crate::{_prelude::*, oidc::STATE_TTL};

/// Cookie carrying the session id.
pub const SESSION_COOKIE_NAME: &str = "session_id";
/// Cookie carrying the anti-CSRF state for an in-flight login.
pub const STATE_COOKIE_NAME: &str = "oauth_state";

/// Cookie pinning the state of the login attempt that is about to redirect.
pub fn state_cookie(state: &str, secure: bool) -> Cookie<'static> {
	base(STATE_COOKIE_NAME, state.to_owned(), secure).max_age(STATE_TTL).build()
}

/// Removal cookie for [`STATE_COOKIE_NAME`].
pub fn clear_state_cookie(secure: bool) -> Cookie<'static> {
	base(STATE_COOKIE_NAME, String::new(), secure).max_age(Duration::ZERO).build()
}

/// Cookie carrying `session_id` for `ttl`.
pub fn session_cookie(session_id: &str, ttl: Duration, secure: bool) -> Cookie<'static> {
	base(SESSION_COOKIE_NAME, session_id.to_owned(), secure).max_age(ttl).build()
}

/// Removal cookie for [`SESSION_COOKIE_NAME`].
pub fn clear_session_cookie(secure: bool) -> Cookie<'static> {
	base(SESSION_COOKIE_NAME, String::new(), secure).max_age(Duration::ZERO).build()
}

/// Returns the value of cookie `name` from a raw `Cookie` request header.
pub fn find_cookie(header: &str, name: &str) -> Option<String> {
	Cookie::split_parse(header)
		.filter_map(|parsed| parsed.ok())
		.find(|cookie| cookie.name() == name)
		.map(|cookie| cookie.value().to_owned())
}

fn base(name: &'static str, value: String, secure: bool) -> cookie::CookieBuilder<'static> {
	Cookie::build((name, value)).path("/").http_only(true).same_site(SameSite::Lax).secure(secure)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn state_cookie_lives_ten_minutes() {
		let cookie = state_cookie("abc", false);

		assert_eq!(cookie.name(), "oauth_state");
		assert_eq!(cookie.value(), "abc");
		assert_eq!(cookie.max_age(), Some(Duration::minutes(10)));
		assert_eq!(cookie.path(), Some("/"));
		assert_eq!(cookie.http_only(), Some(true));
		assert_eq!(cookie.same_site(), Some(SameSite::Lax));
		assert_eq!(cookie.secure(), Some(false));
	}

	#[test]
	fn session_cookie_renders_attributes() {
		let rendered = session_cookie("sid", Duration::hours(24), true).to_string();

		assert!(rendered.starts_with("session_id=sid"));
		assert!(rendered.contains("Max-Age=86400"));
		assert!(rendered.contains("HttpOnly"));
		assert!(rendered.contains("Secure"));
		assert!(rendered.contains("Path=/"));
	}

	#[test]
	fn removal_cookies_expire_immediately() {
		assert_eq!(clear_session_cookie(false).max_age(), Some(Duration::ZERO));
		assert_eq!(clear_state_cookie(false).value(), "");
	}

	#[test]
	fn find_cookie_reads_request_header() {
		let header = "theme=dark; session_id=s-1; oauth_state=st";

		assert_eq!(find_cookie(header, SESSION_COOKIE_NAME).as_deref(), Some("s-1"));
		assert_eq!(find_cookie(header, STATE_COOKIE_NAME).as_deref(), Some("st"));
		assert_eq!(find_cookie(header, "missing"), None);
	}
}

//! Random, URL-safe identifiers for sessions and anti-CSRF state.

// std
use std::{borrow::Borrow, ops::Deref};
// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, error::InfraError};

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal, $bytes:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			#[doc = concat!("Number of random bytes behind a generated ", $kind, " value.")]
			pub const RANDOM_BYTES: usize = $bytes;

			/// Wraps an existing value after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}

			/// Draws a fresh value from the operating system CSPRNG.
			pub fn generate() -> Result<Self, InfraError> {
				random_token::<$bytes>().map(Self)
			}

			/// Short SHA-256 fingerprint that is safe to log.
			pub fn fingerprint(&self) -> String {
				fingerprint(&self.0)
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_view($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.fingerprint())
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 128;
const FINGERPRINT_BYTES: usize = 6;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (session, state).
		kind: &'static str,
	},
	/// The identifier contains characters outside the URL-safe base64 alphabet.
	#[error("{kind} identifier contains characters outside the URL-safe alphabet.")]
	InvalidCharacter {
		/// Kind of identifier (session, state).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (session, state).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
}

def_id! { SessionId, "Opaque browser session identifier carried in the session cookie.", "Session", 32 }
def_id! { StateNonce, "Single-use anti-CSRF nonce bound to one login attempt.", "State", 16 }

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if !view.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
		return Err(IdentifierError::InvalidCharacter { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

fn random_token<const N: usize>() -> Result<String, InfraError> {
	let mut bytes = [0_u8; N];

	OsRng.try_fill_bytes(&mut bytes).map_err(InfraError::random)?;

	Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn fingerprint(value: &str) -> String {
	let digest = Sha256::digest(value.as_bytes());

	URL_SAFE_NO_PAD.encode(&digest[..FINGERPRINT_BYTES])
}

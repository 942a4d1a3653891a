//! Key-value configuration store contract and built-in backends.

pub mod credentials;
pub mod file;
pub mod memory;

pub use credentials::{CredentialRecord, MASKED_SECRET};
pub use file::FileConfigStore;
pub use memory::MemoryConfigStore;

// self
use crate::_prelude::*;

/// Boxed future returned by [`ConfigStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Persisted key-value configuration consumed by credential loading and saving.
pub trait ConfigStore
where
	Self: Send + Sync,
{
	/// Fetches the value stored under `key`, if any.
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

	/// Stores `value` under `key`, replacing any previous value.
	fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()>;

	/// Stores every entry or none of them.
	fn set_many<'a>(&'a self, entries: &'a [(&'a str, String)]) -> StoreFuture<'a, ()>;
}

/// Error type produced by [`ConfigStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

//! Upstream app credentials persisted in a [`ConfigStore`].

// self
use crate::{
	_prelude::*,
	auth::Secret,
	error::ConfigError,
	http::AuthHttpClient,
	oauth::TransportErrorMapper,
	obs::trace_event,
	store::ConfigStore,
	token_cache::ExternalTokenCache,
};

/// Placeholder shown instead of a stored secret; submitting it keeps the stored value.
pub const MASKED_SECRET: &str = "******";
/// Store key holding the upstream app id.
pub const APP_ID_KEY: &str = "upstream_app_id";
/// Store key holding the upstream app secret.
pub const APP_SECRET_KEY: &str = "upstream_app_secret";

/// Upstream app id and secret.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
	/// Upstream app id.
	pub app_id: String,
	/// Upstream app secret.
	pub app_secret: Secret,
}
impl CredentialRecord {
	/// Reads the stored credentials; `None` unless both values are present and non-empty.
	pub async fn load<S>(store: &S) -> Result<Option<Self>>
	where
		S: ?Sized + ConfigStore,
	{
		let app_id = store.get(APP_ID_KEY).await?.unwrap_or_default();
		let app_secret = store.get(APP_SECRET_KEY).await?.unwrap_or_default();

		if app_id.is_empty() || app_secret.is_empty() {
			return Ok(None);
		}

		Ok(Some(Self { app_id, app_secret: Secret::new(app_secret) }))
	}

	/// Pushes stored credentials into `cache`, returning `true` when any were found.
	///
	/// Called once at startup so credentials saved at runtime survive a restart.
	pub async fn apply_stored<S, C, M>(store: &S, cache: &ExternalTokenCache<C, M>) -> Result<bool>
	where
		S: ?Sized + ConfigStore,
		C: ?Sized + AuthHttpClient,
		M: ?Sized + TransportErrorMapper<C::TransportError>,
	{
		let Some(record) = Self::load(store).await? else {
			return Ok(false);
		};

		cache.update_credentials(record.app_id, record.app_secret).await;

		Ok(true)
	}

	/// Persists new credentials, then hands them to `cache`.
	///
	/// A blank or [`MASKED_SECRET`] secret keeps the stored secret. Nothing reaches the cache
	/// unless the store accepted the write.
	pub async fn save<S, C, M>(
		store: &S,
		cache: &ExternalTokenCache<C, M>,
		app_id: &str,
		app_secret: Secret,
	) -> Result<Self>
	where
		S: ?Sized + ConfigStore,
		C: ?Sized + AuthHttpClient,
		M: ?Sized + TransportErrorMapper<C::TransportError>,
	{
		let app_id = app_id.trim();

		if app_id.is_empty() {
			return Err(ConfigError::InvalidSetting {
				field: "app_id",
				reason: "must not be empty".into(),
			}
			.into());
		}

		let app_secret = if is_placeholder(&app_secret) {
			match store.get(APP_SECRET_KEY).await?.filter(|s| !s.is_empty()) {
				Some(stored) => Secret::new(stored),
				None =>
					return Err(ConfigError::InvalidSetting {
						field: "app_secret",
						reason: "no stored secret to keep".into(),
					}
					.into()),
			}
		} else {
			app_secret
		};
		let entries = [
			(APP_ID_KEY, app_id.to_owned()),
			(APP_SECRET_KEY, app_secret.expose().to_owned()),
		];

		store.set_many(&entries).await?;
		cache.update_credentials(app_id, app_secret.clone()).await;

		trace_event!(info, app_id, "Upstream credentials saved.");

		Ok(Self { app_id: app_id.to_owned(), app_secret })
	}

	/// View safe to return to an operator: the secret is replaced by [`MASKED_SECRET`].
	pub fn masked(&self) -> MaskedCredentials {
		MaskedCredentials {
			app_id: self.app_id.clone(),
			app_secret: if self.app_secret.is_empty() { String::new() } else { MASKED_SECRET.into() },
		}
	}
}

/// Credentials with the secret masked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaskedCredentials {
	/// Upstream app id.
	pub app_id: String,
	/// [`MASKED_SECRET`] when a secret is stored, empty otherwise.
	pub app_secret: String,
}

fn is_placeholder(secret: &Secret) -> bool {
	let value = secret.expose().trim();

	value.is_empty() || value == MASKED_SECRET
}

#[cfg(all(test, feature = "reqwest"))]
mod tests {
	// self
	use super::*;
	use crate::{
		_preludet::{ScriptedHttpClient, build_scripted_token_cache},
		store::{MemoryConfigStore, StoreError, StoreFuture},
	};

	struct FailingStore;
	impl ConfigStore for FailingStore {
		fn get<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<String>> {
			Box::pin(async { Ok(Some("stored-secret".into())) })
		}

		fn set<'a>(&'a self, _key: &'a str, _value: &'a str) -> StoreFuture<'a, ()> {
			Box::pin(async { Err(StoreError::Backend { message: "disk full".into() }) })
		}

		fn set_many<'a>(&'a self, _entries: &'a [(&'a str, String)]) -> StoreFuture<'a, ()> {
			Box::pin(async { Err(StoreError::Backend { message: "disk full".into() }) })
		}
	}

	#[tokio::test]
	async fn masked_secret_keeps_stored_value() {
		let store = MemoryConfigStore::with_entries([
			(APP_ID_KEY, "old-app"),
			(APP_SECRET_KEY, "old-secret"),
		]);
		let (cache, _clock) = build_scripted_token_cache(ScriptedHttpClient::default())
			.expect("Scripted cache should build.");
		let saved = CredentialRecord::save(&store, &cache, "new-app", Secret::new(MASKED_SECRET))
			.await
			.expect("Save should succeed.");

		assert_eq!(saved.app_id, "new-app");
		assert_eq!(saved.app_secret.expose(), "old-secret");
		assert_eq!(cache.app_id().await, "new-app");
		assert_eq!(
			store.get(APP_SECRET_KEY).await.expect("Memory get should succeed."),
			Some("old-secret".into())
		);
		assert_eq!(saved.masked().app_secret, MASKED_SECRET);
	}

	#[tokio::test]
	async fn rejected_write_leaves_cache_untouched() {
		let (cache, _clock) = build_scripted_token_cache(ScriptedHttpClient::default())
			.expect("Scripted cache should build.");
		let err = CredentialRecord::save(&FailingStore, &cache, "new-app", Secret::new("s"))
			.await
			.expect_err("Failed persistence must surface.");

		assert!(matches!(err, Error::Storage(StoreError::Backend { .. })));
		assert_eq!(cache.app_id().await, "test-app");
	}

	#[tokio::test]
	async fn blank_secret_without_stored_value_is_rejected() {
		let store = MemoryConfigStore::default();
		let (cache, _clock) = build_scripted_token_cache(ScriptedHttpClient::default())
			.expect("Scripted cache should build.");
		let err = CredentialRecord::save(&store, &cache, "app", Secret::new("  "))
			.await
			.expect_err("A blank secret needs a stored one.");

		assert!(matches!(err, Error::Config(ConfigError::InvalidSetting { field: "app_secret", .. })));
		assert!(store.is_empty());
	}

	#[tokio::test]
	async fn stored_credentials_apply_at_startup() {
		let store = MemoryConfigStore::default();
		let (cache, _clock) = build_scripted_token_cache(ScriptedHttpClient::default())
			.expect("Scripted cache should build.");

		assert!(!CredentialRecord::apply_stored(&store, &cache).await.expect("Apply should succeed."));

		store.set(APP_ID_KEY, "persisted-app").await.expect("Memory set should succeed.");
		store.set(APP_SECRET_KEY, "persisted-secret").await.expect("Memory set should succeed.");

		assert!(CredentialRecord::apply_stored(&store, &cache).await.expect("Apply should succeed."));
		assert_eq!(cache.app_id().await, "persisted-app");
	}
}

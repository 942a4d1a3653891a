//! In-memory browser session table with TTL validity and lazy eviction.

// self
use crate::{
	_prelude::*,
	auth::SessionId,
	clock::{self, Clock},
	obs::trace_event,
};

/// Default lifetime of a freshly created session.
pub const DEFAULT_SESSION_TTL: Duration = Duration::hours(24);

/// Authenticated browser session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
	/// Opaque identifier carried in the session cookie.
	pub id: SessionId,
	/// Identity-provider subject.
	pub subject: String,
	/// Email claim, possibly empty.
	pub email: String,
	/// Creation instant.
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	/// Instant from which the session is no longer valid.
	#[serde(with = "time::serde::rfc3339")]
	pub expires_at: OffsetDateTime,
}
impl Session {
	/// Returns `true` while `now` is strictly before the expiry instant.
	pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
		now < self.expires_at
	}
}

/// Thread-safe session table.
///
/// Lookups take the shared lock. Expired entries found during a lookup are removed with a
/// separate exclusive acquisition after the shared guard is released; the lock is never
/// upgraded.
pub struct SessionStore {
	sessions: RwLock<HashMap<SessionId, Session>>,
	ttl: Duration,
	clock: Arc<dyn Clock>,
}
impl SessionStore {
	/// Creates an empty store using [`DEFAULT_SESSION_TTL`] and the system clock.
	pub fn new() -> Self {
		Self::with_ttl(DEFAULT_SESSION_TTL)
	}

	/// Creates an empty store with a custom session lifetime.
	pub fn with_ttl(ttl: Duration) -> Self {
		Self { sessions: RwLock::new(HashMap::new()), ttl, clock: clock::system() }
	}

	/// Overrides the time source.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Lifetime applied to new sessions.
	pub fn ttl(&self) -> Duration {
		self.ttl
	}

	/// Creates and stores a session for `subject`.
	pub fn create_session(
		&self,
		subject: impl Into<String>,
		email: impl Into<String>,
	) -> Result<Session> {
		let id = SessionId::generate()?;
		let now = self.clock.now();
		let session = Session {
			id: id.clone(),
			subject: subject.into(),
			email: email.into(),
			created_at: now,
			expires_at: now + self.ttl,
		};

		self.sessions.write().insert(id, session.clone());

		trace_event!(debug, session = %session.id.fingerprint(), "Session created.");

		Ok(session)
	}

	/// Returns the session when it exists and has not expired.
	///
	/// An expired entry is deleted before returning `None`.
	pub fn get_session(&self, id: &str) -> Option<Session> {
		let now = self.clock.now();
		let found = self.sessions.read().get(id).cloned()?;

		if found.is_valid_at(now) {
			return Some(found);
		}

		self.delete_session(id);

		trace_event!(debug, session = %found.id.fingerprint(), "Expired session evicted.");

		None
	}

	/// Removes the session; absent ids are ignored.
	pub fn delete_session(&self, id: &str) {
		self.sessions.write().remove(id);
	}

	/// Returns `true` when [`get_session`](Self::get_session) would return a session.
	pub fn validate_session(&self, id: &str) -> bool {
		self.get_session(id).is_some()
	}

	/// Drops every expired session and returns how many were removed.
	pub fn purge_expired(&self) -> usize {
		let now = self.clock.now();
		let mut sessions = self.sessions.write();
		let before = sessions.len();

		sessions.retain(|_, session| session.is_valid_at(now));

		before - sessions.len()
	}

	/// Number of stored sessions, including expired entries not yet evicted.
	pub fn len(&self) -> usize {
		self.sessions.read().len()
	}

	/// Returns `true` when no sessions are stored.
	pub fn is_empty(&self) -> bool {
		self.sessions.read().is_empty()
	}
}
impl Default for SessionStore {
	fn default() -> Self {
		Self::new()
	}
}
impl Debug for SessionStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionStore").field("sessions", &self.len()).field("ttl", &self.ttl).finish()
	}
}

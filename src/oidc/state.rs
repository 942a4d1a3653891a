//! Single-use anti-CSRF state registry.

// self
use crate::_prelude::*;

/// Lifetime of an issued state value.
pub const STATE_TTL: Duration = Duration::minutes(10);

/// Issued state values and their expiry instants.
///
/// A state is removed by its first validation attempt whether or not it has expired, so it
/// can succeed at most once. Entries that are never presented stay until process exit.
#[derive(Debug)]
pub(crate) struct PendingStates {
	states: RwLock<HashMap<String, OffsetDateTime>>,
	ttl: Duration,
}
impl PendingStates {
	pub(crate) fn new(ttl: Duration) -> Self {
		Self { states: RwLock::new(HashMap::new()), ttl }
	}

	pub(crate) fn issue(&self, state: &str, now: OffsetDateTime) {
		self.states.write().insert(state.to_owned(), now + self.ttl);
	}

	pub(crate) fn consume(&self, state: &str, now: OffsetDateTime) -> bool {
		match self.states.write().remove(state) {
			Some(expires_at) => now < expires_at,
			None => false,
		}
	}

	pub(crate) fn len(&self) -> usize {
		self.states.read().len()
	}
}

//! Credential persistence keyed by identity, plus the built-in backends.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{Identity, TokenRecord, TokenSecret},
};

/// Boxed future returned by [`TokenStore`] operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Persistence contract for credentials.
///
/// Each operation on a single identity must be atomic with respect to the others. Readers never
/// observe a partially written record.
pub trait TokenStore
where
	Self: Send + Sync,
{
	/// Inserts or replaces the record for `record.identity`.
	fn save(&self, record: TokenRecord) -> StoreFuture<'_, ()>;

	/// Fetches the record for `identity`, including records marked dead.
	fn fetch<'a>(&'a self, identity: &'a Identity) -> StoreFuture<'a, Option<TokenRecord>>;

	/// Replaces the record only if its refresh secret still equals `expected_refresh`.
	fn compare_and_swap_refresh<'a>(
		&'a self,
		identity: &'a Identity,
		expected_refresh: Option<&'a str>,
		replacement: TokenRecord,
	) -> StoreFuture<'a, CompareAndSwapOutcome>;

	/// Marks the record dead at `instant` so it can no longer be refreshed.
	fn revoke<'a>(
		&'a self,
		identity: &'a Identity,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, Option<TokenRecord>>;

	/// Deletes the record, returning it when one existed.
	fn remove<'a>(&'a self, identity: &'a Identity) -> StoreFuture<'a, Option<TokenRecord>>;
}

/// Result of a refresh-token compare-and-swap attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompareAndSwapOutcome {
	/// The refresh secret matched and the record was replaced.
	Updated,
	/// A record exists but carries a different refresh secret.
	RefreshMismatch,
	/// No record exists for the identity.
	Missing,
}

/// Error type produced by [`TokenStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Record encoding or decoding failed.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// The storage engine itself failed.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}

fn refresh_matches(current: Option<&TokenSecret>, expected: Option<&str>) -> bool {
	match (current, expected) {
		(None, None) => true,
		(Some(current), Some(expected)) => current.matches(expected),
		_ => false,
	}
}

fn swap_if_matching(
	records: &mut HashMap<Identity, TokenRecord>,
	identity: &Identity,
	expected_refresh: Option<&str>,
	replacement: TokenRecord,
) -> CompareAndSwapOutcome {
	match records.get_mut(identity) {
		Some(existing) if refresh_matches(existing.refresh_token.as_ref(), expected_refresh) => {
			*existing = replacement;

			CompareAndSwapOutcome::Updated
		},
		Some(_) => CompareAndSwapOutcome::RefreshMismatch,
		None => CompareAndSwapOutcome::Missing,
	}
}

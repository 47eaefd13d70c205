//! In-process [`TokenStore`] used by tests and single-node deployments without persistence.

// self
use crate::{
	_prelude::*,
	auth::{Identity, TokenRecord},
	store::{CompareAndSwapOutcome, StoreFuture, TokenStore},
};

/// Thread-safe map of identity to record.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(Arc<RwLock<HashMap<Identity, TokenRecord>>>);
impl MemoryStore {
	/// Number of stored records, dead ones included.
	pub fn len(&self) -> usize {
		self.0.read().len()
	}

	/// Returns `true` when no record is stored.
	pub fn is_empty(&self) -> bool {
		self.0.read().is_empty()
	}
}
impl TokenStore for MemoryStore {
	fn save(&self, record: TokenRecord) -> StoreFuture<'_, ()> {
		self.0.write().insert(record.identity.clone(), record);

		Box::pin(async { Ok(()) })
	}

	fn fetch<'a>(&'a self, identity: &'a Identity) -> StoreFuture<'a, Option<TokenRecord>> {
		let record = self.0.read().get(identity).cloned();

		Box::pin(async move { Ok(record) })
	}

	fn compare_and_swap_refresh<'a>(
		&'a self,
		identity: &'a Identity,
		expected_refresh: Option<&'a str>,
		replacement: TokenRecord,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		let outcome =
			super::swap_if_matching(&mut self.0.write(), identity, expected_refresh, replacement);

		Box::pin(async move { Ok(outcome) })
	}

	fn revoke<'a>(
		&'a self,
		identity: &'a Identity,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, Option<TokenRecord>> {
		let revoked = self.0.write().get_mut(identity).map(|record| {
			record.revoke(instant);

			record.clone()
		});

		Box::pin(async move { Ok(revoked) })
	}

	fn remove<'a>(&'a self, identity: &'a Identity) -> StoreFuture<'a, Option<TokenRecord>> {
		let removed = self.0.write().remove(identity);

		Box::pin(async move { Ok(removed) })
	}
}

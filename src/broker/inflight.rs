//! Per-identity registry of refreshes in progress.
//!
//! The first caller needing a refresh spawns it as a detached task and registers a shared handle
//! to its outcome; concurrent callers attach to that handle. A caller that gives up only drops
//! its handle, so the refresh keeps running for the others. The task removes its own entry once
//! the outcome is known, and the ticket check keeps a late removal from evicting a newer entry.

// std
use std::sync::atomic::{AtomicU64, Ordering};
// crates.io
use futures::future::{BoxFuture, FutureExt, Shared};
// self
use crate::{
	_prelude::*,
	auth::{Identity, TokenRecord},
	error::ConfigError,
};

pub(crate) type SharedRefresh = Shared<BoxFuture<'static, Result<TokenRecord, Arc<Error>>>>;

#[derive(Default)]
pub(crate) struct InflightRefreshes {
	entries: Mutex<HashMap<Identity, (u64, SharedRefresh)>>,
	tickets: AtomicU64,
}
impl InflightRefreshes {
	/// Returns the outcome handle for `identity`, spawning `start()` when none is registered.
	///
	/// The boolean is `true` when this call started the refresh.
	pub(crate) fn join_or_spawn<F, Fut>(
		self: &Arc<Self>,
		identity: &Identity,
		start: F,
	) -> (SharedRefresh, bool)
	where
		F: FnOnce() -> Fut,
		Fut: 'static + Send + Future<Output = Result<TokenRecord>>,
	{
		let mut entries = self.entries.lock();

		if let Some((_, shared)) = entries.get(identity) {
			return (shared.clone(), false);
		}

		let ticket = self.tickets.fetch_add(1, Ordering::Relaxed);
		let registry = Arc::clone(self);
		let key = identity.clone();
		let refresh = start();
		let task = tokio::spawn(async move {
			let outcome = refresh.await;

			registry.finish(&key, ticket);

			outcome
		});
		let shared = async move {
			match task.await {
				Ok(outcome) => outcome.map_err(Arc::new),
				Err(e) => Err(Arc::new(Error::from(ConfigError::Other {
					message: format!("Refresh task terminated abnormally: {e}"),
				}))),
			}
		}
		.boxed()
		.shared();

		entries.insert(identity.clone(), (ticket, shared.clone()));

		(shared, true)
	}

	/// Number of refreshes currently registered.
	pub(crate) fn len(&self) -> usize {
		self.entries.lock().len()
	}

	fn finish(&self, identity: &Identity, ticket: u64) {
		let mut entries = self.entries.lock();

		if entries.get(identity).is_some_and(|(current, _)| *current == ticket) {
			entries.remove(identity);
		}
	}
}

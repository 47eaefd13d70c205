//! JSON-file [`TokenStore`] that survives restarts of a single-node server.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	auth::{Identity, TokenRecord},
	store::{CompareAndSwapOutcome, StoreError, StoreFuture, TokenStore},
};

type Records = HashMap<Identity, TokenRecord>;

/// Keeps records in memory and rewrites the snapshot file after each mutation.
///
/// Snapshots are written to a sibling temporary file and renamed into place, so a crash leaves
/// either the old or the new snapshot on disk.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<Records>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		ensure_parent_exists(&path)?;

		let records = load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(records)) })
	}

	/// Location of the snapshot file.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn mutate<T>(&self, apply: impl FnOnce(&mut Records) -> (T, bool)) -> Result<T, StoreError> {
		let mut guard = self.inner.write();
		let (value, dirty) = apply(&mut guard);

		if dirty {
			persist(&self.path, &guard)?;
		}

		Ok(value)
	}
}
impl TokenStore for FileStore {
	fn save(&self, record: TokenRecord) -> StoreFuture<'_, ()> {
		let result = self.mutate(|records| {
			records.insert(record.identity.clone(), record);

			((), true)
		});

		Box::pin(async move { result })
	}

	fn fetch<'a>(&'a self, identity: &'a Identity) -> StoreFuture<'a, Option<TokenRecord>> {
		let record = self.inner.read().get(identity).cloned();

		Box::pin(async move { Ok(record) })
	}

	fn compare_and_swap_refresh<'a>(
		&'a self,
		identity: &'a Identity,
		expected_refresh: Option<&'a str>,
		replacement: TokenRecord,
	) -> StoreFuture<'a, CompareAndSwapOutcome> {
		let result = self.mutate(|records| {
			let outcome =
				super::swap_if_matching(records, identity, expected_refresh, replacement);

			(outcome, outcome == CompareAndSwapOutcome::Updated)
		});

		Box::pin(async move { result })
	}

	fn revoke<'a>(
		&'a self,
		identity: &'a Identity,
		instant: OffsetDateTime,
	) -> StoreFuture<'a, Option<TokenRecord>> {
		let result = self.mutate(|records| {
			let revoked = records.get_mut(identity).map(|record| {
				record.revoke(instant);

				record.clone()
			});
			let dirty = revoked.is_some();

			(revoked, dirty)
		});

		Box::pin(async move { result })
	}

	fn remove<'a>(&'a self, identity: &'a Identity) -> StoreFuture<'a, Option<TokenRecord>> {
		let result = self.mutate(|records| {
			let removed = records.remove(identity);
			let dirty = removed.is_some();

			(removed, dirty)
		});

		Box::pin(async move { result })
	}
}

fn load_snapshot(path: &Path) -> Result<Records, StoreError> {
	if !path.exists() {
		return Ok(HashMap::new());
	}

	let bytes = fs::read(path).map_err(|e| StoreError::Backend {
		message: format!("Failed to read {}: {e}", path.display()),
	})?;

	if bytes.is_empty() {
		return Ok(HashMap::new());
	}

	let records: Vec<TokenRecord> =
		serde_json::from_slice(&bytes).map_err(|e| StoreError::Serialization {
			message: format!("Failed to parse {}: {e}", path.display()),
		})?;

	Ok(records.into_iter().map(|record| (record.identity.clone(), record)).collect())
}

fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent).map_err(|e| StoreError::Backend {
			message: format!("Failed to create store directory {}: {e}", parent.display()),
		})?;
	}

	Ok(())
}

fn persist(path: &Path, records: &Records) -> Result<(), StoreError> {
	let mut snapshot = records.values().collect::<Vec<_>>();

	snapshot.sort_by(|a, b| a.identity.cmp(&b.identity));

	let serialized =
		serde_json::to_vec_pretty(&snapshot).map_err(|e| StoreError::Serialization {
			message: format!("Failed to serialize store snapshot: {e}"),
		})?;
	let tmp_path = path.with_extension("tmp");

	{
		let mut file = File::create(&tmp_path).map_err(|e| StoreError::Backend {
			message: format!("Failed to create {}: {e}", tmp_path.display()),
		})?;

		file.write_all(&serialized).map_err(|e| StoreError::Backend {
			message: format!("Failed to write {}: {e}", tmp_path.display()),
		})?;
		file.sync_all().map_err(|e| StoreError::Backend {
			message: format!("Failed to sync {}: {e}", tmp_path.display()),
		})?;
	}

	fs::rename(&tmp_path, path).map_err(|e| StoreError::Backend {
		message: format!("Failed to replace {}: {e}", path.display()),
	})
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// self
	use super::*;
	use crate::auth::{ProviderId, ScopeSet};

	fn temp_path(label: &str) -> PathBuf {
		let unique = format!(
			"workspace_broker_{label}_{}_{}.json",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	fn build_record(refresh: &str) -> TokenRecord {
		TokenRecord::builder(
			Identity::new("frank@example.com").expect("Failed to build identity fixture."),
			ProviderId::new("google").expect("Failed to build provider fixture."),
			ScopeSet::new(["https://www.googleapis.com/auth/tasks"])
				.expect("Failed to build scope fixture."),
		)
		.access_token("access-token")
		.refresh_token(refresh)
		.expires_in(Duration::hours(1))
		.build()
		.expect("Failed to build file-store test record.")
	}

	#[tokio::test]
	async fn records_survive_reopen() {
		let path = temp_path("reopen");
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let record = build_record("r1");

		store.save(record.clone()).await.expect("Failed to save fixture record.");
		drop(store);

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");
		let fetched = reopened
			.fetch(&record.identity)
			.await
			.expect("Failed to fetch fixture record.")
			.expect("File store lost record after reopen.");

		assert!(fetched.access_token.matches("access-token"));

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}

	#[tokio::test]
	async fn revocation_and_removal_are_persisted() {
		let path = temp_path("revoke");
		let store = FileStore::open(&path).expect("Failed to open file store snapshot.");
		let record = build_record("r1");
		let identity = record.identity.clone();

		store.save(record).await.expect("Failed to save fixture record.");
		store
			.compare_and_swap_refresh(&identity, Some("r1"), build_record("r2"))
			.await
			.expect("Swap should not fail.");
		store
			.revoke(&identity, OffsetDateTime::now_utc())
			.await
			.expect("Revoke should not fail.")
			.expect("Revoke should return the stored record.");

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");
		let fetched = reopened
			.fetch(&identity)
			.await
			.expect("Fetch should not fail.")
			.expect("Revoked record should still be stored.");

		assert!(fetched.is_revoked());
		assert!(fetched.refresh_token.as_ref().is_some_and(|s| s.matches("r2")));

		reopened.remove(&identity).await.expect("Remove should not fail.");

		let reopened = FileStore::open(&path).expect("Failed to reopen file store snapshot.");

		assert!(reopened.fetch(&identity).await.expect("Fetch should not fail.").is_none());

		fs::remove_file(&path).unwrap_or_else(|e| {
			panic!("Failed to remove temporary file store snapshot {}: {e}", path.display())
		});
	}
}

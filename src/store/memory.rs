//! Thread-safe in-memory [`KvStore`] implementation for local development and tests.

// self
use crate::{
	_prelude::*,
	store::{KvStore, StoreError, StoreFuture},
};

type StoreMap = Arc<RwLock<HashMap<String, String>>>;

/// Thread-safe storage backend that keeps values in-process for tests and demos.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore(StoreMap);
impl MemoryStore {
	fn get_now(map: StoreMap, key: String) -> Option<String> {
		map.read().get(&key).cloned()
	}

	fn set_now(map: StoreMap, key: String, value: String) -> Result<(), StoreError> {
		map.write().insert(key, value);

		Ok(())
	}

	fn remove_now(map: StoreMap, key: String) -> Result<(), StoreError> {
		map.write().remove(&key);

		Ok(())
	}
}
impl KvStore for MemoryStore {
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
		let map = self.0.clone();
		let key = key.to_owned();

		Box::pin(async move { Ok(Self::get_now(map, key)) })
	}

	fn set<'a>(&'a self, key: &'a str, value: &'a str) -> StoreFuture<'a, ()> {
		let map = self.0.clone();
		let key = key.to_owned();
		let value = value.to_owned();

		Box::pin(async move { Self::set_now(map, key, value) })
	}

	fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
		let map = self.0.clone();
		let key = key.to_owned();

		Box::pin(async move { Self::remove_now(map, key) })
	}
}

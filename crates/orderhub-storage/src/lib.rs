//! Storage module for the order hub.
//!
//! Provides a byte-level key/value interface implemented by pluggable
//! backends, and a typed [`StorageService`] on top of it. Keys have the shape
//! `namespace:id`. Besides plain reads and writes the interface offers prefix
//! listing and an atomic compare-and-swap, which is what the engine builds its
//! single-winner updates, uniqueness indexes and id sequences on.

use async_trait::async_trait;
use orderhub_types::{ConfigSchema, ImplementationRegistry};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("Not found")]
	NotFound,
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Backend error: {0}")]
	Backend(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
	/// A compare-and-swap lost repeatedly against concurrent writers.
	#[error("Contention on key {0}")]
	Contention(String),
}

/// Low-level interface for storage backends.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes with optional time-to-live.
	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError>;

	/// Deletes the value associated with the given key.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists the full keys stored under `namespace`, in no particular order.
	async fn list_keys(&self, namespace: &str) -> Result<Vec<String>, StorageError>;

	/// Atomically replaces the value at `key` with `new` if the current value
	/// equals `expected`. `expected = None` means "only if absent".
	///
	/// Returns `false` without writing when the comparison fails.
	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		new: Vec<u8>,
	) -> Result<bool, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Removes expired entries and returns how many were removed.
	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		Ok(0)
	}
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations as (name, factory) pairs.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// A value together with the exact bytes it was read from.
///
/// The bytes act as the version token for [`StorageService::swap_versioned`].
#[derive(Debug, Clone)]
pub struct Versioned<T> {
	pub value: T,
	raw: Vec<u8>,
}

impl<T> Versioned<T> {
	pub fn into_inner(self) -> T {
		self.value
	}
}

/// Upper bound on compare-and-swap retries for sequence allocation.
const MAX_SEQUENCE_ATTEMPTS: usize = 64;

fn key_of(namespace: &str, id: &str) -> String {
	format!("{}:{}", namespace, id)
}

fn to_bytes<T: Serialize>(data: &T) -> Result<Vec<u8>, StorageError> {
	serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
	serde_json::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

/// High-level storage service that provides typed operations.
///
/// Values are stored as JSON under `namespace:id`.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Stores a serializable value with optional time-to-live.
	pub async fn store_with_ttl<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		self.backend
			.set_bytes(&key_of(namespace, id), to_bytes(data)?, ttl)
			.await
	}

	/// Stores a serializable value, creating or overwriting it.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		self.store_with_ttl(namespace, id, data, None).await
	}

	/// Retrieves and deserializes a value.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&key_of(namespace, id)).await?;
		from_bytes(&bytes)
	}

	/// Like [`retrieve`](Self::retrieve), with absence mapped to `None`.
	pub async fn find<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound) => Ok(None),
			Err(e) => Err(e),
		}
	}

	/// Retrieves a value along with its version token.
	pub async fn retrieve_versioned<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Versioned<T>, StorageError> {
		let raw = self.backend.get_bytes(&key_of(namespace, id)).await?;
		let value = from_bytes(&raw)?;
		Ok(Versioned { value, raw })
	}

	/// Replaces a value only if it has not changed since `current` was read.
	pub async fn swap_versioned<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		current: &Versioned<T>,
		new: &T,
	) -> Result<bool, StorageError> {
		self.backend
			.compare_and_swap(&key_of(namespace, id), Some(&current.raw), to_bytes(new)?)
			.await
	}

	/// Replaces a value if its serialized form equals `expected`.
	///
	/// `expected = None` succeeds only when the key is absent.
	pub async fn compare_and_swap<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		expected: Option<&T>,
		new: &T,
	) -> Result<bool, StorageError> {
		let expected = expected.map(to_bytes).transpose()?;
		self.backend
			.compare_and_swap(&key_of(namespace, id), expected.as_deref(), to_bytes(new)?)
			.await
	}

	/// Stores a value only if nothing is stored under the key yet.
	pub async fn insert_if_absent<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<bool, StorageError> {
		self.backend
			.compare_and_swap(&key_of(namespace, id), None, to_bytes(data)?)
			.await
	}

	/// Allocates the next value of a named monotonic counter, starting at 1.
	pub async fn next_sequence(&self, name: &str) -> Result<u64, StorageError> {
		let key = key_of(orderhub_types::StorageKey::Sequences.as_str(), name);
		for _ in 0..MAX_SEQUENCE_ATTEMPTS {
			let current = match self.backend.get_bytes(&key).await {
				Ok(raw) => Some(raw),
				Err(StorageError::NotFound) => None,
				Err(e) => return Err(e),
			};
			let value: u64 = match &current {
				Some(raw) => from_bytes(raw)?,
				None => 0,
			};
			let next = value + 1;
			if self
				.backend
				.compare_and_swap(&key, current.as_deref(), to_bytes(&next)?)
				.await?
			{
				return Ok(next);
			}
		}
		Err(StorageError::Contention(key))
	}

	/// Retrieves every value in a namespace as `(id, value)` pairs.
	///
	/// Entries removed between listing and reading are skipped.
	pub async fn retrieve_all<T: DeserializeOwned>(
		&self,
		namespace: &str,
	) -> Result<Vec<(String, T)>, StorageError> {
		let prefix = format!("{}:", namespace);
		let mut values = Vec::new();
		for key in self.backend.list_keys(namespace).await? {
			let bytes = match self.backend.get_bytes(&key).await {
				Ok(bytes) => bytes,
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			};
			let id = key.strip_prefix(&prefix).unwrap_or(&key).to_string();
			values.push((id, from_bytes(&bytes)?));
		}
		Ok(values)
	}

	/// Removes a value.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&key_of(namespace, id)).await
	}

	/// Overwrites an existing value; fails with `NotFound` if absent.
	pub async fn update<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let key = key_of(namespace, id);
		if !self.backend.exists(&key).await? {
			return Err(StorageError::NotFound);
		}
		self.backend.set_bytes(&key, to_bytes(data)?, None).await
	}

	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&key_of(namespace, id)).await
	}

	/// Removes expired entries from storage.
	pub async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		self.backend.cleanup_expired().await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::memory::MemoryStorage;
	use serde::Deserialize;
	use std::sync::Arc;

	#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
	struct Counter {
		label: String,
		hits: u32,
	}

	fn service() -> StorageService {
		StorageService::new(Box::new(MemoryStorage::new()))
	}

	#[tokio::test]
	async fn test_update_requires_existing_key() {
		let storage = service();
		let value = Counter {
			label: "a".into(),
			hits: 1,
		};
		assert!(matches!(
			storage.update("counters", "1", &value).await,
			Err(StorageError::NotFound)
		));
		storage.store("counters", "1", &value).await.unwrap();
		storage.update("counters", "1", &value).await.unwrap();
		assert_eq!(storage.find::<Counter>("counters", "2").await.unwrap(), None);
	}

	#[tokio::test]
	async fn test_versioned_swap_rejects_stale_writer() {
		let storage = service();
		let initial = Counter {
			label: "a".into(),
			hits: 0,
		};
		storage.store("counters", "1", &initial).await.unwrap();

		let first = storage
			.retrieve_versioned::<Counter>("counters", "1")
			.await
			.unwrap();
		let second = storage
			.retrieve_versioned::<Counter>("counters", "1")
			.await
			.unwrap();

		let bumped = Counter {
			hits: 1,
			..first.value.clone()
		};
		assert!(storage
			.swap_versioned("counters", "1", &first, &bumped)
			.await
			.unwrap());
		assert!(!storage
			.swap_versioned("counters", "1", &second, &bumped)
			.await
			.unwrap());
	}

	#[tokio::test]
	async fn test_insert_if_absent_single_winner() {
		let storage = service();
		assert!(storage.insert_if_absent("idx", "7", &1u64).await.unwrap());
		assert!(!storage.insert_if_absent("idx", "7", &2u64).await.unwrap());
		assert_eq!(storage.retrieve::<u64>("idx", "7").await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_next_sequence_is_unique_under_concurrency() {
		let storage = Arc::new(service());
		let mut handles = Vec::new();
		for _ in 0..16 {
			let storage = storage.clone();
			handles.push(tokio::spawn(async move {
				storage.next_sequence("orders").await.unwrap()
			}));
		}
		let mut ids = Vec::new();
		for handle in handles {
			ids.push(handle.await.unwrap());
		}
		ids.sort_unstable();
		assert_eq!(ids, (1..=16).collect::<Vec<u64>>());
	}

	#[tokio::test]
	async fn test_retrieve_all_strips_namespace() {
		let storage = service();
		storage.store("rules", "1", &10u32).await.unwrap();
		storage.store("rules", "2", &20u32).await.unwrap();
		storage.store("other", "1", &30u32).await.unwrap();

		let mut all = storage.retrieve_all::<u32>("rules").await.unwrap();
		all.sort();
		assert_eq!(all, vec![("1".to_string(), 10), ("2".to_string(), 20)]);
	}
}

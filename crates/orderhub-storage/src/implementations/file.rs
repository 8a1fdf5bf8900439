//! File-based storage backend.
//!
//! Each namespace is a directory under the configured base path and each
//! record a `.bin` file in it, prefixed by a fixed-size header carrying the
//! expiry. Writes go to a temp file that is renamed into place. Compare-and-swap
//! holds an exclusive `fs2` lock on the namespace's lock file for the whole
//! read-compare-write.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use fs2::FileExt;
use orderhub_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, StorageKey, ValidationError,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::fs;

#[allow(clippy::doc_nested_refdefs)]
/// Fixed-size file header for TTL support.
///
/// Binary layout (64 bytes total):
/// - [0-3]: Magic bytes "OHUB"
/// - [4-5]: Version (u16, little-endian)
/// - [6-13]: Expiration timestamp (u64, little-endian, Unix seconds, 0 = never)
/// - [14-63]: Reserved
#[derive(Debug, Clone)]
struct FileHeader {
	version: u16,
	expires_at: u64,
}

fn unix_now() -> u64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_secs())
		.unwrap_or(0)
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"OHUB";
	const VERSION: u16 = 1;
	const SIZE: usize = 64;

	fn new(ttl: Duration) -> Self {
		let expires_at = if ttl.is_zero() {
			0
		} else {
			unix_now().saturating_add(ttl.as_secs().max(1))
		};
		Self {
			version: Self::VERSION,
			expires_at,
		}
	}

	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&self.version.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.expires_at.to_le_bytes());
		bytes
	}

	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE {
			return Err(StorageError::Backend("File too small for header".into()));
		}
		if &bytes[0..4] != Self::MAGIC {
			return Err(StorageError::Backend("Unrecognised file format".into()));
		}

		let version = u16::from_le_bytes([bytes[4], bytes[5]]);
		if version > Self::VERSION {
			return Err(StorageError::Backend(format!(
				"Unsupported file version: {}",
				version
			)));
		}

		let mut expires_bytes = [0u8; 8];
		expires_bytes.copy_from_slice(&bytes[6..14]);
		Ok(Self {
			version,
			expires_at: u64::from_le_bytes(expires_bytes),
		})
	}

	fn is_expired(&self) -> bool {
		self.expires_at != 0 && unix_now() >= self.expires_at
	}
}

/// Splits the stored file into its payload, or `None` if expired.
fn decode_record(data: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
	let header = FileHeader::deserialize(data)?;
	if header.is_expired() {
		return Ok(None);
	}
	Ok(Some(data[FileHeader::SIZE..].to_vec()))
}

fn encode_record(value: &[u8], ttl: Duration) -> Vec<u8> {
	let mut file_data = Vec::with_capacity(FileHeader::SIZE + value.len());
	file_data.extend_from_slice(&FileHeader::new(ttl).serialize());
	file_data.extend_from_slice(value);
	file_data
}

/// Reversible mapping from record ids to file names.
fn encode_id(id: &str) -> String {
	let mut out = String::with_capacity(id.len());
	for c in id.chars() {
		match c {
			'%' => out.push_str("%25"),
			'/' => out.push_str("%2F"),
			'\\' => out.push_str("%5C"),
			':' => out.push_str("%3A"),
			'.' => out.push_str("%2E"),
			other => out.push(other),
		}
	}
	out
}

fn decode_id(name: &str) -> String {
	name.replace("%2E", ".")
		.replace("%3A", ":")
		.replace("%5C", "\\")
		.replace("%2F", "/")
		.replace("%25", "%")
}

/// Default TTLs per namespace, in seconds, read from `ttl_<namespace>` keys.
#[derive(Debug, Clone, Default)]
pub struct TtlConfig {
	ttls: HashMap<StorageKey, Duration>,
}

impl TtlConfig {
	fn from_config(config: &toml::Value) -> Self {
		let mut ttls = HashMap::new();
		if let Some(table) = config.as_table() {
			for storage_key in StorageKey::all() {
				let config_key = format!("ttl_{}", storage_key.as_str());
				if let Some(secs) = table.get(&config_key).and_then(|v| v.as_integer()) {
					ttls.insert(storage_key, Duration::from_secs(secs.max(0) as u64));
				}
			}
		}
		Self { ttls }
	}

	fn ttl_for(&self, namespace: &str) -> Duration {
		namespace
			.parse::<StorageKey>()
			.ok()
			.and_then(|key| self.ttls.get(&key).copied())
			.unwrap_or(Duration::ZERO)
	}
}

/// File-based storage implementation.
pub struct FileStorage {
	base_path: PathBuf,
	ttl_config: TtlConfig,
}

impl FileStorage {
	pub fn new(base_path: PathBuf, ttl_config: TtlConfig) -> Self {
		Self {
			base_path,
			ttl_config,
		}
	}

	fn split_key(key: &str) -> (&str, &str) {
		key.split_once(':').unwrap_or(("_", key))
	}

	fn namespace_dir(&self, namespace: &str) -> PathBuf {
		self.base_path.join(encode_id(namespace))
	}

	fn file_path(&self, key: &str) -> PathBuf {
		let (namespace, id) = Self::split_key(key);
		self.namespace_dir(namespace)
			.join(format!("{}.bin", encode_id(id)))
	}

	async fn write_atomic(path: &Path, data: Vec<u8>) -> Result<(), StorageError> {
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}
		let temp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
		fs::write(&temp_path, data)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}

	/// Blocking read-compare-write under an exclusive lock on the namespace.
	fn compare_and_swap_locked(
		dir: &Path,
		path: &Path,
		expected: Option<Vec<u8>>,
		new_record: Vec<u8>,
	) -> Result<bool, StorageError> {
		let backend = |e: std::io::Error| StorageError::Backend(e.to_string());

		std::fs::create_dir_all(dir).map_err(backend)?;
		let lock_file = std::fs::OpenOptions::new()
			.create(true)
			.truncate(false)
			.write(true)
			.open(dir.join(".lock"))
			.map_err(backend)?;
		lock_file.lock_exclusive().map_err(backend)?;

		let result = (|| {
			let current = match std::fs::read(path) {
				Ok(data) => decode_record(&data)?,
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
				Err(e) => return Err(backend(e)),
			};
			if current != expected {
				return Ok(false);
			}
			let temp_path = path.with_extension("cas.tmp");
			std::fs::write(&temp_path, new_record).map_err(backend)?;
			std::fs::rename(&temp_path, path).map_err(backend)?;
			Ok(true)
		})();

		let _ = FileExt::unlock(&lock_file);
		result
	}

	async fn cleanup_dir(&self, dir: &Path) -> Result<usize, StorageError> {
		let mut removed = 0;
		let mut entries = fs::read_dir(dir)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if path.extension() != Some(std::ffi::OsStr::new("bin")) {
				continue;
			}
			match fs::read(&path).await {
				Ok(data) => match FileHeader::deserialize(&data) {
					Ok(header) if header.is_expired() => {
						if let Err(e) = fs::remove_file(&path).await {
							tracing::warn!("Failed to remove expired file {:?}: {}", path, e);
						} else {
							removed += 1;
						}
					},
					Ok(_) => {},
					Err(e) => tracing::debug!("Skipping file {:?}: {}", path, e),
				},
				Err(e) => {
					tracing::debug!("Skipping file {:?}: could not be read: {}", path, e);
				},
			}
		}
		Ok(removed)
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let data = match fs::read(self.file_path(key)).await {
			Ok(data) => data,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
				return Err(StorageError::NotFound)
			},
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};
		decode_record(&data)?.ok_or(StorageError::NotFound)
	}

	async fn set_bytes(
		&self,
		key: &str,
		value: Vec<u8>,
		ttl: Option<Duration>,
	) -> Result<(), StorageError> {
		let (namespace, _) = Self::split_key(key);
		let ttl = ttl.unwrap_or_else(|| self.ttl_config.ttl_for(namespace));
		Self::write_atomic(&self.file_path(key), encode_record(&value, ttl)).await
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		match fs::remove_file(self.file_path(key)).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		match self.get_bytes(key).await {
			Ok(_) => Ok(true),
			Err(StorageError::NotFound) => Ok(false),
			Err(e) => Err(e),
		}
	}

	async fn list_keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let dir = self.namespace_dir(namespace);
		let mut entries = match fs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let mut keys = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let name = entry.file_name();
			let Some(stem) = name.to_str().and_then(|n| n.strip_suffix(".bin")) else {
				continue;
			};
			keys.push(format!("{}:{}", namespace, decode_id(stem)));
		}
		Ok(keys)
	}

	async fn compare_and_swap(
		&self,
		key: &str,
		expected: Option<&[u8]>,
		new: Vec<u8>,
	) -> Result<bool, StorageError> {
		let (namespace, _) = Self::split_key(key);
		let dir = self.namespace_dir(namespace);
		let path = self.file_path(key);
		let expected = expected.map(|e| e.to_vec());
		let record = encode_record(&new, self.ttl_config.ttl_for(namespace));

		tokio::task::spawn_blocking(move || {
			Self::compare_and_swap_locked(&dir, &path, expected, record)
		})
		.await
		.map_err(|e| StorageError::Backend(e.to_string()))?
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}

	async fn cleanup_expired(&self) -> Result<usize, StorageError> {
		let mut removed = 0;
		let mut namespaces = match fs::read_dir(&self.base_path).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};
		while let Some(entry) = namespaces
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			if entry.path().is_dir() {
				removed += self.cleanup_dir(&entry.path()).await?;
			}
		}
		Ok(removed)
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let mut optional_fields = vec![Field::new("storage_path", FieldType::String)];
		for storage_key in StorageKey::all() {
			optional_fields.push(Field::new(
				format!("ttl_{}", storage_key.as_str()),
				FieldType::Integer {
					min: Some(0),
					max: None,
				},
			));
		}
		Schema::new(vec![], optional_fields).validate(config)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory (default: "./data/storage")
/// - `ttl_<namespace>`: default TTL in seconds for that namespace (default: 0, never)
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage")
		.to_string();

	Ok(Box::new(FileStorage::new(
		PathBuf::from(storage_path),
		TtlConfig::from_config(config),
	)))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}

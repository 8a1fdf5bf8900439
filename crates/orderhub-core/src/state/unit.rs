//! Undo log for multi-record writes.
//!
//! The storage backends only guarantee single-key atomicity. A unit records
//! the prior value of every key it touches so a failed step can put them back.
//! Callers serialize units per order, so no other writer observes or races
//! the intermediate state of the keys a unit owns.

use orderhub_storage::{StorageError, StorageService};
use orderhub_types::StorageKey;
use serde::Serialize;

enum Undo {
	Restore {
		namespace: StorageKey,
		id: String,
		value: serde_json::Value,
	},
	Delete {
		namespace: StorageKey,
		id: String,
	},
}

pub(crate) struct UnitOfWork<'a> {
	storage: &'a StorageService,
	undo: Vec<Undo>,
}

impl<'a> UnitOfWork<'a> {
	pub fn new(storage: &'a StorageService) -> Self {
		Self {
			storage,
			undo: Vec::new(),
		}
	}

	/// Writes `value`, remembering what was there before.
	pub async fn put<T: Serialize>(
		&mut self,
		namespace: StorageKey,
		id: &str,
		value: &T,
	) -> Result<(), StorageError> {
		let previous: Option<serde_json::Value> = self.storage.find(namespace.as_str(), id).await?;
		self.storage.store(namespace.as_str(), id, value).await?;
		self.undo.push(match previous {
			Some(value) => Undo::Restore {
				namespace,
				id: id.to_string(),
				value,
			},
			None => Undo::Delete {
				namespace,
				id: id.to_string(),
			},
		});
		Ok(())
	}

	/// Writes `value` only if the key is absent. Returns whether it was written.
	pub async fn insert<T: Serialize>(
		&mut self,
		namespace: StorageKey,
		id: &str,
		value: &T,
	) -> Result<bool, StorageError> {
		let inserted = self
			.storage
			.insert_if_absent(namespace.as_str(), id, value)
			.await?;
		if inserted {
			self.undo.push(Undo::Delete {
				namespace,
				id: id.to_string(),
			});
		}
		Ok(inserted)
	}

	pub async fn remove(&mut self, namespace: StorageKey, id: &str) -> Result<(), StorageError> {
		let previous: Option<serde_json::Value> = self.storage.find(namespace.as_str(), id).await?;
		if let Some(value) = previous {
			self.storage.remove(namespace.as_str(), id).await?;
			self.undo.push(Undo::Restore {
				namespace,
				id: id.to_string(),
				value,
			});
		}
		Ok(())
	}

	/// Keeps every write.
	pub fn commit(self) {}

	/// Reverts every write, newest first. Failures are logged and skipped.
	pub async fn rollback(self) {
		for undo in self.undo.into_iter().rev() {
			let result = match &undo {
				Undo::Restore {
					namespace,
					id,
					value,
				} => self.storage.store(namespace.as_str(), id, value).await,
				Undo::Delete { namespace, id } => self.storage.remove(namespace.as_str(), id).await,
			};
			if let Err(e) = result {
				let (namespace, id) = match &undo {
					Undo::Restore { namespace, id, .. } | Undo::Delete { namespace, id } => {
						(namespace, id)
					},
				};
				tracing::error!(
					namespace = namespace.as_str(),
					id = %id,
					error = %e,
					"Rollback step failed"
				);
			}
		}
	}
}

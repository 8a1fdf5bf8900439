//! Acting parties.
//!
//! Every mutation of an order is attributed to an actor. Guards in the state
//! machine and the cancellation workflow match on the variant exhaustively, so
//! adding a new kind of party forces every guard to be revisited.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The party performing an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
	/// A retail store, identified by its store id.
	Store(u64),
	/// A supplier, identified by its supplier id.
	Supplier(u64),
	/// A platform administrator, identified by the admin user id.
	Admin(u64),
	/// Automated processes such as payment callbacks and sweeps.
	System,
}

/// Discriminant of [`Actor`] as persisted in status logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
	Store,
	Supplier,
	Admin,
	System,
}

impl Actor {
	/// Builds an actor from its kind and id. The id is ignored for `System`.
	pub fn new(kind: ActorKind, id: u64) -> Self {
		match kind {
			ActorKind::Store => Actor::Store(id),
			ActorKind::Supplier => Actor::Supplier(id),
			ActorKind::Admin => Actor::Admin(id),
			ActorKind::System => Actor::System,
		}
	}

	pub fn kind(&self) -> ActorKind {
		match self {
			Actor::Store(_) => ActorKind::Store,
			Actor::Supplier(_) => ActorKind::Supplier,
			Actor::Admin(_) => ActorKind::Admin,
			Actor::System => ActorKind::System,
		}
	}

	/// Numeric id of the actor; `0` for the system actor.
	pub fn id(&self) -> u64 {
		match self {
			Actor::Store(id) | Actor::Supplier(id) | Actor::Admin(id) => *id,
			Actor::System => 0,
		}
	}

	/// Admins and the system may act on any order.
	pub fn is_privileged(&self) -> bool {
		matches!(self, Actor::Admin(_) | Actor::System)
	}
}

impl fmt::Display for Actor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Actor::System => write!(f, "system"),
			other => write!(f, "{}:{}", other.kind().as_str(), other.id()),
		}
	}
}

impl ActorKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			ActorKind::Store => "store",
			ActorKind::Supplier => "supplier",
			ActorKind::Admin => "admin",
			ActorKind::System => "system",
		}
	}
}

impl fmt::Display for ActorKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ActorKind {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"store" => Ok(ActorKind::Store),
			"supplier" => Ok(ActorKind::Supplier),
			"admin" => Ok(ActorKind::Admin),
			"system" => Ok(ActorKind::System),
			other => Err(format!("unknown actor kind '{}'", other)),
		}
	}
}

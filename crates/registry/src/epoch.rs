//! Generation counters and identity tokens.
//!
//! Every successful (re)registration of a representative bumps the key's
//! epoch, so a stale representative and a freshly recreated one for the same
//! resource are never confused. [`IdentityToken`] pairs a key with an epoch
//! for precise or wildcard matching against the current registration.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use crate::registry::Registry;
use crate::ResourceKey;

/// Per-resource generation counter value.
///
/// `Unassigned` stands for a never-registered resource. The counter starts
/// logically at zero and is bumped exactly once per successful commit, so
/// the first commit for a key publishes `Epoch::At(1)`. Never decremented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Epoch {
	/// No representative has ever been committed for the resource.
	Unassigned,
	/// Concrete generation, starting at 1 for the first commit.
	At(u64),
}

impl Epoch {
	/// Returns `true` for the never-registered sentinel.
	pub const fn is_unassigned(self) -> bool {
		matches!(self, Self::Unassigned)
	}

	/// The concrete generation value, if one has been assigned.
	pub const fn value(self) -> Option<u64> {
		match self {
			Self::Unassigned => None,
			Self::At(n) => Some(n),
		}
	}

	/// Maps the raw per-slot counter to an epoch (zero means unassigned).
	pub(crate) const fn from_counter(counter: u64) -> Self {
		if counter == 0 { Self::Unassigned } else { Self::At(counter) }
	}
}

/// Immutable `(key, epoch)` pair identifying one registration of a resource.
///
/// Two tokens match when their keys are equal and either the epochs are
/// equal exactly or either side carries [`Epoch::Unassigned`], which acts as
/// a wildcard. The wildcard lets code that has not yet observed a concrete
/// epoch still match the current registration without a second round trip.
///
/// `PartialEq` implements the wildcard rule, so token equality is not
/// transitive across mixed wildcard/concrete tokens and the type deliberately
/// does not implement `Eq`. The registry never uses tokens as map keys
/// internally.
#[derive(Debug, Clone)]
pub struct IdentityToken<K> {
	key: K,
	epoch: Epoch,
}

impl<K: ResourceKey> IdentityToken<K> {
	/// Creates a token for a specific registration of `key`.
	pub fn of(key: K, epoch: Epoch) -> Self {
		Self { key, epoch }
	}

	/// Creates a token carrying the registry's current epoch for `key`
	/// ([`Epoch::Unassigned`] if the key was never registered).
	pub fn current_for<R: Send + Sync + 'static>(registry: &Registry<K, R>, key: K) -> Self {
		let epoch = registry.current_epoch(&key);
		Self { key, epoch }
	}

	/// The resource key this token identifies.
	pub fn key(&self) -> &K {
		&self.key
	}

	/// The epoch this token was minted under.
	pub fn epoch(&self) -> Epoch {
		self.epoch
	}

	/// Explicit name for the wildcard matching rule used by `PartialEq`.
	pub fn matches(&self, other: &Self) -> bool {
		if self.key != other.key {
			return false;
		}
		match (self.epoch, other.epoch) {
			(Epoch::Unassigned, _) | (_, Epoch::Unassigned) => true,
			(Epoch::At(a), Epoch::At(b)) => a == b,
		}
	}
}

impl<K: ResourceKey> PartialEq for IdentityToken<K> {
	fn eq(&self, other: &Self) -> bool {
		self.matches(other)
	}
}

impl<K: ResourceKey> Hash for IdentityToken<K> {
	/// Key hash XOR epoch when the epoch is concrete, the key hash alone
	/// otherwise, keeping wildcard tokens reachable in a hash-based index.
	fn hash<H: Hasher>(&self, state: &mut H) {
		let mut key_hasher = FxHasher::default();
		self.key.hash(&mut key_hasher);
		let base = key_hasher.finish();
		let combined = match self.epoch {
			Epoch::At(n) => base ^ n,
			Epoch::Unassigned => base,
		};
		state.write_u64(combined);
	}
}

#[cfg(test)]
mod tests;

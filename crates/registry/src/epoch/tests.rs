use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;

use super::*;
use crate::Registry;

fn hash_of(token: &IdentityToken<&'static str>) -> u64 {
	let mut hasher = FxHasher::default();
	token.hash(&mut hasher);
	hasher.finish()
}

#[test]
fn concrete_epochs_must_match_exactly() {
	let a = IdentityToken::of("file:/a", Epoch::At(1));
	let b = IdentityToken::of("file:/a", Epoch::At(1));
	let c = IdentityToken::of("file:/a", Epoch::At(2));
	assert_eq!(a, b);
	assert_ne!(a, c);
}

#[test]
fn wildcard_matches_any_epoch_of_same_key() {
	let wildcard = IdentityToken::of("file:/a", Epoch::Unassigned);
	assert_eq!(wildcard, IdentityToken::of("file:/a", Epoch::At(1)));
	assert_eq!(IdentityToken::of("file:/a", Epoch::At(7)), wildcard);
	assert_eq!(wildcard, IdentityToken::of("file:/a", Epoch::Unassigned));
}

#[test]
fn different_keys_never_match() {
	let wildcard = IdentityToken::of("file:/a", Epoch::Unassigned);
	assert_ne!(wildcard, IdentityToken::of("file:/b", Epoch::Unassigned));
	assert_ne!(
		IdentityToken::of("file:/a", Epoch::At(1)),
		IdentityToken::of("file:/b", Epoch::At(1)),
	);
}

#[test]
fn wildcard_hash_is_key_hash_alone() {
	let wildcard_a = IdentityToken::of("file:/a", Epoch::Unassigned);
	let wildcard_b = IdentityToken::of("file:/a", Epoch::Unassigned);
	assert_eq!(hash_of(&wildcard_a), hash_of(&wildcard_b));
	// A concrete epoch folds into the hash.
	assert_ne!(hash_of(&wildcard_a), hash_of(&IdentityToken::of("file:/a", Epoch::At(1))));
}

#[test]
fn epoch_accessors() {
	assert!(Epoch::Unassigned.is_unassigned());
	assert_eq!(Epoch::Unassigned.value(), None);
	assert!(!Epoch::At(3).is_unassigned());
	assert_eq!(Epoch::At(3).value(), Some(3));
}

#[test]
fn current_for_reads_the_registry_epoch() {
	let registry: Registry<&'static str, String> = Registry::new();
	let before = IdentityToken::current_for(&registry, "file:/a");
	assert!(before.epoch().is_unassigned());

	let ticket = registry.begin_construction("file:/a").unwrap();
	let rep = std::sync::Arc::new("a".to_string());
	registry.commit(ticket, &rep);

	let after = IdentityToken::current_for(&registry, "file:/a");
	assert_eq!(after.epoch(), Epoch::At(1));
	// The wildcard token minted before the commit still matches.
	assert_eq!(before, after);
}

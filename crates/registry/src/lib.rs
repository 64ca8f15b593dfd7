//! Canonical-object registry for file-backed resources.
//!
//! Guarantees that each underlying storage resource (identified by a
//! [`ResourceKey`]) maps to at most one live representative object at any
//! time, even under concurrent discovery from many threads, while supporting
//! controlled invalidation and recreation of that representative across the
//! resource's lifetime.
//!
//! The registry holds only weak associations: representatives are owned by
//! their caller graph as `Arc<R>`, and an entry whose last external `Arc`
//! was dropped is treated as absent on the next lookup, admitting a fresh
//! construction.
//!
//! # Construction protocol
//!
//! - [`Registry::resolve`] is a non-blocking lookup.
//! - [`Registry::begin_construction`] admits exactly one constructing thread
//!   per key; losers receive an [`AlreadyExists`] signal whose blocking
//!   [`wait`](AlreadyExists::wait) accessor hands over the eventual
//!   representative once the winner commits.
//! - [`Registry::commit`] publishes the representative, bumps the key's
//!   [`Epoch`], and wakes all waiters; [`Registry::abort`] releases without
//!   publishing and fans the failure out to waiters.
//! - [`Registry::resolve_or_create`] runs the whole protocol against a
//!   caller-supplied factory.

mod cancel;
mod epoch;
mod error;
mod registry;
mod slot;

use std::fmt;
use std::hash::Hash;

pub use cancel::CancelToken;
pub use epoch::{Epoch, IdentityToken};
pub use error::{ConstructionFailed, CreateError, WaitError};
pub use registry::{AlreadyExists, BeginError, ConstructionTicket, Registry};

/// Stable identifier of an underlying storage item.
///
/// Equality is by underlying-resource identity, not by object reference.
/// Blanket-implemented; the registry does not prescribe a concrete key type.
pub trait ResourceKey: Eq + Hash + Clone + fmt::Debug {}

impl<T: Eq + Hash + Clone + fmt::Debug> ResourceKey for T {}

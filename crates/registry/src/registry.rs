//! Process-wide map from resource keys to canonical representatives.

use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tracing::{debug, trace, warn};

use crate::ResourceKey;
use crate::cancel::CancelToken;
use crate::epoch::Epoch;
use crate::error::{ConstructionFailed, CreateError, WaitError};
use crate::slot::{Admission, Slot};

type ReadyObserver<K> = Arc<dyn Fn(&K, Epoch) + Send + Sync>;

/// Registry guaranteeing at most one live representative per resource key.
///
/// Representatives are externally owned `Arc<R>`s; the registry keeps only a
/// weak association, so an entry whose last external `Arc` was dropped is
/// treated as absent on the next lookup. Each key's state is guarded by its
/// own lock, so contention on disjoint keys does not serialize (relevant
/// under high-fan-in discovery such as recursive directory scans).
///
/// Tests should build a fresh instance per test rather than sharing a
/// process singleton.
pub struct Registry<K, R> {
	slots: Mutex<FxHashMap<K, Arc<Slot<R>>>>,
	observer: RwLock<Option<ReadyObserver<K>>>,
}

impl<K: ResourceKey, R: Send + Sync + 'static> Registry<K, R> {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self {
			slots: Mutex::new(FxHashMap::default()),
			observer: RwLock::new(None),
		}
	}

	fn slot(&self, key: &K) -> Option<Arc<Slot<R>>> {
		self.slots.lock().get(key).cloned()
	}

	fn slot_or_insert(&self, key: &K) -> Arc<Slot<R>> {
		let mut slots = self.slots.lock();
		Arc::clone(slots.entry(key.clone()).or_insert_with(|| Arc::new(Slot::new())))
	}

	/// Non-blocking lookup of the live representative for `key`.
	pub fn resolve(&self, key: &K) -> Option<Arc<R>> {
		self.slot(key).and_then(|slot| slot.resolve())
	}

	/// Attempts to take the construction right for `key`.
	///
	/// Exactly one of any number of racing callers wins a ticket; the others
	/// fail fast with [`BeginError::AlreadyExists`], whose signal doubles as
	/// the handoff channel for the winner's eventual representative. A
	/// re-entrant attempt by the thread already constructing `key` fails
	/// fast with [`BeginError::Reentrant`] rather than deadlocking. Never
	/// blocks.
	pub fn begin_construction(&self, key: K) -> Result<ConstructionTicket<K, R>, BeginError<K, R>> {
		let slot = self.slot_or_insert(&key);
		match slot.try_admit(thread::current().id()) {
			Admission::Won => {
				trace!(key = ?key, "registry.construct.begin");
				Ok(ConstructionTicket { key, slot, armed: true })
			}
			Admission::Occupied => {
				trace!(key = ?key, "registry.construct.contended");
				Err(BeginError::AlreadyExists(AlreadyExists { key, slot }))
			}
			Admission::Reentrant => {
				warn!(key = ?key, "registry.construct.reentrant");
				Err(BeginError::Reentrant { key })
			}
		}
	}

	/// Publishes `rep` as the ready value for the ticket's key.
	///
	/// Bumps the key's epoch, wakes all waiters, fires the ready observer
	/// (outside any lock), and returns the new epoch. Consuming the ticket
	/// enforces at-most-once commit.
	pub fn commit(&self, ticket: ConstructionTicket<K, R>, rep: &Arc<R>) -> Epoch {
		let mut ticket = ticket;
		ticket.armed = false;
		let raw = ticket.slot.publish(rep);
		debug!(key = ?ticket.key, epoch = raw, "registry.commit");
		let observer = self.observer.read().clone();
		if let Some(observer) = observer {
			observer(&ticket.key, Epoch::At(raw));
		}
		Epoch::At(raw)
	}

	/// Releases the ticket without publishing.
	///
	/// The entry returns to absent and `cause` fans out to every thread
	/// currently waiting on the key, so each may retry independently. A
	/// fresh [`begin_construction`](Self::begin_construction) for the key is
	/// admitted immediately afterwards.
	pub fn abort(&self, ticket: ConstructionTicket<K, R>, cause: ConstructionFailed) {
		let mut ticket = ticket;
		ticket.armed = false;
		debug!(key = ?ticket.key, cause = %cause, "registry.abort");
		ticket.slot.abandon(cause);
	}

	/// Forces the entry for `key` to stale, regardless of liveness.
	///
	/// Used when the underlying resource is known to have been destroyed or
	/// replaced out-of-band. Does not bump the epoch; the next successful
	/// commit does. An in-flight construction is left to finish.
	pub fn invalidate(&self, key: &K) {
		if let Some(slot) = self.slot(key) {
			trace!(key = ?key, "registry.invalidate");
			slot.mark_stale();
		}
	}

	/// Blocks until the entry for `key` becomes ready, its in-flight
	/// construction aborts, the deadline elapses, or `cancel` fires.
	///
	/// Only the calling thread is suspended. Called with nothing published
	/// and nothing in flight, returns [`WaitError::Absent`] immediately.
	pub fn await_ready(
		&self,
		key: &K,
		deadline: Option<Duration>,
		cancel: Option<&CancelToken>,
	) -> Result<Arc<R>, WaitError> {
		match self.slot(key) {
			Some(slot) => slot.await_ready(deadline, cancel),
			None => Err(WaitError::Absent),
		}
	}

	/// Resolves the representative for `key`, constructing it if needed.
	///
	/// The winning caller runs `construct` exactly once and commits its
	/// result; losers wait for the winner and return the published
	/// representative. A factory failure propagates identically to the
	/// caller that ran it and to every waiter. If the factory panics, the
	/// ticket's drop guard aborts the construction before unwinding, so the
	/// entry is never left in the constructing state.
	pub fn resolve_or_create<F>(&self, key: K, construct: F) -> Result<Arc<R>, CreateError>
	where
		F: FnOnce(&K) -> Result<R, ConstructionFailed>,
	{
		if let Some(rep) = self.resolve(&key) {
			return Ok(rep);
		}
		match self.begin_construction(key) {
			Ok(ticket) => match construct(ticket.key()) {
				Ok(rep) => {
					let rep = Arc::new(rep);
					self.commit(ticket, &rep);
					Ok(rep)
				}
				Err(cause) => {
					self.abort(ticket, cause.clone());
					Err(CreateError::Failed(cause))
				}
			},
			Err(BeginError::AlreadyExists(signal)) => signal.wait(None).map_err(|err| match err {
				WaitError::Aborted(cause) => CreateError::Failed(cause),
				other => CreateError::Wait(other),
			}),
			Err(BeginError::Reentrant { .. }) => Err(CreateError::Reentrant),
		}
	}

	/// The current epoch for `key` ([`Epoch::Unassigned`] if never
	/// registered).
	pub fn current_epoch(&self, key: &K) -> Epoch {
		match self.slot(key) {
			Some(slot) => Epoch::from_counter(slot.epoch()),
			None => Epoch::Unassigned,
		}
	}

	/// Number of successful commit cycles for `key`.
	pub fn registration_count(&self, key: &K) -> u64 {
		self.slot(key).map_or(0, |slot| slot.epoch())
	}

	/// Installs the construction-finished observer, invoked after every
	/// commit with the key and its new epoch, outside all registry locks.
	pub fn set_ready_observer(&self, observer: impl Fn(&K, Epoch) + Send + Sync + 'static) {
		*self.observer.write() = Some(Arc::new(observer));
	}

	/// Count of live or in-flight entries; prunes dead slots as it counts.
	pub fn len(&self) -> usize {
		let mut slots = self.slots.lock();
		slots.retain(|_, slot| slot.is_live());
		slots.len()
	}

	/// Returns `true` when no entry is live or in flight.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl<K: ResourceKey, R: Send + Sync + 'static> Default for Registry<K, R> {
	fn default() -> Self {
		Self::new()
	}
}

/// Capability proving the holder won the right to construct a key's
/// representative.
///
/// Consumed by [`Registry::commit`] or [`Registry::abort`]. Dropping an
/// unconsumed ticket aborts the construction, so a panicking factory can
/// never leave the entry stuck in the constructing state.
pub struct ConstructionTicket<K: ResourceKey, R> {
	key: K,
	slot: Arc<Slot<R>>,
	armed: bool,
}

impl<K: ResourceKey, R> ConstructionTicket<K, R> {
	/// The key this ticket grants the construction right for.
	pub fn key(&self) -> &K {
		&self.key
	}
}

impl<K: ResourceKey, R> Drop for ConstructionTicket<K, R> {
	fn drop(&mut self) {
		if self.armed {
			warn!(key = ?self.key, "registry.construct.abandoned");
			self.slot.abandon(ConstructionFailed::new("construction abandoned before commit"));
		}
	}
}

impl<K: ResourceKey, R> fmt::Debug for ConstructionTicket<K, R> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ConstructionTicket").field("key", &self.key).finish_non_exhaustive()
	}
}

/// Signal that a representative for the key already exists or is being
/// constructed.
///
/// The failure path doubles as the handoff mechanism: the bundled accessors
/// block until the in-flight construction commits or aborts, then return the
/// published representative, avoiding a second notification channel. The
/// blocking is explicit in the signatures; this is not a cheap accessor.
pub struct AlreadyExists<K: ResourceKey, R> {
	key: K,
	slot: Arc<Slot<R>>,
}

impl<K: ResourceKey, R: Send + Sync + 'static> AlreadyExists<K, R> {
	/// The contended key.
	pub fn key(&self) -> &K {
		&self.key
	}

	/// Blocks until the in-flight construction finishes, then returns the
	/// published representative.
	///
	/// Called after the construction already committed, returns immediately.
	/// With a deadline, elapses into [`WaitError::TimedOut`] rather than an
	/// absence error.
	pub fn wait(&self, deadline: Option<Duration>) -> Result<Arc<R>, WaitError> {
		self.slot.await_ready(deadline, None)
	}

	/// Like [`wait`](Self::wait), but additionally unblocks with
	/// [`WaitError::Cancelled`] when `cancel` fires.
	pub fn wait_cancellable(
		&self,
		deadline: Option<Duration>,
		cancel: &CancelToken,
	) -> Result<Arc<R>, WaitError> {
		self.slot.await_ready(deadline, Some(cancel))
	}
}

impl<K: ResourceKey, R> fmt::Debug for AlreadyExists<K, R> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("AlreadyExists").field("key", &self.key).finish_non_exhaustive()
	}
}

impl<K: ResourceKey, R> fmt::Display for AlreadyExists<K, R> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "a representative for {:?} already exists or is being constructed", self.key)
	}
}

/// Failure of an admission attempt.
///
/// Kept as a tagged result type rather than a bare error: the
/// `AlreadyExists` variant carries the live wait handle that hands over the
/// winning constructor's representative.
pub enum BeginError<K: ResourceKey, R> {
	/// Another thread holds or has just published construction for the key;
	/// recoverable by waiting via the bundled signal.
	AlreadyExists(AlreadyExists<K, R>),
	/// The calling thread is already constructing this key; a
	/// programming-contract violation, fatal to this call path but harmless
	/// to the registry.
	Reentrant {
		/// The key being re-entered.
		key: K,
	},
}

impl<K: ResourceKey, R> BeginError<K, R> {
	/// Unwraps the already-exists signal, if that is what this is.
	pub fn into_already_exists(self) -> Option<AlreadyExists<K, R>> {
		match self {
			Self::AlreadyExists(signal) => Some(signal),
			Self::Reentrant { .. } => None,
		}
	}
}

impl<K: ResourceKey, R> fmt::Debug for BeginError<K, R> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::AlreadyExists(signal) => f.debug_tuple("AlreadyExists").field(signal).finish(),
			Self::Reentrant { key } => f.debug_struct("Reentrant").field("key", key).finish(),
		}
	}
}

impl<K: ResourceKey, R> fmt::Display for BeginError<K, R> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::AlreadyExists(signal) => fmt::Display::fmt(signal, f),
			Self::Reentrant { key } => {
				write!(f, "re-entrant construction attempt for {key:?}")
			}
		}
	}
}

impl<K: ResourceKey, R> std::error::Error for BeginError<K, R> {}

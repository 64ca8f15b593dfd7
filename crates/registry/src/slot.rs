//! Per-key registration state machine.
//!
//! Each resource key owns one [`Slot`] guarding the cycle
//! `Idle -> Constructing -> Ready -> (Stale -> Constructing -> Ready)*`.
//! The slot's mutex bounds every critical section; no user code (factory,
//! observer) ever runs under it. Publishing under the mutex gives the
//! happens-before edge: any thread that observes `Ready` also observes the
//! fully constructed representative.

use std::sync::{Arc, Weak};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::cancel::CancelToken;
use crate::error::{ConstructionFailed, WaitError};

/// Phase of a slot's registration cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
	/// Nothing published, nothing in flight.
	Idle,
	/// Exactly one thread holds the construction right.
	Constructing,
	/// A representative is published (its weak ref may have expired).
	Ready,
	/// The published value was invalidated out-of-band.
	Stale,
}

/// Outcome of an admission attempt.
pub(crate) enum Admission {
	/// The caller now holds the construction right.
	Won,
	/// A live representative exists or another thread is constructing.
	Occupied,
	/// The calling thread already holds the construction right for this key.
	Reentrant,
}

pub(crate) struct SlotState<R> {
	phase: Phase,
	/// Raw generation counter; zero means never committed.
	epoch: u64,
	value: Weak<R>,
	/// Identity of the in-flight constructor, for re-entrancy detection.
	builder: Option<ThreadId>,
	/// Bumped on every admission; lets waiters tell their construction
	/// cycle's abort apart from a later one.
	cycle: u64,
	/// `(cycle, cause)` of the most recent abort, consumed by its waiters.
	failure: Option<(u64, ConstructionFailed)>,
}

pub(crate) struct Slot<R> {
	state: Mutex<SlotState<R>>,
	cond: Condvar,
}

impl<R> Slot<R> {
	pub(crate) fn new() -> Self {
		Self {
			state: Mutex::new(SlotState {
				phase: Phase::Idle,
				epoch: 0,
				value: Weak::new(),
				builder: None,
				cycle: 0,
				failure: None,
			}),
			cond: Condvar::new(),
		}
	}

	/// Non-blocking lookup of the published representative.
	///
	/// A `Ready` entry whose weak ref no longer upgrades is lazily demoted
	/// to `Stale` so the next admission attempt is granted.
	pub(crate) fn resolve(&self) -> Option<Arc<R>> {
		let mut state = self.state.lock();
		if state.phase != Phase::Ready {
			return None;
		}
		match state.value.upgrade() {
			Some(rep) => Some(rep),
			None => {
				state.phase = Phase::Stale;
				state.value = Weak::new();
				None
			}
		}
	}

	/// Attempts to take the construction right for the calling thread.
	pub(crate) fn try_admit(&self, caller: ThreadId) -> Admission {
		let mut state = self.state.lock();
		match state.phase {
			Phase::Constructing => {
				if state.builder == Some(caller) {
					Admission::Reentrant
				} else {
					Admission::Occupied
				}
			}
			Phase::Ready if state.value.upgrade().is_some() => Admission::Occupied,
			Phase::Ready | Phase::Idle | Phase::Stale => {
				state.phase = Phase::Constructing;
				state.builder = Some(caller);
				state.value = Weak::new();
				state.cycle += 1;
				state.failure = None;
				Admission::Won
			}
		}
	}

	/// Publishes `rep`, bumps the epoch, and wakes all waiters.
	///
	/// Returns the new raw epoch value. Caller must hold the construction
	/// right (enforced by ticket ownership).
	pub(crate) fn publish(&self, rep: &Arc<R>) -> u64 {
		let epoch = {
			let mut state = self.state.lock();
			debug_assert_eq!(state.phase, Phase::Constructing);
			state.epoch += 1;
			state.value = Arc::downgrade(rep);
			state.phase = Phase::Ready;
			state.builder = None;
			state.epoch
		};
		self.cond.notify_all();
		epoch
	}

	/// Releases the construction right without publishing and fans `cause`
	/// out to the current waiters.
	pub(crate) fn abandon(&self, cause: ConstructionFailed) {
		{
			let mut state = self.state.lock();
			debug_assert_eq!(state.phase, Phase::Constructing);
			let cycle = state.cycle;
			state.phase = Phase::Idle;
			state.builder = None;
			state.value = Weak::new();
			state.failure = Some((cycle, cause));
		}
		self.cond.notify_all();
	}

	/// Forces the published value out, regardless of liveness.
	///
	/// An in-flight construction is left to finish; there is nothing
	/// published for it to invalidate. The epoch is not bumped here; the
	/// next successful publish does that.
	pub(crate) fn mark_stale(&self) {
		let mut state = self.state.lock();
		if state.phase != Phase::Constructing {
			state.phase = Phase::Stale;
			state.value = Weak::new();
		}
	}

	/// Raw epoch counter (zero when never committed).
	pub(crate) fn epoch(&self) -> u64 {
		self.state.lock().epoch
	}

	/// Whether the slot still backs a live or in-flight registration.
	pub(crate) fn is_live(&self) -> bool {
		let state = self.state.lock();
		match state.phase {
			Phase::Constructing => true,
			Phase::Ready => state.value.upgrade().is_some(),
			Phase::Idle | Phase::Stale => false,
		}
	}

	/// Blocks the calling thread until the slot becomes ready, the in-flight
	/// construction aborts, the deadline elapses, or `cancel` fires.
	pub(crate) fn await_ready(
		self: &Arc<Self>,
		deadline: Option<Duration>,
		cancel: Option<&CancelToken>,
	) -> Result<Arc<R>, WaitError>
	where
		R: Send + Sync + 'static,
	{
		let limit = deadline.map(|d| Instant::now() + d);
		// Registered before the first flag check so a racing cancel either
		// sees our nudge or we see its flag.
		let _registration = cancel.map(|token| {
			let slot = Arc::clone(self);
			token.register(Box::new(move || {
				let _guard = slot.state.lock();
				slot.cond.notify_all();
			}))
		});

		let mut state = self.state.lock();
		loop {
			if cancel.is_some_and(CancelToken::is_cancelled) {
				return Err(WaitError::Cancelled);
			}
			match state.phase {
				Phase::Ready => {
					return state.value.upgrade().ok_or(WaitError::Absent);
				}
				Phase::Idle | Phase::Stale => {
					return Err(WaitError::Absent);
				}
				Phase::Constructing => {
					let cycle = state.cycle;
					let timed_out = match limit {
						Some(at) => self.cond.wait_until(&mut state, at).timed_out(),
						None => {
							self.cond.wait(&mut state);
							false
						}
					};
					if cancel.is_some_and(CancelToken::is_cancelled) {
						return Err(WaitError::Cancelled);
					}
					if let Some((failed_cycle, cause)) = &state.failure {
						if *failed_cycle == cycle && state.phase != Phase::Ready {
							return Err(WaitError::Aborted(cause.clone()));
						}
					}
					if timed_out && state.phase == Phase::Constructing {
						return Err(WaitError::TimedOut);
					}
					// Otherwise the loop re-examines the phase.
				}
			}
		}
	}
}

//! External cancellation for blocked waiters.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Nudge installed by a waiter so [`CancelToken::cancel`] can wake it.
///
/// The closure takes the waiter's slot lock before notifying, so a cancel
/// racing the waiter's park cannot be missed: either the waiter has not yet
/// parked and will observe the flag, or it is parked and gets the notify.
type Nudge = Box<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct CancelInner {
	cancelled: AtomicBool,
	nudges: Mutex<Vec<(u64, Nudge)>>,
	next_id: AtomicU64,
}

/// Cooperative cancellation handle for [`await_ready`](crate::Registry::await_ready)
/// and [`AlreadyExists::wait_cancellable`](crate::AlreadyExists::wait_cancellable).
///
/// Cancelling wakes only the waiters that registered this token; they return
/// [`WaitError::Cancelled`](crate::WaitError::Cancelled) and unregister
/// themselves without affecting other waiters on the same key.
#[derive(Clone, Default)]
pub struct CancelToken {
	inner: Arc<CancelInner>,
}

impl CancelToken {
	/// Creates a token in the not-cancelled state.
	pub fn new() -> Self {
		Self::default()
	}

	/// Requests cancellation and wakes every registered waiter.
	pub fn cancel(&self) {
		self.inner.cancelled.store(true, Ordering::SeqCst);
		let nudges = self.inner.nudges.lock();
		for (_, nudge) in nudges.iter() {
			nudge();
		}
	}

	/// Returns `true` once [`cancel`](Self::cancel) has been called.
	pub fn is_cancelled(&self) -> bool {
		self.inner.cancelled.load(Ordering::SeqCst)
	}

	/// Registers a wake-up nudge for the lifetime of the returned guard.
	pub(crate) fn register(&self, nudge: Nudge) -> CancelRegistration {
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		self.inner.nudges.lock().push((id, nudge));
		CancelRegistration { inner: Arc::clone(&self.inner), id }
	}
}

/// Unregisters the waiter's nudge on drop.
pub(crate) struct CancelRegistration {
	inner: Arc<CancelInner>,
	id: u64,
}

impl Drop for CancelRegistration {
	fn drop(&mut self) {
		self.inner.nudges.lock().retain(|(id, _)| *id != self.id);
	}
}

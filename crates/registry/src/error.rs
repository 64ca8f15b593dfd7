//! Error types for the registry's construction protocol.
//!
//! [`BeginError`] lives in the `registry` module because its `AlreadyExists`
//! variant carries a live wait handle; the data-only kinds are here.

use std::sync::Arc;

use thiserror::Error;

/// Cause of a failed construction attempt.
///
/// Cloneable so that a single [`abort`](crate::Registry::abort) can fan the
/// same cause out to the original caller and to every thread waiting on the
/// key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("construction failed: {0}")]
pub struct ConstructionFailed(Arc<str>);

impl ConstructionFailed {
	/// Creates a cause from a human-readable message.
	pub fn new(message: impl Into<String>) -> Self {
		Self(message.into().into())
	}

	/// The failure message.
	pub fn message(&self) -> &str {
		&self.0
	}
}

impl From<&str> for ConstructionFailed {
	fn from(message: &str) -> Self {
		Self::new(message)
	}
}

impl From<String> for ConstructionFailed {
	fn from(message: String) -> Self {
		Self::new(message)
	}
}

/// Outcome of waiting for an in-flight construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WaitError {
	/// The deadline elapsed before the entry became ready. Distinct from
	/// permanent absence; callers may retry, escalate, or give up.
	#[error("timed out waiting for construction to finish")]
	TimedOut,

	/// The in-flight construction was aborted; carries the cause published
	/// by the constructing thread.
	#[error("construction aborted: {0}")]
	Aborted(ConstructionFailed),

	/// Nothing is published for the key and no construction is in flight.
	#[error("no representative is published or under construction")]
	Absent,

	/// The waiter's [`CancelToken`](crate::CancelToken) fired. Not a
	/// construction failure; other waiters are unaffected.
	#[error("wait was cancelled")]
	Cancelled,
}

/// Failure of the combined resolve-or-create entry point.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CreateError {
	/// The factory failed (whether this thread ran it or the winning
	/// constructor did).
	#[error(transparent)]
	Failed(#[from] ConstructionFailed),

	/// Waiting on the winning constructor ended without a representative.
	#[error(transparent)]
	Wait(#[from] WaitError),

	/// The calling thread is already constructing this key.
	#[error("re-entrant construction attempt")]
	Reentrant,
}

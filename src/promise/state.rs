// self
use crate::_prelude::*;

/// Snapshot of a [`Promise`]'s lifecycle.
///
/// A promise leaves [`State::Pending`] exactly once and never changes afterwards.
#[derive(Clone, Debug)]
pub enum State<T> {
	/// Outcome not known yet.
	Pending,
	/// Settled with a value.
	Fulfilled(T),
	/// Settled with an error.
	Rejected(Error),
}
impl<T> State<T> {
	/// Returns `true` while the outcome is unknown.
	pub fn is_pending(&self) -> bool {
		matches!(self, State::Pending)
	}

	/// Returns `true` once settled with a value.
	pub fn is_fulfilled(&self) -> bool {
		matches!(self, State::Fulfilled(_))
	}

	/// Returns `true` once settled with an error.
	pub fn is_rejected(&self) -> bool {
		matches!(self, State::Rejected(_))
	}

	/// Converts a settled state into a [`Result`]; `None` while pending.
	pub fn into_result(self) -> Option<Result<T>> {
		match self {
			State::Pending => None,
			State::Fulfilled(value) => Some(Ok(value)),
			State::Rejected(err) => Some(Err(err)),
		}
	}
}
impl<T> From<Result<T>> for State<T> {
	fn from(outcome: Result<T>) -> Self {
		match outcome {
			Ok(value) => State::Fulfilled(value),
			Err(err) => State::Rejected(err),
		}
	}
}

//! Thread-safe, single-assignment deferred values.
//!
//! A [`Promise`] starts pending and settles exactly once, either fulfilled with a value or
//! rejected with an [`Error`]. Any number of observers may register before or after
//! settlement; each fires exactly once, asynchronously, on the [`Executor`] it was registered
//! with. The state and the callback registry share one lock per promise. Callbacks are handed
//! to their executor in registration order while that lock is held, but they only run once it
//! has been released, so a callback may freely touch the same or another promise.
//!
//! Composition operators (`map`, `flat_map`, `recover`, `catch`, `finally`) live in the `ops`
//! submodule and are built only on [`Promise::on_complete`].

mod executor;
mod ops;
mod state;

pub use executor::*;
pub use state::State;

// std
use std::mem;
// crates.io
use tokio::sync::oneshot;
// self
use crate::{_prelude::*, error::ConfigError};

/// Boxed future produced by awaiting a [`Promise`].
pub type PromiseFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

type Handler<T> = Box<dyn FnOnce(Result<T>) + Send>;

/// Handle to a single-assignment deferred value.
///
/// Cloning the handle is cheap and every clone observes the same state.
pub struct Promise<T> {
	shared: Arc<Shared<T>>,
}
impl<T> Promise<T>
where
	T: 'static + Clone + Send,
{
	/// Creates a pending promise whose callbacks run on [`default_executor`].
	pub fn new() -> Self {
		Self::with_executor(default_executor())
	}

	/// Creates a pending promise whose callbacks run on `executor` by default.
	pub fn with_executor(executor: Arc<dyn Executor>) -> Self {
		Self {
			shared: Arc::new(Shared {
				core: Mutex::new(Core { state: State::Pending, callbacks: Vec::new() }),
				executor,
			}),
		}
	}

	/// Creates a promise that is already fulfilled with `value`.
	pub fn fulfilled(value: T) -> Self {
		let promise = Self::new();

		promise.resolve(value);

		promise
	}

	/// Creates a promise that is already rejected with `error`.
	pub fn rejected(error: impl Into<Error>) -> Self {
		let promise = Self::new();

		promise.reject(error);

		promise
	}

	/// Runs `work` asynchronously on `executor`, handing it the promise to settle.
	pub fn from_fn<F>(executor: Arc<dyn Executor>, work: F) -> Self
	where
		F: 'static + Send + FnOnce(Promise<T>),
	{
		let promise = Self::with_executor(executor.clone());
		let resolver = promise.clone();

		executor.execute(Box::new(move || work(resolver)));

		promise
	}

	/// Executor inherited by callbacks and derived promises.
	pub fn executor(&self) -> &Arc<dyn Executor> {
		&self.shared.executor
	}

	/// Fulfills the promise; returns `false` if it had already settled.
	pub fn resolve(&self, value: T) -> bool {
		self.settle(Ok(value))
	}

	/// Rejects the promise; returns `false` if it had already settled.
	pub fn reject(&self, error: impl Into<Error>) -> bool {
		self.settle(Err(error.into()))
	}

	/// Settles the promise with `outcome`; returns `false` if it had already settled.
	///
	/// Safe to call concurrently: exactly one caller wins and every later call is ignored.
	pub fn settle(&self, outcome: Result<T>) -> bool {
		let mut core = self.shared.core.lock();

		if !core.state.is_pending() {
			return false;
		}

		core.state = State::from(outcome.clone());

		// Jobs are enqueued under the lock so a concurrent late registration cannot overtake
		// them; they run after the lock is released.
		for callback in mem::take(&mut core.callbacks) {
			callback.dispatch(outcome.clone());
		}

		true
	}

	/// Snapshot of the current state.
	pub fn state(&self) -> State<T> {
		self.shared.core.lock().state.clone()
	}

	/// Returns `true` while the outcome is unknown.
	pub fn is_pending(&self) -> bool {
		self.shared.core.lock().state.is_pending()
	}

	/// Registers `handler` to receive the outcome on this promise's executor.
	pub fn on_complete<F>(&self, handler: F) -> &Self
	where
		F: 'static + Send + FnOnce(Result<T>),
	{
		self.on_complete_on(self.shared.executor.clone(), handler)
	}

	/// Registers `handler` to receive the outcome on `executor`.
	///
	/// If the promise has already settled the handler is scheduled right away, never invoked
	/// synchronously.
	pub fn on_complete_on<F>(&self, executor: Arc<dyn Executor>, handler: F) -> &Self
	where
		F: 'static + Send + FnOnce(Result<T>),
	{
		let callback = Callback { handler: Box::new(handler), executor };
		let mut core = self.shared.core.lock();

		match core.state.clone().into_result() {
			None => core.callbacks.push(callback),
			Some(outcome) => callback.dispatch(outcome),
		}

		self
	}

	/// Registers a success/failure callback pair on this promise's executor.
	pub fn observe<S, F>(&self, on_fulfilled: S, on_rejected: F) -> &Self
	where
		S: 'static + Send + FnOnce(T),
		F: 'static + Send + FnOnce(Error),
	{
		self.observe_on(self.shared.executor.clone(), on_fulfilled, on_rejected)
	}

	/// Registers a success/failure callback pair on `executor`.
	pub fn observe_on<S, F>(
		&self,
		executor: Arc<dyn Executor>,
		on_fulfilled: S,
		on_rejected: F,
	) -> &Self
	where
		S: 'static + Send + FnOnce(T),
		F: 'static + Send + FnOnce(Error),
	{
		self.on_complete_on(executor, move |outcome| match outcome {
			Ok(value) => on_fulfilled(value),
			Err(err) => on_rejected(err),
		})
	}

	/// Waits for the outcome from async code.
	pub fn wait(&self) -> PromiseFuture<T> {
		let (tx, rx) = oneshot::channel();

		self.on_complete(move |outcome| {
			let _ = tx.send(outcome);
		});

		Box::pin(async move { rx.await.map_err(|_| Error::from(ConfigError::ExecutorStopped))? })
	}
}
impl<T> Default for Promise<T>
where
	T: 'static + Clone + Send,
{
	fn default() -> Self {
		Self::new()
	}
}
impl<T> Clone for Promise<T> {
	fn clone(&self) -> Self {
		Self { shared: self.shared.clone() }
	}
}
impl<T> Debug for Promise<T>
where
	T: Debug,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Promise").field("state", &self.shared.core.lock().state).finish()
	}
}
impl<T> IntoFuture for Promise<T>
where
	T: 'static + Clone + Send,
{
	type IntoFuture = PromiseFuture<T>;
	type Output = Result<T>;

	fn into_future(self) -> Self::IntoFuture {
		self.wait()
	}
}

struct Shared<T> {
	core: Mutex<Core<T>>,
	executor: Arc<dyn Executor>,
}

struct Core<T> {
	state: State<T>,
	callbacks: Vec<Callback<T>>,
}

struct Callback<T> {
	handler: Handler<T>,
	executor: Arc<dyn Executor>,
}
impl<T> Callback<T>
where
	T: 'static + Send,
{
	fn dispatch(self, outcome: Result<T>) {
		let Callback { handler, executor } = self;

		executor.execute(Box::new(move || handler(outcome)));
	}
}

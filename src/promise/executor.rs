//! Execution contexts that run promise callbacks off the resolver's stack.

// std
use std::{
	panic::{self, AssertUnwindSafe},
	sync::LazyLock,
	thread,
};
// crates.io
use tokio::{runtime::Handle, sync::mpsc};
// self
use crate::{_prelude::*, error::ConfigError, obs};

/// Unit of work scheduled on an [`Executor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

static DEFAULT_QUEUE: LazyLock<Arc<dyn Executor>> = LazyLock::new(|| {
	const LABEL: &str = "coinbase-sdk-callbacks";

	match SerialQueue::new(LABEL) {
		Ok(queue) => Arc::new(queue),
		Err(_e) => {
			obs::log_event!(error, queue = LABEL, error = %_e, "Failed to start callback queue.");

			Arc::new(SerialQueue::stopped(LABEL))
		},
	}
});

/// Returns the shared callback queue used by promises created without an explicit executor.
pub fn default_executor() -> Arc<dyn Executor> {
	DEFAULT_QUEUE.clone()
}

/// Runs callback jobs asynchronously.
///
/// Implementations must never run a job on the caller's stack. A promise calls `execute` while
/// holding its own lock, so scheduling must not block on or re-enter that promise.
pub trait Executor
where
	Self: 'static + Send + Sync,
{
	/// Schedules `job` for execution.
	fn execute(&self, job: Job);
}

/// FIFO queue backed by a dedicated worker thread.
///
/// Jobs run one at a time in submission order, so callbacks registered on one promise fire in
/// registration order. A panicking job is logged and the queue keeps draining.
#[derive(Clone)]
pub struct SerialQueue {
	label: Arc<str>,
	sender: mpsc::UnboundedSender<Job>,
}
impl SerialQueue {
	/// Starts a queue whose worker thread is named `label`.
	///
	/// The worker exits once every clone of the queue has been dropped. Fails when the
	/// operating system refuses to spawn the worker thread.
	pub fn new(label: impl Into<String>) -> Result<Self> {
		let label: Arc<str> = Arc::from(label.into());
		let (sender, mut receiver) = mpsc::unbounded_channel::<Job>();
		let worker_label = label.clone();

		thread::Builder::new()
			.name(label.to_string())
			.spawn(move || {
				while let Some(job) = receiver.blocking_recv() {
					if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
						obs::log_event!(error, queue = &*worker_label, "Callback panicked.");
					}
				}
			})
			.map_err(|e| ConfigError::executor_spawn(&*label, e))?;

		Ok(Self { label, sender })
	}

	/// Queue without a worker; every job is dropped, so awaiting observers see
	/// [`ConfigError::ExecutorStopped`].
	pub(crate) fn stopped(label: &str) -> Self {
		let (sender, _) = mpsc::unbounded_channel::<Job>();

		Self { label: Arc::from(label), sender }
	}

	/// Worker thread label.
	pub fn label(&self) -> &str {
		&self.label
	}
}
impl Executor for SerialQueue {
	fn execute(&self, job: Job) {
		if self.sender.send(job).is_err() {
			obs::log_event!(warn, queue = &*self.label, "Callback queue stopped; job dropped.");
		}
	}
}
impl Debug for SerialQueue {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SerialQueue").field("label", &self.label).finish()
	}
}

/// Spawns every job as an independent task on a tokio runtime.
///
/// Jobs from one settlement may run concurrently; prefer [`SerialQueue`] when callbacks rely on
/// registration order.
#[derive(Clone, Debug)]
pub struct RuntimeExecutor(Handle);
impl RuntimeExecutor {
	/// Wraps an existing runtime handle.
	pub fn new(handle: Handle) -> Self {
		Self(handle)
	}

	/// Uses the runtime the caller is currently running on.
	pub fn current() -> Result<Self> {
		Handle::try_current()
			.map(Self)
			.map_err(|_| ConfigError::RuntimeUnavailable.into())
	}
}
impl Executor for RuntimeExecutor {
	fn execute(&self, job: Job) {
		self.0.spawn(async move { job() });
	}
}

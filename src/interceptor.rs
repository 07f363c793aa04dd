//! Pluggable post-processing of pipeline results.
//!
//! Every request's base promise is folded through the client's ordered interceptor list. Each
//! interceptor receives the promise produced by the previous step and may observe it, pass it
//! through, or substitute another one (for example a retried request).

// std
use std::sync::atomic::{AtomicU64, Ordering};
// self
use crate::{_prelude::*, request::RequestDescriptor, response::ErasedResponse};

/// Stable identifier used for idempotent install/remove.
pub type InterceptorKind = &'static str;

type ReplayFn = dyn Fn() -> Promise<ErasedResponse> + Send + Sync;

/// Post-processing stage applied to every request issued from a client.
pub trait Interceptor
where
	Self: 'static + Send + Sync,
{
	/// Kind identifier; at most one interceptor per kind is installed on a client.
	fn kind(&self) -> InterceptorKind;

	/// Observes or replaces `response`.
	fn intercept(
		&self,
		response: Promise<ErasedResponse>,
		context: InterceptContext,
	) -> Promise<ErasedResponse>;
}

/// Token generation a dispatched request was built with.
///
/// The build stage records the generation under the token lock, so an interceptor can tell
/// whether the tokens changed after the request left.
#[derive(Debug, Default)]
pub struct DispatchTicket {
	generation: AtomicU64,
}
impl DispatchTicket {
	/// Records the generation used to build the request.
	pub fn record(&self, generation: u64) {
		self.generation.store(generation, Ordering::Release);
	}

	/// Generation recorded by the build stage.
	pub fn generation(&self) -> u64 {
		self.generation.load(Ordering::Acquire)
	}
}

/// Re-issues a request through the pipeline and the interceptors registered before the one
/// holding this handle.
///
/// Replays never reach the interceptor that requested them, so a request is retried at most
/// once per interceptor.
#[derive(Clone)]
pub struct Replay {
	run: Arc<ReplayFn>,
}
impl Replay {
	/// Wraps a replay function.
	pub fn new<F>(run: F) -> Self
	where
		F: 'static + Send + Sync + Fn() -> Promise<ErasedResponse>,
	{
		Self { run: Arc::new(run) }
	}

	/// Issues the request again.
	pub fn run(&self) -> Promise<ErasedResponse> {
		(self.run)()
	}
}
impl Debug for Replay {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("Replay")
	}
}

/// Per-request information handed to [`Interceptor::intercept`].
#[derive(Clone, Debug)]
pub struct InterceptContext {
	/// Descriptor of the intercepted request.
	pub descriptor: Arc<RequestDescriptor>,
	/// Base URL the request was resolved against.
	pub base_url: Url,
	/// Token generation the request was built with.
	pub ticket: Arc<DispatchTicket>,
	replay: Replay,
}
impl InterceptContext {
	/// Creates a context for one fold step.
	pub fn new(
		descriptor: Arc<RequestDescriptor>,
		base_url: Url,
		ticket: Arc<DispatchTicket>,
		replay: Replay,
	) -> Self {
		Self { descriptor, base_url, ticket, replay }
	}

	/// Handle that re-issues the request.
	pub fn replay(&self) -> &Replay {
		&self.replay
	}
}

/// Immutable snapshot of an interceptor list.
pub type InterceptorList = Arc<[Arc<dyn Interceptor>]>;

/// Ordered interceptor list shared by every request of a client.
///
/// Mutations swap in a new snapshot, so a request in flight keeps folding over the list it
/// started with.
pub struct InterceptorChain {
	interceptors: RwLock<InterceptorList>,
}
impl InterceptorChain {
	/// Creates an empty chain.
	pub fn new() -> Self {
		Self { interceptors: RwLock::new(Arc::from(Vec::new())) }
	}

	/// Current snapshot.
	pub fn snapshot(&self) -> InterceptorList {
		self.interceptors.read().clone()
	}

	/// Appends `interceptor`, first removing any installed interceptor of the same kind.
	pub fn install(&self, interceptor: Arc<dyn Interceptor>) {
		let mut interceptors = self.interceptors.write();
		let kind = interceptor.kind();
		let next = interceptors
			.iter()
			.filter(|i| i.kind() != kind)
			.cloned()
			.chain(Some(interceptor))
			.collect::<Vec<_>>();

		*interceptors = Arc::from(next);
	}

	/// Removes the interceptor of `kind`; returns `false` if none was installed.
	pub fn remove(&self, kind: InterceptorKind) -> bool {
		let mut interceptors = self.interceptors.write();

		if !interceptors.iter().any(|i| i.kind() == kind) {
			return false;
		}

		*interceptors = interceptors.iter().filter(|i| i.kind() != kind).cloned().collect();

		true
	}

	/// Returns `true` if an interceptor of `kind` is installed.
	pub fn contains(&self, kind: InterceptorKind) -> bool {
		self.interceptors.read().iter().any(|i| i.kind() == kind)
	}

	/// Installed kinds in application order.
	pub fn kinds(&self) -> Vec<InterceptorKind> {
		self.interceptors.read().iter().map(|i| i.kind()).collect()
	}
}
impl Default for InterceptorChain {
	fn default() -> Self {
		Self::new()
	}
}
impl Debug for InterceptorChain {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("InterceptorChain").field("kinds", &self.kinds()).finish()
	}
}

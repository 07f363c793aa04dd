// self
use crate::_prelude::*;

impl<T> Promise<T>
where
	T: 'static + Clone + Send,
{
	/// Observes success only; failures are ignored.
	pub fn then<F>(&self, on_fulfilled: F) -> &Self
	where
		F: 'static + Send + FnOnce(T),
	{
		self.observe(on_fulfilled, |_| {})
	}

	/// Transforms the value; errors propagate unchanged.
	pub fn map<U, F>(&self, f: F) -> Promise<U>
	where
		U: 'static + Clone + Send,
		F: 'static + Send + FnOnce(T) -> U,
	{
		self.try_map(move |value| Ok(f(value)))
	}

	/// Transforms the value with a fallible function; its error rejects the derived promise.
	pub fn try_map<U, F>(&self, f: F) -> Promise<U>
	where
		U: 'static + Clone + Send,
		F: 'static + Send + FnOnce(T) -> Result<U>,
	{
		let next = Promise::with_executor(self.executor().clone());
		let settle = next.clone();

		self.on_complete(move |outcome| {
			settle.settle(outcome.and_then(f));
		});

		next
	}

	/// Chains a dependent asynchronous step, adopting the outcome of the promise `f` returns.
	pub fn flat_map<U, F>(&self, f: F) -> Promise<U>
	where
		U: 'static + Clone + Send,
		F: 'static + Send + FnOnce(T) -> Promise<U>,
	{
		let next = Promise::with_executor(self.executor().clone());
		let settle = next.clone();

		self.on_complete(move |outcome| match outcome {
			Ok(value) => {
				f(value).on_complete(move |inner| {
					settle.settle(inner);
				});
			},
			Err(err) => {
				settle.reject(err);
			},
		});

		next
	}

	/// Replaces a failure with the promise produced by `f`; success passes through untouched.
	pub fn recover<F>(&self, f: F) -> Promise<T>
	where
		F: 'static + Send + FnOnce(Error) -> Promise<T>,
	{
		let next = Promise::with_executor(self.executor().clone());
		let settle = next.clone();

		self.on_complete(move |outcome| match outcome {
			Ok(value) => {
				settle.resolve(value);
			},
			Err(err) => {
				f(err).on_complete(move |inner| {
					settle.settle(inner);
				});
			},
		});

		next
	}

	/// Observes failures for side effects; returns this promise unchanged.
	pub fn catch<F>(&self, f: F) -> Promise<T>
	where
		F: 'static + Send + FnOnce(Error),
	{
		self.observe(|_| {}, f);

		self.clone()
	}

	/// Runs `f` on either outcome; returns this promise unchanged.
	pub fn finally<F>(&self, f: F) -> Promise<T>
	where
		F: 'static + Send + FnOnce(),
	{
		self.on_complete(move |_| f());

		self.clone()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
	// self
	use crate::{
		_prelude::*,
		error::{ApiError, SerializationError},
	};

	#[tokio::test]
	async fn map_identity_is_a_no_op() {
		let source = Promise::fulfilled(vec![1, 2, 3]);
		let mapped = source.map(|v| v);

		assert_eq!(mapped.await.expect("Mapped promise should fulfill."), vec![1, 2, 3]);

		let failed = Promise::<u8>::rejected(ApiError::EmptyAccessToken).map(|v| v);

		assert!(matches!(failed.await, Err(Error::Api(ApiError::EmptyAccessToken))));
	}

	#[tokio::test]
	async fn try_map_error_rejects_derived_promise() {
		let derived = Promise::fulfilled(2_u16)
			.try_map(|_| Err::<u16, _>(SerializationError::InputDataEmpty.into()));

		assert!(matches!(
			derived.await,
			Err(Error::Serialization(SerializationError::InputDataEmpty))
		));
	}

	#[tokio::test]
	async fn flat_map_flattens_exactly_one_level() {
		let outer = Promise::fulfilled(20_u32).flat_map(|v| Promise::fulfilled(v + 1));

		assert_eq!(outer.await.expect("Inner promise value should be adopted."), 21);

		let nested: Promise<Promise<u32>> =
			Promise::fulfilled(1_u32).flat_map(|v| Promise::fulfilled(Promise::fulfilled(v)));
		let inner = nested.await.expect("Outer layer should be flattened.");

		assert_eq!(inner.await.expect("Inner layer remains a promise."), 1);

		let pending_inner = Promise::<u32>::new();
		let adopted = Promise::fulfilled(()).flat_map({
			let pending_inner = pending_inner.clone();

			move |_| pending_inner
		});

		pending_inner.reject(ApiError::EmptyRefreshToken);

		assert!(matches!(adopted.await, Err(Error::Api(ApiError::EmptyRefreshToken))));
	}

	#[tokio::test]
	async fn recover_only_runs_on_failure() {
		let touched = Arc::new(AtomicBool::new(false));
		let flag = touched.clone();
		let ok = Promise::fulfilled(1_u8).recover(move |_| {
			flag.store(true, Ordering::SeqCst);

			Promise::fulfilled(0)
		});

		assert_eq!(ok.await.expect("Success should pass through."), 1);
		assert!(!touched.load(Ordering::SeqCst));

		let recovered = Promise::<u8>::rejected(ApiError::EmptyAccessToken)
			.recover(|err| Promise::fulfilled(if err.requires_reauthorization() { 9 } else { 0 }));

		assert_eq!(recovered.await.expect("Failure should be replaced."), 9);
	}

	#[tokio::test]
	async fn catch_and_finally_keep_original_outcome() {
		let calls = Arc::new(AtomicUsize::new(0));
		let (caught, finished) = (calls.clone(), calls.clone());
		let source = Promise::<u8>::rejected(ApiError::EmptyAccessToken);
		let chained = source
			.catch(move |_| {
				caught.fetch_add(1, Ordering::SeqCst);
			})
			.finally(move || {
				finished.fetch_add(1, Ordering::SeqCst);
			});

		assert!(matches!(chained.await, Err(Error::Api(ApiError::EmptyAccessToken))));
		assert_eq!(calls.load(Ordering::SeqCst), 2);

		let value = Promise::fulfilled(4_u8).catch(|_| unreachable!()).finally(|| {});

		assert_eq!(value.await.expect("Value should be preserved."), 4);
	}
}

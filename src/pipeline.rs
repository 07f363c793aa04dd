//! The fixed request pipeline: build → perform → validate → decode.
//!
//! Each stage is chained with [`Promise::flat_map`] or [`Promise::try_map`], so the first
//! rejection skips every later stage and reaches the caller unchanged.

// crates.io
use tokio::runtime::Handle;
// self
use crate::{
	_prelude::*,
	client::ClientInner,
	http::HttpTransport,
	interceptor::DispatchTicket,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	promise::Executor,
	request::{PreparedRequest, RequestDescriptor},
	response::{Response, ResponseEnvelope},
};

/// Runs every stage for `descriptor` against `base_url`.
pub(crate) fn run<T>(
	inner: &Arc<ClientInner>,
	descriptor: Arc<RequestDescriptor>,
	base_url: Url,
	ticket: Arc<DispatchTicket>,
) -> Promise<Response<T>>
where
	T: 'static + Clone + Send + DeserializeOwned,
{
	let span = FlowSpan::new(FlowKind::Request, "pipeline");
	let transport = inner.transport.clone();
	let runtime = inner.runtime.clone();
	let executor = inner.executor.clone();
	let validate_descriptor = descriptor.clone();
	let promise = span.in_scope(|| {
		obs::record_flow_outcome(FlowKind::Request, FlowOutcome::Attempt);

		build(inner.clone(), descriptor, base_url, ticket)
			.flat_map(move |prepared| perform(&transport, &runtime, executor, prepared))
			.try_map(move |envelope| validate(&validate_descriptor, envelope))
			.try_map(decode::<T>)
	});

	promise.on_complete(move |outcome| {
		obs::record_flow_outcome(FlowKind::Request, FlowOutcome::of(&outcome));

		if let Err(_e) = &outcome {
			span.in_scope(|| obs::log_event!(debug, error = %_e, "Request failed."));
		}
	});

	promise
}

/// Build stage: reads the current access token and prepares the transport request.
///
/// The token generation is recorded on `ticket` under the same lock as the token read.
pub(crate) fn build(
	inner: Arc<ClientInner>,
	descriptor: Arc<RequestDescriptor>,
	base_url: Url,
	ticket: Arc<DispatchTicket>,
) -> Promise<PreparedRequest> {
	Promise::from_fn(inner.executor.clone(), move |promise| {
		let (token, generation) = inner.tokens.lock().snapshot();

		ticket.record(generation);
		promise.settle(descriptor.prepare(&base_url, &inner.default_headers, token.as_ref()));
	})
}

/// Perform stage: hands the request to `transport` on `runtime`.
pub(crate) fn perform(
	transport: &Arc<dyn HttpTransport>,
	runtime: &Handle,
	executor: Arc<dyn Executor>,
	prepared: PreparedRequest,
) -> Promise<ResponseEnvelope> {
	let promise = Promise::with_executor(executor);
	let request = match prepared.to_http() {
		Ok(request) => request,
		Err(e) => {
			promise.reject(e);

			return promise;
		},
	};
	let settle = promise.clone();
	let PreparedRequest { method: _method, url, .. } = prepared;

	obs::log_event!(debug, method = %_method, url = %url, "Request fired.");

	let call = transport.execute(request);

	runtime.spawn(async move {
		let outcome = call
			.await
			.map(|response| ResponseEnvelope::from_http(url, response))
			.map_err(Error::from);

		settle.settle(outcome);
	});

	promise
}

/// Validate stage: maps status and emptiness failures to typed errors.
pub(crate) fn validate(
	descriptor: &RequestDescriptor,
	envelope: ResponseEnvelope,
) -> Result<ResponseEnvelope> {
	envelope.validate(descriptor)?;

	Ok(envelope)
}

/// Decode stage: converts the body into the caller's type.
pub(crate) fn decode<T>(envelope: ResponseEnvelope) -> Result<Response<T>>
where
	T: DeserializeOwned,
{
	let value = envelope.decode::<T>()?;
	let ResponseEnvelope { url, status, headers, .. } = envelope;

	Ok(Response { url, status, headers, value })
}

#[cfg(test)]
mod tests {
	// crates.io
	use oauth2::{HttpRequest, HttpResponse};
	// self
	use super::*;
	use crate::{
		error::{SerializationError, TransportError},
		http::TransportFuture,
		promise::{RuntimeExecutor, default_executor},
	};

	struct Canned {
		status: u16,
		body: &'static str,
	}
	impl HttpTransport for Canned {
		fn execute(&self, _: HttpRequest) -> TransportFuture {
			let mut response = HttpResponse::new(self.body.as_bytes().to_vec());

			*response.status_mut() =
				StatusCode::from_u16(self.status).expect("Status fixture should be valid.");

			Box::pin(async move { Ok(response) })
		}
	}

	struct Offline;
	impl HttpTransport for Offline {
		fn execute(&self, _: HttpRequest) -> TransportFuture {
			Box::pin(async {
				Err(TransportError::network(std::io::Error::new(
					std::io::ErrorKind::ConnectionRefused,
					"connection refused",
				)))
			})
		}
	}

	fn prepared() -> PreparedRequest {
		RequestDescriptor::get("/time")
			.prepare(
				&Url::parse("https://api.coinbase.com/v2").expect("Base URL fixture should parse."),
				&HeaderMap::new(),
				None,
			)
			.expect("Descriptor should prepare.")
	}

	#[tokio::test]
	async fn perform_then_validate_then_decode() {
		let transport: Arc<dyn HttpTransport> =
			Arc::new(Canned { status: 200, body: r#"{"iso":"x"}"# });
		let executor: Arc<dyn Executor> =
			Arc::new(RuntimeExecutor::current().expect("Test runtime should be available."));
		let descriptor = RequestDescriptor::get("/time");
		let response = perform(&transport, &Handle::current(), executor, prepared())
			.try_map(move |envelope| validate(&descriptor, envelope))
			.try_map(decode::<serde_json::Value>)
			.await
			.expect("Canned response should decode.");

		assert_eq!(response.status, StatusCode::OK);
		assert_eq!(response.value["iso"], "x");
		assert_eq!(response.url.as_str(), "https://api.coinbase.com/v2/time");
	}

	#[tokio::test]
	async fn stages_short_circuit_on_first_failure() {
		let transport: Arc<dyn HttpTransport> = Arc::new(Offline);
		let outcome = perform(&transport, &Handle::current(), default_executor(), prepared())
			.try_map(|_| -> Result<ResponseEnvelope> { panic!("Validation must be skipped.") })
			.await;

		assert!(matches!(outcome, Err(Error::Transport(TransportError::Network { .. }))));

		let transport: Arc<dyn HttpTransport> =
			Arc::new(Canned { status: 204, body: "" });
		let descriptor = RequestDescriptor::get("/time");
		let outcome = perform(&transport, &Handle::current(), default_executor(), prepared())
			.try_map(move |envelope| validate(&descriptor, envelope))
			.try_map(|_| -> Result<Response<()>> { panic!("Decoding must be skipped.") })
			.await;

		assert!(matches!(outcome, Err(Error::Serialization(SerializationError::InputDataEmpty))));
	}
}

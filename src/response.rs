//! Raw response envelopes, validation, and typed decoding.

// std
use std::ops::Range;
// crates.io
use oauth2::HttpResponse;
// self
use crate::{
	_prelude::*,
	error::{ApiError, OAuthError, SerializationError},
	model::{ErrorResponse, OAuthErrorResponse},
	request::{ErrorShape, RequestDescriptor},
};

/// Statuses treated as success.
pub const VALID_STATUS_CODES: Range<u16> = 200..300;
/// Status signaling an expired or missing access token.
pub const UNAUTHORIZED_STATUS_CODE: u16 = 401;
/// Statuses that never carry a body.
pub const EMPTY_DATA_STATUS_CODES: [u16; 2] = [204, 205];

/// Value type carried through interceptors.
pub type AnyValue = Arc<dyn Any + Send + Sync>;
/// Response whose value type has been erased for the interceptor chain.
pub type ErasedResponse = Response<AnyValue>;

/// Raw transport result before validation.
#[derive(Clone, Debug)]
pub struct ResponseEnvelope {
	/// Request URL.
	pub url: Url,
	/// HTTP status.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Raw body bytes.
	pub body: Vec<u8>,
}
impl ResponseEnvelope {
	/// Wraps a transport response received for `url`.
	pub fn from_http(url: Url, response: HttpResponse) -> Self {
		let status = response.status();
		let (parts, body) = response.into_parts();

		Self { url, status, headers: parts.headers, body }
	}

	/// Checks status and body against the descriptor's expectations.
	///
	/// A non-success status is mapped to the descriptor's [`ErrorShape`]; a body that does not
	/// match that shape yields [`SerializationError::UnacceptableStatusCode`].
	pub fn validate(&self, descriptor: &RequestDescriptor) -> Result<()> {
		let status = self.status.as_u16();

		if !VALID_STATUS_CODES.contains(&status) {
			return Err(self.parse_error(descriptor.error_shape));
		}
		if !descriptor.allow_empty_response
			&& (EMPTY_DATA_STATUS_CODES.contains(&status) || self.body.is_empty())
		{
			return Err(SerializationError::InputDataEmpty.into());
		}

		Ok(())
	}

	/// Decodes the body as JSON; an empty body decodes as `null`.
	pub fn decode<T>(&self) -> Result<T>
	where
		T: DeserializeOwned,
	{
		let body: &[u8] = if self.body.is_empty() { b"null" } else { &self.body };
		let deserializer = &mut serde_json::Deserializer::from_slice(body);

		serde_path_to_error::deserialize(deserializer).map_err(|e| {
			SerializationError::Decode { source: Arc::new(e), status: self.status.as_u16() }.into()
		})
	}

	fn parse_error(&self, shape: ErrorShape) -> Error {
		let status = self.status.as_u16();

		if self.body.is_empty() {
			return SerializationError::UnacceptableStatusCode(status).into();
		}

		match shape {
			ErrorShape::OAuth => match serde_json::from_slice::<OAuthErrorResponse>(&self.body) {
				Ok(body) => OAuthError::Response {
					status,
					error: body.error,
					description: body.error_description,
				}
				.into(),
				Err(_) => SerializationError::UnacceptableStatusCode(status).into(),
			},
			ErrorShape::General => match serde_json::from_slice::<ErrorResponse>(&self.body) {
				Ok(body) => ApiError::Response { status, errors: body.errors }.into(),
				Err(_) => SerializationError::UnacceptableStatusCode(status).into(),
			},
		}
	}
}

/// Successful response carrying a decoded value.
#[derive(Clone, Debug)]
pub struct Response<T> {
	/// Request URL.
	pub url: Url,
	/// HTTP status.
	pub status: StatusCode,
	/// Response headers.
	pub headers: HeaderMap,
	/// Decoded body.
	pub value: T,
}
impl<T> Response<T> {
	/// Transforms the value while keeping the response metadata.
	pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
		Response { url: self.url, status: self.status, headers: self.headers, value: f(self.value) }
	}

	/// Drops the metadata and returns the decoded value.
	pub fn into_value(self) -> T {
		self.value
	}
}
impl<T> Response<T>
where
	T: Any + Send + Sync,
{
	/// Erases the value type for the interceptor chain.
	pub fn erase(self) -> ErasedResponse {
		self.map(|value| Arc::new(value) as AnyValue)
	}
}
impl ErasedResponse {
	/// Borrows the value as `T` if that is its concrete type.
	pub fn downcast_ref<T>(&self) -> Option<&T>
	where
		T: Any,
	{
		self.value.downcast_ref::<T>()
	}

	/// Restores the concrete value type.
	///
	/// Fails with [`SerializationError::IncorrectResponseType`] when an interceptor substituted
	/// a value of another type.
	pub fn downcast<T>(self) -> Result<Response<T>>
	where
		T: Any + Clone + Send + Sync,
	{
		let Response { url, status, headers, value } = self;
		let value = value
			.downcast::<T>()
			.map_err(|_| Error::from(SerializationError::IncorrectResponseType))?;
		let value = Arc::try_unwrap(value).unwrap_or_else(|shared| (*shared).clone());

		Ok(Response { url, status, headers, value })
	}
}

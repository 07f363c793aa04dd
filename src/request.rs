//! Request descriptors supplied by resource layers and their translation into HTTP requests.

// crates.io
use oauth2::{
	AccessToken, HttpRequest,
	http::{
		HeaderName, HeaderValue,
		header::{AUTHORIZATION, HeaderMap},
	},
};
use serde_json::{Map, Value};
// self
use crate::{
	_prelude::*,
	error::{ApiError, ConfigError},
};

/// Whether a request must carry the bearer access token.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Authentication {
	/// Sent without credentials.
	#[default]
	None,
	/// Sent with `Authorization: Bearer <access token>`.
	Token,
}

/// Shape of the error body an endpoint returns on non-success statuses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorShape {
	/// `{"errors": [{"id", "message", "url"}]}` from the general API.
	#[default]
	General,
	/// `{"error", "error_description"}` from the OAuth token endpoints.
	OAuth,
}

/// Request parameters, either JSON encoded into the body or appended to the query string.
#[derive(Clone, Debug, PartialEq)]
pub enum RequestParameters {
	/// JSON object body.
	Body(Map<String, Value>),
	/// URL query pairs.
	Query(BTreeMap<String, String>),
}

/// Description of one API call.
#[derive(Clone, Debug)]
pub struct RequestDescriptor {
	/// Path appended to the base URL (e.g. `/user`).
	pub path: String,
	/// HTTP method.
	pub method: Method,
	/// Body or query parameters.
	pub parameters: Option<RequestParameters>,
	/// Extra headers appended after the client defaults.
	pub headers: BTreeMap<String, String>,
	/// Credential requirement.
	pub authentication: Authentication,
	/// Accept `204`/`205` or an empty body as success.
	pub allow_empty_response: bool,
	/// Error body shape used when the status is not a success.
	pub error_shape: ErrorShape,
	/// Related resources to embed, sent as `expand[]` pairs.
	pub expand: Vec<String>,
}
impl RequestDescriptor {
	/// Creates a descriptor with no parameters, no credentials, and the general error shape.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self {
			path: path.into(),
			method,
			parameters: None,
			headers: BTreeMap::new(),
			authentication: Authentication::None,
			allow_empty_response: false,
			error_shape: ErrorShape::General,
			expand: Vec::new(),
		}
	}

	/// Shorthand for a `GET` descriptor.
	pub fn get(path: impl Into<String>) -> Self {
		Self::new(Method::GET, path)
	}

	/// Shorthand for a `POST` descriptor.
	pub fn post(path: impl Into<String>) -> Self {
		Self::new(Method::POST, path)
	}

	/// Shorthand for a `DELETE` descriptor.
	pub fn delete(path: impl Into<String>) -> Self {
		Self::new(Method::DELETE, path)
	}

	/// Sends `body` as a JSON object.
	pub fn with_body(mut self, body: Map<String, Value>) -> Self {
		self.parameters = Some(RequestParameters::Body(body));

		self
	}

	/// Sends `query` as URL query pairs.
	pub fn with_query<I, K, V>(mut self, query: I) -> Self
	where
		I: IntoIterator<Item = (K, V)>,
		K: Into<String>,
		V: Into<String>,
	{
		self.parameters = Some(RequestParameters::Query(
			query.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
		));

		self
	}

	/// Adds a request specific header.
	pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.headers.insert(name.into(), value.into());

		self
	}

	/// Requires the bearer access token.
	pub fn authenticated(mut self) -> Self {
		self.authentication = Authentication::Token;

		self
	}

	/// Accepts empty success responses.
	pub fn allow_empty_response(mut self) -> Self {
		self.allow_empty_response = true;

		self
	}

	/// Overrides the error body shape.
	pub fn with_error_shape(mut self, shape: ErrorShape) -> Self {
		self.error_shape = shape;

		self
	}

	/// Requests embedded resources.
	pub fn with_expand<I, S>(mut self, expand: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.expand.extend(expand.into_iter().map(Into::into));

		self
	}

	/// Resolves the request URL against `base`, keeping the base path as a prefix.
	pub fn url(&self, base: &Url) -> Url {
		let mut url = base.clone();
		let path = format!("{}{}", base.path().trim_end_matches('/'), self.path);

		url.set_path(&path);

		let query = match &self.parameters {
			Some(RequestParameters::Query(query)) => Some(query),
			_ => None,
		};

		if query.is_some_and(|q| !q.is_empty()) || !self.expand.is_empty() {
			let mut pairs = url.query_pairs_mut();

			for (key, value) in query.into_iter().flatten() {
				pairs.append_pair(key, value);
			}
			for expand in &self.expand {
				pairs.append_pair("expand[]", expand);
			}

			drop(pairs);
		}

		url
	}

	/// Builds the transport request.
	///
	/// `defaults` are the client's session plus SDK headers; descriptor headers are appended on
	/// top. Fails with [`ApiError::EmptyAccessToken`] when credentials are required but absent.
	pub fn prepare(
		&self,
		base: &Url,
		defaults: &HeaderMap,
		token: Option<&AccessToken>,
	) -> Result<PreparedRequest> {
		let mut headers = defaults.clone();

		for (name, value) in &self.headers {
			headers.append(header_name(name)?, header_value(name, value)?);
		}

		if self.authentication == Authentication::Token {
			let token = token
				.map(|t| t.secret().as_str())
				.filter(|t| !t.is_empty())
				.ok_or(ApiError::EmptyAccessToken)?;

			headers.insert(AUTHORIZATION, header_value("Authorization", &format!("Bearer {token}"))?);
		}

		let body = match &self.parameters {
			Some(RequestParameters::Body(body)) =>
				serde_json::to_vec(body).map_err(ConfigError::from)?,
			_ => Vec::new(),
		};

		Ok(PreparedRequest { method: self.method.clone(), url: self.url(base), headers, body })
	}
}

/// Fully resolved request, ready to hand to a transport.
#[derive(Clone, Debug)]
pub struct PreparedRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute URL including query.
	pub url: Url,
	/// Final header set.
	pub headers: HeaderMap,
	/// Encoded body (empty when none).
	pub body: Vec<u8>,
}
impl PreparedRequest {
	/// Converts into the `http` request type consumed by [`crate::http::HttpTransport`].
	pub fn to_http(&self) -> Result<HttpRequest> {
		let mut request = oauth2::http::Request::builder()
			.method(self.method.clone())
			.uri(self.url.as_str())
			.body(self.body.clone())
			.map_err(ConfigError::from)?;

		*request.headers_mut() = self.headers.clone();

		Ok(request)
	}
}

pub(crate) fn header_name(name: &str) -> Result<HeaderName> {
	HeaderName::from_bytes(name.as_bytes())
		.map_err(|_| ConfigError::InvalidHeader { name: name.to_owned() }.into())
}

pub(crate) fn header_value(name: &str, value: &str) -> Result<HeaderValue> {
	HeaderValue::from_str(value)
		.map_err(|_| ConfigError::InvalidHeader { name: name.to_owned() }.into())
}

#[cfg(test)]
mod tests {
	// crates.io
	use oauth2::http::header::CONTENT_TYPE;
	// self
	use super::*;

	fn base() -> Url {
		Url::parse("https://api.coinbase.com/v2").expect("Base URL fixture should parse.")
	}

	#[test]
	fn url_keeps_base_path_and_appends_query() {
		let descriptor = RequestDescriptor::get("/accounts")
			.with_query([("limit", "25"), ("order", "desc")])
			.with_expand(["buyer", "seller"]);

		assert_eq!(
			descriptor.url(&base()).as_str(),
			"https://api.coinbase.com/v2/accounts?limit=25&order=desc&expand%5B%5D=buyer&expand%5B%5D=seller"
		);
		assert_eq!(
			RequestDescriptor::get("/user").url(&base()).as_str(),
			"https://api.coinbase.com/v2/user"
		);
	}

	#[test]
	fn prepare_requires_token_for_authenticated_requests() {
		let descriptor = RequestDescriptor::get("/user").authenticated();
		let err = descriptor
			.prepare(&base(), &HeaderMap::new(), None)
			.expect_err("Missing token should fail.");

		assert!(matches!(err, Error::Api(ApiError::EmptyAccessToken)));

		let empty = AccessToken::new(String::new());

		assert!(descriptor.prepare(&base(), &HeaderMap::new(), Some(&empty)).is_err());

		let token = AccessToken::new("token-1".into());
		let prepared = descriptor
			.prepare(&base(), &HeaderMap::new(), Some(&token))
			.expect("Token should be attached.");

		assert_eq!(
			prepared.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()),
			Some("Bearer token-1")
		);
	}

	#[test]
	fn prepare_encodes_json_body_and_headers() {
		let mut body = Map::new();

		body.insert("grant_type".into(), Value::from("refresh_token"));

		let mut defaults = HeaderMap::new();

		defaults.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

		let prepared = RequestDescriptor::post("/oauth/token")
			.with_body(body)
			.with_header("X-Trace", "abc")
			.prepare(&base(), &defaults, None)
			.expect("Descriptor should prepare.");
		let http = prepared.to_http().expect("HTTP request should build.");

		assert_eq!(*http.method(), Method::POST);
		assert_eq!(http.body().as_slice(), br#"{"grant_type":"refresh_token"}"#);
		assert_eq!(http.headers().get("x-trace").and_then(|v| v.to_str().ok()), Some("abc"));
		assert!(http.headers().contains_key(CONTENT_TYPE));
		assert!(!http.headers().contains_key(AUTHORIZATION));
	}

	#[test]
	fn invalid_header_is_rejected() {
		let err = RequestDescriptor::get("/user")
			.with_header("bad header", "x")
			.prepare(&base(), &HeaderMap::new(), None)
			.expect_err("Invalid header name should fail.");

		assert!(matches!(err, Error::Config(ConfigError::InvalidHeader { .. })));
	}
}

//! SDK-wide error taxonomy shared by the pipeline, interceptors, and the OAuth flow.
//!
//! Every variant is [`Clone`] because a single rejection may be delivered to many
//! observers of the same [`Promise`]; foreign error sources are therefore kept behind
//! [`Arc`].

// self
use crate::{_prelude::*, model::ErrorModel};

/// SDK-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type SharedError = Arc<dyn StdError + Send + Sync>;

/// Canonical SDK error exposed by public APIs.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Transport failure (DNS, TCP, TLS).
	#[error(transparent)]
	Transport(#[from] TransportError),
	/// Response could not be validated or decoded.
	#[error(transparent)]
	Serialization(#[from] SerializationError),
	/// Structured failure reported by the API.
	#[error(transparent)]
	Api(#[from] ApiError),
	/// Authorization flow or token endpoint failure.
	#[error(transparent)]
	OAuth(#[from] OAuthError),
}
impl Error {
	/// HTTP status attached to the failure, when the server produced one.
	pub fn status(&self) -> Option<u16> {
		match self {
			Error::Api(ApiError::Response { status, .. })
			| Error::OAuth(OAuthError::Response { status, .. })
			| Error::Serialization(
				SerializationError::UnacceptableStatusCode(status)
				| SerializationError::Decode { status, .. },
			) => Some(*status),
			_ => None,
		}
	}

	/// Returns `true` when an API call was rejected with `401 Unauthorized`.
	///
	/// Both the structured error body and the bare status (unparseable body) count.
	pub fn is_unauthorized(&self) -> bool {
		matches!(
			self,
			Error::Api(ApiError::Response { status: 401, .. })
				| Error::Serialization(SerializationError::UnacceptableStatusCode(401))
		)
	}

	/// Returns `true` when the caller has to run the authorization flow again.
	pub fn requires_reauthorization(&self) -> bool {
		matches!(
			self,
			Error::OAuth(OAuthError::Response { .. })
				| Error::Api(ApiError::EmptyAccessToken | ApiError::EmptyRefreshToken)
		)
	}
}

/// Configuration and wiring failures raised by the client.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// No tokio runtime handle was supplied or discoverable.
	#[error("A tokio runtime is required to drive transport I/O.")]
	RuntimeUnavailable,
	/// Configured URL cannot be parsed.
	#[error("Configured URL `{url}` is invalid.")]
	InvalidUrl {
		/// Offending input.
		url: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Header name or value cannot be encoded.
	#[error("Header `{name}` cannot be encoded.")]
	InvalidHeader {
		/// Header name as configured.
		name: String,
	},
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: SharedError,
	},
	/// HTTP request construction failed.
	#[error("HTTP request could not be constructed.")]
	HttpRequest {
		/// Underlying builder failure.
		#[source]
		source: Arc<oauth2::http::Error>,
	},
	/// Request body could not be serialized.
	#[error("Request body could not be serialized.")]
	RequestEncode {
		/// Underlying serializer failure.
		#[source]
		source: Arc<serde_json::Error>,
	},
	/// Worker thread backing a callback queue could not be spawned.
	#[error("Callback queue `{label}` could not be started.")]
	ExecutorSpawn {
		/// Queue label.
		label: String,
		/// Underlying spawn failure.
		#[source]
		source: Arc<std::io::Error>,
	},
	/// Executor stopped before the deferred value was delivered.
	#[error("Callback executor stopped before the deferred value was delivered.")]
	ExecutorStopped,
	/// No transport was supplied and the `reqwest` feature is disabled.
	#[error("An HTTP transport must be configured.")]
	TransportMissing,
	/// Client context was dropped while a request was still being replayed.
	#[error("Client context was dropped before the request completed.")]
	ClientDropped,
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::HttpClientBuild { source: Arc::new(src) }
	}

	pub(crate) fn executor_spawn(label: impl Into<String>, source: std::io::Error) -> Self {
		Self::ExecutorSpawn { label: label.into(), source: Arc::new(source) }
	}

	pub(crate) fn invalid_url(url: impl Into<String>, source: url::ParseError) -> Self {
		Self::InvalidUrl { url: url.into(), source }
	}
}
impl From<oauth2::http::Error> for ConfigError {
	fn from(e: oauth2::http::Error) -> Self {
		Self::HttpRequest { source: Arc::new(e) }
	}
}
impl From<serde_json::Error> for ConfigError {
	fn from(e: serde_json::Error) -> Self {
		Self::RequestEncode { source: Arc::new(e) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures (network, IO).
#[derive(Clone, Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the API.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: SharedError,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network { source: Arc::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		Self::network(e)
	}
}

/// Failures raised while validating or decoding a raw response.
#[derive(Clone, Debug, ThisError)]
pub enum SerializationError {
	/// Response was not an HTTP response or carried an unexpected payload type.
	#[error("Response has an unexpected type.")]
	IncorrectResponseType,
	/// Status outside `200..300` whose error body could not be parsed.
	#[error("Response status code {0} was unacceptable.")]
	UnacceptableStatusCode(u16),
	/// Body was empty although the endpoint requires one.
	#[error("Response body is empty.")]
	InputDataEmpty,
	/// Body could not be decoded into the requested type.
	#[error("Response body could not be decoded at `{}`.", .source.path())]
	Decode {
		/// Structured decoding failure.
		#[source]
		source: Arc<serde_path_to_error::Error<serde_json::Error>>,
		/// HTTP status of the decoded response.
		status: u16,
	},
}

/// Failures reported by (or about) the general API surface.
#[derive(Clone, Debug, ThisError)]
pub enum ApiError {
	/// Endpoint requires authorization but no access token is set.
	#[error("Access token is missing.")]
	EmptyAccessToken,
	/// Refresh requested but no refresh token is set.
	#[error("Refresh token is missing.")]
	EmptyRefreshToken,
	/// Structured `{"errors": [...]}` body returned with a non-success status.
	#[error("API responded with status {status}: {}.", summarize(.errors))]
	Response {
		/// HTTP status code.
		status: u16,
		/// Service-defined error details.
		errors: Vec<ErrorModel>,
	},
}
impl ApiError {
	/// Returns `true` when any reported error carries the given identifier.
	pub fn has_error_id(&self, id: &str) -> bool {
		match self {
			ApiError::Response { errors, .. } => errors.iter().any(|e| e.id == id),
			_ => false,
		}
	}
}

/// OAuth configuration, redirect, and token endpoint failures.
#[derive(Clone, Debug, ThisError)]
pub enum OAuthError {
	/// Flow used before [`crate::oauth::OAuthFlow::configure`].
	#[error("OAuth flow has not been configured.")]
	ConfigurationMissing,
	/// Redirect URIs that cannot be parsed into an absolute URL with a scheme.
	#[error("Redirect URIs are invalid: {}.", join(.uris))]
	InvalidUris {
		/// Offending URIs.
		uris: BTreeSet<String>,
	},
	/// Redirect URI schemes that the host application has not registered.
	#[error("Redirect URI schemes are not registered: {}.", join(.schemes))]
	NotRegisteredSchemes {
		/// Unregistered schemes.
		schemes: BTreeSet<String>,
	},
	/// URL opener refused the authorization URL.
	#[error("Cannot redirect to `{url}`.")]
	CannotRedirect {
		/// Authorization URL that was refused.
		url: Url,
	},
	/// Redirect callback did not carry query parameters.
	#[error("Redirect callback `{url}` is malformed.")]
	MalformedResponse {
		/// Callback URL as received.
		url: String,
	},
	/// Returned `state` does not match the one issued by the current authorization attempt.
	#[error("Redirect callback carries an unexpected state parameter.")]
	StateMismatch {
		/// State returned by the redirect, if any.
		state: Option<String>,
		/// State issued by the pending authorization, if any.
		expected: Option<String>,
	},
	/// Redirect callback did not carry a `code` parameter.
	#[error("Redirect callback `{url}` is missing the code parameter.")]
	MissingCode {
		/// Callback URL as received.
		url: String,
	},
	/// Structured `{"error", "error_description"}` body from the token endpoint.
	#[error("Token endpoint rejected the request with `{error}` (status {status}).")]
	Response {
		/// HTTP status code.
		status: u16,
		/// OAuth error code.
		error: String,
		/// Human readable description, when supplied.
		description: Option<String>,
	},
}

fn summarize(errors: &[ErrorModel]) -> String {
	if errors.is_empty() {
		return "no details".into();
	}

	errors.iter().map(|e| format!("{} ({})", e.message, e.id)).collect::<Vec<_>>().join("; ")
}

fn join(values: &BTreeSet<String>) -> String {
	values.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

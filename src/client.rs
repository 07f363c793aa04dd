//! Client context shared by every resource, pipeline run, and interceptor.
//!
//! A [`Client`] is created explicitly by the host and passed to whatever needs it; there is
//! no process-wide default instance. Clones share the same tokens, interceptors, and transport.

// crates.io
use oauth2::{
	AccessToken, RefreshToken,
	http::header::{ACCEPT, CONTENT_TYPE, USER_AGENT},
};
use tokio::runtime::Handle;
// self
use crate::{
	_prelude::*,
	error::ConfigError,
	http::HttpTransport,
	interceptor::{
		DispatchTicket, InterceptContext, Interceptor, InterceptorChain, InterceptorKind,
		InterceptorList, Replay,
	},
	model::ResponseModel,
	oauth::{OAuthFlow, SchemeRegistry},
	obs,
	pipeline,
	promise::{Executor, SerialQueue},
	refresh::{RefreshMetrics, RefreshStrategy, TokenAutoRefresh, TokenState},
	request::{self, RequestDescriptor},
	response::{ErasedResponse, Response},
	token::{Tokens, UserToken},
};
#[cfg(feature = "reqwest")]
use crate::http::ReqwestTransport;

/// Default host of the OAuth token endpoints.
pub const DEFAULT_BASE_URL: &str = "https://api.coinbase.com";
/// Default versioned API root.
pub const DEFAULT_API_URL: &str = "https://api.coinbase.com/v2";
/// Default authorization page.
pub const DEFAULT_AUTHORIZE_URL: &str = "https://www.coinbase.com/oauth/authorize";
/// API version sent as `CB-VERSION`.
pub const DEFAULT_API_VERSION: &str = "2018-02-08";

const CB_VERSION: &str = "CB-VERSION";

/// Client settings, loadable from host configuration files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
	/// Host of the token endpoints.
	pub base_url: String,
	/// Root of the versioned API; resource paths are appended to it.
	pub api_url: String,
	/// Authorization page the OAuth flow redirects users to.
	pub authorize_url: String,
	/// Value of the `CB-VERSION` header.
	pub api_version: String,
	/// Value of the `User-Agent` header.
	pub user_agent: String,
	/// Headers sent with every request; SDK headers take priority on conflicts.
	pub session_headers: BTreeMap<String, String>,
}
impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			base_url: DEFAULT_BASE_URL.into(),
			api_url: DEFAULT_API_URL.into(),
			authorize_url: DEFAULT_AUTHORIZE_URL.into(),
			api_version: DEFAULT_API_VERSION.into(),
			user_agent: concat!("coinbase-sdk/", env!("CARGO_PKG_VERSION")).into(),
			session_headers: BTreeMap::new(),
		}
	}
}

/// Builder for [`Client`].
pub struct ClientBuilder {
	config: ClientConfig,
	access_token: Option<String>,
	transport: Option<Arc<dyn HttpTransport>>,
	executor: Option<Arc<dyn Executor>>,
	runtime: Option<Handle>,
}
impl ClientBuilder {
	/// Starts from `config`.
	pub fn new(config: ClientConfig) -> Self {
		Self { config, access_token: None, transport: None, executor: None, runtime: None }
	}

	/// Initial access token.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(token.into());

		self
	}

	/// Transport used for every request; defaults to [`ReqwestTransport`] when the `reqwest`
	/// feature is enabled.
	pub fn transport(mut self, transport: impl HttpTransport) -> Self {
		self.transport = Some(Arc::new(transport));

		self
	}

	/// Executor running promise callbacks of this client; defaults to a dedicated
	/// [`SerialQueue`].
	pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
		self.executor = Some(executor);

		self
	}

	/// Runtime driving transport I/O; defaults to the runtime the builder is called from.
	pub fn runtime(mut self, handle: Handle) -> Self {
		self.runtime = Some(handle);

		self
	}

	/// Validates the configuration and creates the client.
	pub fn build(self) -> Result<Client> {
		let Self { config, access_token, transport, executor, runtime } = self;
		let runtime = match runtime {
			Some(handle) => handle,
			None => Handle::try_current().map_err(|_| ConfigError::RuntimeUnavailable)?,
		};
		let base_url = parse_url(&config.base_url)?;
		let api_url = parse_url(&config.api_url)?;
		let authorize_url = parse_url(&config.authorize_url)?;
		let default_headers = default_headers(&config)?;
		let transport = match transport {
			Some(transport) => transport,
			None => default_transport()?,
		};
		let executor = match executor {
			Some(executor) => executor,
			None => Arc::new(SerialQueue::new("coinbase-sdk-client")?),
		};
		let tokens = TokenState::new(access_token.map(AccessToken::new));

		Ok(Client {
			inner: Arc::new(ClientInner {
				config,
				base_url,
				api_url,
				authorize_url,
				default_headers,
				transport,
				runtime,
				executor,
				tokens: Mutex::new(tokens),
				interceptors: InterceptorChain::new(),
				refresh_metrics: Default::default(),
			}),
		})
	}
}
impl Debug for ClientBuilder {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ClientBuilder")
			.field("config", &self.config)
			.field("access_token_set", &self.access_token.is_some())
			.field("transport_set", &self.transport.is_some())
			.finish()
	}
}

#[cfg(feature = "reqwest")]
fn default_transport() -> Result<Arc<dyn HttpTransport>> {
	Ok(Arc::new(ReqwestTransport::default()))
}
#[cfg(not(feature = "reqwest"))]
fn default_transport() -> Result<Arc<dyn HttpTransport>> {
	Err(ConfigError::TransportMissing.into())
}

fn parse_url(raw: &str) -> Result<Url> {
	Url::parse(raw).map_err(|e| ConfigError::invalid_url(raw, e).into())
}

fn default_headers(config: &ClientConfig) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	for (name, value) in &config.session_headers {
		headers.insert(request::header_name(name)?, request::header_value(name, value)?);
	}

	let json = request::header_value("Accept", "application/json")?;

	headers.insert(ACCEPT, json.clone());
	headers.insert(CONTENT_TYPE, json);
	headers.insert(
		request::header_name(CB_VERSION)?,
		request::header_value(CB_VERSION, &config.api_version)?,
	);
	headers.insert(USER_AGENT, request::header_value("User-Agent", &config.user_agent)?);

	Ok(headers)
}

pub(crate) struct ClientInner {
	pub(crate) config: ClientConfig,
	pub(crate) base_url: Url,
	pub(crate) api_url: Url,
	pub(crate) authorize_url: Url,
	pub(crate) default_headers: HeaderMap,
	pub(crate) transport: Arc<dyn HttpTransport>,
	pub(crate) runtime: Handle,
	pub(crate) executor: Arc<dyn Executor>,
	pub(crate) tokens: Mutex<TokenState>,
	pub(crate) interceptors: InterceptorChain,
	pub(crate) refresh_metrics: Arc<RefreshMetrics>,
}
impl ClientInner {
	fn apply_token_update(&self, token: Option<&UserToken>) {
		let listener = self.tokens.lock().apply(token);

		if token.is_none() {
			self.interceptors.remove(TokenAutoRefresh::KIND);
		}
		if let Some(listener) = listener {
			listener(token);
		}
	}
}

/// Handle to a configured API client.
#[derive(Clone)]
pub struct Client {
	inner: Arc<ClientInner>,
}
impl Client {
	/// Starts a [`ClientBuilder`].
	pub fn builder(config: ClientConfig) -> ClientBuilder {
		ClientBuilder::new(config)
	}

	/// Creates a client with the default transport on the current tokio runtime.
	#[cfg(feature = "reqwest")]
	pub fn new(config: ClientConfig) -> Result<Self> {
		ClientBuilder::new(config).build()
	}

	pub(crate) fn from_inner(inner: Arc<ClientInner>) -> Self {
		Self { inner }
	}

	/// Configuration the client was built from.
	pub fn config(&self) -> &ClientConfig {
		&self.inner.config
	}

	/// Host of the token endpoints.
	pub fn base_url(&self) -> &Url {
		&self.inner.base_url
	}

	/// Root of the versioned API.
	pub fn api_url(&self) -> &Url {
		&self.inner.api_url
	}

	/// Authorization page.
	pub fn authorize_url(&self) -> &Url {
		&self.inner.authorize_url
	}

	/// Executor running this client's callbacks.
	pub fn executor(&self) -> &Arc<dyn Executor> {
		&self.inner.executor
	}

	/// Issues `descriptor` against the versioned API root.
	pub fn request<T>(&self, descriptor: RequestDescriptor) -> Promise<Response<T>>
	where
		T: 'static + Clone + Send + Sync + DeserializeOwned,
	{
		self.request_with_base(descriptor, &self.inner.api_url)
	}

	/// Issues `descriptor` against `base_url`.
	///
	/// The result is the pipeline's promise folded through every installed interceptor.
	pub fn request_with_base<T>(
		&self,
		descriptor: RequestDescriptor,
		base_url: &Url,
	) -> Promise<Response<T>>
	where
		T: 'static + Clone + Send + Sync + DeserializeOwned,
	{
		let chain = self.inner.interceptors.snapshot();

		dispatch::<T>(&self.inner, Arc::new(descriptor), base_url.clone(), chain)
			.try_map(ErasedResponse::downcast::<T>)
	}

	pub(crate) fn request_token_endpoint<T>(
		&self,
		descriptor: RequestDescriptor,
	) -> Promise<Response<T>>
	where
		T: 'static + Clone + Send + Sync + DeserializeOwned,
	{
		self.request_with_base(descriptor, &self.inner.base_url)
	}

	/// Completion-handler form of [`Client::request`].
	pub fn send<T, F>(&self, descriptor: RequestDescriptor, completion: F)
	where
		T: 'static + Clone + Send + Sync + DeserializeOwned,
		F: 'static + Send + FnOnce(Result<Response<T>>),
	{
		self.request::<T>(descriptor).on_complete(completion);
	}

	/// Issues `descriptor` and unwraps the `{data, pagination, warnings}` envelope.
	///
	/// Warnings reported by the service are logged.
	pub fn fetch_data<T>(&self, descriptor: RequestDescriptor) -> Promise<ResponseModel<T>>
	where
		T: 'static + Clone + Send + Sync + DeserializeOwned,
	{
		self.request::<ResponseModel<T>>(descriptor).map(|response| {
			let model = response.into_value();

			for _warning in model.warnings.iter().flatten() {
				obs::log_event!(
					warn,
					id = %_warning.id,
					message = %_warning.message,
					url = ?_warning.url,
					"API responded with a warning."
				);
			}

			model
		})
	}

	/// Token endpoint resource.
	pub fn tokens(&self) -> Tokens {
		Tokens::new(self.clone())
	}

	/// OAuth authorization flow bound to this client.
	pub fn oauth(&self, schemes: Arc<dyn SchemeRegistry>) -> OAuthFlow {
		OAuthFlow::new(self.clone(), schemes)
	}

	/// Replaces the access token.
	pub fn set_access_token(&self, token: Option<String>) {
		self.inner.tokens.lock().set_access_token(token.map(AccessToken::new));
	}

	/// Current access token.
	pub fn access_token(&self) -> Option<AccessToken> {
		self.inner.tokens.lock().access_token().cloned()
	}

	/// Current refresh token of the refresh strategy.
	pub fn refresh_token(&self) -> Option<RefreshToken> {
		self.inner.tokens.lock().refresh_token().cloned()
	}

	/// Returns `true` while an automatic refresh is in flight.
	pub fn is_refreshing(&self) -> bool {
		self.inner.tokens.lock().is_refreshing()
	}

	/// Configures automatic token refresh.
	///
	/// [`RefreshStrategy::Refresh`] installs [`TokenAutoRefresh`] (replacing a previous
	/// instance); [`RefreshStrategy::None`] removes it.
	pub fn set_refresh_strategy(&self, strategy: RefreshStrategy) {
		let grant = strategy.into_grant();
		let enabled = grant.is_some();

		self.inner.tokens.lock().set_grant(grant);

		if enabled {
			self.install_interceptor(Arc::new(TokenAutoRefresh::new(Arc::downgrade(&self.inner))));
		} else {
			self.remove_interceptor(TokenAutoRefresh::KIND);
		}

		obs::log_event!(debug, enabled = enabled, "Refresh strategy updated.");
	}

	/// Appends `interceptor`, replacing any installed interceptor of the same kind.
	pub fn install_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
		self.inner.interceptors.install(interceptor);
	}

	/// Removes the interceptor of `kind`; returns `false` if none was installed.
	pub fn remove_interceptor(&self, kind: InterceptorKind) -> bool {
		self.inner.interceptors.remove(kind)
	}

	/// Installed interceptor kinds in application order.
	pub fn interceptor_kinds(&self) -> Vec<InterceptorKind> {
		self.inner.interceptors.kinds()
	}

	/// Automatic refresh counters.
	pub fn refresh_metrics(&self) -> Arc<RefreshMetrics> {
		self.inner.refresh_metrics.clone()
	}

	/// Stores `token` (or clears the tokens on `None`) and notifies the update listener.
	pub(crate) fn apply_token_update(&self, token: Option<&UserToken>) {
		self.inner.apply_token_update(token);
	}
}
impl Debug for Client {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("Client")
			.field("api_url", &self.inner.api_url.as_str())
			.field("base_url", &self.inner.base_url.as_str())
			.field("interceptors", &self.inner.interceptors)
			.finish()
	}
}

/// Runs the pipeline and folds its promise through `chain`.
///
/// The interceptor at index `i` receives a replay handle bound to `chain[..i]`.
fn dispatch<T>(
	inner: &Arc<ClientInner>,
	descriptor: Arc<RequestDescriptor>,
	base_url: Url,
	chain: InterceptorList,
) -> Promise<ErasedResponse>
where
	T: 'static + Clone + Send + Sync + DeserializeOwned,
{
	let ticket = Arc::new(DispatchTicket::default());
	let base = pipeline::run::<T>(inner, descriptor.clone(), base_url.clone(), ticket.clone())
		.map(Response::erase);

	chain.iter().enumerate().fold(base, |promise, (i, interceptor)| {
		let replay = {
			let client = Arc::downgrade(inner);
			let descriptor = descriptor.clone();
			let base_url = base_url.clone();
			let earlier: InterceptorList = chain[..i].iter().cloned().collect();

			Replay::new(move || match client.upgrade() {
				Some(inner) =>
					dispatch::<T>(&inner, descriptor.clone(), base_url.clone(), earlier.clone()),
				None => Promise::rejected(ConfigError::ClientDropped),
			})
		};
		let context = InterceptContext::new(descriptor.clone(), base_url.clone(), ticket.clone(), replay);

		interceptor.intercept(promise, context)
	})
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn config_deserializes_with_defaults() {
		let config: ClientConfig = serde_json::from_str(
			r#"{"api_url":"http://localhost:8080/v2","session_headers":{"X-Device":"ios"}}"#,
		)
		.expect("Partial config should decode.");

		assert_eq!(config.api_url, "http://localhost:8080/v2");
		assert_eq!(config.base_url, DEFAULT_BASE_URL);
		assert_eq!(config.api_version, DEFAULT_API_VERSION);
		assert!(config.user_agent.starts_with("coinbase-sdk/"));
	}

	#[test]
	fn sdk_headers_override_session_headers() {
		let mut config = ClientConfig::default();

		config.session_headers.insert("Accept".into(), "text/html".into());
		config.session_headers.insert("X-Device".into(), "ios".into());

		let headers = default_headers(&config).expect("Headers should encode.");

		assert_eq!(headers.get(ACCEPT).and_then(|v| v.to_str().ok()), Some("application/json"));
		assert_eq!(headers.get("cb-version").and_then(|v| v.to_str().ok()), Some("2018-02-08"));
		assert_eq!(headers.get("x-device").and_then(|v| v.to_str().ok()), Some("ios"));
		assert_eq!(headers.get_all(ACCEPT).iter().count(), 1);
	}

	#[test]
	fn build_requires_runtime_and_valid_urls() {
		let err = ClientBuilder::new(ClientConfig::default())
			.build()
			.expect_err("No runtime is running in a plain test.");

		assert!(matches!(err, Error::Config(ConfigError::RuntimeUnavailable)));

		let runtime = tokio::runtime::Builder::new_current_thread()
			.build()
			.expect("Runtime should build.");
		let config = ClientConfig { api_url: "not a url".into(), ..Default::default() };
		let err = ClientBuilder::new(config)
			.runtime(runtime.handle().clone())
			.build()
			.expect_err("Invalid URL should fail.");

		assert!(matches!(err, Error::Config(ConfigError::InvalidUrl { ref url, .. }) if url == "not a url"));
	}

	#[tokio::test]
	async fn refresh_strategy_toggles_interceptor() {
		let client = ClientBuilder::new(ClientConfig::default())
			.access_token("token-1")
			.build()
			.expect("Client should build.");

		assert_eq!(client.access_token().map(|t| t.secret().clone()), Some("token-1".into()));

		client.set_refresh_strategy(RefreshStrategy::refresh("id", "secret", "refresh-1"));
		client.set_refresh_strategy(RefreshStrategy::refresh("id", "secret", "refresh-2"));

		assert_eq!(client.interceptor_kinds(), vec![TokenAutoRefresh::KIND]);
		assert_eq!(client.refresh_token().map(|t| t.secret().clone()), Some("refresh-2".into()));

		client.set_refresh_strategy(RefreshStrategy::None);

		assert!(client.interceptor_kinds().is_empty());
		assert!(client.refresh_token().is_none());
	}
}

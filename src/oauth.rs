//! OAuth 2.0 authorization code flow with CSRF state and redirect URI validation.
//!
//! The flow moves between three states:
//!
//! - `Unconfigured`: [`OAuthFlow::configure`] has not been called; every operation fails with
//!   [`OAuthError::ConfigurationMissing`].
//! - `Configured`: keys are stored; no authorization is pending.
//! - `AwaitingRedirect`: [`OAuthFlow::begin_authorization`] opened the authorization page and
//!   the issued `state` waits for the redirect.
//!
//! Handling a redirect consumes the pending `state`, so each authorization attempt can be
//! completed at most once. The flow only produces tokens; storing them is up to the client's
//! token update listener.

pub mod opener;
pub mod redirect;

pub use oauth2;
pub use opener::*;
pub use redirect::*;

// std
use std::mem;
// crates.io
use oauth2::{ClientId, ClientSecret, CsrfToken};
use rand::{Rng, distr::Alphanumeric};
// self
use crate::{
	_prelude::*,
	client::Client,
	error::OAuthError,
	obs::{self, FlowKind, FlowSpan},
	token::UserToken,
};

/// Length of generated `state` values.
pub const DEFAULT_STATE_LEN: usize = 8;

/// Well-known `layout` values of the authorization page.
#[derive(Clone, Copy, Debug)]
pub struct Layout;
impl Layout {
	/// Opens the sign-up form instead of the sign-in form.
	pub const SIGNUP: &'static str = "signup";
}

/// Which of the user's accounts the application may access.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountAccess {
	/// Every account.
	All,
	/// Accounts picked by the user.
	Select,
	/// Accounts picked by the user, limited to the given currencies.
	SelectFromCurrency(Vec<String>),
}
impl AccountAccess {
	/// Value of the `account` parameter.
	pub fn as_str(&self) -> &'static str {
		match self {
			AccountAccess::All => "all",
			AccountAccess::Select | AccountAccess::SelectFromCurrency(_) => "select",
		}
	}

	/// Value of the `account_currency` parameter, if any.
	pub fn currency(&self) -> Option<String> {
		match self {
			AccountAccess::SelectFromCurrency(currencies) => Some(currencies.join(",")),
			_ => None,
		}
	}
}

/// Optional parameters of one authorization attempt.
#[derive(Clone, Debug, Default)]
pub struct AuthorizationRequest {
	/// Authorization page layout, e.g. [`Layout::SIGNUP`].
	pub layout: Option<String>,
	/// Requested scopes, sent comma separated.
	pub scope: Option<Vec<String>>,
	/// Caller supplied `state`; a random one is generated when absent.
	pub state: Option<String>,
	/// Account access level.
	pub account: Option<AccountAccess>,
	/// Extra `meta[<key>]` parameters.
	pub meta: BTreeMap<String, String>,
}
impl AuthorizationRequest {
	/// Request with no optional parameters.
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the page layout.
	pub fn with_layout(mut self, layout: impl Into<String>) -> Self {
		self.layout = Some(layout.into());

		self
	}

	/// Sets the requested scopes.
	pub fn with_scope<I, S>(mut self, scope: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.scope = Some(scope.into_iter().map(Into::into).collect());

		self
	}

	/// Uses `state` instead of a generated value.
	pub fn with_state(mut self, state: impl Into<String>) -> Self {
		self.state = Some(state.into());

		self
	}

	/// Sets the account access level.
	pub fn with_account(mut self, account: AccountAccess) -> Self {
		self.account = Some(account);

		self
	}

	/// Adds a `meta[<key>]=<value>` parameter.
	pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
		self.meta.insert(key.into(), value.into());

		self
	}
}

/// Application credentials and redirect targets.
#[derive(Clone, Debug)]
pub struct OAuthKeys {
	/// OAuth client id.
	pub client_id: ClientId,
	/// OAuth client secret.
	pub client_secret: ClientSecret,
	/// Redirect URI registered for the application.
	pub redirect_uri: String,
	/// Optional deeplink URI, validated alongside the redirect URI.
	pub deeplink_uri: Option<String>,
}
impl OAuthKeys {
	/// Redirect URI followed by the deeplink URI, if any.
	pub fn redirect_uris(&self) -> impl Iterator<Item = &str> {
		Some(self.redirect_uri.as_str()).into_iter().chain(self.deeplink_uri.as_deref())
	}

	fn handles(&self, url: &Url) -> bool {
		url.as_str().to_lowercase().starts_with(&self.redirect_uri.to_lowercase())
	}
}

#[derive(Debug)]
enum FlowState {
	Unconfigured,
	Configured(OAuthKeys),
	AwaitingRedirect { keys: OAuthKeys, state: CsrfToken },
}
impl FlowState {
	fn keys(&self) -> Option<&OAuthKeys> {
		match self {
			FlowState::Unconfigured => None,
			FlowState::Configured(keys) | FlowState::AwaitingRedirect { keys, .. } => Some(keys),
		}
	}
}

enum Routed {
	NotMine,
	Unconfigured,
	Handled(Promise<UserToken>),
}

/// Authorization code flow bound to a [`Client`].
pub struct OAuthFlow {
	client: Client,
	schemes: Arc<dyn SchemeRegistry>,
	state: Mutex<FlowState>,
}
impl OAuthFlow {
	/// Creates an unconfigured flow validating redirect URIs against `schemes`.
	pub fn new(client: Client, schemes: Arc<dyn SchemeRegistry>) -> Self {
		Self { client, schemes, state: Mutex::new(FlowState::Unconfigured) }
	}

	/// Stores the application keys; any pending authorization is discarded.
	pub fn configure(
		&self,
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
		redirect_uri: impl Into<String>,
		deeplink_uri: Option<String>,
	) {
		let keys = OAuthKeys {
			client_id: ClientId::new(client_id.into()),
			client_secret: ClientSecret::new(client_secret.into()),
			redirect_uri: redirect_uri.into(),
			deeplink_uri,
		};

		*self.state.lock() = FlowState::Configured(keys);
	}

	/// Returns `true` once [`OAuthFlow::configure`] has been called.
	pub fn is_configured(&self) -> bool {
		self.state.lock().keys().is_some()
	}

	/// Configured keys.
	pub fn keys(&self) -> Option<OAuthKeys> {
		self.state.lock().keys().cloned()
	}

	/// `state` issued by the pending authorization, if any.
	pub fn pending_state(&self) -> Option<String> {
		match &*self.state.lock() {
			FlowState::AwaitingRedirect { state, .. } => Some(state.secret().clone()),
			_ => None,
		}
	}

	/// Validates the redirect URIs, builds the authorization URL, and hands it to `opener`.
	///
	/// Returns the opened URL. Fails before anything is opened when the flow is not
	/// configured, a redirect URI is invalid or uses an unregistered scheme, or `opener`
	/// refuses the URL.
	pub fn begin_authorization(
		&self,
		request: AuthorizationRequest,
		opener: &dyn UrlOpener,
	) -> Result<Url> {
		let keys = self.keys().ok_or(OAuthError::ConfigurationMissing)?;

		RedirectUriValidator::new(self.schemes.as_ref()).validate(keys.redirect_uris())?;

		let state = request.state.clone().unwrap_or_else(|| random_string(DEFAULT_STATE_LEN));
		let url = authorization_url(self.client.authorize_url(), &keys, &request, &state);

		if !opener.can_open(&url) {
			return Err(OAuthError::CannotRedirect { url }.into());
		}

		*self.state.lock() = FlowState::AwaitingRedirect { keys, state: CsrfToken::new(state) };

		obs::log_event!(debug, flow = FlowKind::AuthorizationCode.as_str(), "Opening authorization page.");
		opener.open(&url);

		Ok(url)
	}

	/// Handles a redirect callback.
	///
	/// Returns `None` when `url` does not start with the configured redirect URI, so the same
	/// URL can be offered to several handlers. Otherwise the promise resolves with the
	/// exchanged token, or rejects with the callback or exchange failure.
	pub fn handle_redirect(&self, url: &Url) -> Option<Promise<UserToken>> {
		match self.route(url) {
			Routed::NotMine => None,
			Routed::Unconfigured =>
				Some(self.rejected(OAuthError::ConfigurationMissing)),
			Routed::Handled(promise) => Some(promise),
		}
	}

	/// Completion form of [`OAuthFlow::handle_redirect`].
	///
	/// Returns `false` without invoking `completion` when `url` is not a redirect of this
	/// flow. An unconfigured flow reports [`OAuthError::ConfigurationMissing`] through
	/// `completion` and also returns `false`.
	pub fn complete_authorization<F>(&self, url: &Url, completion: F) -> bool
	where
		F: 'static + Send + FnOnce(Result<UserToken>),
	{
		match self.route(url) {
			Routed::NotMine => false,
			Routed::Unconfigured => {
				self.rejected(OAuthError::ConfigurationMissing).on_complete(completion);

				false
			},
			Routed::Handled(promise) => {
				promise.on_complete(completion);

				true
			},
		}
	}

	/// Returns `true` if `url` is the configured deeplink URI.
	pub fn is_deeplink_redirect(&self, url: &Url) -> bool {
		let Some(deeplink) = self.state.lock().keys().and_then(|k| k.deeplink_uri.clone()) else {
			return false;
		};

		Url::parse(&deeplink).is_ok_and(|deeplink| &deeplink == url)
	}

	fn route(&self, url: &Url) -> Routed {
		let span = FlowSpan::new(FlowKind::AuthorizationCode, "handle_redirect");
		let (keys, expected) = {
			let mut guard = self.state.lock();
			let Some(keys) = guard.keys().cloned() else {
				return Routed::Unconfigured;
			};

			if !keys.handles(url) {
				return Routed::NotMine;
			}
			if url.query().is_none_or(str::is_empty) {
				return Routed::Handled(self.rejected(OAuthError::MalformedResponse {
					url: url.to_string(),
				}));
			}

			let expected = match mem::replace(&mut *guard, FlowState::Configured(keys.clone())) {
				FlowState::AwaitingRedirect { state, .. } => Some(state),
				_ => None,
			};

			(keys, expected)
		};
		let mut code = None;
		let mut returned = None;

		for (name, value) in url.query_pairs() {
			match name.as_ref() {
				"code" => code = Some(value.into_owned()),
				"state" => returned = Some(value.into_owned()),
				_ => (),
			}
		}

		let expected = expected.map(|s| s.secret().clone());

		if returned.is_none() || returned != expected {
			span.in_scope(|| obs::log_event!(warn, "Redirect state does not match the pending authorization."));

			return Routed::Handled(
				self.rejected(OAuthError::StateMismatch { state: returned, expected }),
			);
		}

		let Some(code) = code else {
			return Routed::Handled(self.rejected(OAuthError::MissingCode { url: url.to_string() }));
		};

		Routed::Handled(span.in_scope(|| {
			self.client.tokens().exchange_code(
				code,
				keys.client_id.as_str(),
				keys.client_secret.secret(),
				keys.redirect_uri.as_str(),
			)
		}))
	}

	fn rejected(&self, error: OAuthError) -> Promise<UserToken> {
		let promise = Promise::with_executor(self.client.executor().clone());

		promise.reject(error);

		promise
	}
}
impl Debug for OAuthFlow {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuthFlow").field("state", &*self.state.lock()).finish()
	}
}

/// Builds the authorization page URL.
pub fn authorization_url(
	authorize_url: &Url,
	keys: &OAuthKeys,
	request: &AuthorizationRequest,
	state: &str,
) -> Url {
	let mut url = authorize_url.clone();
	let mut pairs = url.query_pairs_mut();

	pairs.append_pair("response_type", "code");
	pairs.append_pair("client_id", keys.client_id.as_str());
	pairs.append_pair("redirect_uri", &keys.redirect_uri);

	if let Some(layout) = &request.layout {
		pairs.append_pair("layout", layout);
	}
	if let Some(scope) = &request.scope {
		pairs.append_pair("scope", &scope.join(","));
	}

	pairs.append_pair("state", state);

	if let Some(account) = &request.account {
		pairs.append_pair("account", account.as_str());

		if let Some(currency) = account.currency() {
			pairs.append_pair("account_currency", &currency);
		}
	}
	for (key, value) in &request.meta {
		pairs.append_pair(&format!("meta[{key}]"), value);
	}

	drop(pairs);

	url
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn keys() -> OAuthKeys {
		OAuthKeys {
			client_id: ClientId::new("client-1".into()),
			client_secret: ClientSecret::new("secret-1".into()),
			redirect_uri: "app://callback".into(),
			deeplink_uri: Some("app://deeplink".into()),
		}
	}

	#[test]
	fn random_state_is_alphanumeric() {
		let a = random_string(DEFAULT_STATE_LEN);
		let b = random_string(DEFAULT_STATE_LEN);

		assert_eq!(a.len(), 8);
		assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
		assert_ne!(a, b);
	}

	#[test]
	fn authorization_url_carries_every_parameter() {
		let request = AuthorizationRequest::new()
			.with_layout(Layout::SIGNUP)
			.with_scope(["wallet:user:read", "wallet:accounts:read"])
			.with_account(AccountAccess::SelectFromCurrency(vec!["BTC".into(), "ETH".into()]))
			.with_meta("send_limit_amount", "1");
		let url = authorization_url(
			&Url::parse("https://www.coinbase.com/oauth/authorize").expect("URL fixture should parse."),
			&keys(),
			&request,
			"abcd1234",
		);
		let pairs = url.query_pairs().into_owned().collect::<Vec<_>>();
		let get = |name: &str| pairs.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str());

		assert_eq!(url.path(), "/oauth/authorize");
		assert_eq!(get("response_type"), Some("code"));
		assert_eq!(get("client_id"), Some("client-1"));
		assert_eq!(get("redirect_uri"), Some("app://callback"));
		assert_eq!(get("layout"), Some("signup"));
		assert_eq!(get("scope"), Some("wallet:user:read,wallet:accounts:read"));
		assert_eq!(get("state"), Some("abcd1234"));
		assert_eq!(get("account"), Some("select"));
		assert_eq!(get("account_currency"), Some("BTC,ETH"));
		assert_eq!(get("meta[send_limit_amount]"), Some("1"));
	}

	#[test]
	fn keys_match_redirects_case_insensitively() {
		let keys = keys();

		assert!(keys.handles(&Url::parse("APP://Callback?code=1").expect("URL fixture should parse.")));
		assert!(!keys.handles(&Url::parse("app://other?code=1").expect("URL fixture should parse.")));
		assert_eq!(keys.redirect_uris().collect::<Vec<_>>(), vec!["app://callback", "app://deeplink"]);
		assert_eq!(AccountAccess::All.as_str(), "all");
		assert_eq!(AccountAccess::Select.currency(), None);
	}
}

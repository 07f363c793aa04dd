//! Transparent access token refresh with a single-flight guard.
//!
//! [`TokenAutoRefresh`] is installed by [`Client::set_refresh_strategy`]. When a request
//! built with the current tokens fails with `401 Unauthorized`, exactly one
//! `grant_type=refresh_token` call is issued per client, however many requests discover the
//! expiry at once. Every failed request is retried once after that call succeeds, or fails with
//! the refresh error after it fails. A failed refresh clears the stored tokens, so the host has
//! to authorize again.
//!
//! All decisions are taken under the client's token lock:
//!
//! 1. No refresh grant configured: the original error is returned.
//! 2. Token generation moved since the request was built: another refresh already rotated the
//!    tokens, so the request is replayed directly.
//! 3. Refresh in flight: the retry joins it.
//! 4. Otherwise a refresh call is issued and recorded as in flight.

mod metrics;

pub use metrics::RefreshMetrics;

// crates.io
use oauth2::{AccessToken, ClientId, ClientSecret, RefreshToken};
// self
use crate::{
	_prelude::*,
	client::{Client, ClientInner},
	interceptor::{InterceptContext, Interceptor, InterceptorKind},
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	promise::Executor,
	request::ErrorShape,
	response::{ErasedResponse, Response},
	token::{TokenRequest, UserToken},
};

/// Callback notified with the new token after every update, or `None` once tokens are cleared.
pub type TokenListener = Arc<dyn Fn(Option<&UserToken>) + Send + Sync>;

/// How a client reacts to expired access tokens.
#[derive(Clone, Default)]
pub enum RefreshStrategy {
	/// Expired tokens surface as `401` errors.
	#[default]
	None,
	/// Expired tokens are refreshed and the failed requests retried.
	Refresh {
		/// OAuth client id.
		client_id: String,
		/// OAuth client secret.
		client_secret: String,
		/// Refresh token issued with the current access token.
		refresh_token: String,
		/// Token update listener, typically persisting the tokens.
		on_update: Option<TokenListener>,
	},
}
impl RefreshStrategy {
	/// Refresh strategy without an update listener.
	pub fn refresh(
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
		refresh_token: impl Into<String>,
	) -> Self {
		Self::Refresh {
			client_id: client_id.into(),
			client_secret: client_secret.into(),
			refresh_token: refresh_token.into(),
			on_update: None,
		}
	}

	/// Attaches a token update listener; no-op for [`RefreshStrategy::None`].
	pub fn on_update<F>(self, listener: F) -> Self
	where
		F: 'static + Send + Sync + Fn(Option<&UserToken>),
	{
		match self {
			Self::None => Self::None,
			Self::Refresh { client_id, client_secret, refresh_token, .. } => Self::Refresh {
				client_id,
				client_secret,
				refresh_token,
				on_update: Some(Arc::new(listener)),
			},
		}
	}

	pub(crate) fn into_grant(self) -> Option<RefreshGrant> {
		match self {
			Self::None => None,
			Self::Refresh { client_id, client_secret, refresh_token, on_update } => Some(RefreshGrant {
				client_id: ClientId::new(client_id),
				client_secret: ClientSecret::new(client_secret),
				refresh_token: RefreshToken::new(refresh_token),
				on_update,
			}),
		}
	}
}
impl Debug for RefreshStrategy {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		match self {
			Self::None => f.write_str("None"),
			Self::Refresh { client_id, on_update, .. } => f
				.debug_struct("Refresh")
				.field("client_id", client_id)
				.field("client_secret", &"[redacted]")
				.field("refresh_token", &"[redacted]")
				.field("on_update", &on_update.is_some())
				.finish(),
		}
	}
}

/// Credentials used for `grant_type=refresh_token` calls.
pub(crate) struct RefreshGrant {
	client_id: ClientId,
	client_secret: ClientSecret,
	refresh_token: RefreshToken,
	on_update: Option<TokenListener>,
}

/// What to do with a request that failed with `401`.
pub(crate) enum RefreshDecision {
	PassThrough,
	Replay,
	Join(Promise<UserToken>),
	Issue { shared: Promise<UserToken>, request: TokenRequest },
}
impl RefreshDecision {
	fn label(&self) -> &'static str {
		match self {
			Self::PassThrough => "pass_through",
			Self::Replay => "replay",
			Self::Join(_) => "join",
			Self::Issue { .. } => "issue",
		}
	}
}

/// Token state of one client; guarded by a single mutex.
#[derive(Default)]
pub(crate) struct TokenState {
	access_token: Option<AccessToken>,
	generation: u64,
	grant: Option<RefreshGrant>,
	in_flight: Option<Promise<UserToken>>,
}
impl TokenState {
	pub(crate) fn new(access_token: Option<AccessToken>) -> Self {
		Self { access_token, ..Default::default() }
	}

	/// Current access token and the generation it belongs to.
	pub(crate) fn snapshot(&self) -> (Option<AccessToken>, u64) {
		(self.access_token.clone(), self.generation)
	}

	pub(crate) fn access_token(&self) -> Option<&AccessToken> {
		self.access_token.as_ref()
	}

	pub(crate) fn refresh_token(&self) -> Option<&RefreshToken> {
		self.grant.as_ref().map(|g| &g.refresh_token)
	}

	pub(crate) fn is_refreshing(&self) -> bool {
		self.in_flight.is_some()
	}

	pub(crate) fn set_access_token(&mut self, token: Option<AccessToken>) {
		self.access_token = token;
		self.generation += 1;
	}

	pub(crate) fn set_grant(&mut self, grant: Option<RefreshGrant>) {
		self.grant = grant;
	}

	/// Stores `token`, or clears the access token and the grant on `None`.
	///
	/// Returns the listener to notify once the lock is released.
	pub(crate) fn apply(&mut self, token: Option<&UserToken>) -> Option<TokenListener> {
		self.generation += 1;

		match token {
			Some(token) => {
				self.access_token = Some(token.access_token.clone());

				let grant = self.grant.as_mut()?;

				grant.refresh_token = token.refresh_token.clone();

				grant.on_update.clone()
			},
			None => {
				self.access_token = None;

				self.grant.take().and_then(|g| g.on_update)
			},
		}
	}

	/// Leaves the refreshing state with the refresh outcome.
	pub(crate) fn finish_refresh(&mut self, token: Option<&UserToken>) -> Option<TokenListener> {
		self.in_flight = None;

		self.apply(token)
	}

	/// Decides how to recover a request built at `built_with` that failed with `401`.
	pub(crate) fn decide(&mut self, built_with: u64, executor: &Arc<dyn Executor>) -> RefreshDecision {
		let Some(grant) = &self.grant else {
			return RefreshDecision::PassThrough;
		};

		if self.generation != built_with {
			return RefreshDecision::Replay;
		}
		if let Some(shared) = &self.in_flight {
			return RefreshDecision::Join(shared.clone());
		}

		let request = TokenRequest::Refresh {
			client_id: grant.client_id.clone(),
			client_secret: grant.client_secret.clone(),
			refresh_token: grant.refresh_token.clone(),
		};
		let shared = Promise::with_executor(executor.clone());

		self.in_flight = Some(shared.clone());

		RefreshDecision::Issue { shared, request }
	}
}

/// Interceptor refreshing expired access tokens and retrying the failed requests.
#[derive(Debug)]
pub struct TokenAutoRefresh {
	client: Weak<ClientInner>,
}
impl TokenAutoRefresh {
	/// Interceptor kind.
	pub const KIND: InterceptorKind = "token_auto_refresh";

	pub(crate) fn new(client: Weak<ClientInner>) -> Self {
		Self { client }
	}
}
impl Interceptor for TokenAutoRefresh {
	fn kind(&self) -> InterceptorKind {
		Self::KIND
	}

	fn intercept(
		&self,
		response: Promise<ErasedResponse>,
		context: InterceptContext,
	) -> Promise<ErasedResponse> {
		// Token endpoint failures are never refreshed.
		if context.descriptor.error_shape == ErrorShape::OAuth {
			return response;
		}

		let client = self.client.clone();

		response.recover(move |err| {
			if !err.is_unauthorized() {
				return Promise::rejected(err);
			}

			match client.upgrade() {
				Some(inner) => recover_unauthorized(&inner, err, context),
				None => Promise::rejected(err),
			}
		})
	}
}

fn recover_unauthorized(
	inner: &Arc<ClientInner>,
	err: Error,
	context: InterceptContext,
) -> Promise<ErasedResponse> {
	let decision = inner.tokens.lock().decide(context.ticket.generation(), &inner.executor);
	let replay = context.replay().clone();

	obs::record_refresh_decision(decision.label());

	match decision {
		RefreshDecision::PassThrough => Promise::rejected(err),
		RefreshDecision::Replay => {
			obs::log_event!(debug, path = %context.descriptor.path, "Tokens rotated since the request was built; replaying.");

			replay.run()
		},
		RefreshDecision::Join(shared) => {
			inner.refresh_metrics.record_coalesced();

			shared.flat_map(move |_| replay.run())
		},
		RefreshDecision::Issue { shared, request } => {
			issue_refresh(inner, shared.clone(), request);

			shared.flat_map(move |_| replay.run())
		},
	}
}

fn issue_refresh(inner: &Arc<ClientInner>, shared: Promise<UserToken>, request: TokenRequest) {
	const KIND: FlowKind = FlowKind::Refresh;

	let span = FlowSpan::new(KIND, "auto_refresh");
	let client = Arc::downgrade(inner);
	let call = span.in_scope(|| {
		inner.refresh_metrics.record_attempt();
		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);
		obs::log_event!(info, "Refreshing expired access token.");

		Client::from_inner(inner.clone()).request_token_endpoint::<UserToken>(request.descriptor())
	});

	call.on_complete(move |outcome| {
		let outcome = outcome.map(Response::into_value);

		if let Some(inner) = client.upgrade() {
			span.in_scope(|| finish_refresh(&inner, &outcome));
		}

		shared.settle(outcome);
	});
}

fn finish_refresh(inner: &ClientInner, outcome: &Result<UserToken>) {
	let token = outcome.as_ref().ok();
	let listener = inner.tokens.lock().finish_refresh(token);

	obs::record_flow_outcome(FlowKind::Refresh, FlowOutcome::of(outcome));

	match outcome {
		Ok(_) => {
			inner.refresh_metrics.record_success();
			obs::log_event!(info, "Access token refreshed.");
		},
		Err(_e) => {
			inner.refresh_metrics.record_failure();
			inner.interceptors.remove(TokenAutoRefresh::KIND);
			obs::log_event!(error, error = %_e, "Access token refresh failed; stored tokens cleared.");
		},
	}

	if let Some(listener) = listener {
		listener(token);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::promise::default_executor;

	fn token(access: &str, refresh: &str) -> UserToken {
		serde_json::from_value(serde_json::json!({
			"access_token": access,
			"token_type": "bearer",
			"expires_in": 7200,
			"refresh_token": refresh,
			"scope": "wallet:user:read",
		}))
		.expect("Token fixture should decode.")
	}

	fn state_with_grant(listener: Option<TokenListener>) -> TokenState {
		let mut state = TokenState::new(Some(AccessToken::new("expired".into())));
		let strategy = RefreshStrategy::refresh("id", "secret", "refresh-1");
		let strategy = match listener {
			Some(listener) => strategy.on_update(move |t| listener(t)),
			None => strategy,
		};

		state.set_grant(strategy.into_grant());

		state
	}

	#[test]
	fn decide_walks_the_single_flight_states() {
		let executor = default_executor();
		let mut state = TokenState::default();

		assert!(matches!(state.decide(0, &executor), RefreshDecision::PassThrough));

		let mut state_b = state_with_grant(None);
		let (_, built_with) = state_b.snapshot();
		let shared = match state_b.decide(built_with, &executor) {
			RefreshDecision::Issue { shared, request: TokenRequest::Refresh { refresh_token, .. } } => {
				assert_eq!(refresh_token.secret(), "refresh-1");

				shared
			},
			_ => panic!("First failure should issue a refresh."),
		};

		assert!(state_b.is_refreshing());
		assert!(matches!(state_b.decide(built_with, &executor), RefreshDecision::Join(ref joined) if joined.is_pending()));

		shared.resolve(token("fresh", "refresh-2"));
		state_b.finish_refresh(Some(&token("fresh", "refresh-2")));

		assert!(!state_b.is_refreshing());
		assert!(matches!(state_b.decide(built_with, &executor), RefreshDecision::Replay));
		assert_eq!(state_b.access_token().map(|t| t.secret().as_str()), Some("fresh"));
		assert_eq!(state_b.refresh_token().map(|t| t.secret().as_str()), Some("refresh-2"));

		state.set_access_token(None);

		assert_eq!(state.snapshot().1, 1);
	}

	#[test]
	fn failed_refresh_clears_tokens_and_grant() {
		let seen = Arc::new(Mutex::new(Vec::new()));
		let recorder = seen.clone();
		let listener: TokenListener =
			Arc::new(move |t: Option<&UserToken>| recorder.lock().push(t.map(|t| t.access_token.secret().clone())));
		let mut state = state_with_grant(Some(listener));
		let (_, built_with) = state.snapshot();

		assert!(matches!(state.decide(built_with, &default_executor()), RefreshDecision::Issue { .. }));

		let notify = state.finish_refresh(None).expect("Listener should be returned.");

		notify(None);

		assert!(state.access_token().is_none());
		assert!(state.refresh_token().is_none());
		assert!(!state.is_refreshing());
		assert!(matches!(state.decide(state.snapshot().1, &default_executor()), RefreshDecision::PassThrough));
		assert_eq!(*seen.lock(), vec![None]);
	}

	#[test]
	fn strategy_debug_redacts_secrets() {
		let strategy = RefreshStrategy::refresh("id", "secret", "refresh-1").on_update(|_| {});
		let rendered = format!("{strategy:?}");

		assert!(rendered.contains("id"));
		assert!(!rendered.contains("refresh-1"));
		assert!(!rendered.contains("\"secret\""));
		assert!(RefreshStrategy::None.on_update(|_| {}).into_grant().is_none());
	}
}

//! Redirect URI validation against the host application's registered URL schemes.

// self
use crate::{_prelude::*, error::OAuthError};

/// Source of the URL schemes the host application is registered to handle.
pub trait SchemeRegistry
where
	Self: 'static + Send + Sync,
{
	/// Registered schemes, lowercase.
	fn registered_schemes(&self) -> BTreeSet<String>;
}

/// Fixed scheme set, typically loaded from the host's configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StaticSchemes(BTreeSet<String>);
impl StaticSchemes {
	/// Registers `schemes`; matching is case-insensitive.
	pub fn new<I, S>(schemes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		Self(schemes.into_iter().map(|s| s.as_ref().to_ascii_lowercase()).collect())
	}
}
impl SchemeRegistry for StaticSchemes {
	fn registered_schemes(&self) -> BTreeSet<String> {
		self.0.clone()
	}
}

/// Checks that redirect URIs parse and use registered schemes.
#[derive(Clone, Copy)]
pub struct RedirectUriValidator<'a> {
	registry: &'a dyn SchemeRegistry,
}
impl<'a> RedirectUriValidator<'a> {
	/// Validates against `registry`.
	pub fn new(registry: &'a dyn SchemeRegistry) -> Self {
		Self { registry }
	}

	/// Fails with [`OAuthError::InvalidUris`] if any URI lacks a scheme, otherwise with
	/// [`OAuthError::NotRegisteredSchemes`] if any scheme is unknown to the registry.
	pub fn validate<'u, I>(&self, uris: I) -> Result<()>
	where
		I: IntoIterator<Item = &'u str>,
	{
		let mut schemes = BTreeSet::new();
		let mut invalid = BTreeSet::new();

		for uri in uris {
			match Url::parse(uri) {
				Ok(url) => {
					schemes.insert(url.scheme().to_owned());
				},
				Err(_) => {
					invalid.insert(uri.to_owned());
				},
			}
		}

		if !invalid.is_empty() {
			return Err(OAuthError::InvalidUris { uris: invalid }.into());
		}

		let registered = self.registry.registered_schemes();
		let unregistered =
			schemes.difference(&registered).cloned().collect::<BTreeSet<_>>();

		if !unregistered.is_empty() {
			return Err(OAuthError::NotRegisteredSchemes { schemes: unregistered }.into());
		}

		Ok(())
	}
}
impl Debug for RedirectUriValidator<'_> {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RedirectUriValidator")
			.field("registered", &self.registry.registered_schemes())
			.finish()
	}
}

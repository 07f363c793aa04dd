//! Seam for handing the authorization URL to a browser or webview.

// self
use crate::_prelude::*;

/// Opens authorization URLs on behalf of the OAuth flow.
pub trait UrlOpener {
	/// Returns `false` if `url` cannot be opened in the current environment.
	fn can_open(&self, url: &Url) -> bool;

	/// Opens `url`; only called after [`UrlOpener::can_open`] returned `true`.
	fn open(&self, url: &Url);
}

/// Opener that records every URL it is asked to open.
///
/// Useful for headless hosts that forward the URL themselves, and in tests.
#[derive(Debug, Default)]
pub struct RecordingOpener {
	opened: Mutex<Vec<Url>>,
	refuse: bool,
}
impl RecordingOpener {
	/// Opener that accepts every URL.
	pub fn new() -> Self {
		Self::default()
	}

	/// Opener whose [`UrlOpener::can_open`] always returns `false`.
	pub fn refusing() -> Self {
		Self { refuse: true, ..Default::default() }
	}

	/// URLs opened so far.
	pub fn opened(&self) -> Vec<Url> {
		self.opened.lock().clone()
	}
}
impl UrlOpener for RecordingOpener {
	fn can_open(&self, _: &Url) -> bool {
		!self.refuse
	}

	fn open(&self, url: &Url) {
		self.opened.lock().push(url.clone());
	}
}

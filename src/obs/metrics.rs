// self
use crate::obs::{FlowKind, FlowOutcome};

/// Counter incremented once per flow attempt and once per settled outcome.
pub const FLOW_COUNTER: &str = "coinbase_sdk_flow_total";
/// Counter incremented for every `401` the auto-refresh interceptor resolves.
pub const REFRESH_DECISION_COUNTER: &str = "coinbase_sdk_refresh_decision_total";

/// Records a flow outcome via the global metrics recorder (when enabled).
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	metrics::counter!(FLOW_COUNTER, "flow" => kind.as_str(), "outcome" => outcome.as_str())
		.increment(1);
	#[cfg(not(feature = "metrics"))]
	let _ = (kind, outcome);
}

/// Records how the auto-refresh interceptor handled an unauthorized response.
///
/// `decision` is one of `pass_through`, `replay`, `join`, or `issue`.
pub fn record_refresh_decision(decision: &'static str) {
	#[cfg(feature = "metrics")]
	metrics::counter!(REFRESH_DECISION_COUNTER, "decision" => decision).increment(1);
	#[cfg(not(feature = "metrics"))]
	let _ = decision;
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn recording_without_recorder_is_a_noop() {
		record_flow_outcome(FlowKind::Refresh, FlowOutcome::Failure);
		record_flow_outcome(FlowKind::AuthorizationCode, FlowOutcome::of(&Ok::<_, crate::Error>(())));
		record_refresh_decision("join");
	}
}

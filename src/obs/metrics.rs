// self
use crate::obs::{FlowKind, FlowOutcome};

/// Records a flow outcome via the global metrics recorder (when enabled).
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"workspace_broker_flow_total",
			"flow" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

/// Records one retried upstream attempt for `service` (when enabled).
pub fn record_retry(service: &'static str) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("workspace_broker_retry_total", "service" => service).increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = service;
	}
}

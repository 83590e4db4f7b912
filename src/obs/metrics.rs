// std
use std::time::Duration as StdDuration;
// self
use crate::obs::CallOutcome;

/// Records a call outcome via the global metrics recorder (when enabled).
///
/// `operation` should be low-cardinality (the HTTP method); paths carry resource ids.
pub fn record_call_outcome(operation: &str, outcome: CallOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"mashery_transport_call_total",
			"operation" => operation.to_owned(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (operation, outcome);
	}
}

/// Counts one retry scheduled by `stage`.
pub fn record_retry(stage: &'static str, attempt: u32, delay: StdDuration) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!("mashery_transport_retry_total", "stage" => stage).increment(1);
	}

	#[cfg(feature = "tracing")]
	{
		tracing::warn!(stage, attempt, delay_ms = delay.as_millis() as u64, "Retrying call.");
	}

	#[cfg(not(any(feature = "metrics", feature = "tracing")))]
	{
		let _ = (stage, attempt, delay);
	}
}

/// Records a non-zero delay imposed by the admission controller.
pub fn record_admission_delay(delay: StdDuration) {
	#[cfg(feature = "metrics")]
	{
		metrics::histogram!("mashery_transport_admission_delay_seconds").record(delay.as_secs_f64());
	}

	#[cfg(feature = "tracing")]
	{
		tracing::debug!(delay_ms = delay.as_millis() as u64, "Admission controller delayed call.");
	}

	#[cfg(not(any(feature = "metrics", feature = "tracing")))]
	{
		let _ = delay;
	}
}

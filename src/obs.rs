//! Optional observability helpers for transport calls.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `mashery_transport.call` with the
//!   `operation` (method + path) and `stage` fields, plus `warn!` events for every retry.
//! - Enable `metrics` to increment `mashery_transport_call_total` (labeled by `operation` and
//!   `outcome`) and `mashery_transport_retry_total` (labeled by `stage`), and to record admission
//!   delays in the `mashery_transport_admission_delay_seconds` histogram.

mod metrics;
mod tracing;

pub use self::{metrics::*, tracing::*};

// self
use crate::_prelude::*;

/// Outcome labels recorded for each call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallOutcome {
	/// Entry into the pipeline.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl CallOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallOutcome::Attempt => "attempt",
			CallOutcome::Success => "success",
			CallOutcome::Failure => "failure",
		}
	}
}
impl Display for CallOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

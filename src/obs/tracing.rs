// self
use crate::_prelude::*;

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type InstrumentedCall<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type InstrumentedCall<F> = F;

/// Span wrapping one transport call.
#[derive(Clone, Debug)]
pub struct CallSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl CallSpan {
	/// Creates a span tagged with the operation label and the call site.
	pub fn new(operation: &str, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("mashery_transport.call", operation, stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (operation, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> InstrumentedCall<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Logs a successful token refresh.
pub fn log_refresh_success(expires_in: Duration) {
	#[cfg(feature = "tracing")]
	{
		tracing::info!(expires_in_secs = expires_in.whole_seconds(), "Access token refreshed.");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = expires_in;
	}
}

/// Logs a token refresh failure that stopped the background loop.
pub fn log_refresh_failure(error: &dyn Display) {
	#[cfg(feature = "tracing")]
	{
		tracing::warn!(error = %error, "Access token refresh failed; background refresh stopped.");
	}
	#[cfg(not(feature = "tracing"))]
	{
		let _ = error;
	}
}

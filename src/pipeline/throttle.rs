// self
use crate::{
	_prelude::*,
	pipeline::{CallContext, Next, PipelineFuture, PipelineRequest, Stage, sleep_or_cancel},
	transport::Transport,
};

/// Waits for the admission controller's slot before forwarding the call.
///
/// The wait is abandoned with [`Error::Cancelled`] as soon as the call is cancelled.
#[derive(Clone, Copy, Debug, Default)]
pub struct Throttle;
impl Stage for Throttle {
	fn name(&self) -> &'static str {
		"throttle"
	}

	fn handle<'a>(
		&'a self,
		ctx: &'a CallContext,
		transport: &'a Transport,
		request: PipelineRequest,
		next: Next<'a>,
	) -> PipelineFuture<'a> {
		Box::pin(async move {
			let delay = transport.admission().delay_before_call();

			sleep_or_cancel(ctx, delay).await?;

			next.run(ctx, transport, request).await
		})
	}
}

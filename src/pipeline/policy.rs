// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	oauth::http::StatusCode,
	obs,
	pipeline::{CallContext, Next, PipelineFuture, PipelineRequest, Stage, sleep_or_cancel},
	transport::Transport,
};

/// Turns a 404 into [`Error::NotFound`] when the call opted into strict semantics.
#[derive(Clone, Copy, Debug, Default)]
pub struct ErrorOn404;
impl Stage for ErrorOn404 {
	fn name(&self) -> &'static str {
		"error_on_404"
	}

	fn handle<'a>(
		&'a self,
		ctx: &'a CallContext,
		transport: &'a Transport,
		request: PipelineRequest,
		next: Next<'a>,
	) -> PipelineFuture<'a> {
		Box::pin(async move {
			let path = request.path.clone();
			let response = next.run(ctx, transport, request).await?;

			if ctx.options().error_on_404 && response.status() == StatusCode::NOT_FOUND {
				return Err(Error::NotFound { path });
			}

			Ok(response)
		})
	}
}

/// Retries 400 responses for calls that opted in; some validation failures are write races.
///
/// The final 400 is handed back unchanged so outer stages can decode the validation payload.
#[derive(Clone, Copy, Debug)]
pub struct RetryOn400 {
	max_attempts: u32,
	unit: StdDuration,
}
impl RetryOn400 {
	/// Default attempt budget.
	pub const DEFAULT_ATTEMPTS: u32 = 5;

	/// Creates the stage with the default attempt budget.
	pub fn new(unit: StdDuration) -> Self {
		Self { max_attempts: Self::DEFAULT_ATTEMPTS, unit }
	}

	/// Overrides the attempt budget (at least one attempt is always made).
	pub fn with_max_attempts(mut self, attempts: u32) -> Self {
		self.max_attempts = attempts.max(1);

		self
	}

	/// Delay applied after the zero-based `attempt` was rejected.
	pub fn delay_for(&self, attempt: u32) -> StdDuration {
		self.unit.saturating_mul(attempt.saturating_add(3))
	}
}
impl Stage for RetryOn400 {
	fn name(&self) -> &'static str {
		"retry_on_400"
	}

	fn handle<'a>(
		&'a self,
		ctx: &'a CallContext,
		transport: &'a Transport,
		request: PipelineRequest,
		next: Next<'a>,
	) -> PipelineFuture<'a> {
		Box::pin(async move {
			if !ctx.options().retry_on_400 {
				return next.run(ctx, transport, request).await;
			}

			let mut attempt = 0;

			loop {
				let response = next.run(ctx, transport, request.clone()).await?;

				if response.status() != StatusCode::BAD_REQUEST || attempt + 1 >= self.max_attempts {
					return Ok(response);
				}

				let delay = self.delay_for(attempt);

				obs::record_retry(self.name(), attempt + 1, delay);
				sleep_or_cancel(ctx, delay).await?;

				attempt += 1;
			}
		})
	}
}

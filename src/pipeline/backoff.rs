// std
use std::time::Duration as StdDuration;
// self
use crate::{
	_prelude::*,
	obs,
	pipeline::{
		CallContext, Next, OVER_QPS_CODE, OVER_RATE_CODE, PipelineFuture, PipelineRequest, Stage,
		forbidden_code, sleep_or_cancel,
	},
	transport::Transport,
};

/// Retries transient per-second QPS violations with a linearly growing delay.
///
/// Attempt `n` (zero-based) that comes back as a 403 with [`OVER_QPS_CODE`] waits
/// `(1 + n) * unit` before the next attempt. Any other outcome, error or not, is returned as is.
#[derive(Clone, Copy, Debug)]
pub struct BackoffOnOverQps {
	max_attempts: u32,
	unit: StdDuration,
}
impl BackoffOnOverQps {
	/// Default attempt budget.
	pub const DEFAULT_ATTEMPTS: u32 = 10;

	/// Creates the stage with the default attempt budget.
	pub fn new(unit: StdDuration) -> Self {
		Self { max_attempts: Self::DEFAULT_ATTEMPTS, unit }
	}

	/// Overrides the attempt budget (at least one attempt is always made).
	pub fn with_max_attempts(mut self, attempts: u32) -> Self {
		self.max_attempts = attempts.max(1);

		self
	}

	/// Delay applied after the zero-based `attempt` was throttled.
	pub fn delay_for(&self, attempt: u32) -> StdDuration {
		self.unit.saturating_mul(attempt.saturating_add(1))
	}
}
impl Stage for BackoffOnOverQps {
	fn name(&self) -> &'static str {
		"backoff_on_over_qps"
	}

	fn handle<'a>(
		&'a self,
		ctx: &'a CallContext,
		transport: &'a Transport,
		request: PipelineRequest,
		next: Next<'a>,
	) -> PipelineFuture<'a> {
		Box::pin(async move {
			for attempt in 0..self.max_attempts {
				let response = next.run(ctx, transport, request.clone()).await?;

				if forbidden_code(&response) != Some(OVER_QPS_CODE) {
					return Ok(response);
				}
				if attempt + 1 == self.max_attempts {
					break;
				}

				let delay = self.delay_for(attempt);

				obs::record_retry(self.name(), attempt + 1, delay);
				sleep_or_cancel(ctx, delay).await?;
			}

			Err(Error::RetriesExhausted { stage: self.name(), attempts: self.max_attempts })
		})
	}
}

/// Converts hard quota violations into [`Error::OverRate`] so nothing retries them.
#[derive(Clone, Copy, Debug, Default)]
pub struct BreakOnOverRate;
impl Stage for BreakOnOverRate {
	fn name(&self) -> &'static str {
		"break_on_over_rate"
	}

	fn handle<'a>(
		&'a self,
		ctx: &'a CallContext,
		transport: &'a Transport,
		request: PipelineRequest,
		next: Next<'a>,
	) -> PipelineFuture<'a> {
		Box::pin(async move {
			let response = next.run(ctx, transport, request).await?;

			match forbidden_code(&response) {
				Some(code) if code == OVER_RATE_CODE =>
					Err(Error::OverRate { code: code.to_owned() }),
				_ => Ok(response),
			}
		})
	}
}

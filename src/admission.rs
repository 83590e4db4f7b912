//! QPS admission control for outbound backend calls.
//!
//! [`AdmissionController`] plans calls against the wall-clock second in which they are expected
//! to *land* at the backend (now plus the estimated network latency) and hands back the delay a
//! caller must wait before sending. The controller never sleeps itself: the lock is held only
//! for the window arithmetic, and the caller awaits the returned delay.

// std
use std::time::Duration as StdDuration;
// self
use crate::{_prelude::*, error::ConfigError, obs};

/// Call allocation for the second currently being planned.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RateWindow {
	/// Epoch second the window plans calls for.
	pub planned_second: i64,
	/// Calls already admitted into `planned_second`.
	pub allocated_calls: u32,
	/// Ceiling on calls per second.
	pub max_qps: u32,
}

/// Mutex-serialized rate limiter shared by every caller of one transport.
#[derive(Debug)]
pub struct AdmissionController {
	window: Mutex<RateWindow>,
	network_latency: Duration,
}
impl AdmissionController {
	/// Creates a controller admitting at most `max_qps` calls per second.
	pub fn new(max_qps: u32) -> Result<Self, ConfigError> {
		if max_qps == 0 {
			return Err(ConfigError::ZeroQps);
		}

		Ok(Self {
			window: Mutex::new(RateWindow { planned_second: 0, allocated_calls: 0, max_qps }),
			network_latency: Duration::ZERO,
		})
	}

	/// Sets the estimated one-way network latency added to "now" when planning.
	pub fn with_network_latency(mut self, latency: Duration) -> Self {
		self.network_latency = if latency.is_negative() { Duration::ZERO } else { latency };

		self
	}

	/// Returns the configured ceiling.
	pub fn max_qps(&self) -> u32 {
		self.window.lock().max_qps
	}

	/// Returns a copy of the current window.
	pub fn window(&self) -> RateWindow {
		*self.window.lock()
	}

	/// Reserves a slot for the next call and returns how long the caller must wait first.
	pub fn delay_before_call(&self) -> StdDuration {
		self.delay_before_call_at(OffsetDateTime::now_utc())
	}

	/// Same as [`delay_before_call`](Self::delay_before_call) with an explicit "now".
	pub fn delay_before_call_at(&self, now: OffsetDateTime) -> StdDuration {
		let next_serv_second = (now + self.network_latency).unix_timestamp();
		let mut window = self.window.lock();

		if next_serv_second > window.planned_second {
			window.planned_second = next_serv_second;
			window.allocated_calls = 1;

			return StdDuration::ZERO;
		}
		if next_serv_second == window.planned_second && window.allocated_calls < window.max_qps {
			window.allocated_calls += 1;

			return StdDuration::ZERO;
		}

		let mut wait = window.planned_second - next_serv_second;

		if window.allocated_calls < window.max_qps {
			window.allocated_calls += 1;
		} else {
			window.planned_second += 1;
			window.allocated_calls = 1;
			wait += 1;
		}

		drop(window);

		let delay = StdDuration::from_secs(wait.unsigned_abs());

		if !delay.is_zero() {
			obs::record_admission_delay(delay);
		}

		delay
	}
}

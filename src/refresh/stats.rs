//! Bookkeeping of background and on-demand refreshes.

// self
use crate::_prelude::*;

/// Point-in-time view of a [`TokenManager`](super::TokenManager)'s refresh history.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RefreshStats {
	/// Refresh exchanges started.
	pub attempts: u64,
	/// Refreshes that installed a new record.
	pub successes: u64,
	/// Refreshes that failed.
	pub failures: u64,
	/// Failures since the last success; a non-zero value means the loop has stopped.
	pub consecutive_failures: u32,
	/// When the most recent refresh installed its record.
	pub last_refreshed_at: Option<OffsetDateTime>,
	/// When the most recent refresh failed.
	pub last_failed_at: Option<OffsetDateTime>,
}

#[derive(Debug, Default)]
pub(crate) struct RefreshLedger(Mutex<RefreshStats>);
impl RefreshLedger {
	pub(crate) fn snapshot(&self) -> RefreshStats {
		*self.0.lock()
	}

	pub(crate) fn started(&self) {
		self.0.lock().attempts += 1;
	}

	pub(crate) fn succeeded(&self, at: OffsetDateTime) {
		let mut stats = self.0.lock();

		stats.successes += 1;
		stats.consecutive_failures = 0;
		stats.last_refreshed_at = Some(at);
	}

	pub(crate) fn failed(&self, at: OffsetDateTime) {
		let mut stats = self.0.lock();

		stats.failures += 1;
		stats.consecutive_failures = stats.consecutive_failures.saturating_add(1);
		stats.last_failed_at = Some(at);
	}
}

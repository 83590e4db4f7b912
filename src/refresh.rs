//! Access-token lifecycle: initial login, cached reads, and proactive background refresh.
//!
//! [`TokenManager`] owns the current [`TokenRecord`] and, once [`TokenManager::ensure_refresh`]
//! is called, one background task that sleeps until `expires_at - refresh_lead` and then
//! exchanges the refresh token. The lead is capped at a tenth of the token lifetime. The loop state is an explicit value behind a mutex, so starting
//! and stopping are serialized even when several tasks share the manager.
//!
//! A failed refresh ends the loop instead of retrying; the next [`TokenManager::access_token`]
//! call reports the expired token once the safety margin passes and the owner re-authenticates.

mod stats;

pub use stats::RefreshStats;

// std
use std::{sync::Weak, time::Duration as StdDuration};
// crates.io
use tokio::{sync::oneshot, task::JoinHandle};
// self
use crate::{
	_prelude::*,
	auth::{TokenRecord, TokenSecret},
	error::TokenError,
	oauth::TokenExchange,
	obs,
	refresh::stats::RefreshLedger,
};

/// Callback invoked with every newly installed record (for example to persist it).
pub type RefreshCallback = Arc<dyn Fn(&TokenRecord) + Send + Sync>;

/// Caches the current token and keeps it fresh in the background.
pub struct TokenManager {
	exchange: Arc<dyn TokenExchange>,
	record: RwLock<Option<TokenRecord>>,
	refresh_lead: Duration,
	on_refresh: Option<RefreshCallback>,
	state: Mutex<LoopState>,
	stats: RefreshLedger,
}
impl TokenManager {
	/// Default time before expiry at which the background loop refreshes.
	pub const DEFAULT_REFRESH_LEAD: Duration = Duration::minutes(5);

	/// Creates a manager without a cached token.
	pub fn new(exchange: Arc<dyn TokenExchange>) -> Self {
		Self {
			exchange,
			record: RwLock::new(None),
			refresh_lead: Self::DEFAULT_REFRESH_LEAD,
			on_refresh: None,
			state: Mutex::new(LoopState::Idle),
			stats: RefreshLedger::default(),
		}
	}

	/// Seeds the cache with a previously persisted record.
	pub fn with_record(self, record: TokenRecord) -> Self {
		*self.record.write() = Some(record);

		self
	}

	/// Overrides how long before expiry the background loop refreshes.
	pub fn with_refresh_lead(mut self, lead: Duration) -> Self {
		self.refresh_lead = lead;

		self
	}

	/// Registers a callback invoked after every login or refresh.
	pub fn with_on_refresh(mut self, callback: impl Fn(&TokenRecord) + Send + Sync + 'static) -> Self {
		self.on_refresh = Some(Arc::new(callback));

		self
	}

	/// Logs in and installs the resulting record, replacing any cached one.
	pub async fn authenticate(&self) -> Result<TokenRecord> {
		let record = self.exchange.authenticate().await?;

		self.install(record.clone());

		Ok(record)
	}

	/// Returns the cached bearer token if it is still within its safety margin.
	pub fn access_token(&self) -> Result<TokenSecret> {
		let guard = self.record.read();
		let record = guard.as_ref().ok_or(TokenError::Missing)?;

		if record.is_expired() {
			return Err(TokenError::Expired.into());
		}

		Ok(record.access_token.clone())
	}

	/// Returns a copy of the cached record.
	pub fn current(&self) -> Option<TokenRecord> {
		self.record.read().clone()
	}

	/// Snapshot of the refresh history.
	pub fn stats(&self) -> RefreshStats {
		self.stats.snapshot()
	}

	/// Exchanges the cached refresh token right away and installs the new record.
	pub async fn refresh(&self) -> Result<TokenRecord> {
		self.stats.started();

		let result = async {
			let refresh_token = self
				.current()
				.and_then(|record| record.refresh_token)
				.ok_or(TokenError::MissingRefreshToken)?;

			self.exchange.refresh(&refresh_token).await
		}
		.await;

		match result {
			Ok(record) => {
				self.stats.succeeded(OffsetDateTime::now_utc());
				self.install(record.clone());
				obs::log_refresh_success(record.expires_in);

				Ok(record)
			},
			Err(err) => {
				self.stats.failed(OffsetDateTime::now_utc());
				obs::log_refresh_failure(&err);

				Err(err)
			},
		}
	}

	/// Starts the background refresh loop unless one is already running.
	///
	/// Must be called from within a Tokio runtime.
	pub fn ensure_refresh(self: &Arc<Self>) {
		let mut state = self.state.lock();

		if let LoopState::Refreshing { handle, .. } = &*state
			&& !handle.is_finished()
		{
			return;
		}

		let (stop, stop_rx) = oneshot::channel();
		let handle = tokio::spawn(refresh_loop(Arc::downgrade(self), stop_rx));

		*state = LoopState::Refreshing { stop, handle };
	}

	/// Returns `true` while the background loop is alive.
	pub fn is_refreshing(&self) -> bool {
		match &*self.state.lock() {
			LoopState::Idle => false,
			LoopState::Refreshing { handle, .. } => !handle.is_finished(),
		}
	}

	/// Stops the background loop and waits for it to exit; a no-op when idle.
	pub async fn close(&self) {
		let state = std::mem::replace(&mut *self.state.lock(), LoopState::Idle);

		if let LoopState::Refreshing { stop, handle } = state {
			let _ = stop.send(());
			let _ = handle.await;
		}
	}

	fn install(&self, record: TokenRecord) {
		*self.record.write() = Some(record.clone());

		if let Some(callback) = &self.on_refresh {
			callback(&record);
		}
	}
}
impl Debug for TokenManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenManager")
			.field("record", &*self.record.read())
			.field("refresh_lead", &self.refresh_lead)
			.field("refreshing", &self.is_refreshing())
			.field("stats", &self.stats.snapshot())
			.finish_non_exhaustive()
	}
}

enum LoopState {
	Idle,
	Refreshing { stop: oneshot::Sender<()>, handle: JoinHandle<()> },
}

async fn refresh_loop(manager: Weak<TokenManager>, mut stop: oneshot::Receiver<()>) {
	loop {
		let Some(due) = manager.upgrade().and_then(|manager| {
			let record = manager.current()?;

			record.refresh_token.as_ref()?;

			Some(record.refresh_due_in(manager.refresh_lead, OffsetDateTime::now_utc()))
		}) else {
			return;
		};
		let sleep = StdDuration::try_from(due).unwrap_or_default();

		tokio::select! {
			_ = &mut stop => return,
			_ = tokio::time::sleep(sleep) => {},
		}

		let Some(manager) = manager.upgrade() else {
			return;
		};

		if manager.refresh().await.is_err() {
			return;
		}
	}
}

use crate::sync::events::{ProgressSink, TracingProgress};
use crate::sync::progress_tracker::SyncProgressTracker;
use crate::sync::types::SyncError;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Everything a sync stage needs besides its inputs: where to report progress, whether to stop,
/// and where to accumulate failures.
///
/// Cloning is cheap and clones share the token and the tracker, so nested paginations see the
/// same cancellation and feed the same counters.
#[derive(Clone)]
pub struct SyncContext {
	progress: Arc<dyn ProgressSink>,
	cancel: CancellationToken,
	tracker: Arc<Mutex<SyncProgressTracker>>,
	debug: bool,
}

impl SyncContext {
	pub fn new(progress: Arc<dyn ProgressSink>, cancel: CancellationToken) -> Self {
		Self {
			progress,
			cancel,
			tracker: Arc::new(Mutex::new(SyncProgressTracker::new())),
			debug: false,
		}
	}

	/// Tracing sink and a fresh token.
	pub fn tracing() -> Self {
		Self::new(Arc::new(TracingProgress), CancellationToken::new())
	}

	/// Enable per-window messages.
	pub fn with_debug(mut self, debug: bool) -> Self {
		self.debug = debug;
		self
	}

	/// Coarse milestone, always reported.
	pub fn report(&self, percent: Option<f64>, message: &str) {
		if let Err(e) = self.progress.report(percent, message) {
			debug!("Progress sink {} rejected update: {}", self.progress.name(), e);
		}
	}

	/// Fine-grained message, reported only in debug mode.
	pub fn detail(&self, message: &str) {
		if self.debug {
			self.report(None, message);
		}
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	pub fn check_cancelled(&self) -> Result<(), SyncError> {
		if self.is_cancelled() {
			Err(SyncError::Cancelled)
		} else {
			Ok(())
		}
	}

	pub fn cancellation_token(&self) -> &CancellationToken {
		&self.cancel
	}

	/// Lock the shared tracker. Never held across an await point.
	pub fn tracker(&self) -> MutexGuard<'_, SyncProgressTracker> {
		self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::sync::events::ChannelProgress;

	#[test]
	fn details_are_dropped_unless_debug() {
		let (sink, mut receiver) = ChannelProgress::new();
		let ctx = SyncContext::new(Arc::new(sink), CancellationToken::new());
		ctx.detail("window 1");
		ctx.report(Some(100.0), "done");
		assert_eq!(receiver.try_recv().unwrap().message, "done");
		assert!(receiver.try_recv().is_err());

		let ctx = ctx.with_debug(true);
		ctx.detail("window 2");
		assert_eq!(receiver.try_recv().unwrap().message, "window 2");
	}

	#[test]
	fn clones_share_cancellation_and_tracker() {
		let ctx = SyncContext::tracing();
		let nested = ctx.clone();
		nested.tracker().record_records(5);
		ctx.cancellation_token().cancel();

		assert!(nested.is_cancelled());
		assert!(matches!(nested.check_cancelled(), Err(SyncError::Cancelled)));
		assert_eq!(ctx.tracker().get_stats().records_fetched, 5);
	}
}

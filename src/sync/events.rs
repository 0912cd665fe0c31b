//! Progress reporting for ledger synchronization.
//!
//! Sync stages report progress through a `ProgressSink`: an optional percentage plus a message
//! (`None` means the message is informational). Sinks are decoupled from the sync logic so the
//! same run can log through tracing, stream updates to a UI over a channel, or both via the
//! `ProgressDispatcher`.

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// One progress update.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub percent: Option<f64>,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ProgressError {
    #[error("Progress receiver dropped")]
    ChannelClosed,
}

/// Receiver of progress updates.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: Option<f64>, message: &str) -> Result<(), ProgressError>;

    /// Name used when a sink fails.
    fn name(&self) -> &'static str;
}

/// Logs progress through `tracing`.
#[derive(Debug, Clone, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, percent: Option<f64>, message: &str) -> Result<(), ProgressError> {
        match percent {
            Some(percent) => info!("[{:>5.1}%] {}", percent, message),
            None => info!("{}", message),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "TracingProgress"
    }
}

/// Forwards progress to an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelProgress {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgress {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelProgress {
    fn report(&self, percent: Option<f64>, message: &str) -> Result<(), ProgressError> {
        self.sender
            .send(ProgressEvent {
                percent,
                message: message.to_string(),
            })
            .map_err(|_| ProgressError::ChannelClosed)
    }

    fn name(&self) -> &'static str {
        "ChannelProgress"
    }
}

/// Fans progress out to several sinks.
///
/// Sinks are called in registration order. A failing sink is logged and does not stop the others.
#[derive(Clone, Default)]
pub struct ProgressDispatcher {
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl ProgressDispatcher {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn register_sink(&mut self, sink: Arc<dyn ProgressSink>) {
        self.sinks.push(sink);
    }
}

impl ProgressSink for ProgressDispatcher {
    fn report(&self, percent: Option<f64>, message: &str) -> Result<(), ProgressError> {
        for sink in &self.sinks {
            if let Err(e) = sink.report(percent, message) {
                error!("Sink {} failed to report progress: {}", sink.name(), e);
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "ProgressDispatcher"
    }
}

use std::sync::Arc;
use tokio::sync::watch;

use crate::utils::status_log::StatusLog;

/// Cloneable handle every stage reports through. The log itself lives inside
/// the watch channel, so subscribers always see a consistent snapshot.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    tx: Arc<watch::Sender<StatusLog>>,
}

impl StatusReporter {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = watch::channel(StatusLog::new(capacity));
        Self { tx: Arc::new(tx) }
    }

    /// Appends a message; subscribers are only woken when the log changed.
    pub fn report(&self, message: impl Into<String>) {
        let message = message.into();
        let changed = self.tx.send_if_modified(|log| log.append(message.clone()));
        if changed {
            tracing::debug!(status = %message, "status updated");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusLog> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.tx.borrow().to_vec()
    }
}

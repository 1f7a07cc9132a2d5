use crate::transition::errors::TransitionError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

/// Cancellation context of a single transition. Clones share the same state.
#[derive(Debug, Clone)]
pub struct TransitionCancel {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for TransitionCancel {
    fn default() -> Self {
        Self::new()
    }
}

impl TransitionCancel {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();
        if receiver.wait_for(|cancelled| *cancelled).await.is_err() {
            // we hold the sender, so the channel cannot close under us
            std::future::pending::<()>().await;
        }
    }

    /// Runs `future` unless the transition gets cancelled first.
    pub async fn guard<F: Future>(&self, future: F) -> Result<F::Output, TransitionError> {
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(TransitionError::Cancelled),
            output = future => Ok(output),
        }
    }
}

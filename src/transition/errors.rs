use crate::transition::loading_state::LoadingPhase;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransitionError {
    #[error("No target scene address has been given")]
    EmptyTarget,

    #[error("Expected the scene loader to be {expected:?}, but it is {actual:?}")]
    InvalidPhase {
        expected: LoadingPhase,
        actual: LoadingPhase,
    },

    #[error("The scene loader has not been initialized with a target scene")]
    NotInitialized,

    #[error("Querying the download size of {address} failed: {reason:#}")]
    SizeQuery { address: String, reason: anyhow::Error },

    #[error("Writing the bridge data failed: {reason:#}")]
    Bridge { reason: anyhow::Error },

    #[error("Fading failed: {reason:#}")]
    Fade { reason: anyhow::Error },

    #[error("Loading {address} failed: {reason}")]
    LoadFailed { address: String, reason: String },

    #[error("Activating {address} failed: {reason:#}")]
    Activation { address: String, reason: anyhow::Error },

    #[error("Loading {address} did not finish within {limit:?}")]
    TimedOut { address: String, limit: Duration },

    #[error("The transition has been cancelled")]
    Cancelled,

    #[error("Background task failed: {0}")]
    BackgroundTask(String),
}

impl TransitionError {
    pub fn fade(reason: anyhow::Error) -> Self {
        TransitionError::Fade { reason }
    }
}

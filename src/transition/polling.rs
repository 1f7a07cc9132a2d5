use crate::io::common::loader::{DownloadStatus, LoadOperation, OperationStatus};
use crate::settings::TransitionSettings;
use crate::transition::cancel::TransitionCancel;
use crate::transition::errors::TransitionError;
use crate::util::next_tick;

/// Polls `operation` once per tick until it is done, handing every download status sample to
/// `on_sample`. Honours the cancellation and the optional maximum load duration.
pub async fn poll_operation<O, S>(
    address: &str,
    operation: &O,
    settings: &TransitionSettings,
    cancel: &TransitionCancel,
    on_sample: S,
) -> Result<(), TransitionError>
where
    O: LoadOperation,
    S: FnMut(DownloadStatus) + Send,
{
    let polling = poll_until_done(address, operation, settings, cancel, on_sample);
    match settings.max_load_duration {
        Some(limit) => tokio::time::timeout(limit, polling)
            .await
            .map_err(|_| TransitionError::TimedOut {
                address: address.to_string(),
                limit,
            })?,
        None => polling.await,
    }
}

async fn poll_until_done<O, S>(
    address: &str,
    operation: &O,
    settings: &TransitionSettings,
    cancel: &TransitionCancel,
    mut on_sample: S,
) -> Result<(), TransitionError>
where
    O: LoadOperation,
    S: FnMut(DownloadStatus) + Send,
{
    loop {
        match operation.status() {
            OperationStatus::Running => {}
            OperationStatus::Succeeded => return Ok(()),
            OperationStatus::Failed(reason) => {
                return Err(TransitionError::LoadFailed {
                    address: address.to_string(),
                    reason,
                });
            }
        }

        on_sample(operation.download_status());
        cancel.guard(next_tick(settings.tick_interval)).await?;
    }
}

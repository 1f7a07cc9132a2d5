use crate::util::clamp_progress;
use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Arc;

/// Opaque token for an outstanding scene load, has to be handed back to [`HandleReleaser::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoadHandle(pub u64);

impl Display for LoadHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Replaces every currently loaded scene.
    Single,
    /// Loads next to the currently active scene.
    Additive,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DownloadStatus {
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    /// As reported by the provider, may overshoot or be NaN. See [`DownloadStatus::clamped_percent`]
    pub percent: f32,
}

impl DownloadStatus {
    #[inline]
    pub fn clamped_percent(&self) -> f32 {
        clamp_progress(self.percent)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    Running,
    Succeeded,
    Failed(String),
}

impl OperationStatus {
    #[inline]
    pub fn is_done(&self) -> bool {
        !matches!(self, OperationStatus::Running)
    }
}

/// The controller of a scene that has been activated. It reports the loading of its own dependencies
/// (everything the scene pulls in after it became active), which the loader has no insight into.
pub trait ActiveScene: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn dependencies_progress(&self) -> f32;

    fn dependencies_downloaded_bytes(&self) -> u64;

    fn dependencies_total_bytes(&self) -> u64 {
        0
    }
}

pub trait LoadOperation: Send + Sync + 'static {
    type Scene: ActiveScene;

    fn handle(&self) -> LoadHandle;

    fn status(&self) -> OperationStatus;

    fn is_done(&self) -> bool {
        self.status().is_done()
    }

    fn download_status(&self) -> DownloadStatus;

    /// Deferred activation of a scene that has been loaded with `activate_on_load = false`.
    fn activate(&self) -> impl Future<Output = anyhow::Result<Arc<Self::Scene>>> + Send;
}

pub trait HandleReleaser: Send + Sync + 'static {
    fn release(&self, handle: LoadHandle) -> anyhow::Result<()>;
}

pub trait SceneProvider: HandleReleaser {
    type Operation: LoadOperation;

    /// Number of bytes that still have to be downloaded for the scene and all of its bundles.
    fn query_download_size(&self, address: &str) -> impl Future<Output = anyhow::Result<u64>> + Send;

    fn load_scene(&self, address: &str, mode: LoadMode, activate_on_load: bool) -> anyhow::Result<Self::Operation>;
}

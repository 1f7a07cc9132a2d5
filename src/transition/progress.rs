use crate::util::clamp_progress;
use arc_swap::ArcSwap;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ProgressSnapshot {
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    /// Always within [0, 1].
    pub progress: f32,
}

impl ProgressSnapshot {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0
    }
}

/// Progress of one loading phase. Written by a single task, read lock-free by any number of pollers.
/// Neither the progress nor the downloaded bytes ever go backwards.
#[derive(Debug, Default)]
pub struct ProgressCell {
    inner: ArcSwap<ProgressSnapshot>,
}

impl ProgressCell {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn load(&self) -> ProgressSnapshot {
        **self.inner.load()
    }

    pub fn set_total(&self, total_bytes: u64) {
        self.inner.rcu(|current| ProgressSnapshot {
            total_bytes,
            ..**current
        });
    }

    pub fn record(&self, downloaded_bytes: u64, progress: f32) {
        let progress = clamp_progress(progress);
        self.inner.rcu(|current| ProgressSnapshot {
            total_bytes: current.total_bytes,
            downloaded_bytes: current.downloaded_bytes.max(downloaded_bytes),
            progress: current.progress.max(progress),
        });
    }

    /// Like [`ProgressCell::record`], but the total is reported by the source as well.
    pub fn mirror(&self, total_bytes: u64, downloaded_bytes: u64, progress: f32) {
        let progress = clamp_progress(progress);
        self.inner.rcu(|current| ProgressSnapshot {
            total_bytes,
            downloaded_bytes: current.downloaded_bytes.max(downloaded_bytes),
            progress: current.progress.max(progress),
        });
    }

    /// Closes whatever gap the last sample left: everything is downloaded.
    pub fn complete(&self) {
        self.inner.rcu(|current| ProgressSnapshot {
            total_bytes: current.total_bytes,
            downloaded_bytes: current.total_bytes.max(current.downloaded_bytes),
            progress: 1.0,
        });
    }
}

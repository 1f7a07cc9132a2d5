use crate::io::common::loader::{ActiveScene, LoadMode, LoadOperation, SceneProvider};
use crate::rendering::fade::Fader;
use crate::rendering::progress_view::ProgressBar;
use crate::settings::TransitionSettings;
use crate::transition::cancel::TransitionCancel;
use crate::transition::display::ProgressSource;
use crate::transition::errors::TransitionError;
use crate::transition::polling::poll_operation;
use crate::transition::progress::{ProgressCell, ProgressSnapshot};
use crate::transition::registry::ResourceRegistry;
use crate::transition::signal::{Signal, SubscriptionId};
use crate::util::{clamp_progress, lock, next_tick};
use log::{debug, error, info, trace};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadingPhase {
    Idle,
    SizeQueried,
    PrimaryLoading,
    PrimaryLoaded,
    /// Loading was faster than the minimum loading time, waiting out the difference.
    Pacing,
    Activated,
    DependenciesLoading,
    Complete,
    Failed,
}

type SceneOf<P> = <<P as SceneProvider>::Operation as LoadOperation>::Scene;

/// Loads one target scene next to the loading scene, paces the loading screen, activates the target
/// and afterwards follows the loading of the target's own dependencies.
///
/// One instance per transition. Progress is written by the driving task only and can be read
/// at any time through [`SceneLoadingModel::primary_progress`] and
/// [`SceneLoadingModel::dependencies_progress`]; the signals tell when reading starts to make sense.
pub struct SceneLoadingModel<P: SceneProvider, F: Fader> {
    provider: Arc<P>,
    fader: Arc<F>,
    settings: TransitionSettings,
    target: OnceLock<String>,
    phase: watch::Sender<LoadingPhase>,
    primary: ProgressCell,
    dependencies: ProgressCell,
    progress_readable: Signal,
    dependencies_progress_readable: Signal,
    next_scene_loaded: Signal,
    /// Held between the end of the download and the activation.
    loaded_operation: Mutex<Option<P::Operation>>,
    activated_scene: OnceLock<Arc<SceneOf<P>>>,
    started_at: Mutex<Option<Instant>>,
    finished_at: Mutex<Option<Instant>>,
    cancel: TransitionCancel,
    registry: ResourceRegistry,
}

impl<P: SceneProvider, F: Fader> SceneLoadingModel<P, F> {
    pub fn new(provider: Arc<P>, fader: Arc<F>, settings: TransitionSettings) -> Self {
        let (phase, _) = watch::channel(LoadingPhase::Idle);
        Self {
            registry: ResourceRegistry::new(std::any::type_name::<Self>(), provider.clone()),
            provider,
            fader,
            settings,
            target: OnceLock::new(),
            phase,
            primary: ProgressCell::new(),
            dependencies: ProgressCell::new(),
            progress_readable: Signal::new("progress readable"),
            dependencies_progress_readable: Signal::new("dependencies progress readable"),
            next_scene_loaded: Signal::new("next scene loaded"),
            loaded_operation: Mutex::new(None),
            activated_scene: OnceLock::new(),
            started_at: Mutex::new(None),
            finished_at: Mutex::new(None),
            cancel: TransitionCancel::new(),
        }
    }

    pub fn target_scene(&self) -> Option<&str> {
        self.target.get().map(String::as_str)
    }

    pub fn phase(&self) -> LoadingPhase {
        *self.phase.borrow()
    }

    pub fn phase_watcher(&self) -> watch::Receiver<LoadingPhase> {
        self.phase.subscribe()
    }

    pub fn primary_progress(&self) -> ProgressSnapshot {
        self.primary.load()
    }

    pub fn dependencies_progress(&self) -> ProgressSnapshot {
        self.dependencies.load()
    }

    pub fn activated_scene(&self) -> Option<Arc<SceneOf<P>>> {
        self.activated_scene.get().cloned()
    }

    /// Time since [`SceneLoadingModel::start_loading`] has been called, frozen once it returned.
    pub fn elapsed(&self) -> Option<Duration> {
        let started_at = (*lock(&self.started_at))?;
        let finished_at = (*lock(&self.finished_at)).unwrap_or_else(Instant::now);
        Some(finished_at.duration_since(started_at))
    }

    pub fn cancellation(&self) -> TransitionCancel {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        info!("Cancelling the transition to {:?}", self.target_scene());
        self.cancel.cancel();
    }

    pub fn subscribe_progress_readable<C: Fn() + Send + Sync + 'static>(&self, callback: C) -> SubscriptionId {
        self.progress_readable.subscribe(callback)
    }

    pub fn unsubscribe_progress_readable(&self, id: SubscriptionId) -> bool {
        self.progress_readable.unsubscribe(id)
    }

    pub fn subscribe_dependencies_progress_readable<C: Fn() + Send + Sync + 'static>(
        &self,
        callback: C,
    ) -> SubscriptionId {
        self.dependencies_progress_readable.subscribe(callback)
    }

    pub fn unsubscribe_dependencies_progress_readable(&self, id: SubscriptionId) -> bool {
        self.dependencies_progress_readable.unsubscribe(id)
    }

    pub fn subscribe_next_scene_loaded<C: Fn() + Send + Sync + 'static>(&self, callback: C) -> SubscriptionId {
        self.next_scene_loaded.subscribe(callback)
    }

    pub fn unsubscribe_next_scene_loaded(&self, id: SubscriptionId) -> bool {
        self.next_scene_loaded.unsubscribe(id)
    }

    /// Queries how much has to be downloaded for `target`. Nothing changes if this fails.
    pub async fn initialize(&self, target: &str) -> Result<u64, TransitionError> {
        info!("Initialize {}", target);
        if target.is_empty() {
            error!("Cannot initialize the scene loader without a target scene address");
            return Err(TransitionError::EmptyTarget);
        }
        self.ensure_running()?;
        self.expect_phase(LoadingPhase::Idle)?;

        let started = Instant::now();
        let total_bytes = self
            .cancel
            .guard(self.provider.query_download_size(target))
            .await?
            .map_err(|reason| {
                error!("Querying the download size of {} failed: {:#}", target, reason);
                TransitionError::SizeQuery {
                    address: target.to_string(),
                    reason,
                }
            })?;

        if self.target.set(target.to_string()).is_err() {
            return Err(TransitionError::InvalidPhase {
                expected: LoadingPhase::Idle,
                actual: self.phase(),
            });
        }
        self.primary.set_total(total_bytes);
        self.advance(LoadingPhase::Idle, LoadingPhase::SizeQueried)?;

        info!(
            "Initialized {} ({} bytes to download) [{}ms]",
            target,
            total_bytes,
            started.elapsed().as_millis()
        );
        Ok(total_bytes)
    }

    /// Downloads, paces and activates the target. Returns once the target is active, the dependency
    /// tracking keeps running in the background, see [`SceneLoadingModel::dependencies_loaded`].
    pub async fn start_loading(self: &Arc<Self>) -> Result<(), TransitionError> {
        self.ensure_running()?;
        self.advance(LoadingPhase::SizeQueried, LoadingPhase::PrimaryLoading)?;
        *lock(&self.started_at) = Some(Instant::now());

        let result = self.load_pace_and_activate().await;
        *lock(&self.finished_at) = Some(Instant::now());

        match &result {
            Ok(()) => info!(
                "Transition to {} done [{}ms]",
                self.target_scene().unwrap_or_default(),
                self.elapsed().unwrap_or_default().as_millis()
            ),
            Err(err) => {
                error!("Transition failed: {}", err);
                self.phase.send_replace(LoadingPhase::Failed);
            }
        }
        result
    }

    async fn load_pace_and_activate(self: &Arc<Self>) -> Result<(), TransitionError> {
        self.progress_readable.emit();

        self.cancel
            .guard(self.fader.fade_out())
            .await?
            .map_err(TransitionError::fade)?;

        let load_time = self.load_and_read_progress().await?;

        if let Some(remaining) = self
            .settings
            .minimum_loading_time
            .checked_sub(load_time)
            .filter(|remaining| !remaining.is_zero())
        {
            self.advance(LoadingPhase::PrimaryLoaded, LoadingPhase::Pacing)?;
            info!(
                "Loading was too fast, waiting another {}ms",
                remaining.as_millis()
            );
            self.cancel.guard(tokio::time::sleep(remaining)).await?;
        }

        self.cancel
            .guard(self.fader.fade_in(false))
            .await?
            .map_err(TransitionError::fade)?;

        self.activate().await
    }

    /// Loads the target additively without activating it and mirrors the download status every tick.
    /// Returns how long the load took.
    pub async fn load_and_read_progress(&self) -> Result<Duration, TransitionError> {
        let target = self.target.get().ok_or(TransitionError::NotInitialized)?;
        if self.phase() != LoadingPhase::PrimaryLoading {
            self.advance(LoadingPhase::SizeQueried, LoadingPhase::PrimaryLoading)?;
        }
        info!("Loading {}", target);
        let started = Instant::now();

        let operation = self
            .provider
            .load_scene(target, LoadMode::Additive, false)
            .map_err(|reason| TransitionError::LoadFailed {
                address: target.clone(),
                reason: format!("{:#}", reason),
            })?;
        self.registry.register_handle(operation.handle());

        poll_operation(target, &operation, &self.settings, &self.cancel, |status| {
            trace!(
                "{}: {} bytes, {:.1}%",
                target,
                status.downloaded_bytes,
                status.percent * 100.0
            );
            self.primary
                .record(status.downloaded_bytes, status.clamped_percent());
        })
        .await?;

        let load_time = started.elapsed();
        self.primary.complete();
        *lock(&self.loaded_operation) = Some(operation);

        self.advance(LoadingPhase::PrimaryLoading, LoadingPhase::PrimaryLoaded)?;
        self.next_scene_loaded.emit();

        info!("Loaded {} [{}ms]", target, load_time.as_millis());
        Ok(load_time)
    }

    /// Activates the loaded target, takes over its controller and starts following its dependencies.
    pub async fn activate(self: &Arc<Self>) -> Result<(), TransitionError> {
        let target = self.target.get().ok_or(TransitionError::NotInitialized)?;
        let Some(operation) = lock(&self.loaded_operation).take() else {
            return Err(TransitionError::InvalidPhase {
                expected: LoadingPhase::PrimaryLoaded,
                actual: self.phase(),
            });
        };

        info!("Activating {}", target);
        let started = Instant::now();
        let scene = self
            .cancel
            .guard(operation.activate())
            .await?
            .map_err(|reason| TransitionError::Activation {
                address: target.clone(),
                reason,
            })?;

        if self.activated_scene.set(scene).is_err() {
            return Err(TransitionError::InvalidPhase {
                expected: LoadingPhase::PrimaryLoaded,
                actual: self.phase(),
            });
        }
        if self.advance(LoadingPhase::Pacing, LoadingPhase::Activated).is_err() {
            self.advance(LoadingPhase::PrimaryLoaded, LoadingPhase::Activated)?;
        }

        let model = Arc::clone(self);
        let tracking = tokio::spawn(async move {
            if let Err(err) = model.read_dependencies_progress().await {
                error!("Tracking the dependencies failed: {}", err);
                model.phase.send_replace(LoadingPhase::Failed);
            }
        });
        self.registry.register_disposable(tracking);
        self.dependencies_progress_readable.emit();

        info!(
            "Activated {} [{}ms]",
            target,
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// Mirrors the activated scene's self reported dependency progress every tick, until it's done.
    pub async fn read_dependencies_progress(&self) -> Result<(), TransitionError> {
        let scene = self.activated_scene().ok_or(TransitionError::InvalidPhase {
            expected: LoadingPhase::Activated,
            actual: self.phase(),
        })?;
        self.advance(LoadingPhase::Activated, LoadingPhase::DependenciesLoading)?;
        let started = Instant::now();

        loop {
            let progress = clamp_progress(scene.dependencies_progress());
            self.dependencies.mirror(
                scene.dependencies_total_bytes(),
                scene.dependencies_downloaded_bytes(),
                progress,
            );

            if progress >= 1.0 {
                break;
            }
            self.cancel
                .guard(next_tick(self.settings.tick_interval))
                .await?;
        }

        self.advance(LoadingPhase::DependenciesLoading, LoadingPhase::Complete)?;
        info!(
            "Dependencies of {} loaded [{}ms]",
            scene.name(),
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// Resolves once the dependencies of the activated scene are loaded or the transition failed.
    pub async fn dependencies_loaded(&self) -> Result<(), TransitionError> {
        let mut watcher = self.phase.subscribe();
        let phase = watcher
            .wait_for(|phase| matches!(phase, LoadingPhase::Complete | LoadingPhase::Failed))
            .await
            .map(|phase| *phase)
            .unwrap_or(LoadingPhase::Failed);

        if phase == LoadingPhase::Complete {
            Ok(())
        } else if self.cancel.is_cancelled() {
            Err(TransitionError::Cancelled)
        } else {
            Err(TransitionError::BackgroundTask(format!(
                "loading {:?} did not complete",
                self.target_scene()
            )))
        }
    }

    /// Cancels whatever is still running, releases the load handle and stops the dependency tracking.
    /// A transition that did not complete ends up `Failed`, so nobody keeps waiting for it.
    /// Safe to call more than once.
    pub fn release(&self) {
        self.cancel.cancel();
        self.registry.teardown();

        let aborted = self.phase.send_if_modified(|phase| {
            if matches!(phase, LoadingPhase::Complete | LoadingPhase::Failed) {
                false
            } else {
                *phase = LoadingPhase::Failed;
                true
            }
        });
        if aborted {
            info!("Released {:?} before it completed", self.target_scene());
        }
    }

    fn ensure_running(&self) -> Result<(), TransitionError> {
        if self.cancel.is_cancelled() {
            return Err(TransitionError::Cancelled);
        }
        Ok(())
    }

    fn expect_phase(&self, expected: LoadingPhase) -> Result<(), TransitionError> {
        let actual = self.phase();
        if actual != expected {
            return Err(TransitionError::InvalidPhase { expected, actual });
        }
        Ok(())
    }

    fn advance(&self, from: LoadingPhase, to: LoadingPhase) -> Result<(), TransitionError> {
        let mut actual = from;
        let advanced = self.phase.send_if_modified(|phase| {
            if *phase == from {
                *phase = to;
                true
            } else {
                actual = *phase;
                false
            }
        });

        if !advanced {
            return Err(TransitionError::InvalidPhase {
                expected: from,
                actual,
            });
        }
        debug!("{:?} -> {:?}", from, to);
        Ok(())
    }
}

impl<P: SceneProvider, F: Fader> ProgressSource for SceneLoadingModel<P, F> {
    fn scene_name(&self) -> &str {
        self.target_scene().unwrap_or_default()
    }

    fn progress(&self, bar: ProgressBar) -> ProgressSnapshot {
        match bar {
            ProgressBar::Scene => self.primary_progress(),
            ProgressBar::Dependencies => self.dependencies_progress(),
        }
    }

    fn is_aborted(&self) -> bool {
        self.phase() == LoadingPhase::Failed
    }
}

use crate::io::common::loader::SceneProvider;
use crate::rendering::fade::Fader;
use crate::rendering::progress_view::{ProgressBar, ProgressView};
use crate::transition::errors::TransitionError;
use crate::transition::loading_state::SceneLoadingModel;
use crate::transition::progress::ProgressSnapshot;
use crate::transition::signal::SubscriptionId;
use crate::util::{lock, next_tick};
use log::{debug, error, warn};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Anything the loading screen can render two progress bars from.
pub trait ProgressSource: Send + Sync + 'static {
    fn scene_name(&self) -> &str;

    fn progress(&self, bar: ProgressBar) -> ProgressSnapshot;

    /// Loops stop polling an aborted source, its progress will never complete.
    fn is_aborted(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BarFrame {
    pub info: String,
    pub value: f32,
    pub detail: String,
}

impl BarFrame {
    pub fn compose(bar: ProgressBar, scene: &str, snapshot: &ProgressSnapshot) -> Self {
        if snapshot.is_complete() {
            return Self {
                info: format!("{} loaded {}", bar.prefix(), scene),
                value: 1.0,
                detail: "Done".to_string(),
            };
        }

        Self {
            info: format!("{} loading {}...", bar.prefix(), scene),
            value: snapshot.progress,
            detail: format!(
                "{} / {} KB",
                snapshot.downloaded_bytes / 1024,
                snapshot.total_bytes / 1024
            ),
        }
    }

    pub fn render<V: ProgressView + ?Sized>(&self, bar: ProgressBar, view: &V) {
        view.set_info(bar, &self.info);
        view.set_value(bar, self.value);
        view.set_detail(bar, &self.detail);
    }
}

/// Renders `bar` once per tick until the source reports it complete (that frame is still rendered)
/// or aborted. Returns the number of rendered frames.
pub async fn display_progress<S, V>(bar: ProgressBar, source: &S, view: &V, tick_interval: Duration) -> usize
where
    S: ProgressSource + ?Sized,
    V: ProgressView + ?Sized,
{
    let mut frames = 0;
    loop {
        let snapshot = source.progress(bar);
        BarFrame::compose(bar, source.scene_name(), &snapshot).render(bar, view);
        frames += 1;

        if snapshot.is_complete() {
            debug!("Stop loading view ({})", bar);
            break;
        }
        if source.is_aborted() {
            warn!("{} of {} aborted, stop loading view", bar, source.scene_name());
            break;
        }
        next_tick(tick_interval).await;
    }
    frames
}

struct Subscriptions {
    progress: SubscriptionId,
    dependencies: SubscriptionId,
}

/// Drives the two progress bars of the loading screen from a [`SceneLoadingModel`]. Each bar starts
/// polling when the model signals that its progress became readable, never earlier.
pub struct ProgressDisplayDriver<P: SceneProvider, F: Fader, V: ProgressView> {
    model: Arc<SceneLoadingModel<P, F>>,
    view: Arc<V>,
    subscriptions: Mutex<Option<Subscriptions>>,
    tasks: Arc<Mutex<Vec<JoinHandle<usize>>>>,
}

impl<P: SceneProvider, F: Fader, V: ProgressView> ProgressDisplayDriver<P, F, V> {
    pub fn new(model: Arc<SceneLoadingModel<P, F>>, view: Arc<V>) -> Self {
        Self {
            model,
            view,
            subscriptions: Mutex::new(None),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Subscribes to the model. Attaching twice is a no-op.
    pub fn attach(&self, tick_interval: Duration) {
        let mut subscriptions = lock(&self.subscriptions);
        if subscriptions.is_some() {
            return;
        }

        let progress = self
            .model
            .subscribe_progress_readable(self.spawner(ProgressBar::Scene, tick_interval));
        let dependencies = self
            .model
            .subscribe_dependencies_progress_readable(self.spawner(ProgressBar::Dependencies, tick_interval));
        *subscriptions = Some(Subscriptions {
            progress,
            dependencies,
        });
    }

    /// The callbacks only hold weak references, the model owns its signals.
    fn spawner(&self, bar: ProgressBar, tick_interval: Duration) -> impl Fn() + Send + Sync + 'static {
        let model: Weak<SceneLoadingModel<P, F>> = Arc::downgrade(&self.model);
        let view = Arc::downgrade(&self.view);
        let tasks = Arc::downgrade(&self.tasks);

        move || {
            let (Some(model), Some(view), Some(tasks)) = (model.upgrade(), view.upgrade(), tasks.upgrade()) else {
                return;
            };

            let runtime = match Handle::try_current() {
                Ok(runtime) => runtime,
                Err(err) => {
                    error!("Cannot display the {} progress outside of a runtime: {}", bar, err);
                    return;
                }
            };

            let task = runtime.spawn(async move { display_progress(bar, &*model, &*view, tick_interval).await });
            lock(&tasks).push(task);
        }
    }

    pub fn is_attached(&self) -> bool {
        lock(&self.subscriptions).is_some()
    }

    /// Waits for every display loop started so far. Returns the number of frames they rendered.
    pub async fn finished(&self) -> Result<usize, TransitionError> {
        let tasks = std::mem::take(&mut *lock(&self.tasks));
        let mut frames = 0;
        for task in tasks {
            frames += task.await.map_err(|err| {
                if err.is_cancelled() {
                    TransitionError::Cancelled
                } else {
                    TransitionError::BackgroundTask(err.to_string())
                }
            })?;
        }
        Ok(frames)
    }

    /// Unsubscribes and aborts the running loops, e.g. when the view goes away.
    pub fn detach(&self) {
        if let Some(subscriptions) = lock(&self.subscriptions).take() {
            self.model
                .unsubscribe_progress_readable(subscriptions.progress);
            self.model
                .unsubscribe_dependencies_progress_readable(subscriptions.dependencies);
        }

        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

impl<P: SceneProvider, F: Fader, V: ProgressView> Drop for ProgressDisplayDriver<P, F, V> {
    fn drop(&mut self) {
        self.detach();
    }
}

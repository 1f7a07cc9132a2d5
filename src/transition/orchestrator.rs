use crate::io::common::bridge::{BridgeStore, SCENE_TO_LOAD_KEY};
use crate::io::common::loader::{LoadHandle, LoadMode, LoadOperation, SceneProvider};
use crate::rendering::fade::Fader;
use crate::settings::TransitionSettings;
use crate::transition::cancel::TransitionCancel;
use crate::transition::errors::TransitionError;
use crate::transition::polling::poll_operation;
use crate::transition::registry::ResourceRegistry;
use crate::util::lock;
use log::{debug, error, info, warn};
use std::sync::{Arc, Mutex, OnceLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    pub target_scene: String,
    pub alternate_loader: bool,
}

/// The holding scene load of a transition that is running in the background. Dropping it does not
/// stop the load, failures are logged by the task either way.
pub struct TransitionTask {
    request: TransitionRequest,
    handle: JoinHandle<Result<(), TransitionError>>,
    cancel: TransitionCancel,
}

impl TransitionTask {
    pub fn request(&self) -> &TransitionRequest {
        &self.request
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn join(self) -> Result<(), TransitionError> {
        self.handle
            .await
            .map_err(|err| TransitionError::BackgroundTask(err.to_string()))?
    }
}

/// The holding scene that is currently up (or on its way).
#[derive(Clone, Default)]
struct HoldingScene {
    cancel: TransitionCancel,
    handle: Arc<OnceLock<LoadHandle>>,
}

impl HoldingScene {
    /// Stops the load if it is still running and lets go of its handle. The loading task releases
    /// the handle itself if it only gets to register it afterwards.
    fn retire(&self, registry: &ResourceRegistry) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.get() {
            if registry.release_handle(*handle) {
                debug!("Released the previous holding scene {}", handle);
            }
        }
    }
}

#[derive(Default)]
struct HoldingState {
    current: Option<HoldingScene>,
    closed: bool,
}

/// Starts transitions: remembers the target for the loading scene, covers the screen and swaps the
/// loading scene in.
pub struct SceneTransitionService<P: SceneProvider, B: BridgeStore, F: Fader> {
    provider: Arc<P>,
    bridge: Arc<B>,
    fader: Arc<F>,
    settings: TransitionSettings,
    registry: Arc<ResourceRegistry>,
    holding: Mutex<HoldingState>,
}

impl<P: SceneProvider, B: BridgeStore, F: Fader> SceneTransitionService<P, B, F> {
    pub fn new(provider: Arc<P>, bridge: Arc<B>, fader: Arc<F>, settings: TransitionSettings) -> Self {
        Self {
            registry: Arc::new(ResourceRegistry::new(
                std::any::type_name::<Self>(),
                provider.clone(),
            )),
            provider,
            bridge,
            fader,
            settings,
            holding: Mutex::new(HoldingState::default()),
        }
    }

    pub fn settings(&self) -> &TransitionSettings {
        &self.settings
    }

    /// Returns once the screen is covered. The holding scene keeps loading in the background and
    /// replaces the one of the previous transition, whose handle is released.
    pub async fn begin_transition(
        &self,
        target_scene: &str,
        alternate_loader: bool,
    ) -> Result<TransitionTask, TransitionError> {
        if target_scene.is_empty() {
            error!("Cannot begin a transition without a target scene address");
            return Err(TransitionError::EmptyTarget);
        }

        info!("Begin transition to {}", target_scene);
        let started = Instant::now();

        self.bridge
            .set_string(SCENE_TO_LOAD_KEY, target_scene)
            .map_err(|reason| {
                error!("Cannot pass {} on to the loading scene: {:#}", target_scene, reason);
                TransitionError::Bridge { reason }
            })?;

        self.fader.fade_in(false).await.map_err(|reason| {
            error!("Covering the screen failed: {:#}", reason);
            TransitionError::fade(reason)
        })?;
        info!("Screen covered [{}ms]", started.elapsed().as_millis());

        let holding = HoldingScene::default();
        let previous = {
            let mut state = lock(&self.holding);
            if state.closed {
                warn!("Not loading a holding scene for {}, the service is shut down", target_scene);
                return Err(TransitionError::Cancelled);
            }
            state.current.replace(holding.clone())
        };
        if let Some(previous) = previous {
            previous.retire(&self.registry);
        }

        let request = TransitionRequest {
            target_scene: target_scene.to_string(),
            alternate_loader,
        };
        let cancel = holding.cancel.clone();
        let handle = tokio::spawn(load_holding_scene(
            self.provider.clone(),
            self.registry.clone(),
            self.settings.clone(),
            self.settings.holding_scene(alternate_loader),
            holding,
        ));

        Ok(TransitionTask {
            request,
            handle,
            cancel,
        })
    }

    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    /// Cancels the holding scene load if it is still running and releases every handle.
    /// Later transitions are refused with [`TransitionError::Cancelled`].
    pub fn shutdown(&self) {
        let current = {
            let mut state = lock(&self.holding);
            state.closed = true;
            state.current.take()
        };
        if let Some(current) = current {
            current.retire(&self.registry);
        }
        self.registry.teardown();
    }
}

async fn load_holding_scene<P: SceneProvider>(
    provider: Arc<P>,
    registry: Arc<ResourceRegistry>,
    settings: TransitionSettings,
    holding_scene: String,
    holding: HoldingScene,
) -> Result<(), TransitionError> {
    info!("Loading {}", holding_scene);
    let started = Instant::now();

    let result = async {
        if holding.cancel.is_cancelled() {
            return Err(TransitionError::Cancelled);
        }

        let operation = provider
            .load_scene(&holding_scene, LoadMode::Single, true)
            .map_err(|reason| TransitionError::LoadFailed {
                address: holding_scene.clone(),
                reason: format!("{:#}", reason),
            })?;
        let handle = operation.handle();
        registry.register_handle(handle);
        let _ = holding.handle.set(handle);
        if holding.cancel.is_cancelled() {
            registry.release_handle(handle);
        }

        poll_operation(&holding_scene, &operation, &settings, &holding.cancel, |_| {}).await
    }
    .await;

    match &result {
        Ok(()) => info!(
            "Loaded {} [{}ms]",
            holding_scene,
            started.elapsed().as_millis()
        ),
        Err(err) => error!("Loading {} failed: {}", holding_scene, err),
    }
    result
}

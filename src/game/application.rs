use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{info, warn};

use crate::io::common::bridge::BridgeStore;
use crate::io::common::loader::SceneProvider;
use crate::rendering::fade::Fader;
use crate::rendering::progress_view::ProgressView;
use crate::settings::TransitionSettings;
use crate::transition::errors::TransitionError;
use crate::transition::loading_screen::LoadingScreen;
use crate::transition::loading_state::SceneLoadingModel;
use crate::transition::orchestrator::SceneTransitionService;
use crate::util::lock;

pub struct GameApplication<P: SceneProvider, B: BridgeStore, F: Fader, V: ProgressView> {
    pub provider: Arc<P>,
    pub bridge: Arc<B>,
    pub fader: Arc<F>,
    pub view: Arc<V>,
    pub transitions: SceneTransitionService<P, B, F>,
    pub close_requested: AtomicBool,
    // the screen of the last transition, it holds the target's load handle
    loading_screen: Mutex<Option<Arc<LoadingScreen<P, B, F, V>>>>,
}

impl<P: SceneProvider, B: BridgeStore, F: Fader, V: ProgressView> GameApplication<P, B, F, V> {
    pub fn new(provider: Arc<P>, bridge: Arc<B>, fader: Arc<F>, view: Arc<V>, settings: TransitionSettings) -> Self {
        Self {
            transitions: SceneTransitionService::new(provider.clone(), bridge.clone(), fader.clone(), settings),
            provider,
            bridge,
            fader,
            view,
            close_requested: AtomicBool::new(false),
            loading_screen: Mutex::new(None),
        }
    }

    /// Covers the screen, brings up the holding scene and lets its loading screen load `target`.
    /// Returns the model of the finished transition, which still owns the target's load handle.
    pub async fn transition_to(
        &self,
        target: &str,
        alternate_loader: bool,
    ) -> Result<Arc<SceneLoadingModel<P, F>>, TransitionError> {
        if self.close_requested.load(Ordering::SeqCst) {
            warn!("Ignoring the transition to {}, the application is closing", target);
            return Err(TransitionError::Cancelled);
        }

        let task = self
            .transitions
            .begin_transition(target, alternate_loader)
            .await?;
        task.join().await?;

        let screen = Arc::new(LoadingScreen::new(
            self.provider.clone(),
            self.bridge.clone(),
            self.fader.clone(),
            self.view.clone(),
            self.transitions.settings().clone(),
        ));
        if let Some(previous) = lock(&self.loading_screen).replace(screen.clone()) {
            previous.close();
        }
        // shutdown() may have run while the holding scene was loading
        if self.close_requested.load(Ordering::SeqCst) {
            screen.close();
            return Err(TransitionError::Cancelled);
        }

        screen.run().await?;
        info!("Arrived in {}", target);
        Ok(screen.model().clone())
    }

    /// Stops a transition that is still running, the pending `transition_to` returns
    /// [`TransitionError::Cancelled`]. Every handle is released.
    pub fn shutdown(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
        if let Some(screen) = lock(&self.loading_screen).take() {
            screen.close();
        }
        self.transitions.shutdown();
    }
}

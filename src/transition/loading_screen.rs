use crate::io::common::bridge::{BridgeStore, DEFAULT_SCENE, SCENE_TO_LOAD_KEY};
use crate::io::common::loader::SceneProvider;
use crate::rendering::fade::Fader;
use crate::rendering::progress_view::{ProgressBar, ProgressView};
use crate::settings::TransitionSettings;
use crate::transition::display::ProgressDisplayDriver;
use crate::transition::errors::TransitionError;
use crate::transition::loading_state::SceneLoadingModel;
use log::{debug, info};
use std::sync::Arc;

const COMPUTING: &str = "Computing...";

/// What the holding scene does once it is up: pick up the target from the bridge and load it while
/// the progress bars follow.
pub struct LoadingScreen<P: SceneProvider, B: BridgeStore, F: Fader, V: ProgressView> {
    bridge: Arc<B>,
    fader: Arc<F>,
    view: Arc<V>,
    settings: TransitionSettings,
    model: Arc<SceneLoadingModel<P, F>>,
    driver: ProgressDisplayDriver<P, F, V>,
}

impl<P: SceneProvider, B: BridgeStore, F: Fader, V: ProgressView> LoadingScreen<P, B, F, V> {
    pub fn new(provider: Arc<P>, bridge: Arc<B>, fader: Arc<F>, view: Arc<V>, settings: TransitionSettings) -> Self {
        let model = Arc::new(SceneLoadingModel::new(
            provider,
            fader.clone(),
            settings.clone(),
        ));
        let driver = ProgressDisplayDriver::new(model.clone(), view.clone());
        Self {
            bridge,
            fader,
            view,
            settings,
            model,
            driver,
        }
    }

    pub fn model(&self) -> &Arc<SceneLoadingModel<P, F>> {
        &self.model
    }

    /// Returns once the target is active, its dependencies are loaded and both bars showed it.
    pub async fn run(&self) -> Result<(), TransitionError> {
        self.fader
            .fade_in(true)
            .await
            .map_err(TransitionError::fade)?;

        let target = self.bridge.get_string(SCENE_TO_LOAD_KEY, DEFAULT_SCENE);
        info!("Loading screen up for {}", target);
        self.model.initialize(&target).await?;

        for bar in [ProgressBar::Scene, ProgressBar::Dependencies] {
            self.view.set_info(bar, COMPUTING);
        }
        self.view.set_value(ProgressBar::Dependencies, 0.0);
        self.view.set_detail(ProgressBar::Dependencies, "");

        self.driver.attach(self.settings.tick_interval);
        self.model.start_loading().await?;
        self.model.dependencies_loaded().await?;

        let frames = self.driver.finished().await?;
        debug!("Loading screen rendered {} frames", frames);
        Ok(())
    }

    /// Lets go of the target's load handle, stops every loop and unsubscribes the bars.
    pub fn close(&self) {
        self.driver.detach();
        self.model.release();
    }
}

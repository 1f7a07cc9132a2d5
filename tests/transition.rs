use scene_transit::demos::{RecordingProgressView, SceneBlueprint, SimulatedSceneProvider, TimedFader};
use scene_transit::game::application::GameApplication;
use scene_transit::io::common::bridge::{BridgeStore, InMemoryBridge, SCENE_TO_LOAD_KEY};
use scene_transit::io::common::loader::{LoadHandle, LoadMode};
use scene_transit::rendering::progress_view::ProgressBar;
use scene_transit::settings::TransitionSettings;
use scene_transit::transition::display::ProgressDisplayDriver;
use scene_transit::transition::errors::TransitionError;
use scene_transit::transition::loading_screen::LoadingScreen;
use scene_transit::transition::loading_state::{LoadingPhase, SceneLoadingModel};
use scene_transit::transition::orchestrator::SceneTransitionService;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TICK: Duration = Duration::from_millis(16);

type Model = SceneLoadingModel<SimulatedSceneProvider, TimedFader>;

fn settings(minimum_loading_time: Duration) -> TransitionSettings {
    TransitionSettings {
        minimum_loading_time,
        tick_interval: TICK,
        ..TransitionSettings::default()
    }
}

fn model(provider: &Arc<SimulatedSceneProvider>, fader: &Arc<TimedFader>, settings: TransitionSettings) -> Arc<Model> {
    Arc::new(SceneLoadingModel::new(provider.clone(), fader.clone(), settings))
}

/// Time between revealing the loading screen and covering it again.
fn visible_for(fader: &TimedFader) -> Duration {
    let revealed = fader.fade_outs()[0];
    let (_, covered) = fader
        .fade_ins()
        .into_iter()
        .find(|(immediate, at)| !immediate && *at >= revealed)
        .unwrap();
    covered.duration_since(revealed)
}

fn non_decreasing(values: &[f32]) -> bool {
    values.windows(2).all(|pair| pair[0] <= pair[1])
}

#[test_log::test(tokio::test(start_paused = true))]
async fn progress_reaches_exactly_one() {
    let provider = Arc::new(SimulatedSceneProvider::new().with_scene(
        "SceneForest",
        SceneBlueprint::new(1000, vec![200, 600, 999]).with_dependencies(4096, 3),
    ));
    let fader = Arc::new(TimedFader::new(Duration::ZERO));
    let model = model(&provider, &fader, settings(Duration::from_millis(3000)));
    let view = Arc::new(RecordingProgressView::default());
    let driver = ProgressDisplayDriver::new(model.clone(), view.clone());
    driver.attach(TICK);

    assert_eq!(model.initialize("SceneForest").await.unwrap(), 1000);
    assert_eq!(model.phase(), LoadingPhase::SizeQueried);
    assert_eq!(model.primary_progress().total_bytes, 1000);

    model.start_loading().await.unwrap();
    model.dependencies_loaded().await.unwrap();
    driver.finished().await.unwrap();

    let primary = model.primary_progress();
    assert_eq!(primary.progress, 1.0);
    assert_eq!(primary.downloaded_bytes, primary.total_bytes);

    let dependencies = model.dependencies_progress();
    assert_eq!(dependencies.progress, 1.0);
    assert_eq!(dependencies.downloaded_bytes, 4096);
    assert_eq!(model.phase(), LoadingPhase::Complete);

    let values = view.values(ProgressBar::Scene);
    assert!(non_decreasing(&values));
    assert_eq!(values.last(), Some(&1.0));
    assert_eq!(
        view.infos(ProgressBar::Scene).last().unwrap(),
        "Scene loaded SceneForest"
    );
    assert_eq!(view.details(ProgressBar::Dependencies).last().unwrap(), "Done");
    assert!(non_decreasing(&view.values(ProgressBar::Dependencies)));
    assert_eq!(
        provider.loads(),
        vec![("SceneForest".to_string(), LoadMode::Additive, false)]
    );
}

#[test_log::test(tokio::test(start_paused = true))]
async fn fast_loads_are_held_for_the_minimum_time() {
    let provider = Arc::new(
        SimulatedSceneProvider::new().with_scene("SceneForest", SceneBlueprint::new(1000, vec![200, 600, 1000])),
    );
    let fader = Arc::new(TimedFader::new(Duration::from_millis(300)));
    let model = model(&provider, &fader, settings(Duration::from_millis(3000)));

    model.initialize("SceneForest").await.unwrap();
    model.start_loading().await.unwrap();

    let visible = visible_for(&fader);
    assert!(visible >= Duration::from_millis(3000), "{:?}", visible);
    assert!(visible < Duration::from_millis(3000) + TICK, "{:?}", visible);
    assert!(model.elapsed().unwrap() >= Duration::from_millis(3000));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn slow_loads_are_not_held_any_longer() {
    let samples = (1..=10).map(|step| step * 100).collect();
    let provider =
        Arc::new(SimulatedSceneProvider::new().with_scene("SceneForest", SceneBlueprint::new(1000, samples)));
    let fader = Arc::new(TimedFader::new(Duration::ZERO));
    let model = model(&provider, &fader, settings(Duration::from_millis(10)));

    let mut phases = model.phase_watcher();
    let paced = Arc::new(AtomicBool::new(false));
    let observer = {
        let paced = paced.clone();
        tokio::spawn(async move {
            while phases.changed().await.is_ok() {
                if *phases.borrow_and_update() == LoadingPhase::Pacing {
                    paced.store(true, Ordering::Relaxed);
                }
            }
        })
    };

    model.initialize("SceneForest").await.unwrap();
    model.start_loading().await.unwrap();

    let visible = visible_for(&fader);
    assert!(visible >= 10 * TICK, "{:?}", visible);
    assert!(visible < 11 * TICK, "{:?}", visible);
    assert!(!paced.load(Ordering::Relaxed));
    observer.abort();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn dependencies_are_tracked_after_activation_only() {
    let provider = Arc::new(SimulatedSceneProvider::new().with_scene(
        "SceneForest",
        SceneBlueprint::new(1000, vec![500, 1000]).with_dependencies(5000, 5),
    ));
    let fader = Arc::new(TimedFader::new(Duration::ZERO));
    let model = model(&provider, &fader, settings(Duration::ZERO));

    let activated_first = Arc::new(AtomicBool::new(false));
    {
        let weak = Arc::downgrade(&model);
        let activated_first = activated_first.clone();
        model.subscribe_dependencies_progress_readable(move || {
            if let Some(model) = weak.upgrade() {
                activated_first.store(model.activated_scene().is_some(), Ordering::Relaxed);
            }
        });
    }
    let loaded = Arc::new(AtomicBool::new(false));
    {
        let loaded = loaded.clone();
        model.subscribe_next_scene_loaded(move || loaded.store(true, Ordering::Relaxed));
    }

    model.initialize("SceneForest").await.unwrap();
    assert_eq!(model.dependencies_progress().progress, 0.0);

    model.start_loading().await.unwrap();
    assert!(loaded.load(Ordering::Relaxed));
    assert!(activated_first.load(Ordering::Relaxed));

    model.dependencies_loaded().await.unwrap();
    let scene = model.activated_scene().unwrap();
    assert_eq!(scene.reads(), 5);

    tokio::time::sleep(10 * TICK).await;
    assert_eq!(scene.reads(), 5);
    assert_eq!(model.dependencies_progress().downloaded_bytes, 5000);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn empty_target_is_rejected_without_side_effects() {
    let provider = Arc::new(SimulatedSceneProvider::new());
    let fader = Arc::new(TimedFader::new(Duration::ZERO));
    let bridge = Arc::new(InMemoryBridge::new());

    let model = model(&provider, &fader, settings(Duration::ZERO));
    assert!(matches!(
        model.initialize("").await,
        Err(TransitionError::EmptyTarget)
    ));
    assert_eq!(model.phase(), LoadingPhase::Idle);
    assert_eq!(model.target_scene(), None);
    assert_eq!(provider.size_queries(), 0);

    let service = SceneTransitionService::new(
        provider.clone(),
        bridge.clone(),
        fader.clone(),
        TransitionSettings::default(),
    );
    assert!(matches!(
        service.begin_transition("", false).await,
        Err(TransitionError::EmptyTarget)
    ));
    assert!(!bridge.contains_key(SCENE_TO_LOAD_KEY));
    assert!(fader.fade_ins().is_empty());
    assert!(provider.loads().is_empty());
}

#[test_log::test(tokio::test(start_paused = true))]
async fn loading_twice_is_rejected() {
    let provider = Arc::new(SimulatedSceneProvider::new().with_scene("SceneForest", SceneBlueprint::new(10, vec![10])));
    let fader = Arc::new(TimedFader::new(Duration::ZERO));
    let model = model(&provider, &fader, settings(Duration::ZERO));

    assert!(matches!(
        model.start_loading().await,
        Err(TransitionError::InvalidPhase {
            expected: LoadingPhase::SizeQueried,
            actual: LoadingPhase::Idle
        })
    ));

    model.initialize("SceneForest").await.unwrap();
    assert!(matches!(
        model.initialize("SceneForest").await,
        Err(TransitionError::InvalidPhase { .. })
    ));
    model.start_loading().await.unwrap();
    assert!(model.start_loading().await.is_err());
    assert_eq!(provider.loads().len(), 1);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn cancelling_while_pacing() {
    let provider = Arc::new(SimulatedSceneProvider::new().with_scene("SceneForest", SceneBlueprint::new(10, vec![10])));
    let fader = Arc::new(TimedFader::new(Duration::ZERO));
    let model = model(&provider, &fader, settings(Duration::from_millis(3000)));
    model.initialize("SceneForest").await.unwrap();

    let loading = {
        let model = model.clone();
        tokio::spawn(async move { model.start_loading().await })
    };

    model
        .phase_watcher()
        .wait_for(|phase| *phase == LoadingPhase::Pacing)
        .await
        .unwrap();
    model.cancel();

    assert!(matches!(
        loading.await.unwrap(),
        Err(TransitionError::Cancelled)
    ));
    assert_eq!(model.phase(), LoadingPhase::Failed);
    assert!(model.activated_scene().is_none());
    assert!(matches!(
        model.dependencies_loaded().await,
        Err(TransitionError::Cancelled)
    ));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn stuck_load_times_out() {
    let provider = Arc::new(
        SimulatedSceneProvider::new().with_scene("SceneForest", SceneBlueprint::new(1000, vec![100]).stuck()),
    );
    let fader = Arc::new(TimedFader::new(Duration::ZERO));
    let model = model(
        &provider,
        &fader,
        TransitionSettings {
            max_load_duration: Some(Duration::from_millis(500)),
            ..settings(Duration::ZERO)
        },
    );

    model.initialize("SceneForest").await.unwrap();
    let result = model.start_loading().await;
    assert!(
        matches!(&result, Err(TransitionError::TimedOut { address, limit }) if address == "SceneForest" && *limit == Duration::from_millis(500)),
        "{:?}",
        result
    );
    assert_eq!(model.phase(), LoadingPhase::Failed);
    assert_eq!(model.primary_progress().downloaded_bytes, 100);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn failed_load_stops_the_loading_screen() {
    let provider = Arc::new(SimulatedSceneProvider::new().with_scene(
        "SceneBroken",
        SceneBlueprint::new(10 * 1024, vec![1024, 2048]).failing("corrupt bundle"),
    ));
    let bridge = Arc::new(InMemoryBridge::new());
    bridge.set_string(SCENE_TO_LOAD_KEY, "SceneBroken").unwrap();
    let fader = Arc::new(TimedFader::new(Duration::ZERO));
    let view = Arc::new(RecordingProgressView::default());

    let screen = LoadingScreen::new(
        provider.clone(),
        bridge.clone(),
        fader.clone(),
        view.clone(),
        settings(Duration::ZERO),
    );
    let result = screen.run().await;
    assert!(
        matches!(&result, Err(TransitionError::LoadFailed { address, reason }) if address == "SceneBroken" && reason == "corrupt bundle"),
        "{:?}",
        result
    );
    assert_eq!(screen.model().phase(), LoadingPhase::Failed);

    tokio::time::sleep(4 * TICK).await;
    let frames = view.values(ProgressBar::Scene).len();
    tokio::time::sleep(4 * TICK).await;
    assert_eq!(view.values(ProgressBar::Scene).len(), frames);
    assert_ne!(
        view.infos(ProgressBar::Scene).last().unwrap(),
        "Scene loaded SceneBroken"
    );
    assert_eq!(view.infos(ProgressBar::Dependencies), vec!["Computing..."]);

    screen.close();
    assert_eq!(provider.released(), vec![LoadHandle(1)]);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn failed_activation_fails_the_transition() {
    let provider = Arc::new(SimulatedSceneProvider::new().with_scene(
        "SceneForest",
        SceneBlueprint::new(10, vec![10]).failing_activation("missing controller"),
    ));
    let fader = Arc::new(TimedFader::new(Duration::ZERO));
    let model = model(&provider, &fader, settings(Duration::ZERO));

    model.initialize("SceneForest").await.unwrap();
    assert!(matches!(
        model.start_loading().await,
        Err(TransitionError::Activation { .. })
    ));
    assert_eq!(model.phase(), LoadingPhase::Failed);
    assert!(matches!(
        model.dependencies_loaded().await,
        Err(TransitionError::BackgroundTask(_))
    ));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn handles_are_released_once() {
    let provider = Arc::new(
        SimulatedSceneProvider::new().with_scene("SceneForest", SceneBlueprint::new(10, vec![10]).with_dependencies(10, 2)),
    );
    let fader = Arc::new(TimedFader::new(Duration::ZERO));
    let model = model(&provider, &fader, settings(Duration::ZERO));

    model.initialize("SceneForest").await.unwrap();
    model.start_loading().await.unwrap();
    model.dependencies_loaded().await.unwrap();

    model.release();
    model.release();
    drop(model);
    assert_eq!(provider.released(), vec![LoadHandle(1)]);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn size_query_failure_leaves_the_model_idle() {
    let provider = Arc::new(SimulatedSceneProvider::new().with_query_latency(Duration::from_millis(50)));
    let fader = Arc::new(TimedFader::new(Duration::ZERO));
    let model = model(&provider, &fader, settings(Duration::ZERO));

    assert!(matches!(
        model.initialize("SceneNowhere").await,
        Err(TransitionError::SizeQuery { .. })
    ));
    assert_eq!(model.phase(), LoadingPhase::Idle);
    assert_eq!(model.target_scene(), None);
    assert_eq!(provider.size_queries(), 1);
}

struct ReadOnlyBridge;

impl BridgeStore for ReadOnlyBridge {
    fn set_string(&self, key: &str, _value: &str) -> anyhow::Result<()> {
        anyhow::bail!("{} is read only", key)
    }

    fn get_string(&self, _key: &str, default: &str) -> String {
        default.to_string()
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn synchronous_failures_launch_nothing() {
    let provider = Arc::new(SimulatedSceneProvider::new());

    let fader = Arc::new(TimedFader::new(Duration::ZERO));
    let service = SceneTransitionService::new(
        provider.clone(),
        Arc::new(ReadOnlyBridge),
        fader.clone(),
        TransitionSettings::default(),
    );
    assert!(matches!(
        service.begin_transition("SceneForest", false).await,
        Err(TransitionError::Bridge { .. })
    ));
    assert!(fader.fade_ins().is_empty());

    let broken_fader = Arc::new(TimedFader::new(Duration::ZERO).failing("device lost"));
    let service = SceneTransitionService::new(
        provider.clone(),
        Arc::new(InMemoryBridge::new()),
        broken_fader,
        TransitionSettings::default(),
    );
    assert!(matches!(
        service.begin_transition("SceneForest", false).await,
        Err(TransitionError::Fade { .. })
    ));

    tokio::time::sleep(10 * TICK).await;
    assert!(provider.loads().is_empty());
}

fn application(
    target: &str,
) -> (
    Arc<SimulatedSceneProvider>,
    Arc<TimedFader>,
    Arc<RecordingProgressView>,
    GameApplication<SimulatedSceneProvider, InMemoryBridge, TimedFader, RecordingProgressView>,
) {
    let holding = SceneBlueprint::new(64, vec![32, 64]);
    let provider = Arc::new(
        SimulatedSceneProvider::new()
            .with_scene("SceneLoading", holding.clone())
            .with_scene("SceneLoadingVideo", holding)
            .with_scene(
                target,
                SceneBlueprint::new(8 * 1024, vec![1024, 4096, 8000]).with_dependencies(2048, 4),
            )
            .with_query_latency(Duration::from_millis(100)),
    );
    let fader = Arc::new(TimedFader::new(Duration::from_millis(250)));
    let view = Arc::new(RecordingProgressView::default());
    let app = GameApplication::new(
        provider.clone(),
        Arc::new(InMemoryBridge::new()),
        fader.clone(),
        view.clone(),
        settings(Duration::from_millis(3000)),
    );
    (provider, fader, view, app)
}

#[test_log::test(tokio::test(start_paused = true))]
async fn full_transition() {
    let (provider, fader, view, app) = application("SceneForest");

    let model = app.transition_to("SceneForest", false).await.unwrap();
    assert_eq!(model.phase(), LoadingPhase::Complete);
    assert_eq!(model.target_scene(), Some("SceneForest"));
    assert!(model.elapsed().unwrap() >= Duration::from_millis(3000));

    assert_eq!(
        provider.loads(),
        vec![
            ("SceneLoading".to_string(), LoadMode::Single, true),
            ("SceneForest".to_string(), LoadMode::Additive, false),
        ]
    );
    assert_eq!(
        fader
            .fade_ins()
            .iter()
            .map(|(immediate, _)| *immediate)
            .collect::<Vec<_>>(),
        vec![false, true, false]
    );

    for (bar, loaded) in [
        (ProgressBar::Scene, "Scene loaded SceneForest"),
        (ProgressBar::Dependencies, "Dependencies loaded SceneForest"),
    ] {
        let infos = view.infos(bar);
        assert_eq!(infos.first().unwrap(), "Computing...");
        assert_eq!(infos.last().unwrap(), loaded);
        assert_eq!(view.values(bar).last(), Some(&1.0));
    }

    app.shutdown();
    assert_eq!(provider.released(), vec![LoadHandle(2), LoadHandle(1)]);
    assert!(matches!(
        app.transition_to("SceneForest", false).await,
        Err(TransitionError::Cancelled)
    ));
}

#[test_log::test(tokio::test(start_paused = true))]
async fn alternate_loader_uses_the_video_scene() {
    let (provider, _fader, _view, app) = application("SceneDungeon");

    app.transition_to("SceneDungeon", true).await.unwrap();
    assert_eq!(provider.loads()[0].0, "SceneLoadingVideo");
    app.shutdown();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn release_while_tracking_dependencies_unblocks_the_waiters() {
    let provider = Arc::new(SimulatedSceneProvider::new().with_scene(
        "SceneForest",
        SceneBlueprint::new(10, vec![10]).with_dependencies(1000, 1000),
    ));
    let fader = Arc::new(TimedFader::new(Duration::ZERO));
    let model = model(&provider, &fader, settings(Duration::ZERO));
    let view = Arc::new(RecordingProgressView::default());
    let driver = ProgressDisplayDriver::new(model.clone(), view.clone());
    driver.attach(TICK);

    model.initialize("SceneForest").await.unwrap();
    model.start_loading().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(model.phase(), LoadingPhase::DependenciesLoading);

    model.release();
    assert_eq!(model.phase(), LoadingPhase::Failed);
    let waited = tokio::time::timeout(Duration::from_secs(1), model.dependencies_loaded()).await;
    assert!(matches!(waited, Ok(Err(TransitionError::Cancelled))), "{:?}", waited);
    assert_eq!(provider.released(), vec![LoadHandle(1)]);

    // the dependencies bar notices and stops
    let stopped = tokio::time::timeout(Duration::from_secs(1), driver.finished()).await;
    assert!(matches!(stopped, Ok(Ok(_))), "{:?}", stopped);
    let reads = model.activated_scene().unwrap().reads();
    tokio::time::sleep(10 * TICK).await;
    assert_eq!(model.activated_scene().unwrap().reads(), reads);
}

#[test_log::test(tokio::test(start_paused = true))]
async fn release_after_completion_keeps_the_outcome() {
    let provider = Arc::new(SimulatedSceneProvider::new().with_scene("SceneForest", SceneBlueprint::new(10, vec![10])));
    let fader = Arc::new(TimedFader::new(Duration::ZERO));
    let model = model(&provider, &fader, settings(Duration::ZERO));

    model.initialize("SceneForest").await.unwrap();
    model.start_loading().await.unwrap();
    model.dependencies_loaded().await.unwrap();

    model.release();
    assert_eq!(model.phase(), LoadingPhase::Complete);
    model.dependencies_loaded().await.unwrap();
}

#[test_log::test(tokio::test(start_paused = true))]
async fn shutdown_while_transitioning_resolves_the_caller() {
    // covering the screen, loading the holding scene, querying the size, fading out, pacing
    for shutdown_after in [100, 260, 300, 500, 1500] {
        let (provider, _fader, _view, app) = application("SceneForest");
        let app = Arc::new(app);

        let transition = {
            let app = app.clone();
            tokio::spawn(async move { app.transition_to("SceneForest", false).await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(shutdown_after)).await;
        assert!(!transition.is_finished());
        app.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(1), transition).await;
        assert!(
            matches!(result, Ok(Ok(Err(TransitionError::Cancelled)))),
            "shutdown after {}ms: {:?}",
            shutdown_after,
            result
        );

        let mut released = provider.released();
        released.sort();
        let loaded = provider.loads().len() as u64;
        assert_eq!(released, (1..=loaded).map(LoadHandle).collect::<Vec<_>>());
    }
}

#[test_log::test(tokio::test(start_paused = true))]
async fn loading_screen_shows_every_sample_once_loaded() {
    let provider = Arc::new(
        SimulatedSceneProvider::new().with_scene("SceneForest", SceneBlueprint::new(1000, vec![200, 600, 1000])),
    );
    let fader = Arc::new(TimedFader::new(Duration::ZERO));
    let model = model(&provider, &fader, settings(Duration::ZERO));
    let view = Arc::new(RecordingProgressView::default());
    let driver = ProgressDisplayDriver::new(model.clone(), view.clone());
    driver.attach(TICK);

    model.initialize("SceneForest").await.unwrap();
    model.start_loading().await.unwrap();
    model.dependencies_loaded().await.unwrap();
    driver.finished().await.unwrap();

    let mut values = view.values(ProgressBar::Scene);
    values.dedup();
    assert_eq!(values, vec![0.2, 0.6, 1.0]);

    let infos = view.infos(ProgressBar::Scene);
    assert_eq!(infos.last().unwrap(), "Scene loaded SceneForest");
    assert_eq!(
        infos.iter().filter(|info| info.contains("loaded")).count(),
        1
    );
    assert!(
        infos[..infos.len() - 1]
            .iter()
            .all(|info| info == "Scene loading SceneForest...")
    );

    let mut details = view.details(ProgressBar::Scene);
    details.dedup();
    assert_eq!(details, vec!["0 / 0 KB", "Done"]);
}

//! In-process stand-ins for the engine side: a scene provider that replays scripted downloads,
//! a fader that only takes time and progress views that print or record. The binary runs on them
//! and so do the tests.

use crate::io::common::bridge::InMemoryBridge;
use crate::io::common::loader::{
    ActiveScene, DownloadStatus, HandleReleaser, LoadHandle, LoadMode, LoadOperation, OperationStatus, SceneProvider,
};
use crate::rendering::fade::Fader;
use crate::rendering::progress_view::{ProgressBar, ProgressView};
use crate::settings::{CliArgs, OperationMode, TransitionSettings};
use crate::util::lock;
use anyhow::{anyhow, bail};
use dashmap::DashMap;
use log::{debug, trace};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// How a simulated scene downloads and what it pulls in once active.
#[derive(Debug, Clone, Default)]
pub struct SceneBlueprint {
    pub total_bytes: u64,
    /// Downloaded bytes, one sample per poll. The load succeeds on the poll after the last one.
    pub samples: Vec<u64>,
    pub dependency_bytes: u64,
    /// Reads of the dependency progress it takes to reach 1.0, zero means nothing to load.
    pub dependency_steps: usize,
    pub failure: Option<String>,
    pub activation_failure: Option<String>,
    /// The load never finishes.
    pub stuck: bool,
}

impl SceneBlueprint {
    pub fn new(total_bytes: u64, samples: Vec<u64>) -> Self {
        Self {
            total_bytes,
            samples,
            ..Self::default()
        }
    }

    /// Random sized steps that add up to `total_bytes`, give or take rounding.
    pub fn jittered(total_bytes: u64, sample_count: usize) -> Self {
        let mut rng = rand::rng();
        let weights = (0..sample_count.max(1))
            .map(|_| rng.random_range(0.2f64..1.0))
            .collect::<Vec<_>>();
        let sum: f64 = weights.iter().sum();

        let samples = weights
            .iter()
            .scan(0.0, |acc, weight| {
                *acc += weight;
                Some(((*acc / sum) * total_bytes as f64) as u64)
            })
            .map(|sample| sample.min(total_bytes))
            .collect();
        Self::new(total_bytes, samples)
    }

    pub fn with_dependencies(mut self, dependency_bytes: u64, dependency_steps: usize) -> Self {
        self.dependency_bytes = dependency_bytes;
        self.dependency_steps = dependency_steps;
        self
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    pub fn failing_activation(mut self, reason: &str) -> Self {
        self.activation_failure = Some(reason.to_string());
        self
    }

    pub fn stuck(mut self) -> Self {
        self.stuck = true;
        self
    }
}

#[derive(Debug, Default)]
pub struct SimulatedSceneProvider {
    scenes: DashMap<String, SceneBlueprint>,
    query_latency: Duration,
    next_handle: AtomicU64,
    size_queries: AtomicUsize,
    loads: Mutex<Vec<(String, LoadMode, bool)>>,
    released: Mutex<Vec<LoadHandle>>,
}

impl SimulatedSceneProvider {
    pub fn new() -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            ..Self::default()
        }
    }

    pub fn with_scene(self, address: &str, blueprint: SceneBlueprint) -> Self {
        self.scenes.insert(address.to_string(), blueprint);
        self
    }

    pub fn with_query_latency(mut self, query_latency: Duration) -> Self {
        self.query_latency = query_latency;
        self
    }

    pub fn size_queries(&self) -> usize {
        self.size_queries.load(Ordering::Relaxed)
    }

    pub fn loads(&self) -> Vec<(String, LoadMode, bool)> {
        lock(&self.loads).clone()
    }

    pub fn released(&self) -> Vec<LoadHandle> {
        lock(&self.released).clone()
    }
}

impl HandleReleaser for SimulatedSceneProvider {
    fn release(&self, handle: LoadHandle) -> anyhow::Result<()> {
        debug!("Releasing load {}", handle);
        lock(&self.released).push(handle);
        Ok(())
    }
}

impl SceneProvider for SimulatedSceneProvider {
    type Operation = SimulatedOperation;

    async fn query_download_size(&self, address: &str) -> anyhow::Result<u64> {
        if !self.query_latency.is_zero() {
            tokio::time::sleep(self.query_latency).await;
        }
        self.size_queries.fetch_add(1, Ordering::Relaxed);

        self.scenes
            .get(address)
            .map(|blueprint| blueprint.total_bytes)
            .ok_or_else(|| anyhow!("There is no scene {}", address))
    }

    fn load_scene(&self, address: &str, mode: LoadMode, activate_on_load: bool) -> anyhow::Result<SimulatedOperation> {
        lock(&self.loads).push((address.to_string(), mode, activate_on_load));
        let Some(blueprint) = self.scenes.get(address).map(|blueprint| blueprint.clone()) else {
            bail!("There is no scene {}", address);
        };

        let handle = LoadHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        trace!("{}: load {} ({:?})", address, handle, mode);
        Ok(SimulatedOperation {
            address: address.to_string(),
            handle,
            blueprint,
            polls: AtomicUsize::new(0),
            activated: AtomicBool::new(activate_on_load),
        })
    }
}

pub struct SimulatedOperation {
    address: String,
    handle: LoadHandle,
    blueprint: SceneBlueprint,
    polls: AtomicUsize,
    activated: AtomicBool,
}

impl SimulatedOperation {
    fn current_sample(&self) -> u64 {
        let polls = self.polls.load(Ordering::Relaxed).min(self.blueprint.samples.len());
        match polls {
            0 => 0,
            polls => self.blueprint.samples[polls - 1],
        }
    }
}

impl LoadOperation for SimulatedOperation {
    type Scene = SimulatedActiveScene;

    fn handle(&self) -> LoadHandle {
        self.handle
    }

    /// Every call is one poll, the scripted download moves one sample ahead.
    fn status(&self) -> OperationStatus {
        let polls = self.polls.fetch_add(1, Ordering::Relaxed) + 1;
        if self.blueprint.stuck || polls <= self.blueprint.samples.len() {
            return OperationStatus::Running;
        }

        match &self.blueprint.failure {
            Some(reason) => OperationStatus::Failed(reason.clone()),
            None => OperationStatus::Succeeded,
        }
    }

    fn download_status(&self) -> DownloadStatus {
        let downloaded_bytes = self.current_sample();
        let percent = match self.blueprint.total_bytes {
            0 => 1.0,
            total => downloaded_bytes as f32 / total as f32,
        };
        DownloadStatus {
            downloaded_bytes,
            total_bytes: self.blueprint.total_bytes,
            percent,
        }
    }

    async fn activate(&self) -> anyhow::Result<Arc<SimulatedActiveScene>> {
        if let Some(reason) = &self.blueprint.activation_failure {
            bail!("{}", reason);
        }
        if self.activated.swap(true, Ordering::Relaxed) {
            bail!("{} has already been activated", self.address);
        }

        Ok(Arc::new(SimulatedActiveScene {
            name: self.address.clone(),
            dependency_bytes: self.blueprint.dependency_bytes,
            dependency_steps: self.blueprint.dependency_steps,
            reads: AtomicUsize::new(0),
        }))
    }
}

pub struct SimulatedActiveScene {
    name: String,
    dependency_bytes: u64,
    dependency_steps: usize,
    reads: AtomicUsize,
}

impl SimulatedActiveScene {
    /// How often the dependency progress has been read so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }

    fn progress_after(&self, reads: usize) -> f32 {
        match self.dependency_steps {
            0 => 1.0,
            steps => (reads.min(steps) as f32) / steps as f32,
        }
    }
}

impl ActiveScene for SimulatedActiveScene {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies_progress(&self) -> f32 {
        let reads = self.reads.fetch_add(1, Ordering::Relaxed) + 1;
        self.progress_after(reads)
    }

    fn dependencies_downloaded_bytes(&self) -> u64 {
        (self.progress_after(self.reads()) as f64 * self.dependency_bytes as f64) as u64
    }

    fn dependencies_total_bytes(&self) -> u64 {
        self.dependency_bytes
    }
}

/// Takes `duration` per animated fade and remembers when fades started and ended.
#[derive(Debug, Default)]
pub struct TimedFader {
    duration: Duration,
    failure: Option<String>,
    fade_ins: Mutex<Vec<(bool, Instant)>>,
    fade_outs: Mutex<Vec<Instant>>,
}

impl TimedFader {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            ..Self::default()
        }
    }

    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }

    /// `immediate` and the start of every fade in.
    pub fn fade_ins(&self) -> Vec<(bool, Instant)> {
        lock(&self.fade_ins).clone()
    }

    /// The end of every fade out.
    pub fn fade_outs(&self) -> Vec<Instant> {
        lock(&self.fade_outs).clone()
    }
}

impl Fader for TimedFader {
    async fn fade_in(&self, immediate: bool) -> anyhow::Result<()> {
        if let Some(reason) = &self.failure {
            bail!("{}", reason);
        }

        lock(&self.fade_ins).push((immediate, Instant::now()));
        if !immediate && !self.duration.is_zero() {
            tokio::time::sleep(self.duration).await;
        }
        Ok(())
    }

    async fn fade_out(&self) -> anyhow::Result<()> {
        if let Some(reason) = &self.failure {
            bail!("{}", reason);
        }

        if !self.duration.is_zero() {
            tokio::time::sleep(self.duration).await;
        }
        lock(&self.fade_outs).push(Instant::now());
        Ok(())
    }
}

/// Prints one line per rendered frame.
#[derive(Debug, Default)]
pub struct ConsoleProgressView {
    frames: Mutex<HashMap<ProgressBar, (String, f32)>>,
}

impl ProgressView for ConsoleProgressView {
    fn set_info(&self, bar: ProgressBar, text: &str) {
        lock(&self.frames).entry(bar).or_default().0 = text.to_string();
    }

    fn set_value(&self, bar: ProgressBar, value: f32) {
        lock(&self.frames).entry(bar).or_default().1 = value;
    }

    fn set_detail(&self, bar: ProgressBar, text: &str) {
        let frames = lock(&self.frames);
        let (info, value) = frames.get(&bar).cloned().unwrap_or_default();
        println!(
            "{:>12} [{:<20}] {:>5.1}% {} {}",
            bar.prefix(),
            "#".repeat((value * 20.0).round() as usize),
            value * 100.0,
            info,
            text
        );
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Info(String),
    Value(f32),
    Detail(String),
}

/// Remembers everything that has been shown, in order.
#[derive(Debug, Default)]
pub struct RecordingProgressView {
    recorded: Mutex<Vec<(ProgressBar, Recorded)>>,
}

impl RecordingProgressView {
    pub fn recorded(&self) -> Vec<(ProgressBar, Recorded)> {
        lock(&self.recorded).clone()
    }

    pub fn infos(&self, bar: ProgressBar) -> Vec<String> {
        self.filter(bar, |recorded| match recorded {
            Recorded::Info(text) => Some(text.clone()),
            _ => None,
        })
    }

    pub fn values(&self, bar: ProgressBar) -> Vec<f32> {
        self.filter(bar, |recorded| match recorded {
            Recorded::Value(value) => Some(*value),
            _ => None,
        })
    }

    pub fn details(&self, bar: ProgressBar) -> Vec<String> {
        self.filter(bar, |recorded| match recorded {
            Recorded::Detail(text) => Some(text.clone()),
            _ => None,
        })
    }

    fn filter<T>(&self, bar: ProgressBar, map: impl Fn(&Recorded) -> Option<T>) -> Vec<T> {
        lock(&self.recorded)
            .iter()
            .filter(|(recorded_bar, _)| *recorded_bar == bar)
            .filter_map(|(_, recorded)| map(recorded))
            .collect()
    }

    fn push(&self, bar: ProgressBar, recorded: Recorded) {
        lock(&self.recorded).push((bar, recorded));
    }
}

impl ProgressView for RecordingProgressView {
    fn set_info(&self, bar: ProgressBar, text: &str) {
        self.push(bar, Recorded::Info(text.to_string()));
    }

    fn set_value(&self, bar: ProgressBar, value: f32) {
        self.push(bar, Recorded::Value(value));
    }

    fn set_detail(&self, bar: ProgressBar, text: &str) {
        self.push(bar, Recorded::Detail(text.to_string()));
    }
}

/// Everything the binary needs to run one transition in-process.
pub struct Simulation {
    pub provider: Arc<SimulatedSceneProvider>,
    pub bridge: Arc<InMemoryBridge>,
    pub fader: Arc<TimedFader>,
    pub view: Arc<ConsoleProgressView>,
    pub target: String,
    pub alternate_loader: bool,
}

impl Simulation {
    pub fn from_args(args: &CliArgs, settings: &TransitionSettings) -> Self {
        let OperationMode::Simulate {
            target,
            alternate_loader,
            total_bytes,
            download_samples,
            sample_count,
            dependency_bytes,
            dependency_steps,
        } = &args.operation_mode;

        let blueprint = match download_samples {
            Some(samples) => SceneBlueprint::new(*total_bytes, samples.0.clone()),
            None => SceneBlueprint::jittered(*total_bytes, *sample_count),
        }
        .with_dependencies(*dependency_bytes, *dependency_steps);

        // the holding scenes are small and local
        let holding = SceneBlueprint::new(64 * 1024, vec![32 * 1024, 64 * 1024]);
        let provider = SimulatedSceneProvider::new()
            .with_scene(target, blueprint)
            .with_scene(&settings.holding_scene(false), holding.clone())
            .with_scene(&settings.holding_scene(true), holding)
            .with_query_latency(Duration::from_millis(120));

        Self {
            provider: Arc::new(provider),
            bridge: Arc::new(InMemoryBridge::new()),
            fader: Arc::new(TimedFader::new(Duration::from_millis(400))),
            view: Arc::new(ConsoleProgressView::default()),
            target: target.clone(),
            alternate_loader: *alternate_loader,
        }
    }
}

use clap::{Parser, Subcommand};
use itertools::Itertools;
use std::str::FromStr;
use std::time::Duration;

/// Loading is never shown for less than this, otherwise the loading screen just flashes.
pub const MINIMUM_LOADING_TIME: Duration = Duration::from_millis(3000);
/// Roughly one frame at 60 Hz.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(16);
pub const LOADING_SCENE_ADDRESS: &str = "SceneLoading";
const ALTERNATE_LOADING_SCENE_SUFFIX: &str = "Video";

#[derive(Debug, Clone)]
pub struct TransitionSettings {
    pub minimum_loading_time: Duration,
    pub tick_interval: Duration,
    /// `None` waits on a stuck load forever.
    pub max_load_duration: Option<Duration>,
    pub loading_scene_address: String,
}

impl Default for TransitionSettings {
    fn default() -> Self {
        Self {
            minimum_loading_time: MINIMUM_LOADING_TIME,
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_load_duration: None,
            loading_scene_address: LOADING_SCENE_ADDRESS.to_string(),
        }
    }
}

impl TransitionSettings {
    /// The scene that is shown while the target is loading. The alternate one can play videos.
    pub fn holding_scene(&self, alternate_loader: bool) -> String {
        if alternate_loader {
            format!(
                "{}{}",
                self.loading_scene_address, ALTERNATE_LOADING_SCENE_SUFFIX
            )
        } else {
            self.loading_scene_address.clone()
        }
    }
}

impl From<&CliArgs> for TransitionSettings {
    fn from(args: &CliArgs) -> Self {
        Self {
            minimum_loading_time: Duration::from_millis(args.min_loading_ms),
            tick_interval: Duration::from_millis(args.tick_ms.max(1)),
            max_load_duration: args.max_load_ms.map(Duration::from_millis),
            loading_scene_address: args.loading_scene.clone(),
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "scene-transit")]
#[command(version)]
#[command(about = "Transitions between two scenes with a paced loading screen")]
pub struct CliArgs {
    #[arg(long, env = "SCENE_TRANSIT_MIN_LOADING_MS", default_value_t = 3000)]
    pub min_loading_ms: u64,

    #[arg(long, env = "SCENE_TRANSIT_TICK_MS", default_value_t = 16)]
    pub tick_ms: u64,

    #[arg(
        long,
        env = "SCENE_TRANSIT_MAX_LOAD_MS",
        help = "Fail a load that takes longer than this. Waits forever when omitted"
    )]
    pub max_load_ms: Option<u64>,

    #[arg(long, default_value = LOADING_SCENE_ADDRESS)]
    pub loading_scene: String,

    #[command(subcommand)]
    pub operation_mode: OperationMode,
}

#[derive(Subcommand, Debug)]
pub enum OperationMode {
    /// Runs a transition against an in-process scene provider.
    Simulate {
        target: String,
        #[arg(long)]
        alternate_loader: bool,
        #[arg(long, default_value_t = 4 * 1024 * 1024)]
        total_bytes: u64,
        #[arg(
            long,
            help = "Comma separated downloaded byte counts, one per tick, e.g. \"200,600,1000\". Generated when omitted"
        )]
        download_samples: Option<SampleList>,
        #[arg(long, default_value_t = 48)]
        sample_count: usize,
        #[arg(long, default_value_t = 1024 * 1024)]
        dependency_bytes: u64,
        #[arg(long, default_value_t = 24)]
        dependency_steps: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleList(pub Vec<u64>);

impl FromStr for SampleList {
    type Err = String;

    // 200, 600, 1000
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let string: String = s.chars().filter(|&c| !c.is_whitespace()).collect();
        if string.is_empty() {
            return Err("Empty sample list".to_string());
        }

        let samples = string
            .split(',')
            .map(|split| {
                split
                    .parse::<u64>()
                    .map_err(|err| format!("Invalid sample {:?}: {}", split, err))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if let Some((previous, next)) = samples
            .iter()
            .tuple_windows()
            .find(|(previous, next)| next < previous)
        {
            return Err(format!(
                "Samples have to be non-decreasing, but {} follows {}",
                next, previous
            ));
        }

        Ok(SampleList(samples))
    }
}

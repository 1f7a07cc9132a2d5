//! The transition pipeline: the orchestrator brings up the loading scene, the loading scene drives a
//! [`loading_state::SceneLoadingModel`] that loads, paces and activates the target, while the
//! [`display::ProgressDisplayDriver`] mirrors its progress into the loading screen widgets.

pub mod cancel;
pub mod display;
pub mod errors;
pub mod loading_screen;
pub mod loading_state;
pub mod orchestrator;
pub mod polling;
pub mod progress;
pub mod registry;
pub mod signal;

use clap::Parser;
use log::info;
use scene_transit::demos::Simulation;
use scene_transit::game::application::GameApplication;
use scene_transit::settings::{CliArgs, TransitionSettings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = CliArgs::parse();
    log::trace!("Starting with args: {:?}", args);

    let settings = TransitionSettings::from(&args);
    let simulation = Simulation::from_args(&args, &settings);
    let app = GameApplication::new(
        simulation.provider.clone(),
        simulation.bridge.clone(),
        simulation.fader.clone(),
        simulation.view.clone(),
        settings,
    );

    let result = app
        .transition_to(&simulation.target, simulation.alternate_loader)
        .await;
    app.shutdown();

    let model = result?;
    info!(
        "{} is up after {}ms, released {} load handles",
        model.target_scene().unwrap_or_default(),
        model.elapsed().unwrap_or_default().as_millis(),
        simulation.provider.released().len()
    );
    Ok(())
}

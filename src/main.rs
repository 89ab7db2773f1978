use deltakit::demo::run_simulated;
use deltakit::{init_logging_with, Config, Position, BUILD_DATE, VERSION};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional config path as the only argument
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = Config::load_or_default(path.as_deref())?;

    init_logging_with(&config.logging)?;
    tracing::info!("DeltaKit {} (built {})", VERSION, BUILD_DATE);

    let target = Position {
        x: 25.0,
        y: -10.0,
        z: 5.0,
    };
    let report = run_simulated(&config, target).await?;
    tracing::info!(
        "Done: {} commands, telemetry v{}, supervisor {}",
        report.commands_sent,
        report.version,
        report.labels.join(" -> ")
    );

    Ok(())
}

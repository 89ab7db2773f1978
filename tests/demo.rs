//! Headless walkthrough against the simulated device

use deltakit::demo::run_simulated;
use deltakit::{Config, Position};
use std::io::Write;

fn target() -> Position {
    Position {
        x: 25.0,
        y: -10.0,
        z: 5.0,
    }
}

#[tokio::test(start_paused = true)]
async fn test_walkthrough_with_defaults() {
    let report = run_simulated(&Config::default(), target()).await.unwrap();

    assert_eq!(
        report.labels,
        vec!["UNKNOWN", "IDLE", "ARMED", "MOVING", "ARMED", "IDLE"]
    );
    assert_eq!(report.final_position, Some(target()));
    // set_mode, arm, move_to, disarm
    assert_eq!(report.commands_sent, 4);
    assert!(report.version > 0);
}

#[tokio::test(start_paused = true)]
async fn test_walkthrough_with_config_file() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        "[telemetry]\ndefault_poll_interval_ms = 100\nmin_poll_interval_ms = 20\npoll_variables = [\"cpos\"]"
    )
    .unwrap();

    let config = Config::load_from_file(file.path()).unwrap();
    let report = run_simulated(&config, target()).await.unwrap();
    assert_eq!(report.labels.last().map(String::as_str), Some("IDLE"));
    assert_eq!(report.commands_sent, 4);
}

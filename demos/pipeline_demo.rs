//! Runs the stock sensor set for a short while and prints what it learned.
//!
//! ```sh
//! cargo run --example pipeline_demo
//! ```

use edge_sensor_agent::{config::Config, system::EdgeSystem, InferenceResult};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("warn").init();

    let root = std::env::temp_dir().join("edge-sensor-demo");
    let mut config = Config::default();
    config.data_path = root.join("data");
    config.export_path = root.join("exports");
    config.inference.interval = Duration::from_secs(3);
    config.learning.learner.update_threshold = 20;

    let mut system = EdgeSystem::new(config.clone()).with_insight_handler(Arc::new(
        |result: &InferenceResult| {
            println!("[{}]", result.timestamp.format("%H:%M:%S"));
            println!("{}", result.insights);
            println!();
        },
    ));
    let registered = system.setup_sensors()?;
    println!("Registered {registered} simulated sensors, running for 12s...");
    println!();

    let summary = system.run_for(Some(Duration::from_secs(12))).await?;

    println!("Samples: {}", summary.total_samples);
    println!("Update passes: {}", summary.update_count);
    println!("Anomaly bands: {}", summary.anomaly_thresholds_learned);
    for (sensor, clusters) in &summary.pattern_clusters {
        println!("  {sensor}: {clusters} centroids");
    }
    println!();
    println!("Learned parameters: {}", config.params_path().display());
    println!("Sensor log: {}", config.sensor_log_path().display());
    Ok(())
}

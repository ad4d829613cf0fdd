//! Edge Sensor Agent CLI
//!
//! Streams sensors, learns online and prints periodic insights.

use anyhow::Context;
use clap::{Parser, Subcommand};
use edge_sensor_agent::{
    config::Config,
    learner::LearnedParameters,
    system::EdgeSystem,
    transparency::TransparencyLog,
    LearningSummary, StopSignal, VERSION,
};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "edge-sensor")]
#[command(version = VERSION)]
#[command(about = "On-device sensor pipeline with online learning and scheduled insights", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start streaming sensors and producing insights
    Start {
        /// Stop after this many seconds (runs until Ctrl+C otherwise)
        #[arg(long)]
        duration: Option<f64>,

        /// llama.cpp-compatible completion server (requires http-model feature)
        #[arg(long)]
        model_url: Option<String>,

        /// Question asked on every inference tick
        #[arg(long)]
        query: Option<String>,

        /// Disable online learning
        #[arg(long)]
        no_learning: bool,

        /// Seconds between insights
        #[arg(long)]
        interval: Option<f64>,
    },

    /// Show persisted activity and learned state
    Status,

    /// List configured sensors
    Sensors,

    /// Show configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            duration,
            model_url,
            query,
            no_learning,
            interval,
        } => cmd_start(duration, model_url, query, no_learning, interval).await,
        Commands::Status => {
            cmd_status();
            Ok(())
        }
        Commands::Sensors => {
            cmd_sensors();
            Ok(())
        }
        Commands::Config => {
            cmd_config();
            Ok(())
        }
    }
}

async fn cmd_start(
    duration: Option<f64>,
    model_url: Option<String>,
    query: Option<String>,
    no_learning: bool,
    interval: Option<f64>,
) -> anyhow::Result<()> {
    let mut config = Config::load().context("loading configuration")?;

    if let Some(url) = model_url {
        config.inference.model_url = Some(url);
    }
    if query.is_some() {
        config.inference.query = query;
    }
    if no_learning {
        config.learning.enabled = false;
    }
    if let Some(secs) = interval {
        config.inference.interval =
            Duration::try_from_secs_f64(secs).context("invalid --interval")?;
    }
    let duration = duration
        .map(Duration::try_from_secs_f64)
        .transpose()
        .context("invalid --duration")?;
    config.validate()?;

    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Could not create directories: {e}");
    }

    println!("Edge Sensor Agent v{VERSION}");
    println!();
    println!("Starting pipeline...");
    println!("  Sensors: {}", config.sensors.len());
    println!(
        "  Learning: {}",
        if config.learning.enabled {
            "enabled"
        } else {
            "disabled"
        }
    );
    println!("  Inference interval: {:?}", config.inference.interval);

    let mut system = EdgeSystem::new(config.clone());
    system = attach_model(system, &config).await;

    system.setup_sensors()?;

    println!();
    match duration {
        Some(d) => println!("Running for {d:?} (Ctrl+C to stop early)"),
        None => println!("Press Ctrl+C to stop"),
    }
    println!();

    ctrlc_handler(system.stop_signal())?;

    let summary = system.run_for(duration).await?;

    println!();
    print_summary(&summary);
    println!();
    println!("{}", system.activity().summary());
    Ok(())
}

#[cfg(feature = "http-model")]
async fn attach_model(system: EdgeSystem, config: &Config) -> EdgeSystem {
    use edge_sensor_agent::inference::{LlamaClient, LlamaConfig};
    use std::sync::Arc;

    let Some(url) = &config.inference.model_url else {
        println!("  Model: none (rule-based insights)");
        return system;
    };

    let llama = LlamaConfig::new(url.clone()).with_timeout(config.inference.request_timeout);
    match LlamaClient::new(llama) {
        Ok(client) => {
            println!("  Model: {url}");
            match client.test_connection().await {
                Ok(true) => println!("  Model connection: OK"),
                Ok(false) => eprintln!("Warning: Model health check failed"),
                Err(e) => eprintln!("Warning: Could not connect to model server: {e}"),
            }
            system.with_model(Arc::new(client))
        }
        Err(e) => {
            eprintln!("Warning: Model client initialization failed: {e}");
            eprintln!("Continuing with rule-based insights.");
            system
        }
    }
}

#[cfg(not(feature = "http-model"))]
async fn attach_model(system: EdgeSystem, config: &Config) -> EdgeSystem {
    if config.inference.model_url.is_some() {
        eprintln!("Warning: model URL ignored (http-model feature not enabled at compile time)");
    }
    println!("  Model: none (rule-based insights)");
    system
}

fn print_summary(summary: &LearningSummary) {
    println!("Learning Summary:");
    println!("  Samples seen: {}", summary.total_samples);
    println!("  Update passes: {}", summary.update_count);
    println!("  Features tracked: {}", summary.features_tracked);
    println!(
        "  Anomaly thresholds learned: {}",
        summary.anomaly_thresholds_learned
    );
    for (sensor_id, count) in &summary.pattern_clusters {
        println!("  Clusters for {sensor_id}: {count}");
    }
    println!(
        "  Buffer utilization: {:.1}%",
        summary.buffer_utilization * 100.0
    );
}

fn cmd_status() {
    let config = Config::load().unwrap_or_default();

    println!("Edge Sensor Agent Status");
    println!("========================");
    println!();

    println!("Configuration:");
    println!("  Sensors: {}", config.sensors.len());
    println!("  Learning enabled: {}", config.learning.enabled);
    println!("  Inference interval: {:?}", config.inference.interval);
    println!(
        "  Model URL: {}",
        config.inference.model_url.as_deref().unwrap_or("none")
    );
    println!();

    let activity_path = config.activity_path();
    if activity_path.exists() {
        let log = TransparencyLog::with_persistence(activity_path);
        let stats = log.stats();
        println!("Cumulative Statistics:");
        println!("  Readings processed: {}", stats.readings_processed);
        println!("  Readings dropped: {}", stats.readings_dropped);
        println!("  Readings lost to backlog: {}", stats.readings_backlogged);
        println!("  Experiences added: {}", stats.experiences_added);
        println!("  Anomalies detected: {}", stats.anomalies_detected);
        println!("  Learning updates: {}", stats.learning_updates);
        println!(
            "  Insights: {} model, {} fallback",
            stats.model_responses, stats.fallback_responses
        );
    } else {
        println!("No previous session data found.");
    }
    println!();

    let params_path = config.params_path();
    match LearnedParameters::read(&params_path) {
        Ok(params) => {
            println!("Learned Parameters ({params_path:?}):");
            println!("  Update passes: {}", params.metadata.update_count);
            println!("  Samples seen: {}", params.metadata.total_samples);
            println!("  Feature weights: {}", params.feature_weights.len());
            println!("  Anomaly thresholds: {}", params.anomaly_thresholds.len());
            println!("  Clustered sensors: {}", params.pattern_clusters.len());
            println!("  Saved at: {}", params.metadata.saved_at);
        }
        Err(_) if !params_path.exists() => println!("No learned parameters saved yet."),
        Err(e) => eprintln!("Warning: Could not read learned parameters: {e}"),
    }
}

fn cmd_sensors() {
    let config = Config::load().unwrap_or_default();

    println!("Configured Sensors");
    println!("==================");
    println!();
    if config.sensors.is_empty() {
        println!("No sensors configured.");
        return;
    }
    for spec in &config.sensors {
        let sensor = spec.build();
        let kind = edge_sensor_agent::Sensor::kind(&sensor);
        let rate = edge_sensor_agent::Sensor::sampling_rate(&sensor);
        println!("  {:<20} {:<14} {rate} Hz", spec.id(), kind.label());
    }
}

fn cmd_config() {
    let config = Config::load().unwrap_or_default();

    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|_| "Error".to_string())
    );
}

/// Raise the stop signal on Ctrl+C.
fn ctrlc_handler(stop: StopSignal) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        println!();
        println!("Stopping...");
        stop.trigger();
    })
    .context("setting Ctrl+C handler")
}

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;

use sentinelx::config::{Config, LoggingConfig};
use sentinelx::detect::engine::AnomalyEngine;
use sentinelx::detect::ModelMetrics;
use sentinelx::telemetry::synthetic;

#[derive(Parser)]
#[command(
    name = "sentinelx",
    about = "Ensemble anomaly detection for satellite telemetry",
    version,
    long_about = None
)]
struct Cli {
    /// Path to a TOML config file (default: $SENTINELX_CONFIG, then /etc/sentinelx/sentinelx.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon (API server + retraining loop)
    Serve {
        /// Bind address (overrides [service].bind)
        #[arg(long)]
        bind: Option<String>,

        /// SQLite database path (overrides [service].db_path)
        #[arg(long)]
        db: Option<String>,
    },

    /// Train the ensemble on a synthetic corpus and print its metrics
    Train {
        /// Nominal samples to generate (plus 10% anomalies)
        #[arg(long, default_value = "2000")]
        samples: usize,

        /// Fix the random source (overrides [engine].seed)
        #[arg(long)]
        seed: Option<u64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Train, then stream labelled synthetic telemetry through a fleet
    Simulate {
        /// Nominal samples in the training corpus
        #[arg(long, default_value = "2000")]
        train_samples: usize,

        /// Number of simulated satellites
        #[arg(long, default_value = "4")]
        entities: usize,

        /// Samples sent per satellite
        #[arg(long, default_value = "25")]
        steps: usize,

        /// Probability that a streamed sample is anomalous
        #[arg(long, default_value = "0.1")]
        anomaly_rate: f64,

        #[arg(long)]
        seed: Option<u64>,

        /// JSON output for machine parsing
        #[arg(long)]
        json: bool,
    },

    /// Write a synthetic telemetry corpus as JSON
    Generate {
        /// Nominal samples to generate (plus 10% anomalies)
        #[arg(long, default_value = "2000")]
        samples: usize,

        /// Include each sample's ground-truth shape
        #[arg(long)]
        labeled: bool,

        #[arg(long)]
        seed: Option<u64>,

        /// Output file (stdout when omitted)
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn rng_for(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

fn print_metrics(metrics: &ModelMetrics) {
    println!("\n=== sentinelx Training Report ===");
    println!("{:<18} | {:>10}", "Metric", "Value");
    println!("{:-<18}-|-{:->10}", "", "");
    println!("{:<18} | {:>9.1}%", "Accuracy", metrics.accuracy);
    println!("{:<18} | {:>9.1}%", "Precision", metrics.precision);
    println!("{:<18} | {:>9.1}%", "Recall", metrics.recall);
    println!("{:<18} | {:>9.1}%", "F1 score", metrics.f1_score);
    println!("{:<18} | {:>10.4}", "Training loss", metrics.training_loss);
    println!("{:<18} | {:>10.4}", "Validation loss", metrics.validation_loss);
    println!("{:<18} | {:>10.4}", "CNN loss", metrics.cnn_loss);
    println!("{:<18} | {:>10}", "Samples", metrics.samples_processed);
    println!("=================================\n");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(),
    };
    init_tracing(&config.logging);

    match cli.command {
        Commands::Serve { bind, db } => {
            if let Some(bind) = bind {
                config.service.bind = bind;
            }
            if let Some(db) = db {
                config.service.db_path = db;
            }
            tracing::info!(bind = %config.service.bind, "Starting sentinelx daemon");
            sentinelx::serve(config).await?;
        }
        Commands::Train { samples, seed, json } => {
            if seed.is_some() {
                config.engine.seed = seed;
            }
            let engine = AnomalyEngine::new(config.engine.clone())?;
            let corpus = synthetic::generate_synthetic_training_data_with(samples, &mut rng_for(seed));
            tracing::info!(samples = corpus.len(), "Training on synthetic corpus");

            let metrics = tokio::task::spawn_blocking(move || engine.train(&corpus)).await??;
            if json {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
            } else {
                print_metrics(&metrics);
            }
        }
        Commands::Simulate {
            train_samples,
            entities,
            steps,
            anomaly_rate,
            seed,
            json,
        } => {
            if seed.is_some() {
                config.engine.seed = seed;
            }
            let engine = AnomalyEngine::new(config.engine.clone())?;
            let report = tokio::task::spawn_blocking(move || -> Result<_> {
                let mut rng = rng_for(seed);
                let corpus = synthetic::generate_synthetic_training_data_with(train_samples, &mut rng);
                engine.train(&corpus)?;
                let report = sentinelx::simulate::run(&engine, entities, steps, anomaly_rate, &mut rng)?;
                Ok(report)
            })
            .await??;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{:<8} | {:<14} | {:<5} | {:<26} | {:<8} | Conf",
                    "Entity", "Injected", "Flag", "Category", "Severity"
                );
                println!("{:-<8}-|-{:-<14}-|-{:-<5}-|-{:-<26}-|-{:-<8}-|-{:-<4}", "", "", "", "", "", "");
                for row in report.verdicts.iter().filter(|r| r.verdict.is_anomaly || r.shape.is_anomaly()) {
                    let v = &row.verdict;
                    println!(
                        "{:<8} | {:<14} | {:<5} | {:<26} | {:<8} | {:>3}%",
                        v.entity_id,
                        format!("{:?}", row.shape),
                        if v.is_anomaly { "YES" } else { "no" },
                        v.anomaly_type.as_str(),
                        v.severity.as_str(),
                        v.confidence
                    );
                }
                let c = &report.confusion;
                println!("\n=== Confusion Summary ===");
                println!("TP {}  FP {}  TN {}  FN {}", c.true_positives, c.false_positives, c.true_negatives, c.false_negatives);
                println!(
                    "Accuracy {:.1}%  Precision {:.1}%  Recall {:.1}%",
                    c.accuracy() * 100.0,
                    c.precision() * 100.0,
                    c.recall() * 100.0
                );
            }
        }
        Commands::Generate {
            samples,
            labeled,
            seed,
            output,
        } => {
            let mut rng = rng_for(seed);
            let json = if labeled {
                serde_json::to_string_pretty(&synthetic::generate_labeled(samples, &mut rng))?
            } else {
                serde_json::to_string_pretty(&synthetic::generate_synthetic_training_data_with(samples, &mut rng))?
            };
            match output {
                Some(path) => {
                    std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
                    tracing::info!(path = %path.display(), "Synthetic corpus written");
                }
                None => println!("{}", json),
            }
        }
    }

    Ok(())
}

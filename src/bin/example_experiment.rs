//! Run the RandomForest sweep against an MLflow tracking server.
//!
//! Configuration comes from the environment (and `.env`); flags override it.

use anyhow::Context;
use clap::Parser;
use figment::providers::Serialized;
use forest_sweep::config::ExperimentConfig;
use forest_sweep::experiment::run_experiment;
use forest_sweep::tracking::MlflowClient;
use serde::Serialize;

#[derive(Debug, Parser, Serialize)]
#[command(name = "example-experiment", version, about = "RandomForest grid sweep tracked in MLflow")]
struct Cli {
    /// Repetitions of every (n_estimators, criterion) pair
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    n_tests: Option<usize>,

    /// Dataset location: s3://bucket/key, file://path or a local path
    #[arg(long = "data")]
    #[serde(rename = "data_location", skip_serializing_if = "Option::is_none")]
    data: Option<String>,

    /// Pin the split and forest seeds
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,

    /// Keep running the remaining trials when one fails
    #[arg(long)]
    #[serde(skip)]
    keep_going: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();
    forest_sweep::logging::init();

    let cli = Cli::parse();
    let mut figment = ExperimentConfig::figment().merge(Serialized::defaults(&cli));
    if cli.keep_going {
        figment = figment.merge(Serialized::default("fail_fast", false));
    }
    let config = ExperimentConfig::from_figment(&figment).context("invalid configuration")?;

    let client = MlflowClient::new(&config.tracking_uri)?;
    let report = run_experiment(&config, &client).await?;

    let failures = report.failures();
    if let Some(best) = report.best_by_accuracy() {
        tracing::info!(
            run_name = %best.params.run_name(),
            accuracy = best.metrics().map_or(0.0, |m| m.accuracy_score),
            "best trial"
        );
    }
    if !failures.is_empty() {
        for failure in &failures {
            if let Err(message) = &failure.result {
                eprintln!("{}: {message}", failure.params.run_name());
            }
        }
        anyhow::bail!(
            "{} of {} trials failed",
            failures.len(),
            report.outcomes.len()
        );
    }
    Ok(())
}

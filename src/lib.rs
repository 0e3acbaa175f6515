//! # forest-sweep: RandomForest Sweeps Tracked in MLflow
//!
//! **Version**: 0.1.0
//!
//! Two pieces:
//!
//! - **Dataset preparer** ([`dataset::iris`]): writes the bundled Iris
//!   dataset to `data/iris.csv`.
//! - **Experiment runner** ([`experiment`]): loads a dataset from local disk
//!   or S3, splits it once, and runs a grid of RandomForest trials
//!   (`n_estimators` x `criterion` x repetitions), logging params, the
//!   fitted model and evaluation metrics to a tracking backend.
//!
//! ## Design Principles (Toyota Way Aligned)
//!
//! - **Jidoka**: Every tracking run is closed with a terminal status; a
//!   failed trial stops the line unless `--keep-going` is set
//! - **Poka-Yoke**: The test partition is split once and shared read-only,
//!   so every trial is scored on identical data
//! - **Genchi Genbutsu**: Models are logged with their input example and
//!   signature, so what was trained can be inspected later
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use forest_sweep::config::ExperimentConfig;
//! use forest_sweep::experiment::run_experiment;
//! use forest_sweep::tracking::MlflowClient;
//!
//! # async fn example() -> forest_sweep::Result<()> {
//! let config = ExperimentConfig::load()?;
//! let client = MlflowClient::new(&config.tracking_uri)?;
//! let report = run_experiment(&config, &client).await?;
//! println!("{} trials, {} failed", report.outcomes.len(), report.failures().len());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod dataset;
pub mod error;
pub mod evaluate;
pub mod experiment;
pub mod logging;
pub mod model;
pub mod storage;
pub mod tracking;

pub use error::{Error, Result};

//! RandomForest hyperparameter sweep
//!
//! ```text
//! set_experiment(prefix-<now>)
//!   └─ load dataset ─ split once ─ EvaluationDataset (shared)
//!        └─ for n_estimators in {32, 64, 128}
//!             for criterion in {gini, entropy, log_loss}
//!               for repetition in 0..n_tests
//!                 create_run ─ log_params ─ fit ─ log_model ─ evaluate ─ end_run
//! ```
//!
//! Trials run sequentially; the trees of one forest are fitted in parallel.
//! Every run is closed with a terminal status, whether the trial succeeded
//! or not.

mod grid;
mod report;
mod runner;

pub use grid::{ParamGrid, TrialParams, N_ESTIMATORS};
pub use report::{SweepReport, TrialOutcome};
pub use runner::{experiment_name, run_experiment, run_sweep, PreparedData};

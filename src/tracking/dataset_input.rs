//! Dataset Input - a dataset consumed by a run

use serde::{Deserialize, Serialize};

/// A dataset logged as a run input.
///
/// `source`, `schema` and `profile` are JSON documents kept as strings,
/// which is how the tracking API transports them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatasetInput {
    /// Dataset name
    pub name: String,
    /// Short content digest; equal digests mean equal data
    pub digest: String,
    /// Kind of source (`s3`, `local`, `code`)
    pub source_type: String,
    /// Source descriptor (JSON)
    pub source: String,
    /// Column schema (JSON)
    pub schema: Option<String>,
    /// Row and element counts (JSON)
    pub profile: Option<String>,
    /// How the run used the dataset (`training`, `eval`)
    pub context: String,
}

impl DatasetInput {
    /// Tag key carrying the usage context.
    pub const CONTEXT_TAG: &'static str = "mlflow.data.context";
}

//! Model logging in the MLflow model layout
//!
//! A logged model is a directory under the run's artifacts:
//!
//! ```text
//! model/
//! ├── MLmodel              (YAML descriptor: flavor, signature, example info)
//! ├── model.json           (serialized forest)
//! └── input_example.json   (first training row, split orientation)
//! ```

use super::{RunRecord, TrackingBackend};
use crate::dataset::{Features, Target};
use crate::model::RandomForestClassifier;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Artifact directory the model is logged under.
pub const MODEL_ARTIFACT_PATH: &str = "model";

/// Flavor name written to `MLmodel`.
const FLAVOR_NAME: &str = "forest_sweep";
const MODEL_DATA_FILE: &str = "model.json";
const INPUT_EXAMPLE_FILE: &str = "input_example.json";
const MLMODEL_FILE: &str = "MLmodel";
const HISTORY_TAG: &str = "mlflow.log-model.history";
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// One column of a model signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// MLflow data type (`double`, `long`)
    #[serde(rename = "type")]
    pub data_type: String,
    /// Column name
    pub name: String,
    /// Always true for inferred columns
    pub required: bool,
}

impl ColumnSpec {
    fn new(data_type: &str, name: impl Into<String>) -> Self {
        Self {
            data_type: data_type.to_string(),
            name: name.into(),
            required: true,
        }
    }
}

/// Input and output schema of a logged model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSignature {
    /// Feature columns
    pub inputs: Vec<ColumnSpec>,
    /// Prediction columns
    pub outputs: Vec<ColumnSpec>,
}

impl ModelSignature {
    /// Infer from training data: every feature is `double`, the label is `long`.
    #[must_use]
    pub fn infer(features: &Features, target: &Target) -> Self {
        Self {
            inputs: features
                .names()
                .into_iter()
                .map(|name| ColumnSpec::new("double", name))
                .collect(),
            outputs: vec![ColumnSpec::new("long", target.name())],
        }
    }
}

/// What was logged, and how to refer to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Run the model belongs to
    pub run_id: String,
    /// Artifact directory (`model`)
    pub artifact_path: String,
    /// `runs:/<run_id>/<artifact_path>`
    pub model_uri: String,
    /// Unique id of this logged model
    pub model_uuid: String,
    /// Flavor written to `MLmodel`
    pub flavor: String,
    /// Inferred signature
    pub signature: ModelSignature,
    /// Logging time
    pub utc_time_created: DateTime<Utc>,
}

#[derive(Serialize)]
struct FlavorConfig {
    model_format: &'static str,
    data: &'static str,
    n_estimators: usize,
    criterion: String,
    classes: Vec<i64>,
}

#[derive(Serialize)]
struct InputExampleInfo {
    artifact_path: &'static str,
    #[serde(rename = "type")]
    example_type: &'static str,
    pandas_orient: &'static str,
}

/// Signature columns as embedded JSON strings, as MLflow stores them.
#[derive(Serialize)]
struct SignatureStrings {
    inputs: String,
    outputs: String,
}

#[derive(Serialize)]
struct MlModelFile<'a> {
    artifact_path: &'a str,
    flavors: BTreeMap<&'static str, FlavorConfig>,
    model_uuid: &'a str,
    run_id: &'a str,
    saved_input_example_info: InputExampleInfo,
    signature: SignatureStrings,
    utc_time_created: String,
}

#[derive(Serialize)]
struct InputExample {
    columns: Vec<String>,
    data: Vec<Vec<f64>>,
}

/// Serialized form stored as `model/model.json`.
///
/// # Errors
/// Returns error if the forest cannot be serialized
pub fn model_json(model: &RandomForestClassifier) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(model)?)
}

/// Rebuild a forest from `model/model.json` contents.
///
/// # Errors
/// Returns error if `bytes` is not a serialized forest
pub fn load_model_json(bytes: &[u8]) -> Result<RandomForestClassifier> {
    Ok(serde_json::from_slice(bytes)?)
}

/// Log a fitted forest as the run's `model` artifact.
///
/// The first row of `x_train` becomes the input example and the signature
/// is inferred from `x_train` and `y_train`. Also records the model in the
/// run's `mlflow.log-model.history` tag.
///
/// # Errors
/// Returns error if `x_train` is empty or any upload fails
pub async fn log_model(
    tracker: &impl TrackingBackend,
    run: &RunRecord,
    model: &RandomForestClassifier,
    x_train: &Features,
    y_train: &Target,
) -> Result<ModelInfo> {
    let example_row = x_train
        .row(0)
        .ok_or_else(|| Error::InvalidInput("cannot log a model without an input example".to_string()))?;

    let signature = ModelSignature::infer(x_train, y_train);
    let model_uuid = uuid::Uuid::new_v4().simple().to_string();
    let created = Utc::now();

    let example = InputExample {
        columns: x_train.names(),
        data: vec![example_row],
    };

    let mut flavors = BTreeMap::new();
    flavors.insert(
        FLAVOR_NAME,
        FlavorConfig {
            model_format: "json",
            data: MODEL_DATA_FILE,
            n_estimators: model.params().n_estimators,
            criterion: model.params().criterion.to_string(),
            classes: model.classes().to_vec(),
        },
    );
    let descriptor = MlModelFile {
        artifact_path: MODEL_ARTIFACT_PATH,
        flavors,
        model_uuid: &model_uuid,
        run_id: run.run_id(),
        saved_input_example_info: InputExampleInfo {
            artifact_path: INPUT_EXAMPLE_FILE,
            example_type: "dataframe",
            pandas_orient: "split",
        },
        signature: SignatureStrings {
            inputs: serde_json::to_string(&signature.inputs)?,
            outputs: serde_json::to_string(&signature.outputs)?,
        },
        utc_time_created: created.format(TIME_FORMAT).to_string(),
    };

    let file = |name: &str| format!("{MODEL_ARTIFACT_PATH}/{name}");
    tracker
        .log_artifact(run, &file(MODEL_DATA_FILE), model_json(model)?)
        .await?;
    tracker
        .log_artifact(run, &file(INPUT_EXAMPLE_FILE), serde_json::to_vec(&example)?)
        .await?;
    tracker
        .log_artifact(run, &file(MLMODEL_FILE), serde_yaml::to_string(&descriptor)?.into_bytes())
        .await?;

    let history = serde_json::json!([{
        "run_id": run.run_id(),
        "artifact_path": MODEL_ARTIFACT_PATH,
        "utc_time_created": descriptor.utc_time_created,
        "flavors": descriptor.flavors,
        "model_uuid": model_uuid,
    }]);
    tracker
        .set_tag(run.run_id(), HISTORY_TAG, &history.to_string())
        .await?;

    tracing::debug!(run_id = run.run_id(), model_uuid = %model_uuid, "logged model");

    Ok(ModelInfo {
        run_id: run.run_id().to_string(),
        artifact_path: MODEL_ARTIFACT_PATH.to_string(),
        model_uri: format!("runs:/{}/{MODEL_ARTIFACT_PATH}", run.run_id()),
        model_uuid,
        flavor: FLAVOR_NAME.to_string(),
        signature,
        utc_time_created: created,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{iris, SPECIES_COLUMN, TARGET_COLUMN};
    use crate::model::RandomForestParams;
    use crate::tracking::MemoryTracker;

    async fn logged() -> (MemoryTracker, RunRecord, ModelInfo) {
        let dataset = iris::load_iris().unwrap();
        let (x, y) = dataset
            .features_and_target(TARGET_COLUMN, &[SPECIES_COLUMN])
            .unwrap();
        let model = RandomForestParams::new(4)
            .random_state(0)
            .fit(&x.to_matrix().unwrap(), &y.labels())
            .unwrap();

        let tracker = MemoryTracker::new();
        let exp = tracker.set_experiment("models").await.unwrap();
        let run = tracker.create_run(exp.experiment_id(), None).await.unwrap();
        let info = log_model(&tracker, &run, &model, &x, &y).await.unwrap();
        (tracker, run, info)
    }

    #[tokio::test]
    async fn test_log_model_uploads_layout() {
        let (tracker, run, info) = logged().await;
        assert_eq!(info.model_uri, format!("runs:/{}/model", run.run_id()));

        let paths: Vec<String> = tracker
            .artifacts_for_run(run.run_id())
            .iter()
            .map(|a| a.path().to_string())
            .collect();
        assert_eq!(
            paths,
            vec!["model/MLmodel", "model/input_example.json", "model/model.json"]
        );
        assert!(tracker
            .tags_for_run(run.run_id())
            .contains_key("mlflow.log-model.history"));
    }

    #[tokio::test]
    async fn test_input_example_is_first_row() {
        let (tracker, run, _) = logged().await;
        let bytes = tracker
            .artifact(run.run_id(), "model/input_example.json")
            .unwrap();
        let example: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(example["columns"][0], "sepal length (cm)");
        assert_eq!(example["data"][0], serde_json::json!([5.1, 3.5, 1.4, 0.2]));
    }

    #[tokio::test]
    async fn test_mlmodel_descriptor_and_signature() {
        let (tracker, run, info) = logged().await;
        let yaml = String::from_utf8(tracker.artifact(run.run_id(), "model/MLmodel").unwrap()).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(doc["artifact_path"].as_str(), Some("model"));
        assert_eq!(doc["run_id"].as_str(), Some(run.run_id()));
        assert_eq!(doc["flavors"]["forest_sweep"]["n_estimators"].as_u64(), Some(4));

        assert_eq!(info.signature.inputs.len(), 4);
        assert!(info.signature.inputs.iter().all(|c| c.data_type == "double"));
        assert_eq!(info.signature.outputs[0].name, "target");
    }

    #[tokio::test]
    async fn test_logged_model_json_loads_back() {
        let (tracker, run, _) = logged().await;
        let bytes = tracker.artifact(run.run_id(), "model/model.json").unwrap();
        let model = load_model_json(&bytes).unwrap();
        assert_eq!(model.trees().len(), 4);
    }
}

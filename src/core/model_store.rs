// Classifier artifact store
// Maps exercise identifiers to trained posture classifiers and loads them from disk

use crate::models::exercise::{FeatureVector, LabelEncoding};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

// ==============================================================================
// Error Types
// ==============================================================================

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Unsupported exercise: {0}")]
    UnsupportedExercise(String),

    #[error("Model loading failed for {exercise}: {reason}")]
    ModelLoadFailed { exercise: String, reason: String },

    #[error("Prediction failed: {0}")]
    PredictionFailed(String),
}

pub type ClassifierResult<T> = Result<T, ClassifierError>;

// ==============================================================================
// Model Trait
// ==============================================================================

/// A trained posture classifier for one exercise
///
/// Returns the artifact's raw class code; decoding to a posture label is the
/// caller's job because the code table belongs to the artifact version.
pub trait ExerciseModel: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> ClassifierResult<i64>;

    /// Short description for logs
    fn describe(&self) -> String;
}

// ==============================================================================
// Exercise Registry
// ==============================================================================

/// One row of the exercise table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExerciseEntry {
    pub id: String,
    /// Artifact file stem under the model directory
    pub artifact: String,
    pub encoding: LabelEncoding,
}

impl ExerciseEntry {
    pub fn new(id: &str, artifact: &str, encoding: LabelEncoding) -> Self {
        Self {
            id: id.to_string(),
            artifact: artifact.to_string(),
            encoding,
        }
    }
}

/// Fixed table of supported exercises and where their artifacts live
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    model_dir: PathBuf,
    entries: Vec<ExerciseEntry>,
}

impl ModelRegistry {
    /// The exercises shipped with the application
    pub fn builtin(model_dir: PathBuf) -> Self {
        Self::with_entries(
            model_dir,
            vec![
                ExerciseEntry::new("tiron_pecho", "TironAlPecho", LabelEncoding::V1),
                ExerciseEntry::new("bicep", "bicep", LabelEncoding::V1),
            ],
        )
    }

    pub fn with_entries(model_dir: PathBuf, entries: Vec<ExerciseEntry>) -> Self {
        Self { model_dir, entries }
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    pub fn lookup(&self, exercise_id: &str) -> ClassifierResult<&ExerciseEntry> {
        self.entries
            .iter()
            .find(|entry| entry.id == exercise_id)
            .ok_or_else(|| ClassifierError::UnsupportedExercise(exercise_id.to_string()))
    }

    pub fn is_supported(&self, exercise_id: &str) -> bool {
        self.lookup(exercise_id).is_ok()
    }

    pub fn supported_exercises(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.id.clone()).collect()
    }
}

// ==============================================================================
// Artifact Loading
// ==============================================================================

/// Loads the artifact for a registry entry
pub trait ArtifactLoader: Send + Sync {
    fn load(&self, entry: &ExerciseEntry, model_dir: &Path) -> ClassifierResult<Arc<dyn ExerciseModel>>;
}

/// Loads `<artifact>.json` natively, falling back to `<artifact>.pkl` through Python
#[derive(Debug, Clone, Copy, Default)]
pub struct FileArtifactLoader;

impl ArtifactLoader for FileArtifactLoader {
    fn load(&self, entry: &ExerciseEntry, model_dir: &Path) -> ClassifierResult<Arc<dyn ExerciseModel>> {
        let json_path = model_dir.join(format!("{}.json", entry.artifact));
        if json_path.exists() {
            let model = NativeModel::from_path(&json_path, entry)?;
            return Ok(Arc::new(model));
        }

        let pickle_path = model_dir.join(format!("{}.pkl", entry.artifact));
        if pickle_path.exists() {
            return load_pickle(&pickle_path, entry);
        }

        Err(ClassifierError::ModelLoadFailed {
            exercise: entry.id.clone(),
            reason: format!(
                "no artifact named {} (.json or .pkl) in {}",
                entry.artifact,
                model_dir.display()
            ),
        })
    }
}

#[cfg(feature = "ml-pyo3")]
fn load_pickle(path: &Path, entry: &ExerciseEntry) -> ClassifierResult<Arc<dyn ExerciseModel>> {
    let model = pyo3_backend::JoblibModel::load(path, entry)?;
    Ok(Arc::new(model))
}

#[cfg(not(feature = "ml-pyo3"))]
fn load_pickle(path: &Path, entry: &ExerciseEntry) -> ClassifierResult<Arc<dyn ExerciseModel>> {
    Err(ClassifierError::ModelLoadFailed {
        exercise: entry.id.clone(),
        reason: format!(
            "{} is a Python artifact; rebuild with the 'ml-pyo3' feature to load it",
            path.display()
        ),
    })
}

// ==============================================================================
// Native Artifacts (JSON)
// ==============================================================================

/// On-disk JSON artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NativeArtifact {
    pub label_encoding: LabelEncoding,
    pub model: NativeModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NativeModel {
    /// Flat binary tree; `features[feature] <= threshold` descends left
    DecisionTree { nodes: Vec<TreeNode> },
    /// Class of the closest centroid (Euclidean); ties go to the first listed
    NearestCentroid { centroids: Vec<Centroid> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        class: i64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub class: i64,
    pub centroid: [f64; FeatureVector::LEN],
}

impl NativeModel {
    /// Read and validate an artifact, checking its label encoding against the entry
    pub fn from_path(path: &Path, entry: &ExerciseEntry) -> ClassifierResult<Self> {
        let load_failed = |reason: String| ClassifierError::ModelLoadFailed {
            exercise: entry.id.clone(),
            reason,
        };

        let contents = std::fs::read_to_string(path)
            .map_err(|e| load_failed(format!("{}: {}", path.display(), e)))?;
        let artifact: NativeArtifact = serde_json::from_str(&contents)
            .map_err(|e| load_failed(format!("{}: {}", path.display(), e)))?;

        if artifact.label_encoding != entry.encoding {
            return Err(load_failed(format!(
                "artifact label encoding {} does not match expected {}",
                artifact.label_encoding.to_string(),
                entry.encoding.to_string()
            )));
        }

        artifact.model.validate().map_err(load_failed)?;
        Ok(artifact.model)
    }

    /// Structural checks so prediction cannot index out of bounds or loop
    pub fn validate(&self) -> Result<(), String> {
        match self {
            NativeModel::DecisionTree { nodes } => {
                if nodes.is_empty() {
                    return Err("decision tree has no nodes".to_string());
                }
                for (index, node) in nodes.iter().enumerate() {
                    if let TreeNode::Split {
                        feature,
                        threshold,
                        left,
                        right,
                    } = node
                    {
                        if *feature >= FeatureVector::LEN {
                            return Err(format!("node {} splits on unknown feature {}", index, feature));
                        }
                        if !threshold.is_finite() {
                            return Err(format!("node {} has a non-finite threshold", index));
                        }
                        // Children after their parent keeps every walk finite
                        for child in [*left, *right] {
                            if child <= index || child >= nodes.len() {
                                return Err(format!("node {} has invalid child {}", index, child));
                            }
                        }
                    }
                }
                Ok(())
            }
            NativeModel::NearestCentroid { centroids } => {
                if centroids.is_empty() {
                    return Err("nearest centroid model has no centroids".to_string());
                }
                if centroids
                    .iter()
                    .any(|c| c.centroid.iter().any(|v| !v.is_finite()))
                {
                    return Err("centroid with non-finite coordinate".to_string());
                }
                Ok(())
            }
        }
    }
}

impl ExerciseModel for NativeModel {
    fn predict(&self, features: &FeatureVector) -> ClassifierResult<i64> {
        match self {
            NativeModel::DecisionTree { nodes } => {
                let mut index = 0;
                loop {
                    match nodes.get(index) {
                        Some(TreeNode::Leaf { class }) => return Ok(*class),
                        Some(TreeNode::Split {
                            feature,
                            threshold,
                            left,
                            right,
                        }) => {
                            let value = features.get(*feature).ok_or_else(|| {
                                ClassifierError::PredictionFailed(format!("unknown feature {}", feature))
                            })?;
                            index = if value <= *threshold { *left } else { *right };
                        }
                        None => {
                            return Err(ClassifierError::PredictionFailed(format!(
                                "tree walk reached missing node {}",
                                index
                            )))
                        }
                    }
                }
            }
            NativeModel::NearestCentroid { centroids } => {
                let point = features.as_array();
                let mut best: Option<(i64, f64)> = None;
                for centroid in centroids {
                    let distance = point
                        .iter()
                        .zip(centroid.centroid.iter())
                        .map(|(p, c)| (p - c) * (p - c))
                        .sum::<f64>();
                    if best.map_or(true, |(_, d)| distance < d) {
                        best = Some((centroid.class, distance));
                    }
                }
                best.map(|(class, _)| class).ok_or_else(|| {
                    ClassifierError::PredictionFailed("model has no centroids".to_string())
                })
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            NativeModel::DecisionTree { nodes } => format!("native decision tree ({} nodes)", nodes.len()),
            NativeModel::NearestCentroid { centroids } => {
                format!("native nearest centroid ({} classes)", centroids.len())
            }
        }
    }
}

impl fmt::Debug for dyn ExerciseModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

// ==============================================================================
// PyO3 Implementation (scikit-learn artifacts via joblib)
// ==============================================================================

#[cfg(feature = "ml-pyo3")]
pub mod pyo3_backend {
    use super::*;
    use pyo3::prelude::*;
    use pyo3::types::PyList;

    /// A pickled scikit-learn estimator loaded with `joblib.load`
    pub struct JoblibModel {
        estimator: PyObject,
        path: PathBuf,
    }

    impl JoblibModel {
        pub fn load(path: &Path, entry: &ExerciseEntry) -> ClassifierResult<Self> {
            Python::with_gil(|py| {
                let joblib = py.import_bound("joblib").map_err(|e| ClassifierError::ModelLoadFailed {
                    exercise: entry.id.clone(),
                    reason: format!("Failed to import joblib: {}", e),
                })?;
                let estimator = joblib
                    .call_method1("load", (path.to_string_lossy().to_string(),))
                    .map_err(|e| ClassifierError::ModelLoadFailed {
                        exercise: entry.id.clone(),
                        reason: format!("joblib.load({}) failed: {}", path.display(), e),
                    })?;

                Ok(Self {
                    estimator: estimator.unbind(),
                    path: path.to_path_buf(),
                })
            })
        }
    }

    impl ExerciseModel for JoblibModel {
        fn predict(&self, features: &FeatureVector) -> ClassifierResult<i64> {
            Python::with_gil(|py| {
                let row = PyList::new_bound(py, features.as_array());
                let rows = PyList::new_bound(py, [row]);
                let prediction = self
                    .estimator
                    .bind(py)
                    .call_method1("predict", (rows,))
                    .map_err(|e| ClassifierError::PredictionFailed(e.to_string()))?;
                let first = prediction
                    .get_item(0)
                    .map_err(|e| ClassifierError::PredictionFailed(e.to_string()))?;
                // numpy integer scalars convert through int()
                first
                    .call_method0("__int__")
                    .and_then(|code| code.extract::<i64>())
                    .map_err(|e| ClassifierError::PredictionFailed(e.to_string()))
            })
        }

        fn describe(&self) -> String {
            format!("joblib estimator ({})", self.path.display())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const RAISED_BELOW_90: &str = r#"{
        "label_encoding": "v1",
        "model": {
            "kind": "decision_tree",
            "nodes": [
                {"feature": 0, "threshold": 90.0, "left": 1, "right": 2},
                {"class": 0},
                {"class": 2}
            ]
        }
    }"#;

    fn entry(id: &str, artifact: &str) -> ExerciseEntry {
        ExerciseEntry::new(id, artifact, LabelEncoding::V1)
    }

    #[test]
    fn test_builtin_registry() {
        let registry = ModelRegistry::builtin(PathBuf::from("models"));
        assert_eq!(registry.supported_exercises(), vec!["tiron_pecho", "bicep"]);
        assert_eq!(registry.lookup("tiron_pecho").unwrap().artifact, "TironAlPecho");
        assert!(registry.is_supported("bicep"));
        assert!(matches!(
            registry.lookup("squat"),
            Err(ClassifierError::UnsupportedExercise(id)) if id == "squat"
        ));
    }

    #[test]
    fn test_decision_tree_prediction() {
        let artifact: NativeArtifact = serde_json::from_str(RAISED_BELOW_90).unwrap();
        artifact.model.validate().unwrap();

        assert_eq!(artifact.model.predict(&FeatureVector::new(45.0, 170.0)).unwrap(), 0);
        assert_eq!(artifact.model.predict(&FeatureVector::new(90.0, 170.0)).unwrap(), 0);
        assert_eq!(artifact.model.predict(&FeatureVector::new(160.0, 20.0)).unwrap(), 2);
    }

    #[test]
    fn test_nearest_centroid_prediction() {
        let model = NativeModel::NearestCentroid {
            centroids: vec![
                Centroid { class: 0, centroid: [40.0, 40.0] },
                Centroid { class: 1, centroid: [100.0, 100.0] },
                Centroid { class: 2, centroid: [170.0, 170.0] },
            ],
        };
        model.validate().unwrap();

        assert_eq!(model.predict(&FeatureVector::new(50.0, 30.0)).unwrap(), 0);
        assert_eq!(model.predict(&FeatureVector::new(110.0, 95.0)).unwrap(), 1);
        assert_eq!(model.predict(&FeatureVector::new(175.0, 180.0)).unwrap(), 2);
        // Equidistant from the first two: first listed wins
        assert_eq!(model.predict(&FeatureVector::new(70.0, 70.0)).unwrap(), 0);
    }

    #[test]
    fn test_validation_rejects_bad_trees() {
        let cyclic = NativeModel::DecisionTree {
            nodes: vec![
                TreeNode::Split { feature: 0, threshold: 1.0, left: 0, right: 1 },
                TreeNode::Leaf { class: 0 },
            ],
        };
        assert!(cyclic.validate().is_err());

        let out_of_range = NativeModel::DecisionTree {
            nodes: vec![TreeNode::Split { feature: 0, threshold: 1.0, left: 1, right: 5 }],
        };
        assert!(out_of_range.validate().is_err());

        let bad_feature = NativeModel::DecisionTree {
            nodes: vec![
                TreeNode::Split { feature: 2, threshold: 1.0, left: 1, right: 2 },
                TreeNode::Leaf { class: 0 },
                TreeNode::Leaf { class: 2 },
            ],
        };
        assert!(bad_feature.validate().is_err());

        let empty = NativeModel::DecisionTree { nodes: vec![] };
        assert!(empty.validate().is_err());
    }

    #[test]
    fn test_file_loader_reads_json() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("curl.json"), RAISED_BELOW_90).unwrap();

        let model = FileArtifactLoader
            .load(&entry("bicep", "curl"), dir.path())
            .unwrap();
        assert_eq!(model.predict(&FeatureVector::new(30.0, 30.0)).unwrap(), 0);
    }

    #[test]
    fn test_file_loader_missing_artifact() {
        let dir = TempDir::new().unwrap();
        let result = FileArtifactLoader.load(&entry("bicep", "curl"), dir.path());
        assert!(matches!(
            result,
            Err(ClassifierError::ModelLoadFailed { exercise, .. }) if exercise == "bicep"
        ));
    }

    #[test]
    fn test_file_loader_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("curl.json"), "{ not json").unwrap();
        let result = FileArtifactLoader.load(&entry("bicep", "curl"), dir.path());
        assert!(matches!(result, Err(ClassifierError::ModelLoadFailed { .. })));
    }

    #[cfg(not(feature = "ml-pyo3"))]
    #[test]
    fn test_pickle_requires_python_feature() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("curl.pkl"), b"\x80\x04").unwrap();
        let result = FileArtifactLoader.load(&entry("bicep", "curl"), dir.path());
        match result {
            Err(ClassifierError::ModelLoadFailed { reason, .. }) => assert!(reason.contains("ml-pyo3")),
            other => panic!("expected load failure, got {:?}", other.map(|_| ())),
        }
    }
}

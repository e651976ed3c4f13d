// Posture classification - resolves exercise models and decodes their output

use crate::core::model_store::{
    ArtifactLoader, ClassifierResult, ExerciseModel, FileArtifactLoader, ModelRegistry,
};
use crate::models::exercise::{FeatureVector, LabelEncoding, PostureLabel};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock};
use tracing::{debug, info};

/// A loaded model bound to the label encoding its artifact was trained with
#[derive(Debug)]
pub struct ExerciseClassifier {
    exercise_id: String,
    encoding: LabelEncoding,
    model: Arc<dyn ExerciseModel>,
}

impl ExerciseClassifier {
    pub fn new(exercise_id: &str, encoding: LabelEncoding, model: Arc<dyn ExerciseModel>) -> Self {
        Self {
            exercise_id: exercise_id.to_string(),
            encoding,
            model,
        }
    }

    pub fn exercise_id(&self) -> &str {
        &self.exercise_id
    }

    pub fn classify(&self, features: &FeatureVector) -> ClassifierResult<PostureLabel> {
        let code = self.model.predict(features)?;
        Ok(self.encoding.decode(code))
    }
}

/// Cache entry for one exercise; `loading` serializes first loads of that exercise only
#[derive(Default)]
struct CacheSlot {
    loading: Mutex<()>,
    classifier: OnceLock<Arc<ExerciseClassifier>>,
}

impl CacheSlot {
    fn loaded(&self) -> Option<Arc<ExerciseClassifier>> {
        self.classifier.get().cloned()
    }
}

/// Memoizing classifier front end shared by every processing run
///
/// Models are loaded on first use and kept until [`invalidate`] or [`clear`];
/// replacing an artifact on disk has no effect until then.
///
/// [`invalidate`]: PostureClassifier::invalidate
/// [`clear`]: PostureClassifier::clear
pub struct PostureClassifier {
    registry: ModelRegistry,
    loader: Arc<dyn ArtifactLoader>,
    cache: RwLock<HashMap<String, Arc<CacheSlot>>>,
}

impl PostureClassifier {
    pub fn new(registry: ModelRegistry) -> Self {
        Self::with_loader(registry, Arc::new(FileArtifactLoader))
    }

    pub fn with_loader(registry: ModelRegistry, loader: Arc<dyn ArtifactLoader>) -> Self {
        Self {
            registry,
            loader,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn supported_exercises(&self) -> Vec<String> {
        self.registry.supported_exercises()
    }

    /// Fetch the classifier for an exercise, loading its artifact on first use
    pub fn resolve(&self, exercise_id: &str) -> ClassifierResult<Arc<ExerciseClassifier>> {
        let entry = self.registry.lookup(exercise_id)?;

        let slot = self.slot(exercise_id);
        if let Some(classifier) = slot.loaded() {
            return Ok(classifier);
        }

        // Racing first uses of one exercise wait here; other exercises stay readable
        let _loading = slot.loading.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(classifier) = slot.loaded() {
            return Ok(classifier);
        }

        let model = self.loader.load(entry, self.registry.model_dir())?;
        info!(
            exercise = exercise_id,
            model = %model.describe(),
            encoding = entry.encoding.to_string(),
            "Loaded posture classifier"
        );

        let classifier = Arc::new(ExerciseClassifier::new(exercise_id, entry.encoding, model));
        let _ = slot.classifier.set(classifier.clone());
        Ok(classifier)
    }

    fn slot(&self, exercise_id: &str) -> Arc<CacheSlot> {
        if let Some(slot) = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(exercise_id)
        {
            return slot.clone();
        }
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(exercise_id.to_string())
            .or_default()
            .clone()
    }

    /// Classify one feature vector for the given exercise
    pub fn classify(&self, features: &FeatureVector, exercise_id: &str) -> ClassifierResult<PostureLabel> {
        self.resolve(exercise_id)?.classify(features)
    }

    /// Drop a cached model so the next use reloads it from disk
    pub fn invalidate(&self, exercise_id: &str) -> bool {
        let removed = self
            .cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(exercise_id)
            .is_some_and(|slot| slot.loaded().is_some());
        if removed {
            debug!(exercise = exercise_id, "Invalidated cached classifier");
        }
        removed
    }

    pub fn clear(&self) {
        self.cache
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn cached_exercises(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .cache
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, slot)| slot.loaded().is_some())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model_store::{ClassifierError, ExerciseEntry, NativeModel, TreeNode};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    /// Returns a fixed code and counts how often it was loaded
    struct CountingLoader {
        loads: AtomicUsize,
        code: i64,
    }

    impl CountingLoader {
        fn new(code: i64) -> Self {
            Self {
                loads: AtomicUsize::new(0),
                code,
            }
        }
    }

    impl ArtifactLoader for CountingLoader {
        fn load(&self, _entry: &ExerciseEntry, _model_dir: &Path) -> ClassifierResult<Arc<dyn ExerciseModel>> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NativeModel::DecisionTree {
                nodes: vec![TreeNode::Leaf { class: self.code }],
            }))
        }
    }

    fn classifier_with(loader: Arc<CountingLoader>) -> PostureClassifier {
        PostureClassifier::with_loader(ModelRegistry::builtin(PathBuf::from("unused")), loader)
    }

    #[test]
    fn test_codes_decode_to_labels() {
        let features = FeatureVector::new(90.0, 90.0);
        for (code, label) in [
            (0, PostureLabel::Raised),
            (2, PostureLabel::Relaxed),
            (1, PostureLabel::Other),
            (5, PostureLabel::Other),
        ] {
            let classifier = classifier_with(Arc::new(CountingLoader::new(code)));
            assert_eq!(classifier.classify(&features, "tiron_pecho").unwrap(), label);
        }
    }

    #[test]
    fn test_unsupported_exercise_never_loads() {
        let loader = Arc::new(CountingLoader::new(0));
        let classifier = classifier_with(loader.clone());

        let result = classifier.classify(&FeatureVector::new(1.0, 1.0), "unknown_id");
        assert!(matches!(result, Err(ClassifierError::UnsupportedExercise(id)) if id == "unknown_id"));
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_models_load_once() {
        let loader = Arc::new(CountingLoader::new(0));
        let classifier = classifier_with(loader.clone());

        for _ in 0..5 {
            classifier.resolve("bicep").unwrap();
        }
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(classifier.cached_exercises(), vec!["bicep"]);
    }

    #[test]
    fn test_concurrent_first_use_loads_once() {
        let loader = Arc::new(CountingLoader::new(2));
        let classifier = Arc::new(classifier_with(loader.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let classifier = classifier.clone();
                thread::spawn(move || {
                    classifier
                        .classify(&FeatureVector::new(170.0, 170.0), "tiron_pecho")
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), PostureLabel::Relaxed);
        }
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    /// Blocks loads of `tiron_pecho` until released; other exercises load at once
    struct GatedLoader {
        started: Mutex<mpsc::Sender<()>>,
        release: Mutex<mpsc::Receiver<()>>,
    }

    impl ArtifactLoader for GatedLoader {
        fn load(&self, entry: &ExerciseEntry, _model_dir: &Path) -> ClassifierResult<Arc<dyn ExerciseModel>> {
            if entry.id == "tiron_pecho" {
                self.started.lock().unwrap().send(()).unwrap();
                self.release.lock().unwrap().recv().unwrap();
            }
            Ok(Arc::new(NativeModel::DecisionTree {
                nodes: vec![TreeNode::Leaf { class: 0 }],
            }))
        }
    }

    #[test]
    fn test_slow_load_does_not_block_cached_exercises() {
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        let loader = Arc::new(GatedLoader {
            started: Mutex::new(started_tx),
            release: Mutex::new(release_rx),
        });
        let classifier = Arc::new(PostureClassifier::with_loader(
            ModelRegistry::builtin(PathBuf::from("unused")),
            loader,
        ));
        classifier.resolve("bicep").unwrap();

        let slow = {
            let classifier = classifier.clone();
            thread::spawn(move || classifier.resolve("tiron_pecho").map(|c| c.exercise_id().to_string()))
        };
        started_rx.recv_timeout(Duration::from_secs(10)).unwrap();

        // tiron_pecho is mid-load; bicep must still resolve
        let (done_tx, done_rx) = mpsc::channel();
        {
            let classifier = classifier.clone();
            thread::spawn(move || {
                let label = classifier.classify(&FeatureVector::new(45.0, 45.0), "bicep").unwrap();
                done_tx.send((label, classifier.cached_exercises())).unwrap();
            });
        }
        let (label, cached) = done_rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(label, PostureLabel::Raised);
        assert_eq!(cached, vec!["bicep"]);

        release_tx.send(()).unwrap();
        assert_eq!(slow.join().unwrap().unwrap(), "tiron_pecho");
        assert_eq!(classifier.cached_exercises(), vec!["bicep", "tiron_pecho"]);
    }

    #[test]
    fn test_failed_load_is_retried() {
        let classifier = PostureClassifier::new(ModelRegistry::builtin(PathBuf::from("/nonexistent/models")));
        assert!(matches!(classifier.resolve("bicep"), Err(ClassifierError::ModelLoadFailed { .. })));
        assert!(classifier.cached_exercises().is_empty());
        assert!(!classifier.invalidate("bicep"));
    }

    #[test]
    fn test_invalidate_forces_reload() {
        let loader = Arc::new(CountingLoader::new(0));
        let classifier = classifier_with(loader.clone());

        classifier.resolve("bicep").unwrap();
        assert!(classifier.invalidate("bicep"));
        assert!(!classifier.invalidate("bicep"));
        classifier.resolve("bicep").unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);

        classifier.resolve("tiron_pecho").unwrap();
        classifier.clear();
        assert!(classifier.cached_exercises().is_empty());
    }
}

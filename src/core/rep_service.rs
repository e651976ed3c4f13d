// Repetition counting service
// Upload storage, counting runs on blocking threads, and result recording

use crate::core::config::{Config, FrameSourceKind};
use crate::core::model_store::ModelRegistry;
use crate::core::posture_classifier::PostureClassifier;
use crate::core::result_sink::{ResultSink, SinkError};
use crate::core::video_pipeline::RepCountPipeline;
use crate::models::exercise::{RepCountError, RepCountRecord};
use crate::platform::pose::DefaultPoseExtractorFactory;
use crate::platform::video::{FfmpegCliOpener, FrameSourceOpener};
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Invalid filename: {0:?}")]
    InvalidFilename(String),

    #[error("File type not allowed: {0} (accepted: {1})")]
    ExtensionNotAllowed(String, String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error(transparent)]
    Count(#[from] RepCountError),

    #[error("Failed to record result: {0}")]
    Sink(#[from] SinkError),

    #[error("Counting task failed: {0}")]
    TaskFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Reduce an uploaded name to a safe single path component
///
/// Accented letters fold to ASCII through NFKD (`ñandú` → `nandu`). Separators
/// become spaces, whitespace runs become `_`, anything outside `[A-Za-z0-9._-]`
/// is dropped and leading/trailing dots and underscores are trimmed. Returns
/// `None` when nothing usable is left.
pub fn sanitize_filename(name: &str) -> Option<String> {
    let separated: String = name
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();
    let joined = separated.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        .collect();
    let trimmed = kept.trim_matches(|c| c == '.' || c == '_');

    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Counting pipeline wired from configuration: built-in exercise table,
/// configured decoder and the default pose extractor
///
/// Touches neither the upload directory nor the history database.
pub fn build_pipeline(config: &Config) -> RepCountPipeline {
    let classifier = Arc::new(PostureClassifier::new(ModelRegistry::builtin(
        config.model_dir.clone(),
    )));
    RepCountPipeline::new(
        classifier,
        frame_source_opener(config),
        Arc::new(DefaultPoseExtractorFactory::default()),
        config.pose.clone(),
    )
}

/// Frame source opener selected by configuration
pub fn frame_source_opener(config: &Config) -> Arc<dyn FrameSourceOpener> {
    match config.frame_source {
        FrameSourceKind::FfmpegCli => Arc::new(FfmpegCliOpener::new(
            config.ffmpeg_path.clone(),
            config.ffprobe_path.clone(),
        )),
        #[cfg(feature = "ffmpeg-native")]
        FrameSourceKind::Native => Arc::new(crate::platform::video::NativeFrameOpener),
        #[cfg(not(feature = "ffmpeg-native"))]
        FrameSourceKind::Native => {
            tracing::warn!("Native decoding not compiled in; falling back to the ffmpeg command line");
            Arc::new(FfmpegCliOpener::new(
                config.ffmpeg_path.clone(),
                config.ffprobe_path.clone(),
            ))
        }
    }
}

pub struct RepCountService {
    config: Config,
    pipeline: Arc<RepCountPipeline>,
    sink: Arc<dyn ResultSink>,
}

impl RepCountService {
    pub fn new(config: Config, pipeline: Arc<RepCountPipeline>, sink: Arc<dyn ResultSink>) -> Self {
        Self {
            config,
            pipeline,
            sink,
        }
    }

    /// Wire the default backends from configuration, see [`build_pipeline`]
    pub fn from_config(config: Config, sink: Arc<dyn ResultSink>) -> Self {
        let pipeline = Arc::new(build_pipeline(&config));
        info!(
            frame_source = config.frame_source.to_string(),
            model_dir = %config.model_dir.display(),
            "Counting service ready"
        );
        Self::new(config, pipeline, sink)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pipeline(&self) -> &Arc<RepCountPipeline> {
        &self.pipeline
    }

    pub fn supported_exercises(&self) -> Vec<String> {
        self.pipeline.classifier().supported_exercises()
    }

    /// Save an uploaded video, returning the name it was stored under
    ///
    /// An existing upload with the same sanitized name is replaced.
    pub async fn store_upload(&self, original_name: &str, bytes: &[u8]) -> ServiceResult<String> {
        let filename = sanitize_filename(original_name)
            .ok_or_else(|| ServiceError::InvalidFilename(original_name.to_string()))?;

        if !self.config.is_allowed_upload(&filename) {
            return Err(ServiceError::ExtensionNotAllowed(
                filename,
                self.config.allowed_extensions.join(", "),
            ));
        }

        tokio::fs::create_dir_all(&self.config.upload_dir).await?;
        tokio::fs::write(self.config.upload_dir.join(&filename), bytes).await?;

        info!(filename = %filename, bytes = bytes.len(), "Stored upload");
        Ok(filename)
    }

    /// Count repetitions in a previously stored upload and record the result
    pub async fn count_reps(&self, filename: &str, exercise_id: &str) -> ServiceResult<RepCountRecord> {
        let path = sanitize_filename(filename)
            .map(|name| self.config.upload_dir.join(name))
            .filter(|path| path.is_file())
            .ok_or_else(|| ServiceError::FileNotFound(filename.to_string()))?;

        self.count_file(&path, exercise_id).await
    }

    /// Store an upload and count it in one step
    pub async fn upload_and_count(
        &self,
        original_name: &str,
        bytes: &[u8],
        exercise_id: &str,
    ) -> ServiceResult<RepCountRecord> {
        let filename = self.store_upload(original_name, bytes).await?;
        self.count_reps(&filename, exercise_id).await
    }

    /// Count repetitions in a video anywhere on disk and record the result
    pub async fn count_file(&self, path: &Path, exercise_id: &str) -> ServiceResult<RepCountRecord> {
        if !path.is_file() {
            return Err(ServiceError::FileNotFound(path.display().to_string()));
        }

        let pipeline = self.pipeline.clone();
        let video = path.to_path_buf();
        let exercise = exercise_id.to_string();
        let reps = tokio::task::spawn_blocking(move || pipeline.process(&video, &exercise))
            .await
            .map_err(|e| ServiceError::TaskFailed(e.to_string()))??;

        let record = RepCountRecord {
            id: uuid::Uuid::new_v4().to_string(),
            exercise_id: exercise_id.to_string(),
            filename: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            reps,
            processed_at: chrono::Utc::now().timestamp_millis(),
        };

        self.sink.record(&record).await?;
        info!(
            id = %record.id,
            exercise = exercise_id,
            filename = %record.filename,
            reps = record.reps,
            "Recorded result"
        );

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::database::Database;
    use crate::core::model_store::{ArtifactLoader, ClassifierResult, ExerciseEntry, ExerciseModel, NativeModel, TreeNode};
    use crate::core::result_sink::SqliteResultSink;
    use crate::models::frame::{Frame, SourceResult};
    use crate::platform::pose::{BackendFactory, DummyPoseExtractor};
    use crate::platform::video::{FrameSource, MemoryFrameSource};
    use image::RgbImage;
    use tempfile::TempDir;

    struct LeafLoader;

    impl ArtifactLoader for LeafLoader {
        fn load(&self, _entry: &ExerciseEntry, _model_dir: &Path) -> ClassifierResult<Arc<dyn ExerciseModel>> {
            Ok(Arc::new(NativeModel::DecisionTree {
                nodes: vec![TreeNode::Leaf { class: 0 }],
            }))
        }
    }

    /// Ignores the file contents and replays blank frames
    struct BlankOpener;

    impl FrameSourceOpener for BlankOpener {
        fn open(&self, _path: &Path) -> SourceResult<Box<dyn FrameSource>> {
            let frames = (0..4).map(|i| Frame::new(i, None, RgbImage::new(8, 8))).collect();
            Ok(Box::new(MemoryFrameSource::new(frames)))
        }
    }

    async fn setup_service(dir: &TempDir) -> (RepCountService, SqliteResultSink) {
        let mut config = Config::default();
        config.upload_dir = dir.path().join("uploads");

        let pipeline = Arc::new(RepCountPipeline::new(
            Arc::new(PostureClassifier::with_loader(
                ModelRegistry::builtin(dir.path().join("models")),
                Arc::new(LeafLoader),
            )),
            Arc::new(BlankOpener),
            Arc::new(BackendFactory::<DummyPoseExtractor>::new()),
            config.pose.clone(),
        ));

        let db = Database::in_memory().await.expect("Failed to create in-memory database");
        let sink = SqliteResultSink::new(db);
        let service = RepCountService::new(config, pipeline, Arc::new(sink.clone()));
        (service, sink)
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("set 1.mp4").as_deref(), Some("set_1.mp4"));
        assert_eq!(sanitize_filename("../../etc/passwd").as_deref(), Some("etc_passwd"));
        assert_eq!(sanitize_filename("C:\\videos\\curl.webm").as_deref(), Some("C_videos_curl.webm"));
        assert_eq!(sanitize_filename(".hidden.mp4").as_deref(), Some("hidden.mp4"));
        assert_eq!(sanitize_filename("ñandú.mp4").as_deref(), Some("nandu.mp4"));
        assert_eq!(sanitize_filename("Tirón al pecho.webm").as_deref(), Some("Tiron_al_pecho.webm"));
        assert_eq!(sanitize_filename("ﬁnal set.mp4").as_deref(), Some("final_set.mp4"));
        assert_eq!(sanitize_filename("俯卧撑.mp4").as_deref(), Some("mp4"));
        assert_eq!(sanitize_filename("../.."), None);
        assert_eq!(sanitize_filename(""), None);
    }

    #[tokio::test]
    async fn test_store_upload() {
        let dir = TempDir::new().unwrap();
        let (service, _) = setup_service(&dir).await;

        let stored = service.store_upload("../my set.MP4", b"data").await.unwrap();
        assert_eq!(stored, "my_set.MP4");
        assert_eq!(std::fs::read(dir.path().join("uploads").join(&stored)).unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_store_upload_rejects_bad_names() {
        let dir = TempDir::new().unwrap();
        let (service, _) = setup_service(&dir).await;

        assert!(matches!(
            service.store_upload("notes.txt", b"data").await,
            Err(ServiceError::ExtensionNotAllowed(name, _)) if name == "notes.txt"
        ));
        assert!(matches!(
            service.store_upload("...", b"data").await,
            Err(ServiceError::InvalidFilename(_))
        ));
        assert!(!dir.path().join("uploads").join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_count_missing_upload() {
        let dir = TempDir::new().unwrap();
        let (service, _) = setup_service(&dir).await;

        assert!(matches!(
            service.count_reps("nope.mp4", "bicep").await,
            Err(ServiceError::FileNotFound(name)) if name == "nope.mp4"
        ));
    }

    #[tokio::test]
    async fn test_count_records_result() {
        let dir = TempDir::new().unwrap();
        let (service, sink) = setup_service(&dir).await;

        // The dummy extractor never finds a pose, so nothing is counted
        let record = service.upload_and_count("curl.mp4", b"video", "bicep").await.unwrap();
        assert_eq!(record.reps, 0);
        assert_eq!(record.exercise_id, "bicep");
        assert_eq!(record.filename, "curl.mp4");

        let stored = sink.recent("bicep", 10).await.unwrap();
        assert_eq!(stored, vec![record]);
    }

    #[tokio::test]
    async fn test_unsupported_exercise_is_not_recorded() {
        let dir = TempDir::new().unwrap();
        let (service, sink) = setup_service(&dir).await;
        service.store_upload("curl.mp4", b"video").await.unwrap();

        let result = service.count_reps("curl.mp4", "squat").await;
        assert!(matches!(
            result,
            Err(ServiceError::Count(RepCountError::UnsupportedExercise(id))) if id == "squat"
        ));
        assert!(sink.recent("squat", 10).await.unwrap().is_empty());
    }

    #[test]
    fn test_build_pipeline_leaves_storage_alone() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.model_dir = dir.path().join("models");
        config.upload_dir = dir.path().join("uploads");
        config.database_path = dir.path().join("database").join("repcount.db");

        let pipeline = build_pipeline(&config);
        assert_eq!(pipeline.classifier().supported_exercises(), vec!["tiron_pecho", "bicep"]);
        assert!(pipeline.classifier().cached_exercises().is_empty());
        assert!(!config.database_path.exists());
        assert!(!dir.path().join("database").exists());
        assert!(!config.upload_dir.exists());
    }

    #[tokio::test]
    async fn test_supported_exercises() {
        let dir = TempDir::new().unwrap();
        let (service, _) = setup_service(&dir).await;
        assert_eq!(service.supported_exercises(), vec!["tiron_pecho", "bicep"]);
    }
}

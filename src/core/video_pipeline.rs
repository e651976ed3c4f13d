// Video frame pipeline - counts repetitions in one video
//
// decode → detect pose → project arms → elbow angles → classify → count

use crate::core::landmark_projector::LandmarkProjector;
use crate::core::model_store::ClassifierError;
use crate::core::posture_classifier::{ExerciseClassifier, PostureClassifier};
use crate::core::rep_counter::RepCounter;
use crate::models::exercise::{PostureLabel, RepCountError, RepCountResult, RunSummary};
use crate::models::frame::SourceError;
use crate::models::pose::{PoseConfig, PoseError};
use crate::platform::pose::{PoseExtractor, PoseExtractorFactory};
use crate::platform::video::{FrameSource, FrameSourceOpener};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

impl From<ClassifierError> for RepCountError {
    fn from(err: ClassifierError) -> Self {
        match err {
            ClassifierError::UnsupportedExercise(id) => RepCountError::UnsupportedExercise(id),
            ClassifierError::ModelLoadFailed { .. } => RepCountError::ModelLoadFailed(err.to_string()),
            ClassifierError::PredictionFailed(_) => RepCountError::InferenceFailed(err.to_string()),
        }
    }
}

impl From<SourceError> for RepCountError {
    fn from(err: SourceError) -> Self {
        RepCountError::SourceUnreadable(err.to_string())
    }
}

impl From<PoseError> for RepCountError {
    fn from(err: PoseError) -> Self {
        match err {
            PoseError::ModelLoadFailed(_) => RepCountError::ModelLoadFailed(err.to_string()),
            _ => RepCountError::InferenceFailed(err.to_string()),
        }
    }
}

/// Runs the per-frame classify-and-count loop over whole videos
///
/// Each run gets its own frame source, pose extractor and counter; only the
/// classifier cache is shared between concurrent runs.
pub struct RepCountPipeline {
    classifier: Arc<PostureClassifier>,
    opener: Arc<dyn FrameSourceOpener>,
    extractors: Arc<dyn PoseExtractorFactory>,
    pose_config: PoseConfig,
}

impl RepCountPipeline {
    pub fn new(
        classifier: Arc<PostureClassifier>,
        opener: Arc<dyn FrameSourceOpener>,
        extractors: Arc<dyn PoseExtractorFactory>,
        pose_config: PoseConfig,
    ) -> Self {
        Self {
            classifier,
            opener,
            extractors,
            pose_config,
        }
    }

    pub fn classifier(&self) -> &Arc<PostureClassifier> {
        &self.classifier
    }

    /// Count repetitions of `exercise_id` in the video at `video`
    pub fn process(&self, video: &Path, exercise_id: &str) -> RepCountResult<u32> {
        self.process_with_summary(video, exercise_id)
            .map(|summary| summary.reps)
    }

    /// Like [`process`](Self::process), also reporting how frames were handled
    pub fn process_with_summary(&self, video: &Path, exercise_id: &str) -> RepCountResult<RunSummary> {
        let started = Instant::now();

        let result = self.run(video, exercise_id);
        match &result {
            Ok(summary) => info!(
                exercise = exercise_id,
                video = %video.display(),
                reps = summary.reps,
                frames = summary.frames_total,
                frames_without_pose = summary.frames_without_pose,
                frames_degenerate = summary.frames_degenerate,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Processed video"
            ),
            Err(e) => warn!(
                exercise = exercise_id,
                video = %video.display(),
                error = %e,
                "Video processing failed"
            ),
        }
        result
    }

    fn run(&self, video: &Path, exercise_id: &str) -> RepCountResult<RunSummary> {
        // Resolve first: an unknown exercise must not touch the video at all
        let classifier = self.classifier.resolve(exercise_id)?;

        // Both are released when they go out of scope, on every return path
        let mut source = self.opener.open(video)?;
        let mut extractor = self.extractors.create(&self.pose_config)?;
        debug!(pose_model = %extractor.model_info(), "Pose extractor ready");

        let projector = LandmarkProjector::new(self.pose_config.min_landmark_visibility);
        count_repetitions(source.as_mut(), extractor.as_mut(), &classifier, &projector)
    }
}

/// Drive one frame source to exhaustion, counting repetitions
///
/// Frames without a usable pose or with degenerate arm geometry are skipped.
/// Any other failure aborts the run and no count is returned.
pub fn count_repetitions(
    source: &mut dyn FrameSource,
    extractor: &mut dyn PoseExtractor,
    classifier: &ExerciseClassifier,
    projector: &LandmarkProjector,
) -> RepCountResult<RunSummary> {
    let mut summary = RunSummary::default();
    let mut counter = RepCounter::new();

    while let Some(frame) = source.next_frame()? {
        summary.frames_total += 1;

        let snapshot = match extractor.detect(&frame) {
            Ok(snapshot) => snapshot,
            Err(e) if e.is_frame_skip() => None,
            Err(e) => return Err(e.into()),
        };

        let arms = match projector.project_arms(snapshot.as_ref(), frame.width(), frame.height()) {
            Ok(arms) => arms,
            Err(e) if e.is_frame_skip() => {
                trace!(frame = frame.index, reason = %e, "Skipping frame");
                summary.frames_without_pose += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let features = match arms.features() {
            Ok(features) => features,
            Err(e) => {
                trace!(frame = frame.index, reason = %e, "Skipping frame");
                summary.frames_degenerate += 1;
                continue;
            }
        };

        let label = classifier.classify(&features)?;
        if label == PostureLabel::Other {
            summary.frames_other += 1;
        }

        if counter.observe(label) {
            debug!(
                frame = frame.index,
                timestamp_ms = ?frame.timestamp_ms,
                reps = counter.count(),
                "Counted repetition"
            );
        }
    }

    summary.reps = counter.finish();
    Ok(summary)
}

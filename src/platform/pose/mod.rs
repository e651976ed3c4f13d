// Pose estimation platform integration
// Provides the MediaPipe bridge and the extractor seams the pipeline uses

pub mod mediapipe_bridge;

pub use mediapipe_bridge::{
    BackendFactory, DefaultPoseBackend, DefaultPoseExtractorFactory, DummyPoseExtractor,
    PoseBackend, PoseExtractor, PoseExtractorFactory,
};

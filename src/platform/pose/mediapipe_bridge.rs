// MediaPipe integration bridge
// Abstracts the external pose landmark extractor; the real backend runs
// MediaPipe Pose through PyO3

use crate::models::frame::Frame;
use crate::models::pose::{PoseConfig, PoseResult, PoseSnapshot};
use std::marker::PhantomData;

/// Per-run pose extractor
///
/// Extractors track the subject across consecutive frames, so one instance
/// must only ever see the frames of a single video, in order.
pub trait PoseExtractor: Send {
    /// Run inference on a frame; `Ok(None)` when no subject was found
    fn detect(&mut self, frame: &Frame) -> PoseResult<Option<PoseSnapshot>>;

    /// Get model info
    fn model_info(&self) -> String;
}

/// A concrete backend constructible from configuration
pub trait PoseBackend: PoseExtractor + Sized + 'static {
    fn new(config: &PoseConfig) -> PoseResult<Self>;
}

/// Creates a fresh extractor for every processing run
pub trait PoseExtractorFactory: Send + Sync {
    fn create(&self, config: &PoseConfig) -> PoseResult<Box<dyn PoseExtractor>>;
}

/// Factory for any [`PoseBackend`]
pub struct BackendFactory<B> {
    _backend: PhantomData<fn() -> B>,
}

impl<B> BackendFactory<B> {
    pub fn new() -> Self {
        Self {
            _backend: PhantomData,
        }
    }
}

impl<B> Default for BackendFactory<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: PoseBackend> PoseExtractorFactory for BackendFactory<B> {
    fn create(&self, config: &PoseConfig) -> PoseResult<Box<dyn PoseExtractor>> {
        Ok(Box::new(B::new(config)?))
    }
}

// ==============================================================================
// PyO3 Implementation (Python MediaPipe)
// ==============================================================================

#[cfg(feature = "ml-pyo3")]
pub mod pyo3_backend {
    use super::*;
    use crate::models::pose::{Keypoint3D, ModelComplexity, PoseError};
    use pyo3::prelude::*;
    use pyo3::types::{PyBytes, PyDict};
    use tracing::{debug, warn};

    pub struct PyO3MediaPipe {
        // mediapipe.solutions.pose.Pose instance holding the tracking state
        pose: PyObject,
        numpy: PyObject,
        config: PoseConfig,
    }

    impl PoseBackend for PyO3MediaPipe {
        fn new(config: &PoseConfig) -> PoseResult<Self> {
            Python::with_gil(|py| {
                let numpy = py
                    .import_bound("numpy")
                    .map_err(|e| PoseError::ModelLoadFailed(format!("Failed to import numpy: {}", e)))?;

                let solutions = py
                    .import_bound("mediapipe")
                    .and_then(|mp| mp.getattr("solutions"))
                    .and_then(|solutions| solutions.getattr("pose"))
                    .map_err(|e| PoseError::ModelLoadFailed(format!(
                        "Failed to import mediapipe: {}. Make sure Python dependencies are installed (pip install mediapipe numpy)",
                        e
                    )))?;

                let complexity = match config.model_complexity {
                    ModelComplexity::Lite => 0,
                    ModelComplexity::Full => 1,
                    ModelComplexity::Heavy => 2,
                };

                let kwargs = PyDict::new_bound(py);
                let configure = || -> PyResult<()> {
                    kwargs.set_item("static_image_mode", false)?;
                    kwargs.set_item("model_complexity", complexity)?;
                    kwargs.set_item("min_detection_confidence", config.min_detection_confidence)?;
                    kwargs.set_item("min_tracking_confidence", config.min_tracking_confidence)?;
                    Ok(())
                };
                configure().map_err(|e| PoseError::ModelLoadFailed(format!("Failed to build Pose arguments: {}", e)))?;

                let pose = solutions
                    .call_method("Pose", (), Some(&kwargs))
                    .map_err(|e| PoseError::ModelLoadFailed(format!("Failed to create Pose: {}", e)))?;

                debug!(
                    min_detection_confidence = config.min_detection_confidence,
                    min_tracking_confidence = config.min_tracking_confidence,
                    complexity,
                    "PyO3MediaPipe initialized"
                );

                Ok(Self {
                    pose: pose.unbind(),
                    numpy: numpy.into_any().unbind(),
                    config: config.clone(),
                })
            })
        }
    }

    impl PoseExtractor for PyO3MediaPipe {
        fn detect(&mut self, frame: &Frame) -> PoseResult<Option<PoseSnapshot>> {
            Python::with_gil(|py| {
                let inference = |e: PyErr| PoseError::InferenceFailed(e.to_string());

                // HxWx3 uint8 RGB array over the frame bytes
                let bytes = PyBytes::new_bound(py, frame.image.as_raw());
                let kwargs = PyDict::new_bound(py);
                kwargs.set_item("dtype", "uint8").map_err(inference)?;
                let image = self
                    .numpy
                    .bind(py)
                    .call_method("frombuffer", (bytes,), Some(&kwargs))
                    .and_then(|array| {
                        array.call_method1("reshape", (frame.height(), frame.width(), 3u32))
                    })
                    .map_err(inference)?;

                let results = self
                    .pose
                    .bind(py)
                    .call_method1("process", (image,))
                    .map_err(inference)?;

                let pose_landmarks = results.getattr("pose_landmarks").map_err(inference)?;
                if pose_landmarks.is_none() {
                    return Ok(None);
                }

                let mut landmarks = Vec::new();
                for landmark in pose_landmarks
                    .getattr("landmark")
                    .and_then(|list| list.iter())
                    .map_err(inference)?
                {
                    let landmark = landmark.map_err(inference)?;
                    let coord = |name: &str| -> PyResult<f32> { landmark.getattr(name)?.extract::<f32>() };
                    landmarks.push(Keypoint3D {
                        x: coord("x").map_err(inference)?,
                        y: coord("y").map_err(inference)?,
                        z: coord("z").map_err(inference)?,
                        visibility: coord("visibility").map_err(inference)?,
                    });
                }

                Ok(Some(PoseSnapshot::new(landmarks)))
            })
        }

        fn model_info(&self) -> String {
            format!(
                "PyO3 MediaPipe Pose - complexity {:?}, detection {}, tracking {}",
                self.config.model_complexity,
                self.config.min_detection_confidence,
                self.config.min_tracking_confidence
            )
        }
    }

    impl Drop for PyO3MediaPipe {
        fn drop(&mut self) {
            Python::with_gil(|py| {
                if let Err(e) = self.pose.bind(py).call_method0("close") {
                    warn!("Failed to close MediaPipe Pose: {}", e);
                }
            });
        }
    }
}

// ==============================================================================
// Dummy Implementation (for compilation without features)
// ==============================================================================

/// Never detects a subject; every frame is skipped
pub struct DummyPoseExtractor {
    config: PoseConfig,
}

impl PoseBackend for DummyPoseExtractor {
    fn new(config: &PoseConfig) -> PoseResult<Self> {
        tracing::warn!("Using dummy pose extractor (no inference); enable the 'ml-pyo3' feature for MediaPipe");
        Ok(Self {
            config: config.clone(),
        })
    }
}

impl PoseExtractor for DummyPoseExtractor {
    fn detect(&mut self, _frame: &Frame) -> PoseResult<Option<PoseSnapshot>> {
        Ok(None)
    }

    fn model_info(&self) -> String {
        format!(
            "Dummy pose extractor (no ML inference - enable 'ml-pyo3' feature), detection {}",
            self.config.min_detection_confidence
        )
    }
}

// ==============================================================================
// Default Backend Selection
// ==============================================================================

#[cfg(feature = "ml-pyo3")]
pub type DefaultPoseBackend = pyo3_backend::PyO3MediaPipe;

#[cfg(not(feature = "ml-pyo3"))]
pub type DefaultPoseBackend = DummyPoseExtractor;

pub type DefaultPoseExtractorFactory = BackendFactory<DefaultPoseBackend>;

#[cfg(test)]
mod tests {
    use super::*;
    use image::RgbImage;

    #[test]
    fn test_dummy_backend_never_detects() {
        let factory = BackendFactory::<DummyPoseExtractor>::new();
        let mut extractor = factory.create(&PoseConfig::default()).unwrap();
        let frame = Frame::new(0, Some(0), RgbImage::new(4, 4));

        for _ in 0..3 {
            assert!(extractor.detect(&frame).unwrap().is_none());
        }
        assert!(extractor.model_info().contains("Dummy"));
    }
}

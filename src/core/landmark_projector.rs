// Landmark projection - converts normalized pose landmarks to pixel space

use crate::core::angle::{joint_angle, DegenerateGeometry, Point2};
use crate::models::exercise::FeatureVector;
use crate::models::pose::{BodyLandmark, PoseError, PoseResult, PoseSnapshot};

/// Shoulder, elbow and wrist of one arm in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmJoints {
    pub shoulder: Point2,
    pub elbow: Point2,
    pub wrist: Point2,
}

impl ArmJoints {
    /// Elbow flexion angle in degrees
    pub fn elbow_angle(&self) -> Result<f64, DegenerateGeometry> {
        joint_angle(self.shoulder, self.elbow, self.wrist)
    }
}

/// Both arms of the tracked subject
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArmPair {
    pub left: ArmJoints,
    pub right: ArmJoints,
}

impl ArmPair {
    /// Classifier features for this frame, left arm first
    pub fn features(&self) -> Result<FeatureVector, DegenerateGeometry> {
        Ok(FeatureVector::new(
            self.left.elbow_angle()?,
            self.right.elbow_angle()?,
        ))
    }
}

/// Projects the six arm landmarks of a snapshot onto a `width` x `height` frame
#[derive(Debug, Clone, Copy, Default)]
pub struct LandmarkProjector {
    min_visibility: f32,
}

impl LandmarkProjector {
    /// `min_visibility` of 0.0 accepts every landmark the extractor returns
    pub fn new(min_visibility: f32) -> Self {
        Self { min_visibility }
    }

    pub fn project_arms(
        &self,
        snapshot: Option<&PoseSnapshot>,
        width: u32,
        height: u32,
    ) -> PoseResult<ArmPair> {
        let snapshot = snapshot.ok_or(PoseError::NoPoseDetected)?;

        Ok(ArmPair {
            left: ArmJoints {
                shoulder: self.project(snapshot, BodyLandmark::LeftShoulder, width, height)?,
                elbow: self.project(snapshot, BodyLandmark::LeftElbow, width, height)?,
                wrist: self.project(snapshot, BodyLandmark::LeftWrist, width, height)?,
            },
            right: ArmJoints {
                shoulder: self.project(snapshot, BodyLandmark::RightShoulder, width, height)?,
                elbow: self.project(snapshot, BodyLandmark::RightElbow, width, height)?,
                wrist: self.project(snapshot, BodyLandmark::RightWrist, width, height)?,
            },
        })
    }

    fn project(
        &self,
        snapshot: &PoseSnapshot,
        landmark: BodyLandmark,
        width: u32,
        height: u32,
    ) -> PoseResult<Point2> {
        let keypoint = snapshot
            .landmark(landmark)
            .ok_or(PoseError::LandmarkMissing(landmark))?;

        if self.min_visibility > 0.0 && !keypoint.is_visible(self.min_visibility) {
            return Err(PoseError::LandmarkNotVisible(landmark));
        }

        Ok(Point2::new(
            keypoint.x as f64 * width as f64,
            keypoint.y as f64 * height as f64,
        ))
    }
}

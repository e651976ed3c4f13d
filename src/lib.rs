//! Counts exercise repetitions in recorded videos.
//!
//! Each frame goes through pose detection, elbow-angle extraction and a
//! per-exercise posture classifier; a two-state counter turns the posture
//! stream into a repetition count.

pub mod core;
pub mod models;
pub mod platform;

pub use crate::core::config::Config;
pub use crate::core::rep_service::{RepCountService, ServiceError};
pub use crate::core::video_pipeline::RepCountPipeline;
pub use crate::models::exercise::{
    PostureLabel, ProgressionEntry, RepCountError, RepCountRecord, RunSummary,
};

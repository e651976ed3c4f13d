pub mod angle;
pub mod config;
pub mod database;
pub mod landmark_projector;
pub mod model_store;
pub mod posture_classifier;
pub mod rep_counter;
pub mod result_sink;
pub mod rep_service;
pub mod video_pipeline;

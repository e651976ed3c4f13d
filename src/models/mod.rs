// Data models for pose landmarks, decoded frames, and exercise results

pub mod exercise;
pub mod frame;
pub mod pose;

// Backends for external capabilities: pose inference and video decoding

pub mod pose;
pub mod video;

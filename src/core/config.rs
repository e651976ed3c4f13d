use crate::models::pose::PoseConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Could not determine home directory")]
    NoHomeDirectory,

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Which decoder reads uploaded videos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrameSourceKind {
    /// External `ffmpeg`/`ffprobe` processes
    FfmpegCli,
    /// Linked FFmpeg libraries (`ffmpeg-native` feature)
    Native,
}

impl FrameSourceKind {
    pub fn to_string(&self) -> &'static str {
        match self {
            FrameSourceKind::FfmpegCli => "ffmpeg_cli",
            FrameSourceKind::Native => "native",
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Directory holding the classifier artifacts
    pub model_dir: PathBuf,
    /// Where uploaded videos are stored
    pub upload_dir: PathBuf,
    /// SQLite file for counting results
    pub database_path: PathBuf,
    /// Accepted upload extensions, lowercase without the dot
    pub allowed_extensions: Vec<String>,
    pub frame_source: FrameSourceKind,
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    pub pose: PoseConfig,
}

fn home_dir() -> ConfigResult<PathBuf> {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .map_err(|_| ConfigError::NoHomeDirectory)
}

impl Default for Config {
    fn default() -> Self {
        let base = home_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".repcount");

        Self {
            model_dir: base.join("models"),
            upload_dir: base.join("uploads"),
            database_path: base.join("database").join("repcount.db"),
            allowed_extensions: vec!["mp4".to_string(), "webm".to_string()],
            frame_source: FrameSourceKind::FfmpegCli,
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            pose: PoseConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, creating it with defaults if missing
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&Self::get_config_path()?)
    }

    /// Load configuration from `path`, creating it with defaults if missing
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> ConfigResult<()> {
        self.save_to(&Self::get_config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        self.validate()?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> ConfigResult<()> {
        let pose = &self.pose;
        for (name, value) in [
            ("min_detection_confidence", pose.min_detection_confidence),
            ("min_tracking_confidence", pose.min_tracking_confidence),
            ("min_landmark_visibility", pose.min_landmark_visibility),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{}: {}. Must be between 0.0 and 1.0",
                    name, value
                )));
            }
        }

        if self.allowed_extensions.is_empty() {
            return Err(ConfigError::Invalid("allowed_extensions cannot be empty".to_string()));
        }
        if let Some(ext) = self
            .allowed_extensions
            .iter()
            .find(|ext| ext.is_empty() || ext.starts_with('.') || ext.chars().any(|c| c.is_ascii_uppercase()))
        {
            return Err(ConfigError::Invalid(format!(
                "allowed extension {:?} must be lowercase without a leading dot",
                ext
            )));
        }

        for (name, path) in [
            ("model_dir", &self.model_dir),
            ("upload_dir", &self.upload_dir),
            ("database_path", &self.database_path),
            ("ffmpeg_path", &self.ffmpeg_path),
            ("ffprobe_path", &self.ffprobe_path),
        ] {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid(format!("{} cannot be empty", name)));
            }
        }

        if cfg!(not(feature = "ffmpeg-native")) && self.frame_source == FrameSourceKind::Native {
            return Err(ConfigError::Invalid(
                "frame_source 'native' requires the 'ffmpeg-native' feature".to_string(),
            ));
        }

        Ok(())
    }

    /// Whether `filename` has one of the allowed extensions (case-insensitive)
    pub fn is_allowed_upload(&self, filename: &str) -> bool {
        Path::new(filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.allowed_extensions.iter().any(|allowed| *allowed == ext)
            })
            .unwrap_or(false)
    }

    /// Reset to default configuration
    pub fn reset() -> ConfigResult<Self> {
        let config = Self::default();
        config.save()?;
        Ok(config)
    }

    /// Get the configuration file path
    pub fn get_config_path() -> ConfigResult<PathBuf> {
        let mut path = home_dir()?;
        path.push(".repcount");
        path.push("config");
        path.push("settings.json");

        Ok(path)
    }
}

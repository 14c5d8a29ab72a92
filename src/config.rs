use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct MotionCamConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub motion: MotionConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub timelapse: TimelapseConfig,
    #[serde(default)]
    pub youtube: YoutubeConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CameraConfig {
    /// Frames per second produced by the encoder
    #[serde(default = "default_framerate")]
    pub framerate: u32,
    #[serde(default = "default_resolution")]
    pub resolution: (u32, u32),
    /// Pixel size of one motion vector block
    #[serde(default = "default_macroblock_size")]
    pub macroblock_size: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// Base address of the media server, e.g. `192.168.1.10:8000`.
    /// Payloads are only logged when unset.
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MotionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Minimum motion vector magnitude for a block to count as moving
    #[serde(default = "default_sensitivity")]
    pub sensitivity: u8,
    /// Minimum moving blocks in one area for it to count
    #[serde(default = "default_min_blocks")]
    pub min_blocks: u32,
    /// Consecutive motion frames needed to trigger an event
    #[serde(default = "default_min_frames")]
    pub min_frames: u32,
    /// Seconds of video kept from before the trigger
    #[serde(default = "default_captured_before")]
    pub captured_before: u32,
    /// Seconds of video recorded after the trigger
    #[serde(default = "default_captured_after")]
    pub captured_after: u32,
    /// Minimum seconds between events
    #[serde(default = "default_motion_interval")]
    pub motion_interval: u32,
    /// Clear moving blocks with fewer moving neighbours than this. Off when unset.
    #[serde(default)]
    pub denoise_min_neighbours: Option<u8>,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct NetworkConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_socket_port")]
    pub socket_port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TimelapseConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Seconds between captures
    #[serde(default = "default_capture_interval")]
    pub capture_interval: u32,
    #[serde(default = "default_timelapse_buffer_frames")]
    pub buffer_frames: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct YoutubeConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub ingestion_url: Option<String>,
}

impl MotionCamConfig {
    /// Load configuration from defaults, an optional TOML file and `MOTIONCAM_*` variables.
    ///
    /// Nested keys use a double underscore in the environment, e.g.
    /// `MOTIONCAM_MOTION__MIN_BLOCKS=12`.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("camera.framerate", default_framerate())?
            .set_default(
                "camera.resolution",
                vec![default_resolution().0, default_resolution().1],
            )?
            .set_default("camera.macroblock_size", default_macroblock_size())?
            .set_default("server.request_timeout_seconds", default_request_timeout())?
            .set_default("motion.enabled", default_true())?
            .set_default("motion.sensitivity", default_sensitivity() as u32)?
            .set_default("motion.min_blocks", default_min_blocks())?
            .set_default("motion.min_frames", default_min_frames())?
            .set_default("motion.captured_before", default_captured_before())?
            .set_default("motion.captured_after", default_captured_after())?
            .set_default("motion.motion_interval", default_motion_interval())?
            .set_default("network.enabled", false)?
            .set_default("network.socket_port", default_socket_port() as u32)?
            .set_default("timelapse.enabled", false)?
            .set_default("timelapse.capture_interval", default_capture_interval())?
            .set_default(
                "timelapse.buffer_frames",
                default_timelapse_buffer_frames() as u64,
            )?
            .set_default("youtube.enabled", false)?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(
                Environment::with_prefix("MOTIONCAM")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: MotionCamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Check every setting is within its allowed range
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(message: impl Into<String>) -> Result<(), ConfigError> {
            Err(ConfigError::Message(message.into()))
        }

        if self.camera.framerate == 0 {
            return invalid("Camera framerate must be greater than 0");
        }
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return invalid("Camera resolution must be greater than 0");
        }
        if self.camera.macroblock_size == 0 {
            return invalid("Camera macroblock_size must be greater than 0");
        }

        let motion = &self.motion;
        if !(1..=100).contains(&motion.sensitivity) {
            return invalid("Motion sensitivity must be between 1 and 100");
        }
        if motion.min_blocks == 0 {
            return invalid("Motion min_blocks must be greater than 0");
        }
        if !(1..=10).contains(&motion.min_frames) {
            return invalid("Motion min_frames must be between 1 and 10");
        }
        if !(1..=30).contains(&motion.captured_before) {
            return invalid("Motion captured_before must be between 1 and 30 seconds");
        }
        if !(1..=300).contains(&motion.captured_after) {
            return invalid("Motion captured_after must be between 1 and 300 seconds");
        }
        if motion.denoise_min_neighbours.is_some_and(|n| n > 8) {
            return invalid("Motion denoise_min_neighbours cannot exceed 8");
        }

        if self.network.socket_port == 0 {
            return invalid("Network socket_port must be between 1 and 65535");
        }

        if self.timelapse.capture_interval == 0 {
            return invalid("Timelapse capture_interval must be greater than 0");
        }
        if self.timelapse.buffer_frames == 0 {
            return invalid("Timelapse buffer_frames must be greater than 0");
        }

        if self.youtube.enabled && self.youtube.ingestion_url.is_none() {
            return invalid("Cannot enable YouTube output without an ingestion URL");
        }

        if self.server.request_timeout_seconds == 0 {
            return invalid("Server request_timeout_seconds must be greater than 0");
        }

        Ok(())
    }

    /// Capacity of the pre-event buffer in frames
    pub fn pre_event_frames(&self) -> usize {
        self.camera.framerate as usize * self.motion.captured_before as usize
    }

    /// Capacity of the post-event buffer in frames
    pub fn post_event_frames(&self) -> usize {
        self.camera.framerate as usize * self.motion.captured_after as usize
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            framerate: default_framerate(),
            resolution: default_resolution(),
            macroblock_size: default_macroblock_size(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: None,
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            sensitivity: default_sensitivity(),
            min_blocks: default_min_blocks(),
            min_frames: default_min_frames(),
            captured_before: default_captured_before(),
            captured_after: default_captured_after(),
            motion_interval: default_motion_interval(),
            denoise_min_neighbours: None,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            socket_port: default_socket_port(),
        }
    }
}

impl Default for TimelapseConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capture_interval: default_capture_interval(),
            buffer_frames: default_timelapse_buffer_frames(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_framerate() -> u32 {
    30
}
fn default_resolution() -> (u32, u32) {
    (1280, 720)
}
fn default_macroblock_size() -> u32 {
    16
}

fn default_request_timeout() -> u64 {
    10
}

fn default_sensitivity() -> u8 {
    10
}
fn default_min_blocks() -> u32 {
    10
}
fn default_min_frames() -> u32 {
    3
}
fn default_captured_before() -> u32 {
    5
}
fn default_captured_after() -> u32 {
    10
}
fn default_motion_interval() -> u32 {
    30
}

fn default_socket_port() -> u16 {
    8000
}

fn default_capture_interval() -> u32 {
    60
}
fn default_timelapse_buffer_frames() -> usize {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = MotionCamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pre_event_frames(), 150);
        assert_eq!(config.post_event_frames(), 300);
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[camera]
framerate = 10

[server]
address = "192.168.1.10:8000"

[motion]
sensitivity = 25
captured_before = 2
denoise_min_neighbours = 2

[youtube]
enabled = true
ingestion_url = "rtmp://a.rtmp.youtube.com/live2/key"
"#
        )
        .unwrap();

        let config = MotionCamConfig::load_from_file(file.path()).unwrap();

        assert_eq!(config.camera.framerate, 10);
        assert_eq!(config.camera.resolution, (1280, 720));
        assert_eq!(config.server.address.as_deref(), Some("192.168.1.10:8000"));
        assert_eq!(config.motion.sensitivity, 25);
        assert_eq!(config.motion.captured_before, 2);
        assert_eq!(config.motion.min_frames, default_min_frames());
        assert_eq!(config.motion.denoise_min_neighbours, Some(2));
        assert!(config.youtube.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = MotionCamConfig::load_from_file(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, MotionCamConfig::default());
    }

    #[test]
    fn test_config_validation_ranges() {
        let mut config = MotionCamConfig::default();

        config.motion.sensitivity = 0;
        assert!(config.validate().is_err());
        config.motion.sensitivity = 101;
        assert!(config.validate().is_err());
        config.motion.sensitivity = 100;
        assert!(config.validate().is_ok());

        config.motion.min_frames = 11;
        assert!(config.validate().is_err());
        config.motion.min_frames = 1;

        config.motion.captured_before = 31;
        assert!(config.validate().is_err());
        config.motion.captured_before = 30;

        config.motion.captured_after = 0;
        assert!(config.validate().is_err());
        config.motion.captured_after = 300;

        config.motion.min_blocks = 0;
        assert!(config.validate().is_err());
        config.motion.min_blocks = 1;

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_youtube_requires_ingestion_url() {
        let mut config = MotionCamConfig::default();
        config.youtube.enabled = true;
        assert!(config.validate().is_err());

        config.youtube.ingestion_url = Some("rtmp://example/live".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_serialises_to_toml() {
        let rendered = toml::to_string_pretty(&MotionCamConfig::default()).unwrap();
        assert!(rendered.contains("[motion]"));
        assert!(rendered.contains("sensitivity = 10"));
    }
}

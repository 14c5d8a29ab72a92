//! Consumers of the camera's frame channels.
//!
//! Every output subscribes to the camera's video distributor and runs its own
//! consumer task; the motion output additionally consumes motion frames.

pub mod motion;
pub mod network;
pub mod timelapse;
pub mod youtube;

pub use motion::{MotionCoordinator, MotionOutput, RecordingState};
pub use network::NetworkOutput;
pub use timelapse::{TimelapseCapture, TimelapseOutput};
pub use youtube::YoutubeOutput;

use crate::config::{
    CameraConfig, MotionCamConfig, MotionConfig, NetworkConfig, TimelapseConfig, YoutubeConfig,
};
use crate::distributor::FrameDistributor;
use crate::error::Result;
use crate::events::EventBus;
use crate::frame::{MotionFrame, VideoFrame};
use crate::transport::Dispatcher;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Something fed with the camera's encoded video
#[async_trait]
pub trait Output: Send + Sync {
    fn name(&self) -> OutputName;

    /// Handle one complete video frame. Called from the output's own consumer task.
    fn process_video_frame(&self, frame: &VideoFrame) -> Result<()>;

    /// Stop every task the output owns and wait for them to finish
    async fn close(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputName {
    Motion,
    Network,
    Timelapse,
    Youtube,
}

impl OutputName {
    pub const ALL: [OutputName; 4] = [
        OutputName::Motion,
        OutputName::Network,
        OutputName::Timelapse,
        OutputName::Youtube,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputName::Motion => "motion",
            OutputName::Network => "network",
            OutputName::Timelapse => "timelapse",
            OutputName::Youtube => "youtube",
        }
    }

    /// Whether the output is switched on in `config`
    pub fn enabled_in(&self, config: &MotionCamConfig) -> bool {
        match self {
            OutputName::Motion => config.motion.enabled,
            OutputName::Network => config.network.enabled,
            OutputName::Timelapse => config.timelapse.enabled,
            OutputName::Youtube => config.youtube.enabled,
        }
    }
}

impl fmt::Display for OutputName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        OutputName::ALL
            .into_iter()
            .find(|name| name.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown output '{}'", s))
    }
}

/// The part of the configuration an output was built from
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSettings {
    Motion {
        camera: CameraConfig,
        motion: MotionConfig,
    },
    Network(NetworkConfig),
    Timelapse(TimelapseConfig),
    Youtube {
        framerate: u32,
        youtube: YoutubeConfig,
    },
}

impl OutputSettings {
    pub fn snapshot(name: OutputName, config: &MotionCamConfig) -> Self {
        match name {
            OutputName::Motion => OutputSettings::Motion {
                camera: config.camera.clone(),
                motion: config.motion.clone(),
            },
            OutputName::Network => OutputSettings::Network(config.network.clone()),
            OutputName::Timelapse => OutputSettings::Timelapse(config.timelapse.clone()),
            OutputName::Youtube => OutputSettings::Youtube {
                framerate: config.camera.framerate,
                youtube: config.youtube.clone(),
            },
        }
    }
}

/// The camera's two frame channels
#[derive(Clone)]
pub struct FrameSources {
    pub video: Arc<FrameDistributor<VideoFrame>>,
    pub motion: Arc<FrameDistributor<MotionFrame>>,
}

impl FrameSources {
    pub fn new() -> Self {
        Self {
            video: Arc::new(FrameDistributor::new("video")),
            motion: Arc::new(FrameDistributor::new("motion")),
        }
    }
}

impl Default for FrameSources {
    fn default() -> Self {
        Self::new()
    }
}

/// Everything an output needs at construction
#[derive(Clone)]
pub struct OutputContext {
    pub config: MotionCamConfig,
    pub sources: FrameSources,
    pub dispatcher: Dispatcher,
    pub events: EventBus,
}

/// Build and start the named output. Must be called within a tokio runtime.
pub async fn start_output(name: OutputName, ctx: &OutputContext) -> Result<Box<dyn Output>> {
    let output: Box<dyn Output> = match name {
        OutputName::Motion => Box::new(MotionOutput::start(ctx)?),
        OutputName::Network => Box::new(NetworkOutput::start(ctx).await?),
        OutputName::Timelapse => Box::new(TimelapseOutput::start(ctx)?),
        OutputName::Youtube => Box::new(YoutubeOutput::start(ctx)?),
    };
    Ok(output)
}

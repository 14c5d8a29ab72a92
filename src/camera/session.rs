use super::FrameAssembler;
use crate::config::MotionCamConfig;
use crate::error::{OutputError, Result};
use crate::events::{CameraEvent, EventBus};
use crate::frame::{unix_timestamp, FrameType, MotionFrame, MotionGrid, VideoFrame};
use crate::outputs::{self, FrameSources, Output, OutputContext, OutputName, OutputSettings};
use crate::transport::Dispatcher;

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

struct AttachedOutput {
    output: Box<dyn Output>,
    settings: OutputSettings,
}

/// A single camera session.
///
/// The hardware driver calls the producer methods (`write_video`,
/// `publish_video_frame`, `analyze_motion`), which never wait on consumers.
/// Outputs subscribe to the session's frame channels when attached.
pub struct Camera {
    config: RwLock<MotionCamConfig>,
    sources: FrameSources,
    dispatcher: Dispatcher,
    events: EventBus,
    assembler: Mutex<FrameAssembler>,
    motion_frames: AtomicU64,
    running: AtomicBool,
    outputs: tokio::sync::Mutex<HashMap<OutputName, AttachedOutput>>,
}

impl Camera {
    pub fn new(config: MotionCamConfig, dispatcher: Dispatcher) -> Result<Self> {
        config.validate()?;

        info!(
            "Initialising camera ({}x{} @ {}fps)",
            config.camera.resolution.0, config.camera.resolution.1, config.camera.framerate
        );

        Ok(Self {
            config: RwLock::new(config),
            sources: FrameSources::new(),
            dispatcher,
            events: EventBus::default(),
            assembler: Mutex::new(FrameAssembler::new()),
            motion_frames: AtomicU64::new(0),
            running: AtomicBool::new(false),
            outputs: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> MotionCamConfig {
        self.config.read().clone()
    }

    pub fn sources(&self) -> &FrameSources {
        &self.sources
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Number of video frames assembled from encoder writes
    pub fn video_frame_count(&self) -> u64 {
        self.assembler.lock().frames_assembled()
    }

    pub fn motion_frame_count(&self) -> u64 {
        self.motion_frames.load(Ordering::Relaxed)
    }

    /// Feed one encoder write. Returns the frame number once the frame is complete.
    pub fn write_video(&self, chunk: &[u8], complete: bool, frame_type: FrameType) -> Option<u64> {
        let frame = self
            .assembler
            .lock()
            .push(chunk, complete, frame_type, unix_timestamp())?;

        let frame_num = frame.frame_num;
        self.sources.video.publish(frame);
        Some(frame_num)
    }

    /// Publish a frame assembled by the driver itself
    pub fn publish_video_frame(&self, frame: VideoFrame) {
        self.sources.video.publish(frame);
    }

    /// Publish one frame's worth of motion vectors, returning its frame number
    pub fn analyze_motion(&self, grid: MotionGrid) -> u64 {
        let frame_num = self.motion_frames.fetch_add(1, Ordering::Relaxed);
        self.sources
            .motion
            .publish(MotionFrame::new(grid, frame_num, unix_timestamp()));
        frame_num
    }

    /// Parse and publish the encoder's raw motion data. Malformed data is dropped.
    pub fn analyze_motion_raw(&self, data: &[u8]) -> Option<u64> {
        let (width, height, block_size) = {
            let config = self.config.read();
            let (width, height) = config.camera.resolution;
            (width, height, config.camera.macroblock_size)
        };
        match MotionGrid::from_raw(data, width, height, block_size) {
            Some(grid) => Some(self.analyze_motion(grid)),
            None => {
                warn!(
                    "Discarding {} bytes of motion data: too short for {}x{}",
                    data.len(),
                    width,
                    height
                );
                None
            }
        }
    }

    /// Attach every output enabled in the configuration
    pub async fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::Relaxed) {
            warn!("Camera is already running");
            return Ok(());
        }

        info!("Camera starting");

        let config = self.config();
        let mut started = Vec::new();
        for name in OutputName::ALL {
            if !name.enabled_in(&config) {
                continue;
            }

            if let Err(e) = self.add_output(name).await {
                error!("Failed to start {} output: {}", name, e);
                // Leave the camera as it was so a later start attaches everything
                for attached in started {
                    if let Err(e) = self.remove_output(attached).await {
                        warn!("Failed to detach {} output: {}", attached, e);
                    }
                }
                self.running.store(false, Ordering::Relaxed);
                return Err(e);
            }
            started.push(name);
        }

        Ok(())
    }

    /// Detach and close every attached output
    pub async fn stop(&self) {
        info!("Camera stopping");

        for name in self.output_names().await {
            if let Err(e) = self.remove_output(name).await {
                error!("Failed to stop {} output: {}", name, e);
            }
        }

        self.running.store(false, Ordering::Relaxed);
    }

    pub async fn add_output(&self, name: OutputName) -> Result<()> {
        let mut attached = self.outputs.lock().await;
        if attached.contains_key(&name) {
            return Err(OutputError::AlreadyAttached {
                output: name.to_string(),
            }
            .into());
        }

        let ctx = self.output_context();
        let settings = OutputSettings::snapshot(name, &ctx.config);
        let output = outputs::start_output(name, &ctx).await?;
        attached.insert(name, AttachedOutput { output, settings });
        drop(attached);

        info!("{} output attached", name);
        self.events.publish(CameraEvent::OutputAttached { output: name });
        Ok(())
    }

    /// Detach an output, waiting for its tasks to finish
    pub async fn remove_output(&self, name: OutputName) -> Result<()> {
        let removed = self.outputs.lock().await.remove(&name);
        let Some(mut attached) = removed else {
            return Err(OutputError::NotAttached {
                output: name.to_string(),
            }
            .into());
        };

        attached.output.close().await?;

        info!("{} output detached", name);
        self.events.publish(CameraEvent::OutputDetached { output: name });
        Ok(())
    }

    /// Rebuild an output from the current configuration
    pub async fn restart_output(&self, name: OutputName) -> Result<()> {
        debug!("Restarting {} output", name);
        self.remove_output(name).await?;
        self.add_output(name).await
    }

    /// Whether the output is currently attached
    pub async fn output_enabled(&self, name: OutputName) -> bool {
        self.outputs.lock().await.contains_key(&name)
    }

    pub async fn output_names(&self) -> Vec<OutputName> {
        let mut names: Vec<OutputName> = self.outputs.lock().await.keys().copied().collect();
        names.sort();
        names
    }

    /// Whether the configuration has changed since the output was attached
    pub async fn output_is_stale(&self, name: OutputName) -> Result<bool> {
        let attached = self.outputs.lock().await;
        let output = attached.get(&name).ok_or_else(|| OutputError::NotAttached {
            output: name.to_string(),
        })?;

        let current = OutputSettings::snapshot(name, &self.config.read());
        Ok(output.settings != current)
    }

    /// Replace the configuration after validating it. Attached outputs keep running
    /// with their old settings; the ones now out of date are returned.
    pub async fn reconfigure(&self, config: MotionCamConfig) -> Result<Vec<OutputName>> {
        config.validate()?;
        *self.config.write() = config;
        info!("Camera configuration updated");

        let mut stale = Vec::new();
        for name in self.output_names().await {
            if self.output_is_stale(name).await? {
                stale.push(name);
            }
        }
        if !stale.is_empty() {
            debug!("Outputs with outdated settings: {:?}", stale);
        }

        Ok(stale)
    }

    fn output_context(&self) -> OutputContext {
        OutputContext {
            config: self.config(),
            sources: self.sources.clone(),
            dispatcher: self.dispatcher.clone(),
            events: self.events.clone(),
        }
    }
}

use super::{Output, OutputContext, OutputName};
use crate::distributor::{
    spawn_consumer, ConsumerHandle, FrameDistributor, FrameSubscription, Received, FRAME_WAIT_TIMEOUT,
};
use crate::error::{OutputError, Result};
use crate::frame::VideoFrame;

use async_trait::async_trait;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const FFMPEG: &str = "ffmpeg";

/// ffmpeg arguments relaying raw H.264 from stdin to an RTMP ingestion endpoint,
/// with a silent audio track added
pub fn ffmpeg_args(framerate: u32, ingestion_url: &str) -> Vec<String> {
    [
        "-hide_banner",
        "-re",
        "-framerate",
        &framerate.to_string(),
        "-thread_queue_size",
        "512",
        "-i",
        "pipe:0",
        "-f",
        "lavfi",
        "-i",
        "anullsrc",
        "-c:v",
        "copy",
        "-b:a",
        "128k",
        "-f",
        "flv",
        ingestion_url,
    ]
    .iter()
    .map(|arg| arg.to_string())
    .collect()
}

/// Live relay of the camera stream to YouTube through an ffmpeg child process
pub struct YoutubeOutput {
    frames: Arc<FrameDistributor<VideoFrame>>,
    consumer: ConsumerHandle,
    relay: Option<JoinHandle<()>>,
    child: Option<Child>,
    cancel: CancellationToken,
}

impl YoutubeOutput {
    pub fn start(ctx: &OutputContext) -> Result<Self> {
        let ingestion_url = ctx
            .config
            .youtube
            .ingestion_url
            .as_deref()
            .ok_or_else(|| OutputError::Misconfigured {
                output: OutputName::Youtube.to_string(),
                details: "an ingestion URL is required".to_string(),
            })?;

        let args = ffmpeg_args(ctx.config.camera.framerate, ingestion_url);
        debug!("Spawning {} {}", FFMPEG, args.join(" "));

        let mut child = Command::new(FFMPEG)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| OutputError::SpawnFailed {
                details: format!("{}: {}", FFMPEG, e),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| OutputError::SpawnFailed {
            details: "ffmpeg stdin was not captured".to_string(),
        })?;

        let frames = Arc::new(FrameDistributor::new("youtube"));
        let cancel = CancellationToken::new();

        let forward = Arc::clone(&frames);
        let consumer = spawn_consumer(
            "youtube video consumer",
            ctx.sources.video.subscribe("youtube video consumer"),
            cancel.clone(),
            move |frame: &VideoFrame| {
                forward.publish(frame.clone());
                Ok(())
            },
        );

        let relay = tokio::spawn(relay_frames(
            stdin,
            frames.subscribe("youtube relay"),
            cancel.clone(),
        ));

        info!("YouTube relay started");

        Ok(Self {
            frames,
            consumer,
            relay: Some(relay),
            child: Some(child),
            cancel,
        })
    }
}

async fn relay_frames(
    mut stdin: ChildStdin,
    mut subscription: FrameSubscription<VideoFrame>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = subscription.recv(FRAME_WAIT_TIMEOUT) => received,
        };

        match received {
            Received::Frame(frame) => {
                if let Err(e) = stdin.write_all(&frame.data).await {
                    error!("ffmpeg stopped accepting video: {}", e);
                    break;
                }
            }
            Received::TimedOut => continue,
            Received::Closed => break,
        }
    }

    debug!("YouTube relay task stopped");
}

#[async_trait]
impl Output for YoutubeOutput {
    fn name(&self) -> OutputName {
        OutputName::Youtube
    }

    fn process_video_frame(&self, frame: &VideoFrame) -> Result<()> {
        self.frames.publish(frame.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.cancel.cancel();
        self.consumer.close().await;

        if let Some(relay) = self.relay.take() {
            if let Err(e) = relay.await {
                error!("YouTube relay task ended abnormally: {}", e);
            }
        }

        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!("Failed to stop ffmpeg: {}", e);
            }
        }

        info!("YouTube output closed");
        Ok(())
    }
}

impl Drop for YoutubeOutput {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

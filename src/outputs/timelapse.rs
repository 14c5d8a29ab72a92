use super::{Output, OutputContext, OutputName};
use crate::config::TimelapseConfig;
use crate::distributor::{spawn_consumer, ConsumerHandle};
use crate::error::Result;
use crate::events::{CameraEvent, EventBus};
use crate::frame::VideoFrame;
use crate::frame_buffer::FrameBuffer;
use crate::transport::{Dispatcher, Payload, TimelapsePayload};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct CaptureState {
    buffer: FrameBuffer,
    last_capture: Option<f64>,
}

/// Picks a frame group out of the stream every `capture_interval` seconds
pub struct TimelapseCapture {
    state: Mutex<CaptureState>,
    interval: f64,
    dispatcher: Dispatcher,
    events: EventBus,
}

impl TimelapseCapture {
    pub fn new(config: &TimelapseConfig, dispatcher: Dispatcher, events: EventBus) -> Result<Self> {
        Ok(Self {
            state: Mutex::new(CaptureState {
                buffer: FrameBuffer::new(config.buffer_frames)?,
                last_capture: None,
            }),
            interval: f64::from(config.capture_interval),
            dispatcher,
            events,
        })
    }

    /// Timestamp of the most recent capture
    pub fn last_capture(&self) -> Option<f64> {
        self.state.lock().last_capture
    }

    pub fn process_video_frame(&self, frame: &VideoFrame) {
        let mut state = self.state.lock();
        state.buffer.append(frame.clone());

        // Wait for a full buffer, and for a data frame rather than a header
        if !state.buffer.is_full() || frame.is_header() {
            return;
        }

        if let Some(last) = state.last_capture {
            if frame.timestamp < last + self.interval {
                return;
            }
        }

        let frame_group = state.buffer.final_group();
        let Some(timestamp) = frame_group.last().map(|f| f.timestamp) else {
            debug!("No SPS header buffered yet - skipping timelapse capture");
            return;
        };
        state.last_capture = Some(timestamp);
        drop(state);

        let payload = TimelapsePayload {
            frame_group: frame_group.raw_bytes(),
            timelapse_frame_index: frame_group.len() as i32 - 2,
            timestamp,
        };
        info!(
            "Timelapse image captured: {} frames ({} bytes)",
            frame_group.len(),
            payload.frame_group.len()
        );

        self.dispatcher.dispatch(Payload::Timelapse(payload));
        self.events.publish(CameraEvent::TimelapseCaptured { timestamp });
    }
}

/// Periodic still images for the media server's timelapse
pub struct TimelapseOutput {
    capture: Arc<TimelapseCapture>,
    consumer: ConsumerHandle,
}

impl TimelapseOutput {
    pub fn start(ctx: &OutputContext) -> Result<Self> {
        info!("Timelapse output initialising");

        let capture = Arc::new(TimelapseCapture::new(
            &ctx.config.timelapse,
            ctx.dispatcher.clone(),
            ctx.events.clone(),
        )?);

        let task_capture = Arc::clone(&capture);
        let consumer = spawn_consumer(
            "timelapse video consumer",
            ctx.sources.video.subscribe("timelapse video consumer"),
            CancellationToken::new(),
            move |frame: &VideoFrame| {
                task_capture.process_video_frame(frame);
                Ok(())
            },
        );

        Ok(Self { capture, consumer })
    }

    pub fn capture(&self) -> &Arc<TimelapseCapture> {
        &self.capture
    }
}

#[async_trait]
impl Output for TimelapseOutput {
    fn name(&self) -> OutputName {
        OutputName::Timelapse
    }

    fn process_video_frame(&self, frame: &VideoFrame) -> Result<()> {
        self.capture.process_video_frame(frame);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.consumer.close().await;
        info!("Timelapse output closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameType;
    use tokio::sync::mpsc::Receiver;

    fn capture(interval: u32) -> (TimelapseCapture, Receiver<Payload>) {
        let config = TimelapseConfig {
            enabled: true,
            capture_interval: interval,
            buffer_frames: 10,
        };
        let (dispatcher, receiver) = Dispatcher::new();
        (
            TimelapseCapture::new(&config, dispatcher, EventBus::default()).unwrap(),
            receiver,
        )
    }

    /// One frame per second with a header every fifth frame
    fn frame(frame_num: u64) -> VideoFrame {
        let frame_type = if frame_num % 5 == 0 {
            FrameType::SpsHeader
        } else {
            FrameType::PFrame
        };
        VideoFrame::new(vec![frame_num as u8; 2], frame_num, frame_num as f64, frame_type)
    }

    #[test]
    fn test_first_capture_once_buffer_full() {
        let (capture, mut receiver) = capture(60);

        for n in 0..9 {
            capture.process_video_frame(&frame(n));
        }
        assert!(receiver.try_recv().is_err());

        capture.process_video_frame(&frame(9));

        match receiver.try_recv() {
            Ok(Payload::Timelapse(payload)) => {
                // Last header in the buffer is frame 5
                assert_eq!(payload.frame_group.len(), 10);
                assert_eq!(payload.timelapse_frame_index, 3);
                assert_eq!(payload.timestamp, 9.0);
            }
            other => panic!("expected timelapse payload, got {:?}", other),
        }
        assert_eq!(capture.last_capture(), Some(9.0));
    }

    #[test]
    fn test_respects_capture_interval() {
        let (capture, mut receiver) = capture(20);

        for n in 0..10 {
            capture.process_video_frame(&frame(n));
        }
        assert!(receiver.try_recv().is_ok());

        for n in 10..29 {
            capture.process_video_frame(&frame(n));
        }
        assert!(receiver.try_recv().is_err());

        capture.process_video_frame(&frame(29));
        assert!(receiver.try_recv().is_ok());
        assert_eq!(capture.last_capture(), Some(29.0));
    }

    #[test]
    fn test_no_header_means_no_capture() {
        let (capture, mut receiver) = capture(1);

        for n in 0..20u64 {
            capture.process_video_frame(&VideoFrame::new(vec![0u8], n, n as f64, FrameType::PFrame));
        }

        assert!(receiver.try_recv().is_err());
        assert_eq!(capture.last_capture(), None);
    }
}

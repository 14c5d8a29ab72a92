use super::{Output, OutputContext, OutputName};
use crate::analyzer::{MotionDetector, MotionEvent};
use crate::config::MotionCamConfig;
use crate::distributor::{spawn_consumer, ConsumerHandle};
use crate::error::Result;
use crate::events::{CameraEvent, EventBus};
use crate::frame::{MotionFrame, VideoFrame};
use crate::frame_buffer::{FrameBuffer, FrameBufferBuilder};
use crate::transport::{event_id, Dispatcher, MotionEventPayload, Payload};

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    /// Filling the pre-event buffer, looking for motion
    Watching,
    /// Motion confirmed; filling the post-event buffer
    RecordingPostEvent,
}

struct CoordinatorState {
    pre_event: FrameBuffer,
    post_event: FrameBuffer,
    motion_in_progress: bool,
    last_event: Option<MotionEvent>,
    detector: MotionDetector,
}

/// Turns video frames and motion decisions into complete motion clips.
///
/// Video and motion frames arrive from two different tasks. All state sits behind
/// one lock so the buffer-full checks and state changes cannot interleave.
pub struct MotionCoordinator {
    state: Mutex<CoordinatorState>,
    motion_interval: f64,
    dispatcher: Dispatcher,
    events: EventBus,
}

impl MotionCoordinator {
    pub fn new(config: &MotionCamConfig, dispatcher: Dispatcher, events: EventBus) -> Result<Self> {
        let framerate = config.camera.framerate;
        let pre_event = FrameBufferBuilder::new()
            .window(framerate, config.motion.captured_before)
            .build()?;
        let post_event = FrameBufferBuilder::new()
            .window(framerate, config.motion.captured_after)
            .build()?;

        info!(
            "Motion coordinator buffering {} frames before and {} after each event",
            pre_event.max_len(),
            post_event.max_len()
        );

        Ok(Self {
            state: Mutex::new(CoordinatorState {
                pre_event,
                post_event,
                motion_in_progress: false,
                last_event: None,
                detector: MotionDetector::from_config(&config.motion, config.camera.macroblock_size),
            }),
            motion_interval: f64::from(config.motion.motion_interval),
            dispatcher,
            events,
        })
    }

    pub fn state(&self) -> RecordingState {
        if self.state.lock().motion_in_progress {
            RecordingState::RecordingPostEvent
        } else {
            RecordingState::Watching
        }
    }

    /// Frames held in the pre- and post-event buffers
    pub fn buffered_frames(&self) -> (usize, usize) {
        let state = self.state.lock();
        (state.pre_event.len(), state.post_event.len())
    }

    pub fn last_event(&self) -> Option<MotionEvent> {
        self.state.lock().last_event.clone()
    }

    pub fn process_video_frame(&self, frame: &VideoFrame) {
        let mut state = self.state.lock();

        if !state.motion_in_progress {
            state.pre_event.append(frame.clone());
            return;
        }

        state.post_event.append(frame.clone());
        if !state.post_event.is_full() {
            return;
        }

        let Some(event) = state.last_event.clone() else {
            warn!("Post-event buffer filled without a motion event; discarding");
            state.pre_event.clear();
            state.post_event.clear();
            state.motion_in_progress = false;
            return;
        };

        // The clip is taken before the trigger group is removed from the pre-event buffer
        let mut full_event = state.pre_event.concatenate(&state.post_event);
        full_event.trim_start();

        // Motion frames follow the video frame they describe, so the trigger frame is
        // the last frame of the pre-event buffer
        let trigger_frame_group = state.pre_event.final_group();

        state.pre_event.clear();
        state.post_event.clear();
        state.motion_in_progress = false;
        drop(state);

        self.emit(full_event, trigger_frame_group, event);
    }

    pub fn process_motion_frame(&self, frame: &MotionFrame) {
        let mut state = self.state.lock();

        if state.motion_in_progress {
            debug!("Motion already detected - skipping motion detection");
            return;
        }

        if !state.pre_event.is_full() {
            debug!("Pre-event buffer not yet full - skipping motion detection");
            return;
        }

        if let Some(last) = &state.last_event {
            if frame.timestamp < last.timestamp + self.motion_interval {
                debug!(
                    "Motion detected within the last {}s - skipping motion detection",
                    self.motion_interval
                );
                return;
            }
        }

        let Some(event) = state.detector.detect(frame) else {
            return;
        };

        info!(
            "Motion event triggered at frame {} with {} box(es)",
            frame.frame_num,
            event.boxes.len()
        );
        state.last_event = Some(event.clone());
        state.motion_in_progress = true;
        drop(state);

        self.events.publish(CameraEvent::MotionDetected {
            timestamp: event.timestamp,
            boxes: event.boxes,
        });
    }

    fn emit(&self, full_event: FrameBuffer, trigger_frame_group: FrameBuffer, event: MotionEvent) {
        if trigger_frame_group.is_empty() {
            warn!("No SPS header before the trigger frame; trigger frame group is empty");
        }

        let payload = MotionEventPayload {
            event_id: event_id(event.timestamp),
            motion_video: full_event.raw_bytes(),
            trigger_frame_group: trigger_frame_group.raw_bytes(),
            trigger_frame_index: trigger_frame_group.len() as i32 - 2,
            boxes: event.boxes.serialise(),
            timestamp: event.timestamp,
        };

        info!(
            "Motion event {} complete: {} frames ({} bytes), trigger group of {} frames",
            payload.event_id,
            full_event.len(),
            payload.motion_video.len(),
            trigger_frame_group.len()
        );

        let recorded = CameraEvent::MotionEventRecorded {
            event_id: payload.event_id.clone(),
            clip_bytes: payload.motion_video.len(),
            trigger_frame_index: payload.trigger_frame_index,
        };

        self.dispatcher.dispatch(Payload::MotionEvent(payload));
        self.events.publish(recorded);
    }
}

/// Motion-triggered clip recording, fed by the camera's video and motion channels
pub struct MotionOutput {
    coordinator: Arc<MotionCoordinator>,
    video_consumer: ConsumerHandle,
    motion_consumer: ConsumerHandle,
}

impl MotionOutput {
    pub fn start(ctx: &OutputContext) -> Result<Self> {
        info!("Motion output initialising");

        let coordinator = Arc::new(MotionCoordinator::new(
            &ctx.config,
            ctx.dispatcher.clone(),
            ctx.events.clone(),
        )?);
        let cancel = CancellationToken::new();

        let video_coordinator = Arc::clone(&coordinator);
        let video_consumer = spawn_consumer(
            "motion video consumer",
            ctx.sources.video.subscribe("motion video consumer"),
            cancel.clone(),
            move |frame: &VideoFrame| {
                video_coordinator.process_video_frame(frame);
                Ok(())
            },
        );

        let motion_coordinator = Arc::clone(&coordinator);
        let motion_consumer = spawn_consumer(
            "motion data consumer",
            ctx.sources.motion.subscribe("motion data consumer"),
            cancel,
            move |frame: &MotionFrame| {
                motion_coordinator.process_motion_frame(frame);
                Ok(())
            },
        );

        Ok(Self {
            coordinator,
            video_consumer,
            motion_consumer,
        })
    }

    pub fn coordinator(&self) -> &Arc<MotionCoordinator> {
        &self.coordinator
    }
}

#[async_trait]
impl Output for MotionOutput {
    fn name(&self) -> OutputName {
        OutputName::Motion
    }

    fn process_video_frame(&self, frame: &VideoFrame) -> Result<()> {
        self.coordinator.process_video_frame(frame);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.video_consumer.close().await;
        self.motion_consumer.close().await;
        info!("Motion output closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FrameType, MotionGrid, MotionVector};
    use tokio::sync::mpsc::Receiver;

    const GOP: u64 = 10;

    fn test_config(motion_interval: u32) -> MotionCamConfig {
        let mut config = MotionCamConfig::default();
        config.camera.framerate = 10;
        config.motion.captured_before = 2;
        config.motion.captured_after = 2;
        config.motion.sensitivity = 5;
        config.motion.min_blocks = 4;
        config.motion.min_frames = 1;
        config.motion.motion_interval = motion_interval;
        config
    }

    fn coordinator(motion_interval: u32) -> (MotionCoordinator, Receiver<Payload>) {
        let (dispatcher, receiver) = Dispatcher::new();
        let coordinator =
            MotionCoordinator::new(&test_config(motion_interval), dispatcher, EventBus::default())
                .unwrap();
        (coordinator, receiver)
    }

    /// Frame `n` of a stream with a header every `GOP` frames and `n % 7 + 1` bytes of data
    fn video_frame(frame_num: u64) -> VideoFrame {
        let frame_type = if frame_num % GOP == 0 {
            FrameType::SpsHeader
        } else {
            FrameType::PFrame
        };
        let len = (frame_num % 7 + 1) as usize;
        VideoFrame::new(vec![frame_num as u8; len], frame_num, frame_num as f64 * 0.1, frame_type)
    }

    fn moving_frame(frame_num: u64, timestamp: f64) -> MotionFrame {
        let mut grid = MotionGrid::zeroed(4, 4);
        for (row, col) in [(1, 1), (1, 2), (2, 1), (2, 2)] {
            grid.set(row, col, MotionVector::new(10, 0, 0));
        }
        MotionFrame::new(grid, frame_num, timestamp)
    }

    fn feed(coordinator: &MotionCoordinator, frames: std::ops::Range<u64>) -> usize {
        let mut bytes = 0;
        for n in frames {
            let frame = video_frame(n);
            bytes += frame.len();
            coordinator.process_video_frame(&frame);
        }
        bytes
    }

    fn motion_payload(receiver: &mut Receiver<Payload>) -> MotionEventPayload {
        match receiver.try_recv() {
            Ok(Payload::MotionEvent(payload)) => payload,
            other => panic!("expected a motion event payload, got {:?}", other),
        }
    }

    #[test]
    fn test_end_to_end_clip_assembly() {
        let (coordinator, mut receiver) = coordinator(0);

        let mut expected_bytes = feed(&coordinator, 0..20);
        assert_eq!(coordinator.buffered_frames(), (20, 0));

        coordinator.process_motion_frame(&moving_frame(19, 100.0));
        assert_eq!(coordinator.state(), RecordingState::RecordingPostEvent);

        expected_bytes += feed(&coordinator, 20..39);
        assert_eq!(coordinator.state(), RecordingState::RecordingPostEvent);
        assert!(receiver.try_recv().is_err());

        expected_bytes += feed(&coordinator, 39..40);

        assert_eq!(coordinator.state(), RecordingState::Watching);
        assert_eq!(coordinator.buffered_frames(), (0, 0));

        let payload = motion_payload(&mut receiver);
        assert!(receiver.try_recv().is_err());

        // Frame 0 is a header, so nothing is trimmed from the front
        assert_eq!(payload.motion_video.len(), expected_bytes);
        assert_eq!(payload.motion_video[0], 0);

        // Trigger group is frames 10..20 of the pre-event buffer
        let group_bytes: usize = (10..20).map(|n| video_frame(n).len()).sum();
        assert_eq!(payload.trigger_frame_group.len(), group_bytes);
        assert_eq!(payload.trigger_frame_index, 8);
        assert_eq!(payload.boxes, vec![(16, 16, 48, 48)]);
        assert_eq!(payload.timestamp, 100.0);
        assert_eq!(payload.event_id, event_id(100.0));
    }

    #[test]
    fn test_clip_is_trimmed_to_first_header() {
        let (coordinator, mut receiver) = coordinator(0);

        // Pre-event buffer ends up holding frames 5..25: headers at 10 and 20
        feed(&coordinator, 0..25);
        coordinator.process_motion_frame(&moving_frame(24, 100.0));
        feed(&coordinator, 25..45);

        let payload = motion_payload(&mut receiver);
        let expected: usize = (10..45).map(|n| video_frame(n).len()).sum();
        assert_eq!(payload.motion_video.len(), expected);
        assert_eq!(payload.motion_video[0], 10);
        assert_eq!(payload.trigger_frame_index, 3);
    }

    #[test]
    fn test_skips_detection_until_pre_event_buffer_full() {
        let (coordinator, _receiver) = coordinator(0);

        feed(&coordinator, 0..19);
        coordinator.process_motion_frame(&moving_frame(18, 100.0));
        assert_eq!(coordinator.state(), RecordingState::Watching);

        feed(&coordinator, 19..20);
        coordinator.process_motion_frame(&moving_frame(19, 100.1));
        assert_eq!(coordinator.state(), RecordingState::RecordingPostEvent);
    }

    #[test]
    fn test_one_event_in_flight() {
        let (coordinator, _receiver) = coordinator(0);

        feed(&coordinator, 0..20);
        coordinator.process_motion_frame(&moving_frame(19, 100.0));
        feed(&coordinator, 20..25);
        coordinator.process_motion_frame(&moving_frame(24, 100.5));

        assert_eq!(coordinator.last_event().unwrap().timestamp, 100.0);
    }

    #[test]
    fn test_cooldown_blocks_new_event_after_return_to_watching() {
        let (coordinator, mut receiver) = coordinator(10);

        feed(&coordinator, 0..20);
        coordinator.process_motion_frame(&moving_frame(19, 100.0));
        feed(&coordinator, 20..40);
        assert_eq!(coordinator.state(), RecordingState::Watching);
        motion_payload(&mut receiver);

        // Refill the pre-event buffer, then motion inside the interval
        feed(&coordinator, 40..60);
        coordinator.process_motion_frame(&moving_frame(59, 105.0));
        assert_eq!(coordinator.state(), RecordingState::Watching);
        assert_eq!(coordinator.last_event().unwrap().timestamp, 100.0);

        // Once the interval has passed motion triggers again
        feed(&coordinator, 60..61);
        coordinator.process_motion_frame(&moving_frame(60, 110.0));
        assert_eq!(coordinator.state(), RecordingState::RecordingPostEvent);
        assert_eq!(coordinator.last_event().unwrap().timestamp, 110.0);
    }

    #[test]
    fn test_missing_header_gives_negative_trigger_index() {
        let (coordinator, mut receiver) = coordinator(0);

        for n in 1..21u64 {
            coordinator.process_video_frame(&VideoFrame::new(vec![1u8; 3], n, 0.0, FrameType::PFrame));
        }
        coordinator.process_motion_frame(&moving_frame(20, 100.0));
        for n in 21..41u64 {
            coordinator.process_video_frame(&VideoFrame::new(vec![1u8; 3], n, 0.0, FrameType::PFrame));
        }

        let payload = motion_payload(&mut receiver);
        assert_eq!(payload.trigger_frame_index, -2);
        assert!(payload.trigger_frame_group.is_empty());
        assert_eq!(payload.motion_video.len(), 120);
    }

    #[test]
    fn test_events_published_on_bus() {
        let (dispatcher, _receiver) = Dispatcher::new();
        let events = EventBus::default();
        let mut subscriber = events.subscribe();
        let coordinator = MotionCoordinator::new(&test_config(0), dispatcher, events).unwrap();

        feed(&coordinator, 0..20);
        coordinator.process_motion_frame(&moving_frame(19, 100.0));
        feed(&coordinator, 20..40);

        assert!(matches!(
            subscriber.try_recv(),
            Ok(CameraEvent::MotionDetected { .. })
        ));
        assert!(matches!(
            subscriber.try_recv(),
            Ok(CameraEvent::MotionEventRecorded {
                trigger_frame_index: 8,
                ..
            })
        ));
    }
}

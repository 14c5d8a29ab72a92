use crate::boxes::BoxSet;
use crate::outputs::OutputName;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Notifications for collaborators outside the frame pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CameraEvent {
    /// Sustained motion confirmed; recording of the post-event window has begun
    MotionDetected { timestamp: f64, boxes: BoxSet },
    /// A motion clip has been assembled and queued for delivery
    MotionEventRecorded {
        event_id: String,
        clip_bytes: usize,
        trigger_frame_index: i32,
    },
    /// A timelapse frame group has been queued for delivery
    TimelapseCaptured { timestamp: f64 },
    OutputAttached { output: OutputName },
    OutputDetached { output: OutputName },
}

impl CameraEvent {
    pub fn description(&self) -> String {
        match self {
            CameraEvent::MotionDetected { boxes, .. } => {
                format!("Motion detected in {} area(s)", boxes.len())
            }
            CameraEvent::MotionEventRecorded {
                event_id,
                clip_bytes,
                ..
            } => format!("Motion event {} recorded ({} bytes)", event_id, clip_bytes),
            CameraEvent::TimelapseCaptured { timestamp } => {
                format!("Timelapse image captured at {:.3}", timestamp)
            }
            CameraEvent::OutputAttached { output } => format!("{} output attached", output),
            CameraEvent::OutputDetached { output } => format!("{} output detached", output),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            CameraEvent::MotionDetected { .. } => "motion_detected",
            CameraEvent::MotionEventRecorded { .. } => "motion_event_recorded",
            CameraEvent::TimelapseCaptured { .. } => "timelapse_captured",
            CameraEvent::OutputAttached { .. } => "output_attached",
            CameraEvent::OutputDetached { .. } => "output_detached",
        }
    }
}

/// Broadcast bus for camera events
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CameraEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CameraEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to events of the given types only
    pub fn subscribe_filtered(&self, name: impl Into<String>, event_types: &[&'static str]) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
            event_types: event_types.to_vec(),
            name: name.into(),
        }
    }

    /// Publish to all current subscribers, returning how many received it.
    ///
    /// Never blocks; publishing with nobody listening is fine.
    pub fn publish(&self, event: CameraEvent) -> usize {
        match &event {
            CameraEvent::MotionDetected { .. } | CameraEvent::MotionEventRecorded { .. } => {
                info!("{}", event.description());
            }
            _ => debug!("{}", event.description()),
        }

        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                trace!("No subscribers for {}", event.event_type());
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

/// Receiver yielding only selected event types
pub struct EventReceiver {
    receiver: broadcast::Receiver<CameraEvent>,
    event_types: Vec<&'static str>,
    name: String,
}

impl EventReceiver {
    /// Next matching event, or `None` once the bus is gone. Lagging is logged and skipped.
    pub async fn recv(&mut self) -> Option<CameraEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.event_types.is_empty() || self.event_types.contains(&event.event_type()) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return None;
                }
            }
        }
    }
}

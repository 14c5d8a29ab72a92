use crate::error::TransportError;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub const MOTION_EVENT_ENDPOINT: &str = "/api/motion_event";
pub const TIMELAPSE_ENDPOINT: &str = "/api/timelapse-image";

/// Base64 encoding of raw byte fields inside JSON payloads
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded)
            .map(Bytes::from)
            .map_err(serde::de::Error::custom)
    }
}

/// Identifier of an event derived from its timestamp, e.g. `20240131_174502_250`
pub fn event_id(timestamp: f64) -> String {
    chrono::DateTime::from_timestamp_millis((timestamp * 1000.0).round() as i64)
        .map(|dt| dt.format("%Y%m%d_%H%M%S_%3f").to_string())
        .unwrap_or_else(|| format!("{:.3}", timestamp))
}

/// A completed motion recording
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionEventPayload {
    pub event_id: String,
    /// The whole clip, starting on a GOP boundary
    #[serde(with = "base64_bytes")]
    pub motion_video: Bytes,
    /// The group of pictures holding the frame that triggered the event
    #[serde(with = "base64_bytes")]
    pub trigger_frame_group: Bytes,
    /// Index of the trigger frame within `trigger_frame_group`
    pub trigger_frame_index: i32,
    pub boxes: Vec<(i32, i32, i32, i32)>,
    pub timestamp: f64,
}

impl fmt::Debug for MotionEventPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MotionEventPayload")
            .field("event_id", &self.event_id)
            .field("motion_video_len", &self.motion_video.len())
            .field("trigger_frame_group_len", &self.trigger_frame_group.len())
            .field("trigger_frame_index", &self.trigger_frame_index)
            .field("boxes", &self.boxes)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// One periodic still capture
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelapsePayload {
    #[serde(with = "base64_bytes")]
    pub frame_group: Bytes,
    pub timelapse_frame_index: i32,
    pub timestamp: f64,
}

impl fmt::Debug for TimelapsePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimelapsePayload")
            .field("frame_group_len", &self.frame_group.len())
            .field("timelapse_frame_index", &self.timelapse_frame_index)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    MotionEvent(MotionEventPayload),
    Timelapse(TimelapsePayload),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::MotionEvent(_) => "motion event",
            Payload::Timelapse(_) => "timelapse image",
        }
    }

    /// Media server path this payload is posted to
    pub fn endpoint(&self) -> &'static str {
        match self {
            Payload::MotionEvent(_) => MOTION_EVENT_ENDPOINT,
            Payload::Timelapse(_) => TIMELAPSE_ENDPOINT,
        }
    }

    pub fn timestamp(&self) -> f64 {
        match self {
            Payload::MotionEvent(p) => p.timestamp,
            Payload::Timelapse(p) => p.timestamp,
        }
    }

    /// Total encoded video bytes carried
    pub fn video_bytes(&self) -> usize {
        match self {
            Payload::MotionEvent(p) => p.motion_video.len() + p.trigger_frame_group.len(),
            Payload::Timelapse(p) => p.frame_group.len(),
        }
    }
}

/// Destination for completed payloads
#[async_trait]
pub trait EventTransport: Send + Sync {
    async fn deliver(&self, payload: &Payload) -> Result<(), TransportError>;

    fn name(&self) -> &str;
}

/// Posts payloads as JSON to the media server
#[cfg(feature = "http_transport")]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

#[cfg(feature = "http_transport")]
impl HttpTransport {
    pub fn new(address: &str, timeout: std::time::Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Request {
                details: format!("Failed to build HTTP client: {}", e),
            })?;

        let address = address.trim_end_matches('/');
        let base_url = if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!("http://{}", address)
        };

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn url_for(&self, payload: &Payload) -> String {
        format!("{}{}", self.base_url, payload.endpoint())
    }
}

#[cfg(feature = "http_transport")]
#[async_trait]
impl EventTransport for HttpTransport {
    async fn deliver(&self, payload: &Payload) -> Result<(), TransportError> {
        let url = self.url_for(payload);
        debug!(url = %url, "Posting {}", payload.kind());

        let request = match payload {
            Payload::MotionEvent(body) => self.client.post(&url).json(body),
            Payload::Timelapse(body) => self.client.post(&url).json(body),
        };

        let response = request.send().await.map_err(|e| TransportError::Request {
            details: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Rejected {
                status: status.as_u16(),
            });
        }

        Ok(())
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Logs payload summaries instead of sending them anywhere
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransport;

#[async_trait]
impl EventTransport for LogTransport {
    async fn deliver(&self, payload: &Payload) -> Result<(), TransportError> {
        match payload {
            Payload::MotionEvent(p) => info!(
                event_id = %p.event_id,
                clip_bytes = p.motion_video.len(),
                trigger_frame_index = p.trigger_frame_index,
                boxes = p.boxes.len(),
                "Motion event ready"
            ),
            Payload::Timelapse(p) => info!(
                frame_group_bytes = p.frame_group.len(),
                timestamp = p.timestamp,
                "Timelapse image ready"
            ),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Payloads waiting for the delivery worker before new ones are dropped
pub const DISPATCH_QUEUE_CAPACITY: usize = 8;

/// Non-blocking hand-off of payloads to a delivery worker
#[derive(Debug, Clone)]
pub struct Dispatcher {
    sender: mpsc::Sender<Payload>,
}

impl Dispatcher {
    /// A dispatcher plus the receiving end, for callers that run their own worker
    pub fn new() -> (Self, mpsc::Receiver<Payload>) {
        Self::with_capacity(DISPATCH_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Payload>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// A dispatcher feeding a delivery worker for `transport`.
    ///
    /// The worker exits once every clone of the dispatcher has been dropped.
    pub fn spawn(transport: Arc<dyn EventTransport>) -> (Self, JoinHandle<()>) {
        let (dispatcher, receiver) = Self::new();
        let worker = tokio::spawn(delivery_worker(receiver, transport));
        (dispatcher, worker)
    }

    /// Queue a payload. Never blocks; returns `false` if the payload was dropped
    /// because the queue is full or the worker has gone away.
    pub fn dispatch(&self, payload: Payload) -> bool {
        let kind = payload.kind();
        match self.sender.try_send(payload) {
            Ok(()) => {
                debug!("Queued {} for delivery", kind);
                true
            }
            Err(TrySendError::Full(_)) => {
                warn!("Dropping {}: delivery queue is full", kind);
                false
            }
            Err(TrySendError::Closed(_)) => {
                error!("Dropping {}: {}", kind, TransportError::WorkerStopped);
                false
            }
        }
    }
}

async fn delivery_worker(mut receiver: mpsc::Receiver<Payload>, transport: Arc<dyn EventTransport>) {
    info!("Delivery worker started ({} transport)", transport.name());

    while let Some(payload) = receiver.recv().await {
        match transport.deliver(&payload).await {
            Ok(()) => info!(
                "Delivered {} ({} bytes of video) via {}",
                payload.kind(),
                payload.video_bytes(),
                transport.name()
            ),
            Err(e) => error!("Failed to deliver {}: {}", payload.kind(), e),
        }
    }

    info!("Delivery worker stopped");
}

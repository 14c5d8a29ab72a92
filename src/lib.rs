pub mod analyzer;
pub mod boxes;
pub mod camera;
pub mod config;
pub mod distributor;
pub mod error;
pub mod events;
pub mod frame;
pub mod frame_buffer;
pub mod outputs;
pub mod source;
pub mod transport;

pub use analyzer::{MotionDetector, MotionEvent, MotionVectorAnalyzer};
pub use boxes::{BoxSet, MotionBox};
pub use camera::{Camera, FrameAssembler};
pub use config::MotionCamConfig;
pub use distributor::{spawn_consumer, ConsumerHandle, FrameDistributor, FrameSubscription, Received};
pub use error::{MotionCamError, Result};
pub use events::{CameraEvent, EventBus, EventReceiver};
pub use frame::{FrameType, MotionFrame, MotionGrid, MotionVector, VideoFrame};
pub use frame_buffer::{FrameBuffer, FrameBufferBuilder};
pub use outputs::{MotionCoordinator, Output, OutputName, RecordingState};
pub use source::SyntheticSource;
pub use transport::{Dispatcher, EventTransport, LogTransport, Payload};

#[cfg(feature = "http_transport")]
pub use transport::HttpTransport;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MotionCamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Frame buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Errors raised while constructing frame buffers
#[derive(Error, Debug)]
pub enum BufferError {
    #[error("Frame buffer capacity must be greater than 0")]
    ZeroCapacity,

    #[error("Frame buffer capacity must be specified")]
    MissingCapacity,
}

/// Errors raised while attaching, running or detaching outputs
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("{output} output already attached to the camera")]
    AlreadyAttached { output: String },

    #[error("{output} output not found; cannot remove it from the camera")]
    NotAttached { output: String },

    #[error("{output} output is misconfigured: {details}")]
    Misconfigured { output: String, details: String },

    #[error("Failed to bind {address}: {source}")]
    BindFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn output process: {details}")]
    SpawnFailed { details: String },
}

/// Errors raised while handing payloads to the media server
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Request failed: {details}")]
    Request { details: String },

    #[error("Server rejected payload with status {status}")]
    Rejected { status: u16 },

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Delivery worker has stopped")]
    WorkerStopped,
}

impl MotionCamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, MotionCamError>;

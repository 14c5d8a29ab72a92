//! The camera session: the producer side of the pipeline and the registry of
//! attached outputs.

mod assembler;
mod session;

pub use assembler::FrameAssembler;
pub use session::Camera;

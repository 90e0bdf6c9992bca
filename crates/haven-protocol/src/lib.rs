//! Wire types for the streaming client channel and the HTTP error envelope.
//!
//! Frames are JSON text with a `type` discriminator. Every frame carries a
//! millisecond timestamp; requests may carry a correlation id that the server
//! echoes back on the matching response frames.

pub mod envelope;
pub mod frames;

pub use envelope::{ErrorBody, ErrorEnvelope};
pub use frames::{ClientFrame, ClientFrameBody, ServerFrame, ServerFrameBody};

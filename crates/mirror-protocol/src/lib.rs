//! The stdout frame protocol and the JPEG stream reframer used to recover
//! frame boundaries from a concatenated AirPlay byte stream.

pub mod reframer;
pub mod writer;

pub use reframer::{parse_dimensions, JpegReframer};
pub use writer::{FrameWriter, WriteOutcome};

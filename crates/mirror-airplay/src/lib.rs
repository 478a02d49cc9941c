//! AirPlay Encoder Pipeline (spec §4.5): launches and supervises the
//! external mirroring encoder, reframes its JPEG stream, and drives the
//! retry loop.

mod encoder;
mod pipeline;
mod transport;

pub use pipeline::run;

//! Framed output writer (spec §4.1).
//!
//! `emit` is a pure function of a byte payload plus two integers; it writes
//! exactly `12 + payload.len()` bytes and forces a flush. A broken pipe
//! means the consumer is gone, which is normal shutdown, not an error.

use std::io::{self, Write};

/// Outcome of one `emit` call.
#[derive(Debug)]
pub enum WriteOutcome {
    /// The frame was written and flushed successfully.
    Written,
    /// The consumer end of the pipe is gone (broken pipe). Callers should
    /// treat this as a clean, successful shutdown (spec §7).
    ConsumerGone,
}

/// Writes length-prefixed frames to any `Write` sink (stdout in production,
/// an in-memory buffer in tests).
pub struct FrameWriter<W: Write> {
    sink: W,
}

impl<W: Write> FrameWriter<W> {
    /// Wraps a writer.
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    /// Emits one frame: `u32 total_len | u32 width | u32 height | payload`,
    /// then flushes. `total_len == 8 + payload.len()`.
    ///
    /// # Errors
    /// Returns the underlying `io::Error` for any failure other than a
    /// broken pipe, which is instead reported as `Ok(WriteOutcome::ConsumerGone)`.
    pub fn emit(&mut self, payload: &[u8], width: u32, height: u32) -> io::Result<WriteOutcome> {
        let total = 8u32 + payload.len() as u32;
        match self.write_frame(total, width, height, payload) {
            Ok(()) => Ok(WriteOutcome::Written),
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(WriteOutcome::ConsumerGone),
            Err(e) => Err(e),
        }
    }

    fn write_frame(&mut self, total: u32, width: u32, height: u32, payload: &[u8]) -> io::Result<()> {
        self.sink.write_all(&total.to_be_bytes())?;
        self.sink.write_all(&width.to_be_bytes())?;
        self.sink.write_all(&height.to_be_bytes())?;
        self.sink.write_all(payload)?;
        self.sink.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_writes_exact_byte_count_and_header() {
        let payload = b"\xFF\xD8hello\xFF\xD9";
        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        let outcome = writer.emit(payload, 1170, 2532).unwrap();
        assert!(matches!(outcome, WriteOutcome::Written));

        assert_eq!(buf.len(), 12 + payload.len());
        let total = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let width = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let height = u32::from_be_bytes(buf[8..12].try_into().unwrap());
        assert_eq!(total, 8 + payload.len() as u32);
        assert_eq!(width, 1170);
        assert_eq!(height, 2532);
        assert_eq!(&buf[12..], payload);
    }

    #[test]
    fn emit_allows_zero_dimensions() {
        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        writer.emit(b"raw", 0, 0).unwrap();
        assert_eq!(&buf[4..8], &0u32.to_be_bytes());
        assert_eq!(&buf[8..12], &0u32.to_be_bytes());
    }

    #[test]
    fn emit_reports_broken_pipe_as_consumer_gone() {
        struct BrokenPipeSink;
        impl Write for BrokenPipeSink {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::from(io::ErrorKind::BrokenPipe))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut writer = FrameWriter::new(BrokenPipeSink);
        let outcome = writer.emit(b"x", 1, 1).unwrap();
        assert!(matches!(outcome, WriteOutcome::ConsumerGone));
    }
}

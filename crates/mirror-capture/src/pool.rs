//! Capture Worker Pool (spec §4.4): one OS thread per open session, all
//! feeding a single bounded channel; one consumer coalesces to the latest
//! frame and writes it out.

use std::io::Write;
use std::sync::mpsc::{self, Receiver, SyncSender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use mirror_core::{wire, EncodedFrame};
use mirror_protocol::{FrameWriter, WriteOutcome};

use crate::backend::{CaptureError, ScreenshotSession};

/// Bounded channel depth (spec §4.4): enough to absorb a burst without the
/// producer blocking indefinitely on a slow consumer.
pub const CHANNEL_CAPACITY: usize = 8;

/// `None` is the pool's end-of-stream sentinel: a worker observed a
/// terminal error and every other worker should stop being read from.
pub type FrameSender = SyncSender<Option<EncodedFrame>>;
pub type FrameReceiver = Receiver<Option<EncodedFrame>>;

/// Creates the bounded channel workers publish frames onto.
pub fn channel() -> (FrameSender, FrameReceiver) {
    mpsc::sync_channel(CHANNEL_CAPACITY)
}

/// Spawns one capture worker. Runs `session.take_screenshot()` in a loop:
/// on success, optimizes and publishes the frame; on a transient error,
/// backs off a second and retries; on a terminal error, publishes the end
/// sentinel and exits.
pub fn spawn_worker(mut session: Box<dyn ScreenshotSession>, label: String, tx: FrameSender) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match session.take_screenshot() {
            Ok(raw) => match mirror_optimizer::optimize(&raw) {
                Ok(optimized) => {
                    let frame = EncodedFrame {
                        payload: optimized.payload,
                        width: optimized.orig_width,
                        height: optimized.orig_height,
                    };
                    if tx.send(Some(frame)).is_err() {
                        return; // consumer gone
                    }
                }
                Err(e) => {
                    tracing::warn!(worker = %label, error = %e, "dropping frame the optimizer could not encode");
                }
            },
            Err(CaptureError::Transient(msg)) => {
                tracing::warn!(worker = %label, error = %msg, "transient capture error, retrying");
                thread::sleep(Duration::from_secs(1));
            }
            Err(CaptureError::Terminal(msg)) => {
                wire::error(format!("{label} disconnected: {msg}"));
                let _ = tx.send(None);
                return;
            }
        }
    })
}

/// Consumes frames until a sentinel or a broken pipe, coalescing bursts to
/// the most recently available frame (spec §4.4: "take one blocking item,
/// then drain any additional ready items non-blockingly, keeping only the
/// latest"). Returns the process exit code.
pub fn consume<W: Write>(rx: FrameReceiver, writer: &mut FrameWriter<W>) -> i32 {
    loop {
        let mut latest = match rx.recv() {
            Ok(item) => item,
            Err(_) => return 1, // every worker gone without a sentinel
        };

        loop {
            match rx.try_recv() {
                Ok(Some(frame)) => latest = Some(frame),
                Ok(None) => {
                    latest = None;
                    break;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        let Some(frame) = latest else {
            return 1; // sentinel observed, whether from recv or the drain
        };

        match writer.emit(&frame.payload, frame.width, frame.height) {
            Ok(WriteOutcome::Written) => continue,
            Ok(WriteOutcome::ConsumerGone) => return 0,
            Err(e) => {
                tracing::error!(error = %e, "frame write failed");
                return 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedSession;

    #[test]
    fn consume_writes_frames_until_sentinel_then_exits_nonzero() {
        let (tx, rx) = channel();
        for i in 0..3u32 {
            tx.send(Some(EncodedFrame { payload: vec![i as u8], width: i, height: i })).unwrap();
        }
        tx.send(None).unwrap();
        drop(tx);

        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        let code = consume(rx, &mut writer);
        assert_eq!(code, 1);
        // 3 frames of 1-byte payload: 12 + 1 header+payload bytes each.
        assert_eq!(buf.len(), 3 * 13);
    }

    #[test]
    fn consume_returns_zero_on_consumer_gone() {
        struct BrokenPipeSink;
        impl Write for BrokenPipeSink {
            fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
                Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe))
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let (tx, rx) = channel();
        tx.send(Some(EncodedFrame { payload: vec![1], width: 1, height: 1 })).unwrap();
        drop(tx);

        let mut writer = FrameWriter::new(BrokenPipeSink);
        assert_eq!(consume(rx, &mut writer), 0);
    }

    #[test]
    fn consume_returns_one_when_channel_closes_without_sentinel() {
        let (tx, rx) = channel();
        drop(tx);
        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        assert_eq!(consume(rx, &mut writer), 1);
    }

    fn synthetic_png() -> Vec<u8> {
        let img = image::ImageBuffer::from_fn(4, 4, |x, y| image::Rgba([x as u8, y as u8, 0, 255]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn spawn_worker_publishes_frames_then_terminal_sentinel() {
        let session = ScriptedSession::new(vec![synthetic_png()]);
        let (tx, rx) = channel();
        let handle = spawn_worker(Box::new(session), "worker-1".into(), tx);

        let first = rx.recv().unwrap();
        assert!(first.is_some());
        let second = rx.recv().unwrap();
        assert!(second.is_none());

        handle.join().unwrap();
    }
}

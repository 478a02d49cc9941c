//! AirPlay Encoder Pipeline retry state machine (spec §4.5).

use std::io::{BufRead, BufReader, Read, Write};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use mirror_core::wire;
use mirror_process::Supervisor;
use mirror_protocol::{FrameWriter, JpegReframer, WriteOutcome};

use crate::encoder::{self, build_command};
use crate::transport::{DefaultTransport, PlatformTransport};

const MAX_RETRIES: u32 = 5;
const RETRY_DELAY: Duration = Duration::from_secs(1);
const LISTEN_PORT_READY_TIMEOUT: Duration = Duration::from_secs(8);
const LISTEN_POLL_INTERVAL: Duration = Duration::from_millis(300);
const WINDOWS_ACCEPT_TIMEOUT: Duration = Duration::from_secs(15);
const FIRST_READ_TIMEOUT: Duration = Duration::from_secs(10);
const SUBSEQUENT_READ_TIMEOUT: Duration = Duration::from_secs(5);
const READ_CHUNK: usize = 131_072;
const AIRPLAY_LISTEN_PORT: u16 = 7000;

/// Runs the pipeline's retry loop to completion and returns the process
/// exit code (spec §4.5 "Retry disposition").
pub fn run<W: Write>(writer: &mut FrameWriter<W>, supervisor: &Supervisor) -> i32 {
    let encoder_path = encoder::find_encoder();

    for attempt in 1..=MAX_RETRIES {
        wire::info(format!("Starting AirPlay server via uxplay (attempt {attempt}/{MAX_RETRIES})"));

        match run_one_attempt(&encoder_path, supervisor, writer) {
            AttemptOutcome::FramesEmitted => return 0,
            AttemptOutcome::FatalEnvironment(msg) => {
                wire::error(msg);
                return 1;
            }
            AttemptOutcome::NoFrames if attempt < MAX_RETRIES => {
                wire::info(format!("No frames received, restarting uxplay in {}s", RETRY_DELAY.as_secs()));
                thread::sleep(RETRY_DELAY);
            }
            AttemptOutcome::NoFrames => {
                wire::error(
                    "AirPlay ended without sending video after multiple attempts. \
                     Check that the iPhone is on the same network and try again.",
                );
                return 1;
            }
        }
    }

    1
}

enum AttemptOutcome {
    FramesEmitted,
    NoFrames,
    FatalEnvironment(String),
}

fn run_one_attempt<W: Write>(
    encoder_path: &std::path::Path,
    supervisor: &Supervisor,
    writer: &mut FrameWriter<W>,
) -> AttemptOutcome {
    // Step 1: kill stale.
    encoder::kill_stale();

    // Step 2: open transport.
    let transport = match DefaultTransport::open() {
        Ok(t) => t,
        Err(e) => return AttemptOutcome::FatalEnvironment(format!("failed to open AirPlay transport: {e}")),
    };

    // Step 3: launch child.
    let mut command = build_command(encoder_path, &transport);
    transport.wire_into(&mut command);
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return AttemptOutcome::FatalEnvironment(not_found_message());
        }
        Err(e) => {
            wire::info(format!("Failed to launch uxplay: {e}"));
            return AttemptOutcome::NoFrames;
        }
    };

    let child_stderr = child.stderr.take();

    // Step 4: early-death probe.
    thread::sleep(Duration::from_secs(1));
    if let Ok(Some(_status)) = child.try_wait() {
        let mut stderr_text = String::new();
        if let Some(mut stderr) = child_stderr {
            let _ = stderr.read_to_string(&mut stderr_text);
        }
        if stderr_text.contains("DNS-SD") || stderr_text.contains("DNSService") {
            return AttemptOutcome::FatalEnvironment(dns_sd_message());
        }
        wire::info(format!("uxplay exited prematurely: {}", stderr_text.trim()));
        return AttemptOutcome::NoFrames;
    }

    supervisor.register(child);

    let errors = Arc::new(Mutex::new(Vec::new()));
    let stderr_monitor = child_stderr.map(|stderr| spawn_stderr_monitor(stderr, Arc::clone(&errors)));

    // Step 5: listener readiness probe.
    if !poll_listener_ready() {
        wire::info("uxplay did not open port 7000 in time");
        supervisor.kill_and_reap();
        return AttemptOutcome::NoFrames;
    }

    // Step 6 (Windows only): accept the child's sink. Step 7: ready marker.
    let reader = match transport.accept(WINDOWS_ACCEPT_TIMEOUT) {
        Ok(reader) => reader,
        Err(e) => {
            wire::info(format!("uxplay did not connect the video socket in time: {e}"));
            supervisor.kill_and_reap();
            return AttemptOutcome::NoFrames;
        }
    };
    wire::airplay_ready();

    // Step 8: drive the reframer. The stderr-monitor thread (spawned above)
    // mirrors the child's logs concurrently.
    let frame_count = drive_reframer(reader, supervisor, writer);

    // Step 9: terminate.
    supervisor.kill_and_reap();
    if let Some(handle) = stderr_monitor {
        let _ = handle.join();
    }

    if frame_count > 0 {
        AttemptOutcome::FramesEmitted
    } else {
        let collected = errors.lock().unwrap();
        if !collected.is_empty() {
            wire::info(format!("uxplay reported errors: {}", collected.join("; ")));
        }
        AttemptOutcome::NoFrames
    }
}

/// Mirrors every non-empty stderr line as `INFO: uxplay: ...` and collects
/// lines that look like errors, for the zero-frame summary.
fn spawn_stderr_monitor(stderr: std::process::ChildStderr, errors: Arc<Mutex<Vec<String>>>) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stderr);
        for line in reader.lines().map_while(Result::ok) {
            let text = line.trim().to_string();
            if text.is_empty() {
                continue;
            }
            wire::info(format!("uxplay: {text}"));
            if text.contains("ERROR") || text.contains("error") {
                errors.lock().unwrap().push(text);
            }
        }
    })
}

fn poll_listener_ready() -> bool {
    let deadline = std::time::Instant::now() + LISTEN_PORT_READY_TIMEOUT;
    loop {
        if std::net::TcpStream::connect_timeout(
            &std::net::SocketAddr::from(([127, 0, 0, 1], AIRPLAY_LISTEN_PORT)),
            Duration::from_millis(500),
        )
        .is_ok()
        {
            return true;
        }
        if std::time::Instant::now() >= deadline {
            return false;
        }
        thread::sleep(LISTEN_POLL_INTERVAL);
    }
}

enum ReadEvent {
    Chunk(Vec<u8>),
    Eof,
    Err,
}

/// Runs the blocking `read` loop on its own thread so the caller can apply
/// a deadline via `recv_timeout` — std has no portable per-call read
/// timeout for a pipe or accepted socket, so this stands in for the
/// original's `select`/`recv(timeout=...)`.
fn spawn_reader(mut reader: Box<dyn Read + Send>) -> mpsc::Receiver<ReadEvent> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    let _ = tx.send(ReadEvent::Eof);
                    return;
                }
                Ok(n) => {
                    if tx.send(ReadEvent::Chunk(buf[..n].to_vec())).is_err() {
                        return;
                    }
                }
                Err(_) => {
                    let _ = tx.send(ReadEvent::Err);
                    return;
                }
            }
        }
    });
    rx
}

/// Reads the transport until EOF or a read deadline, feeding every chunk
/// through the Reframer and emitting frames via the Writer. The first read
/// gets a longer deadline (the device hasn't connected yet); subsequent
/// reads get a shorter one (spec §4.5 step 8).
fn drive_reframer<W: Write>(reader: Box<dyn Read + Send>, supervisor: &Supervisor, writer: &mut FrameWriter<W>) -> u64 {
    let rx = spawn_reader(reader);
    let mut reframer = JpegReframer::new();
    let mut cached_dims: Option<(u16, u16)> = None;
    let mut frame_count: u64 = 0;

    loop {
        if !supervisor.has_registered_child() {
            break;
        }

        let timeout = if frame_count == 0 { FIRST_READ_TIMEOUT } else { SUBSEQUENT_READ_TIMEOUT };
        match rx.recv_timeout(timeout) {
            Ok(ReadEvent::Chunk(chunk)) => {
                for frame in reframer.push(&chunk) {
                    if cached_dims.is_none() {
                        let parsed = mirror_protocol::parse_dimensions(&frame);
                        if parsed.0 != 0 {
                            cached_dims = Some(parsed);
                        }
                    }
                    let (w, h) = cached_dims.unwrap_or((0, 0));
                    match writer.emit(&frame, u32::from(w), u32::from(h)) {
                        Ok(WriteOutcome::Written) => frame_count += 1,
                        Ok(WriteOutcome::ConsumerGone) => return frame_count,
                        Err(e) => {
                            tracing::error!(error = %e, "frame write failed");
                            return frame_count;
                        }
                    }
                }
            }
            Ok(ReadEvent::Eof) | Ok(ReadEvent::Err) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if frame_count == 0 {
                    wire::info(format!("Timeout waiting {}s for AirPlay connection", FIRST_READ_TIMEOUT.as_secs()));
                } else {
                    wire::info(format!(
                        "Timeout waiting {}s for the next AirPlay chunk",
                        SUBSEQUENT_READ_TIMEOUT.as_secs()
                    ));
                }
                break;
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    frame_count
}

fn dns_sd_message() -> String {
    #[cfg(windows)]
    {
        "Bonjour service is not running. Install iTunes or Apple's Bonjour Print Services.".to_string()
    }
    #[cfg(not(windows))]
    {
        "DNS-SD service (Avahi) is not running. Run: sudo systemctl start avahi-daemon".to_string()
    }
}

fn not_found_message() -> String {
    #[cfg(windows)]
    {
        "uxplay not found. Install uxplay-windows: https://github.com/leapbtw/uxplay-windows".to_string()
    }
    #[cfg(not(windows))]
    {
        "uxplay not found. Install with: sudo apt install uxplay".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::process::Command;

    fn sof0(width: u16, height: u16) -> Vec<u8> {
        let mut seg = vec![0xFF, 0xC0, 0x00, 0x11, 0x08];
        seg.extend_from_slice(&height.to_be_bytes());
        seg.extend_from_slice(&width.to_be_bytes());
        seg.extend_from_slice(&[0x03, 0x01, 0x11, 0x00, 0x02, 0x11, 0x01, 0x03, 0x11, 0x01]);
        seg
    }

    fn jpeg(width: u16, height: u16, body: &[u8]) -> Vec<u8> {
        let mut out = vec![0xFF, 0xD8];
        out.extend_from_slice(&sof0(width, height));
        out.extend_from_slice(body);
        out.extend_from_slice(&[0xFF, 0xD9]);
        out
    }

    #[test]
    fn drive_reframer_emits_each_frame_and_stops_on_eof() {
        let j1 = jpeg(100, 200, b"a");
        let j2 = jpeg(300, 400, b"b");
        let mut bytes = j1.clone();
        bytes.extend_from_slice(&j2);
        let reader: Box<dyn Read + Send> = Box::new(Cursor::new(bytes));

        let supervisor = Supervisor::new();
        supervisor.register(Command::new("sleep").arg("2").spawn().expect("spawn sleep"));

        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        let count = drive_reframer(reader, &supervisor, &mut writer);

        assert_eq!(count, 2);
        assert!(!buf.is_empty());
        supervisor.kill_and_reap();
    }

    #[test]
    fn drive_reframer_caches_dimensions_from_the_first_frame_only() {
        let j1 = jpeg(640, 480, b"a");
        let j2 = jpeg(1, 1, b"b"); // dims would differ but must not override the cache
        let mut bytes = j1.clone();
        bytes.extend_from_slice(&j2);
        let reader: Box<dyn Read + Send> = Box::new(Cursor::new(bytes));

        let supervisor = Supervisor::new();
        supervisor.register(Command::new("sleep").arg("2").spawn().expect("spawn sleep"));

        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        drive_reframer(reader, &supervisor, &mut writer);
        supervisor.kill_and_reap();

        let first_width = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let second_frame_offset = 12 + j1.len();
        let second_width = u32::from_be_bytes(buf[second_frame_offset + 4..second_frame_offset + 8].try_into().unwrap());
        assert_eq!(first_width, 640);
        assert_eq!(second_width, 640);
    }

    #[test]
    fn drive_reframer_keeps_retrying_the_parse_until_a_nonzero_width_turns_up() {
        // A frame with no SOF segment parses to (0, 0) and must not poison
        // the cache; the next, parseable frame should populate it.
        let empty = vec![0xFF, 0xD8, 0xFF, 0xD9];
        let real = jpeg(800, 600, b"a");
        let mut bytes = empty.clone();
        bytes.extend_from_slice(&real);
        let reader: Box<dyn Read + Send> = Box::new(Cursor::new(bytes));

        let supervisor = Supervisor::new();
        supervisor.register(Command::new("sleep").arg("2").spawn().expect("spawn sleep"));

        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        let count = drive_reframer(reader, &supervisor, &mut writer);
        supervisor.kill_and_reap();

        assert_eq!(count, 2);
        let first_width = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let second_frame_offset = 12 + empty.len();
        let second_width = u32::from_be_bytes(buf[second_frame_offset + 4..second_frame_offset + 8].try_into().unwrap());
        assert_eq!(first_width, 0);
        assert_eq!(second_width, 800);
    }
}

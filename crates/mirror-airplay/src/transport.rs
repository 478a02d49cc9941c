//! Platform-conditional transport (spec Design Note "Platform-conditional
//! transport"): two operations, open the server side and accept the
//! client side, so everything downstream just consumes a readable byte
//! stream. POSIX uses an anonymous pipe inherited by the child; Windows
//! uses a loopback TCP listener.

use std::io::Read;
use std::process::Command;
use std::time::Duration;

/// The write-side argument handed to the encoder's `-vs` flag, and the
/// read side the pipeline drains frames from.
pub trait PlatformTransport: Send {
    /// Opens the server side of the transport.
    fn open() -> std::io::Result<Self>
    where
        Self: Sized;

    /// The `gst-launch`-style video-sink descriptor naming this transport,
    /// passed to the encoder's `-vs` argument.
    fn video_sink_arg(&self) -> String;

    /// Wires the transport into `command` before it is spawned (POSIX only
    /// — dup2's the pipe's write end onto a fixed fd in the child).
    fn wire_into(&self, command: &mut Command);

    /// Accepts/obtains the readable side after the child is running.
    /// `timeout` only matters for the Windows TCP listener.
    fn accept(self, timeout: Duration) -> std::io::Result<Box<dyn Read + Send>>
    where
        Self: Sized;
}

#[cfg(unix)]
mod posix {
    use super::*;
    use std::fs::File;
    use std::os::fd::{AsRawFd, OwnedFd};
    use std::os::unix::process::CommandExt;

    /// fd number the encoder is told its video sink lives at, inside its own
    /// process — chosen to avoid colliding with stdin/stdout/stderr.
    const CHILD_FD: i32 = 3;

    pub struct PosixPipeTransport {
        read_end: OwnedFd,
        write_end: OwnedFd,
    }

    impl PlatformTransport for PosixPipeTransport {
        fn open() -> std::io::Result<Self> {
            let (read_end, write_end) = nix::unistd::pipe().map_err(std::io::Error::from)?;
            Ok(Self { read_end, write_end })
        }

        fn video_sink_arg(&self) -> String {
            format!("fdsink fd={CHILD_FD} sync=false")
        }

        fn wire_into(&self, command: &mut Command) {
            let raw = self.write_end.as_raw_fd();
            // SAFETY: only async-signal-safe libc calls between fork and exec.
            unsafe {
                command.pre_exec(move || {
                    nix::unistd::dup2(raw, CHILD_FD)
                        .map(|_| ())
                        .map_err(std::io::Error::from)
                });
            }
        }

        fn accept(self, _timeout: Duration) -> std::io::Result<Box<dyn Read + Send>> {
            // The parent's copy of the write end is no longer needed once
            // the child has dup2'd its own; dropping it here means EOF on
            // the read end follows the child's exit, not ours.
            drop(self.write_end);
            Ok(Box::new(File::from(self.read_end)))
        }
    }
}

#[cfg(unix)]
pub use posix::PosixPipeTransport;


#[cfg(windows)]
mod windows {
    use super::*;
    use std::net::TcpListener;
    use std::time::Instant;

    pub struct WindowsLoopbackTransport {
        listener: TcpListener,
        port: u16,
    }

    impl PlatformTransport for WindowsLoopbackTransport {
        fn open() -> std::io::Result<Self> {
            let listener = TcpListener::bind("127.0.0.1:0")?;
            let port = listener.local_addr()?.port();
            Ok(Self { listener, port })
        }

        fn video_sink_arg(&self) -> String {
            format!("tcpclientsink host=127.0.0.1 port={}", self.port)
        }

        fn wire_into(&self, _command: &mut Command) {
            // The port number is already baked into the `-vs` argument;
            // nothing to wire into the child's process image.
        }

        fn accept(self, timeout: Duration) -> std::io::Result<Box<dyn Read + Send>> {
            self.listener.set_nonblocking(true)?;
            let deadline = Instant::now() + timeout;
            loop {
                match self.listener.accept() {
                    Ok((stream, _)) => {
                        stream.set_nonblocking(false)?;
                        return Ok(Box::new(stream) as Box<dyn Read + Send>);
                    }
                    Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                        if Instant::now() >= deadline {
                            return Err(std::io::Error::new(
                                std::io::ErrorKind::TimedOut,
                                "encoder did not connect to the video socket in time",
                            ));
                        }
                        std::thread::sleep(Duration::from_millis(50));
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }
}

#[cfg(windows)]
pub use windows::WindowsLoopbackTransport;

/// The platform's transport type, selected at compile time.
#[cfg(unix)]
pub type DefaultTransport = PosixPipeTransport;
#[cfg(windows)]
pub type DefaultTransport = WindowsLoopbackTransport;

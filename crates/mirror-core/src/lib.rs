//! Shared types used across the `mirror` workspace: the device identifier,
//! stderr protocol prefixes, and logging bootstrap.

use std::fmt;

/// Opaque, byte-comparable identifier for a physical device (a UDID).
///
/// Caller-supplied, immutable for the lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wraps a raw identifier string.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Borrows the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Dashless normalization (`AAAA-BBBB` -> `AAAABBBB`), used by the
    /// tunnel directory lookup fallback matching rules.
    pub fn dashless(&self) -> String {
        self.0.chars().filter(|c| *c != '-').collect()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stderr line prefixes the parent process pattern-matches on (spec §6/§7).
///
/// Never route informational text through stdout: stdout is reserved for
/// the frame protocol.
pub mod wire {
    /// Prefix for informational/diagnostic lines.
    pub const INFO: &str = "INFO:";
    /// Prefix for fatal/terminal conditions.
    pub const ERROR: &str = "MIRROR_ERROR:";
    /// Handshake token signaling the AirPlay encoder is ready for a peer.
    pub const AIRPLAY_READY: &str = "MIRROR_AIRPLAY_READY";
    /// Sentinel telling the parent to launch a developer tunnel.
    pub const TUNNEL_REQUIRED: &str = "MIRROR_ERROR: TUNNEL_REQUIRED";

    /// Writes an `INFO:` line to stderr, flushing immediately.
    pub fn info(msg: impl AsRef<str>) {
        eprintln!("{INFO} {}", msg.as_ref());
    }

    /// Writes a `MIRROR_ERROR:` line to stderr, flushing immediately.
    pub fn error(msg: impl AsRef<str>) {
        eprintln!("{ERROR} {}", msg.as_ref());
    }

    /// Writes the `MIRROR_ERROR: TUNNEL_REQUIRED` sentinel verbatim.
    ///
    /// Never route this through [`error`] — it is already a complete line,
    /// and the parent matches on it exactly.
    pub fn tunnel_required() {
        eprintln!("{TUNNEL_REQUIRED}");
    }

    /// Writes the `MIRROR_AIRPLAY_READY` sentinel verbatim.
    pub fn airplay_ready() {
        eprintln!("{AIRPLAY_READY}");
    }
}

/// A ready-to-ship frame: JPEG payload (or original bytes when no encoder
/// is linked) plus the pre-downscale dimensions the parent lays out at.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Payload bytes, ready to hand to the Framed Output Writer.
    pub payload: Vec<u8>,
    /// Original (pre-downscale) width, or 0 if unknown.
    pub width: u32,
    /// Original (pre-downscale) height, or 0 if unknown.
    pub height: u32,
}

/// Initializes the `tracing` subscriber the same way every binary in this
/// workspace does: `RUST_LOG`-driven env filter, defaulting to `info`.
///
/// Writes to stderr, never stdout — stdout is reserved for the frame
/// protocol.
pub fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

//! The `DeviceBackend` boundary (spec §4.6 Non-goals): everything that
//! requires the device-control library itself is a trait method, so the
//! ladder can be exercised without real hardware. Mirrors the
//! `CaptureBackend` split other teams in this workspace use for the same
//! reason.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use mirror_core::DeviceId;

/// Errors a capture session can fail with once it's already open.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    /// Worth retrying without abandoning the session (spec §4.4 edge case).
    #[error("transient capture error: {0}")]
    Transient(String),
    /// The device is gone; the worker should exit and the consumer should
    /// see the pool's end sentinel.
    #[error("terminal capture error: {0}")]
    Terminal(String),
}

/// Errors opening a session or dialing a remote service.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Construction failed; the ladder falls through to its next strategy.
    #[error("{0}")]
    ConstructionFailed(String),
}

/// One open capture session. `take_screenshot` blocks until a frame is
/// available or the device goes away.
pub trait ScreenshotSession: Send {
    fn take_screenshot(&mut self) -> Result<Vec<u8>, CaptureError>;
}

/// A connection to a device's remote service port, opened over a tunnel
/// (spec §4.6 strategy 2). Exposes the two services that strategy can try.
pub trait RemoteService: Send {
    fn open_screenshot_session(&self) -> Result<Box<dyn ScreenshotSession>, BackendError>;
    fn open_dvt_session(&self) -> Result<Box<dyn ScreenshotSession>, BackendError>;
}

/// Result of invoking the device-control CLI's auto-mount verb.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoMountOutcome {
    /// The developer disk image mounted successfully.
    Completed,
    /// The tool ran but reported failure.
    Failed(String),
    /// The auto-mount tool isn't installed; skip straight past this rung.
    ToolMissing,
}

/// Result of the final `idevicescreenshot` fallback (spec §4.6 strategy 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalCliOutcome {
    /// The CLI produced a screenshot.
    Succeeded,
    /// The CLI's stderr indicates the developer disk image isn't mounted —
    /// informational only; the ladder emits `TUNNEL_REQUIRED` either way.
    TunnelRequired,
    /// Some other failure.
    OtherFailure(String),
}

/// Everything the ladder needs from the device-control library, abstracted
/// so it can run against a mock in tests.
pub trait DeviceBackend: Send + Sync {
    /// Opens the primary lockdown-based screenshot session (strategy 1).
    fn open_primary_session(&self, device: &DeviceId) -> Result<Box<dyn ScreenshotSession>, BackendError>;

    /// Opens an additional parallel session for worker-2/worker-3. Callers
    /// treat any error the same as "no more capacity" — stop opening more.
    fn open_additional_session(&self, device: &DeviceId) -> Result<Box<dyn ScreenshotSession>, BackendError>;

    /// Major iOS version, used to gate the tunnel-based strategies
    /// (spec §4.6: tunneld only applies to iOS 17+).
    fn ios_major_version(&self, device: &DeviceId) -> Option<u32>;

    /// Dials a tunnel's remote service discovery endpoint.
    fn dial_remote_service(&self, host: &str, port: u16) -> Result<Box<dyn RemoteService>, BackendError>;

    /// Invokes the device-control CLI's `mounter auto-mount` verb.
    fn auto_mount(&self, device: &DeviceId) -> AutoMountOutcome;

    /// Shells out to `idevicescreenshot` as the last-resort fallback.
    fn external_cli_screenshot(&self, device: &DeviceId) -> ExternalCliOutcome;
}

/// Production backend. The lockdown/tunnel dial methods are outside this
/// build's scope (spec §4.6 Non-goals name the device-control library as an
/// external collaborator) and always report construction failure, which the
/// ladder treats as "fall through to the next strategy". `auto_mount` and
/// `external_cli_screenshot` are genuine subprocess invocations and are
/// wired up for real.
#[derive(Debug, Default, Clone, Copy)]
pub struct CliDeviceBackend;

const MOUNTER_BIN: &str = "idevice-mounter";
const INFO_BIN: &str = "idevice-info";
const SCREENSHOT_BIN: &str = "idevicescreenshot";

impl DeviceBackend for CliDeviceBackend {
    fn open_primary_session(&self, _device: &DeviceId) -> Result<Box<dyn ScreenshotSession>, BackendError> {
        Err(BackendError::ConstructionFailed(
            "device-control library session is not linked into this build".into(),
        ))
    }

    fn open_additional_session(&self, device: &DeviceId) -> Result<Box<dyn ScreenshotSession>, BackendError> {
        self.open_primary_session(device)
    }

    fn ios_major_version(&self, device: &DeviceId) -> Option<u32> {
        let output = Command::new(INFO_BIN)
            .args(["-u", device.as_str(), "-k", "ProductVersion"])
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .split('.')
            .next()?
            .parse()
            .ok()
    }

    fn dial_remote_service(&self, _host: &str, _port: u16) -> Result<Box<dyn RemoteService>, BackendError> {
        Err(BackendError::ConstructionFailed(
            "remote service discovery dial is not linked into this build".into(),
        ))
    }

    fn auto_mount(&self, device: &DeviceId) -> AutoMountOutcome {
        if which(MOUNTER_BIN).is_none() {
            return AutoMountOutcome::ToolMissing;
        }
        match Command::new(MOUNTER_BIN)
            .args(["mounter", "auto-mount", "--udid", device.as_str()])
            .output()
        {
            Ok(output) if output.status.success() => AutoMountOutcome::Completed,
            Ok(output) => AutoMountOutcome::Failed(stderr_text(&output.stderr)),
            Err(e) => AutoMountOutcome::Failed(e.to_string()),
        }
    }

    fn external_cli_screenshot(&self, device: &DeviceId) -> ExternalCliOutcome {
        let tmp = std::env::temp_dir().join(format!("mirror-{}-{}.png", std::process::id(), device));
        let result = Command::new(SCREENSHOT_BIN)
            .args(["-u", device.as_str(), &tmp.to_string_lossy()])
            .output();
        let _ = std::fs::remove_file(&tmp);

        match result {
            Ok(output) if output.status.success() => ExternalCliOutcome::Succeeded,
            Ok(output) => {
                let stderr = stderr_text(&output.stderr);
                if stderr.contains("Developer") || stderr.contains("screenshotr") || stderr.contains("mount") {
                    ExternalCliOutcome::TunnelRequired
                } else {
                    ExternalCliOutcome::OtherFailure(stderr)
                }
            }
            Err(e) => ExternalCliOutcome::OtherFailure(e.to_string()),
        }
    }
}

fn stderr_text(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).trim().to_string()
}

fn which(bin: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        let candidate: &Path = &dir.join(bin);
        candidate.is_file().then(|| candidate.to_path_buf())
    })
}

//! Device Strategy Ladder (spec §4.6): four capture strategies tried in
//! order — direct lockdown session, tunneld-discovered remote service,
//! auto-mount retry, external CLI fallback. The ladder commits to whichever
//! strategy's session construction succeeds first and runs it to
//! completion; it never backs out of a strategy once a worker is running,
//! even if that worker's first capture fails.

use std::io::Write;

use mirror_core::{wire, DeviceId};
use mirror_protocol::FrameWriter;

use crate::backend::{AutoMountOutcome, DeviceBackend, ExternalCliOutcome, ScreenshotSession};
use crate::pool::{self, FrameSender};
use crate::tunnel;

/// Minimum iOS major version the tunnel-based strategies apply to
/// (spec §4.6: lockdown-based capture stops working at this point).
const TUNNEL_MIN_IOS_MAJOR: u32 = 17;

/// Runs the ladder for `device`, writing frames to `writer`, and returns
/// the process exit code.
pub fn run<W: Write>(device: &DeviceId, backend: &dyn DeviceBackend, writer: &mut FrameWriter<W>) -> i32 {
    if let Some(code) = try_direct(device, backend, writer) {
        return code;
    }
    if let Some(code) = try_tunneled(device, backend, writer) {
        return code;
    }
    if let Some(code) = try_auto_mount_retry(device, backend, writer) {
        return code;
    }
    run_external_cli(device, backend)
}

/// Strategy 1: open the primary lockdown-based session directly.
fn try_direct<W: Write>(device: &DeviceId, backend: &dyn DeviceBackend, writer: &mut FrameWriter<W>) -> Option<i32> {
    wire::info("Using direct screenshot service");
    let primary = backend.open_primary_session(device).ok()?;
    Some(run_pool(device, backend, primary, writer))
}

/// Strategy 2: look up a tunneld descriptor, dial it, and try the
/// screenshot service, falling back to DVT over the same connection.
fn try_tunneled<W: Write>(device: &DeviceId, backend: &dyn DeviceBackend, writer: &mut FrameWriter<W>) -> Option<i32> {
    let major = backend.ios_major_version(device)?;
    if major < TUNNEL_MIN_IOS_MAJOR {
        return None;
    }

    let descriptor = tunnel::lookup(device)?;
    wire::info(format!("Connecting via tunneld {}:{}", descriptor.host, descriptor.port));

    let remote = backend.dial_remote_service(&descriptor.host, descriptor.port).ok()?;

    match remote.open_screenshot_session() {
        Ok(session) => {
            wire::info("ScreenshotService via tunnel connected");
            return Some(run_pool_single(session, writer));
        }
        Err(e) => {
            wire::info(format!("ScreenshotService unavailable via tunnel ({e}), trying DVT"));
        }
    }

    let session = remote.open_dvt_session().ok()?;
    Some(run_pool_single(session, writer))
}

/// Strategy 3: retry auto-mount, then the direct session again.
fn try_auto_mount_retry<W: Write>(
    device: &DeviceId,
    backend: &dyn DeviceBackend,
    writer: &mut FrameWriter<W>,
) -> Option<i32> {
    let major = backend.ios_major_version(device)?;
    if major < TUNNEL_MIN_IOS_MAJOR {
        return None;
    }

    wire::info("Trying to auto-mount the developer disk image");
    match backend.auto_mount(device) {
        AutoMountOutcome::ToolMissing => wire::info("Auto-mount tool not installed"),
        AutoMountOutcome::Failed(msg) => wire::info(format!("Auto-mount failed: {msg}")),
        AutoMountOutcome::Completed => wire::info("Auto-mount completed"),
    }

    // The original retries the primary session regardless of the auto-mount
    // outcome (mirror_stream.py:760-769); whether the tool ran, succeeded,
    // or was never installed, the ladder still gives the direct session one
    // more chance before falling to the external CLI.
    let primary = backend.open_primary_session(device).ok()?;
    Some(run_pool(device, backend, primary, writer))
}

/// Strategy 4: shell out to the external screenshot CLI. Always terminates
/// the process — succeeds at most once, then the parent must launch a
/// developer tunnel to keep streaming (spec §4.6, §9.5).
fn run_external_cli(device: &DeviceId, backend: &dyn DeviceBackend) -> i32 {
    wire::info("Trying idevicescreenshot as fallback");
    match backend.external_cli_screenshot(device) {
        ExternalCliOutcome::Succeeded => wire::info("idevicescreenshot produced one frame"),
        ExternalCliOutcome::TunnelRequired => {}
        ExternalCliOutcome::OtherFailure(msg) => wire::info(format!("idevicescreenshot failed: {msg}")),
    }
    wire::tunnel_required();
    1
}

/// Starts worker-1 on `primary`, then opportunistically opens up to two
/// more sessions, test-capturing each before handing it to its own worker
/// (spec §4.4 construction order).
fn run_pool<W: Write>(
    device: &DeviceId,
    backend: &dyn DeviceBackend,
    primary: Box<dyn ScreenshotSession>,
    writer: &mut FrameWriter<W>,
) -> i32 {
    let (tx, rx) = pool::channel();
    pool::spawn_worker(primary, "worker-1".into(), tx.clone());

    for slot in 0..2 {
        match backend.open_additional_session(device) {
            Ok(mut extra) => {
                if extra.take_screenshot().is_err() {
                    break;
                }
                let label = format!("worker-{}", slot + 2);
                wire::info(format!("Parallel capture {label} active"));
                pool::spawn_worker(extra, label, tx.clone());
            }
            Err(_) => break,
        }
    }
    drop(tx);

    pool::consume(rx, writer)
}

/// Single-worker pool run, used by the tunnel-based strategies (neither
/// screenshot-service-over-tunnel nor DVT fan out to extra sessions).
fn run_pool_single<W: Write>(primary: Box<dyn ScreenshotSession>, writer: &mut FrameWriter<W>) -> i32 {
    let (tx, rx): (FrameSender, _) = pool::channel();
    pool::spawn_worker(primary, "worker-1".into(), tx);
    pool::consume(rx, writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, CaptureError};
    use crate::mock::{MockDeviceBackend, MockRemoteService, ScriptedSession};
    use std::sync::Mutex;

    fn writer_on(buf: &mut Vec<u8>) -> FrameWriter<&mut Vec<u8>> {
        FrameWriter::new(buf)
    }

    #[test]
    fn direct_strategy_wins_when_primary_session_opens() {
        let backend = MockDeviceBackend {
            primary: Mutex::new(Some(Box::new(|| {
                Ok(Box::new(ScriptedSession::new(vec![vec![1]])) as Box<dyn ScreenshotSession>)
            }))),
            ..Default::default()
        };
        let mut buf = Vec::new();
        let mut writer = writer_on(&mut buf);
        let code = run(&DeviceId::new("AAAA"), &backend, &mut writer);
        assert_eq!(code, 1); // scripted session exhausts into a terminal error
        assert!(!buf.is_empty());
    }

    #[test]
    fn falls_through_every_strategy_down_to_external_cli() {
        // No primary session, iOS new enough to try tunneling, but no
        // tunneld listening on the loopback in this test process — the
        // ladder should fall all the way through to strategy 4 without
        // panicking.
        let backend = MockDeviceBackend {
            ios_major: Some(17),
            ..Default::default()
        };
        let mut buf = Vec::new();
        let mut writer = writer_on(&mut buf);
        let code = run(&DeviceId::new("AAAA"), &backend, &mut writer);
        assert_eq!(code, 1);
        assert!(buf.is_empty());
    }

    #[test]
    fn dials_remote_service_when_tunnel_construction_succeeds() {
        let remote = MockRemoteService {
            screenshot: Mutex::new(Some(Box::new(|| {
                Ok(Box::new(ScriptedSession::new(vec![vec![9]])) as Box<dyn ScreenshotSession>)
            }))),
            dvt: Mutex::new(None),
        };
        let remote = Mutex::new(Some(remote));
        let backend = MockDeviceBackend {
            ios_major: Some(17),
            remote: Mutex::new(Some(Box::new(move |_host: &str, _port: u16| {
                remote
                    .lock()
                    .unwrap()
                    .take()
                    .map(|r| Box::new(r) as Box<dyn crate::backend::RemoteService>)
                    .ok_or_else(|| BackendError::ConstructionFailed("already dialed".into()))
            }))),
            ..Default::default()
        };

        // dial_remote_service is only reachable once tunnel::lookup finds a
        // descriptor, which requires a live tunneld; exercised directly here
        // instead of through `run` to avoid a network dependency in tests.
        let session = backend.dial_remote_service("127.0.0.1", 1).unwrap();
        let mut session = session.open_screenshot_session().unwrap();
        assert_eq!(session.take_screenshot().unwrap(), vec![9]);
    }

    #[test]
    fn auto_mount_tool_missing_still_retries_the_primary_session() {
        // Missing the auto-mount tool doesn't skip the retry (only a
        // successfully reopened primary session would) -- with no primary
        // session scripted the retry fails too and the ladder falls
        // through to the external CLI, same end result as Failed/Completed.
        let backend = MockDeviceBackend {
            ios_major: Some(17),
            auto_mount_outcome: AutoMountOutcome::ToolMissing,
            external_cli_outcome: ExternalCliOutcome::TunnelRequired,
            ..Default::default()
        };
        let mut buf = Vec::new();
        let mut writer = writer_on(&mut buf);
        let code = run(&DeviceId::new("AAAA"), &backend, &mut writer);
        assert_eq!(code, 1);
    }

    #[test]
    fn auto_mount_tool_missing_does_not_prevent_a_successful_retry() {
        // The fix under test: ToolMissing must still fall through to the
        // primary-session retry, not bypass it straight to external CLI.
        let backend = MockDeviceBackend {
            ios_major: Some(17),
            auto_mount_outcome: AutoMountOutcome::ToolMissing,
            primary: Mutex::new(Some(Box::new(|| {
                Ok(Box::new(ScriptedSession::new(vec![vec![1, 2, 3]])) as Box<dyn ScreenshotSession>)
            }))),
            ..Default::default()
        };
        let mut buf = Vec::new();
        let mut writer = writer_on(&mut buf);
        let code = run(&DeviceId::new("AAAA"), &backend, &mut writer);
        assert_eq!(code, 1);
        assert!(!buf.is_empty(), "the retried primary session should have produced a frame");
    }

    #[test]
    fn external_cli_always_terminates_the_process() {
        let backend = MockDeviceBackend {
            external_cli_outcome: ExternalCliOutcome::Succeeded,
            ..Default::default()
        };
        let mut buf = Vec::new();
        let mut writer = writer_on(&mut buf);
        let code = run(&DeviceId::new("AAAA"), &backend, &mut writer);
        assert_eq!(code, 1);
    }

    #[test]
    fn run_pool_stops_opening_extra_sessions_once_one_fails_test_capture() {
        let backend = MockDeviceBackend {
            primary: Mutex::new(Some(Box::new(|| {
                Ok(Box::new(ScriptedSession::new(vec![vec![1]])) as Box<dyn ScreenshotSession>)
            }))),
            additional: Mutex::new(vec![Box::new(|| {
                Ok(Box::new(ScriptedSession::new(vec![]).then(Err(CaptureError::Terminal("no cam".into()))))
                    as Box<dyn ScreenshotSession>)
            })]),
            ..Default::default()
        };
        let mut buf = Vec::new();
        let mut writer = writer_on(&mut buf);
        let code = run(&DeviceId::new("AAAA"), &backend, &mut writer);
        assert_eq!(code, 1);
    }

    #[test]
    fn construction_failure_reports_as_backend_error() {
        let err = BackendError::ConstructionFailed("x".into());
        assert_eq!(err.to_string(), "x");
    }
}

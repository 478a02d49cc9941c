//! A deterministic, synthetic `DeviceBackend` for exercising the ladder and
//! worker pool without real hardware. Kept public rather than test-gated,
//! the same way the capture crate it's modeled on keeps its synthetic
//! backend available to callers, not just its own test suite.

use std::collections::VecDeque;
use std::sync::Mutex;

use mirror_core::DeviceId;

use crate::backend::{
    AutoMountOutcome, BackendError, CaptureError, DeviceBackend, ExternalCliOutcome, RemoteService,
    ScreenshotSession,
};

/// A session that yields a fixed sequence of canned frames, then errors.
pub struct ScriptedSession {
    frames: VecDeque<Result<Vec<u8>, CaptureError>>,
    after_script: Result<Vec<u8>, CaptureError>,
}

impl ScriptedSession {
    pub fn new(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames: frames.into_iter().map(Ok).collect(),
            after_script: Err(CaptureError::Terminal("scripted session exhausted".into())),
        }
    }

    /// What to return once the scripted frames run out (defaults to a
    /// terminal error, simulating device disconnect).
    pub fn then(mut self, outcome: Result<Vec<u8>, CaptureError>) -> Self {
        self.after_script = outcome;
        self
    }
}

impl ScreenshotSession for ScriptedSession {
    fn take_screenshot(&mut self) -> Result<Vec<u8>, CaptureError> {
        self.frames.pop_front().unwrap_or_else(|| self.after_script.clone())
    }
}

/// Builds a [`ScriptedSession`] factory so a test can hand out fresh
/// sessions for worker-2/worker-3 without reusing frame queues.
pub struct MockDeviceBackend {
    pub primary: Mutex<Option<Box<dyn FnMut() -> Result<Box<dyn ScreenshotSession>, BackendError> + Send>>>,
    pub additional: Mutex<Vec<Box<dyn FnMut() -> Result<Box<dyn ScreenshotSession>, BackendError> + Send>>>,
    pub ios_major: Option<u32>,
    pub remote: Mutex<Option<Box<dyn FnMut(&str, u16) -> Result<Box<dyn RemoteService>, BackendError> + Send>>>,
    pub auto_mount_outcome: AutoMountOutcome,
    pub external_cli_outcome: ExternalCliOutcome,
}

impl Default for MockDeviceBackend {
    fn default() -> Self {
        Self {
            primary: Mutex::new(None),
            additional: Mutex::new(Vec::new()),
            ios_major: None,
            remote: Mutex::new(None),
            auto_mount_outcome: AutoMountOutcome::ToolMissing,
            external_cli_outcome: ExternalCliOutcome::TunnelRequired,
        }
    }
}

impl DeviceBackend for MockDeviceBackend {
    fn open_primary_session(&self, _device: &DeviceId) -> Result<Box<dyn ScreenshotSession>, BackendError> {
        let mut guard = self.primary.lock().unwrap();
        match guard.as_mut() {
            Some(factory) => factory(),
            None => Err(BackendError::ConstructionFailed("no primary session scripted".into())),
        }
    }

    fn open_additional_session(&self, _device: &DeviceId) -> Result<Box<dyn ScreenshotSession>, BackendError> {
        let mut guard = self.additional.lock().unwrap();
        if guard.is_empty() {
            return Err(BackendError::ConstructionFailed("no more additional sessions scripted".into()));
        }
        let mut factory = guard.remove(0);
        factory()
    }

    fn ios_major_version(&self, _device: &DeviceId) -> Option<u32> {
        self.ios_major
    }

    fn dial_remote_service(&self, host: &str, port: u16) -> Result<Box<dyn RemoteService>, BackendError> {
        let mut guard = self.remote.lock().unwrap();
        match guard.as_mut() {
            Some(factory) => factory(host, port),
            None => Err(BackendError::ConstructionFailed("no remote service scripted".into())),
        }
    }

    fn auto_mount(&self, _device: &DeviceId) -> AutoMountOutcome {
        self.auto_mount_outcome.clone()
    }

    fn external_cli_screenshot(&self, _device: &DeviceId) -> ExternalCliOutcome {
        self.external_cli_outcome.clone()
    }
}

/// A remote service whose screenshot/DVT sessions are each independently
/// scripted to succeed or fail construction.
pub struct MockRemoteService {
    pub screenshot: Mutex<Option<Box<dyn FnMut() -> Result<Box<dyn ScreenshotSession>, BackendError> + Send>>>,
    pub dvt: Mutex<Option<Box<dyn FnMut() -> Result<Box<dyn ScreenshotSession>, BackendError> + Send>>>,
}

impl RemoteService for MockRemoteService {
    fn open_screenshot_session(&self) -> Result<Box<dyn ScreenshotSession>, BackendError> {
        let mut guard = self.screenshot.lock().unwrap();
        match guard.as_mut() {
            Some(factory) => factory(),
            None => Err(BackendError::ConstructionFailed("screenshot service unavailable".into())),
        }
    }

    fn open_dvt_session(&self) -> Result<Box<dyn ScreenshotSession>, BackendError> {
        let mut guard = self.dvt.lock().unwrap();
        match guard.as_mut() {
            Some(factory) => factory(),
            None => Err(BackendError::ConstructionFailed("dvt service unavailable".into())),
        }
    }
}

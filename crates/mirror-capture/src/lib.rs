//! Capture Worker Pool and Device Strategy Ladder (spec §4.4, §4.6): the
//! half of the pipeline that turns a UDID into a stream of frames on
//! stdout when no AirPlay mirror is in play.

pub mod backend;
pub mod ladder;
pub mod mock;
pub mod pool;
pub mod tunnel;

pub use backend::{
    AutoMountOutcome, BackendError, CaptureError, CliDeviceBackend, DeviceBackend, ExternalCliOutcome,
    RemoteService, ScreenshotSession,
};
pub use ladder::run as run_ladder;

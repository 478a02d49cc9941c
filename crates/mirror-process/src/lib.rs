//! Process Lifecycle Supervisor (spec §4.7): owns the single Encoder Child,
//! guarantees it is killed and reaped on every exit path, and on POSIX
//! arbitrates SIGTERM into a clean exit.

mod signals;
mod supervisor;

pub use signals::install_termination_handler;
pub use supervisor::Supervisor;

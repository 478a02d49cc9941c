//! Encoder discovery and process launch (spec §6: "AirPlay encoder (name
//! varies by platform; located via `PATH` plus a short Windows search list
//! under `ProgramFiles*` / `LOCALAPPDATA`)").

use std::path::PathBuf;
use std::process::{Command, Stdio};

use crate::transport::PlatformTransport;

const ENCODER_BIN: &str = "uxplay";
const AIRPLAY_PORT: &str = "7000";

/// Locates the encoder binary: bare name on PATH everywhere, plus a
/// Windows-only search under the environment's install directories.
pub fn find_encoder() -> PathBuf {
    if which(ENCODER_BIN).is_some() {
        return PathBuf::from(ENCODER_BIN);
    }

    #[cfg(windows)]
    {
        for env_var in ["ProgramFiles", "ProgramFiles(x86)", "LOCALAPPDATA"] {
            let Some(base) = std::env::var_os(env_var) else { continue };
            for suffix in ["uxplay-windows/uxplay.exe", "Programs/uxplay-windows/uxplay.exe"] {
                let candidate = PathBuf::from(&base).join(suffix);
                if candidate.is_file() {
                    return candidate;
                }
            }
        }
    }

    PathBuf::from(ENCODER_BIN)
}

fn which(bin: &str) -> Option<PathBuf> {
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths).find_map(|dir| {
        let candidate = dir.join(bin);
        candidate.is_file().then_some(candidate)
    })
}

/// Best-effort terminate any prior encoder instance still running from a
/// previous attempt or a previous process entirely (spec §4.5 step 1).
pub fn kill_stale() {
    #[cfg(windows)]
    {
        let _ = Command::new("taskkill").args(["/F", "/IM", "uxplay.exe"]).output();
    }
    #[cfg(unix)]
    {
        let _ = Command::new("pkill").args(["-9", "-f", ENCODER_BIN]).output();
    }
    std::thread::sleep(std::time::Duration::from_millis(500));
}

/// Builds the command line: AirPlay port 7000, audio disabled, and a
/// video-sink descriptor naming the transport.
pub fn build_command(binary: &std::path::Path, transport: &dyn PlatformTransport) -> Command {
    let mut command = Command::new(binary);
    command
        .args(["-nh", "-n", "Mirror", "-p", AIRPLAY_PORT])
        .args(["-vc", "videoconvert ! jpegenc quality=70"])
        .args(["-vs", &transport.video_sink_arg()])
        .args(["-as", "0"])
        .stdout(Stdio::null())
        .stderr(Stdio::piped());
    command
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTransport;

    impl PlatformTransport for FakeTransport {
        fn open() -> std::io::Result<Self> {
            Ok(Self)
        }

        fn video_sink_arg(&self) -> String {
            "fdsink fd=3 sync=false".to_string()
        }

        fn wire_into(&self, _command: &mut Command) {}

        fn accept(self, _timeout: std::time::Duration) -> std::io::Result<Box<dyn std::io::Read + Send>> {
            unimplemented!("not needed for argv construction tests")
        }
    }

    #[test]
    fn build_command_sets_the_expected_argv() {
        let transport = FakeTransport;
        let command = build_command(std::path::Path::new("uxplay"), &transport);
        let args: Vec<_> = command.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "-nh",
                "-n",
                "Mirror",
                "-p",
                "7000",
                "-vc",
                "videoconvert ! jpegenc quality=70",
                "-vs",
                "fdsink fd=3 sync=false",
                "-as",
                "0",
            ]
        );
    }

    #[test]
    fn find_encoder_falls_back_to_the_bare_name_when_nothing_on_path_matches() {
        let original = std::env::var_os("PATH");
        // SAFETY: test runs single-threaded within this process's test harness.
        unsafe { std::env::set_var("PATH", "") };
        let found = find_encoder();
        if let Some(path) = original {
            unsafe { std::env::set_var("PATH", path) };
        }
        assert_eq!(found, PathBuf::from(ENCODER_BIN));
    }
}

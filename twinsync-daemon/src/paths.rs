use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEBOUNCE_WINDOW: Duration = Duration::from_millis(500);
/// How often the schedule loop checks which pairs are due.
pub const SCHEDULE_TICK: Duration = Duration::from_secs(15);

pub const DAEMON_STDOUT_LOG: &str = "daemon.log";
pub const DAEMON_STDERR_LOG: &str = "daemon-err.log";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn twinsync_root(home: &Path) -> PathBuf {
    home.join(".twinsync")
}

pub fn pairs_root(home: &Path) -> PathBuf {
    twinsync_root(home).join("pairs")
}

pub fn run_dir(home: &Path) -> PathBuf {
    twinsync_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    twinsync_root(home).join("logs")
}

pub fn stdout_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDOUT_LOG)
}

pub fn stderr_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDERR_LOG)
}

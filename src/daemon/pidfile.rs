//! Pid file written at startup and removed on exit.

use std::path::{Path, PathBuf};

use crate::core::errors::{MpError, Result};

/// An owned pid file; removed when dropped.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Write the current pid to `path`.
    ///
    /// Fails with [`MpError::PidFileLocked`] when the file names another live
    /// process. Stale files are overwritten.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let own = std::process::id();
        if let Some(pid) = read_pid(&path) {
            if pid != own && process_alive(pid) {
                return Err(MpError::PidFileLocked { path, pid });
            }
            tracing::debug!(path = %path.display(), pid, "replacing stale pid file");
        }
        std::fs::write(&path, format!("{own}\n")).map_err(|err| MpError::io(&path, err))?;
        Ok(Self { path })
    }

    /// Location of the pid file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %err, "failed to remove pid file");
        }
    }
}

fn read_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // Signal 0 only probes; EPERM still means the process exists.
    matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::PidFile;
    use crate::core::errors::MpError;

    #[test]
    fn writes_and_removes_pid_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mp.pid");
        {
            let pid_file = PidFile::create(&path).expect("create");
            let written = std::fs::read_to_string(pid_file.path()).expect("read");
            assert_eq!(written.trim(), std::process::id().to_string());
        }
        assert!(!path.exists());
    }

    #[test]
    fn stale_pid_file_is_replaced() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mp.pid");
        std::fs::write(&path, "garbage\n").expect("write");
        let _pid_file = PidFile::create(&path).expect("create");
        assert_eq!(
            std::fs::read_to_string(&path).expect("read").trim(),
            std::process::id().to_string()
        );
    }

    #[cfg(unix)]
    #[test]
    fn live_foreign_pid_is_refused() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("mp.pid");
        let mut child = std::process::Command::new("sleep")
            .arg("5")
            .spawn()
            .expect("spawn");
        std::fs::write(&path, format!("{}\n", child.id())).expect("write");

        let err = PidFile::create(&path).expect_err("locked");
        assert!(matches!(err, MpError::PidFileLocked { pid, .. } if pid == child.id()));
        assert_eq!(err.code(), "MP-4004");

        child.kill().expect("kill");
        child.wait().expect("wait");
    }
}

//! C4 — the advisory inter-process lock.
//!
//! The lock is a symlink named `.lock` inside the dump directory whose
//! target is the decimal pid of the holder. There is no central broker:
//! correctness comes entirely from `symlinkat`'s atomicity and from every
//! acquirer agreeing on how to tell a live holder from a stale one.

use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::Duration;

use nix::errno::Errno;
use nix::unistd::{getpid, readlinkat, symlinkat, unlinkat, UnlinkatFlags};

use crate::error::{DumpDirError, Result};
use crate::flags::OpenFlags;
use crate::timefile;

pub(crate) const LOCK_NAME: &str = ".lock";

const SYMLINK_RETRY: Duration = Duration::from_millis(10);
const WAIT_FOR_OTHER_PROCESS: Duration = Duration::from_millis(500);
const CREATE_LOCK: Duration = Duration::from_millis(10);
const NO_TIME_FILE: Duration = Duration::from_millis(50);
const NO_TIME_FILE_COUNT: u32 = 10;

/// Which flow is acquiring the lock. Selects the retry interval used
/// while waiting for a live holder, and whether the post-lock validity
/// check runs at all.
///
/// Earlier versions of this protocol told the two roles apart by
/// comparing the retry interval against a magic constant; here the role
/// is passed explicitly instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LockRole {
    /// The open flow: waits for a live holder, then requires a valid
    /// `time` item once the lock is held.
    Opener,
    /// The create flow: owns its own freshly-made directory, so it gets
    /// priority over any racing opener and never checks validity (there
    /// is no `time` item yet).
    Creator,
}

impl LockRole {
    fn wait_interval(self) -> Duration {
        match self {
            LockRole::Opener => WAIT_FOR_OTHER_PROCESS,
            LockRole::Creator => CREATE_LOCK,
        }
    }
}

/// Acquires the lock on `dir_fd`, blocking (via sleeps, never busy-spin)
/// until it succeeds or a terminal condition is hit.
pub(crate) fn acquire(dir_fd: RawFd, path: &Path, role: LockRole, flags: OpenFlags) -> Result<()> {
    acquire_symlink(dir_fd, path, role)?;

    if role != LockRole::Opener || flags.contains(OpenFlags::DONT_WAIT_FOR_LOCK) {
        return Ok(());
    }

    if timefile::read_time(dir_fd).is_some() {
        return Ok(());
    }
    // Lock held, but no valid `time` item: release and retry the whole
    // acquire, bounded.
    release_best_effort(dir_fd);
    for _ in 1..NO_TIME_FILE_COUNT {
        sleep(NO_TIME_FILE);
        acquire_symlink(dir_fd, path, role)?;
        if timefile::read_time(dir_fd).is_some() {
            return Ok(());
        }
        release_best_effort(dir_fd);
    }
    Err(DumpDirError::NotADumpDir(path.to_path_buf()))
}

/// Runs only step 2 of acquire: obtain the `.lock` symlink itself,
/// without any validity check. Loops internally on the two recoverable
/// races (vanished lock, live holder) and returns once the symlink is
/// ours.
fn acquire_symlink(dir_fd: RawFd, path: &Path, role: LockRole) -> Result<()> {
    let pid_str = getpid().as_raw().to_string();

    loop {
        match symlinkat(pid_str.as_str(), Some(dir_fd), LOCK_NAME) {
            Ok(()) => return Ok(()),
            Err(Errno::EEXIST) => match readlinkat(dir_fd, LOCK_NAME) {
                Err(Errno::ENOENT) => {
                    // Raced with the previous holder's release.
                    sleep(SYMLINK_RETRY);
                    continue;
                }
                Err(e) => return Err(DumpDirError::from_nix(path, e)),
                Ok(target) => {
                    let target = target.to_string_lossy().into_owned();
                    if target == pid_str {
                        log::error!(
                            "lock on '{}' already held by this process (pid {})",
                            path.display(),
                            pid_str
                        );
                        return Err(DumpDirError::LockedBySelf(path.to_path_buf()));
                    }
                    match target.parse::<i32>() {
                        Ok(holder_pid) if proc_exists(holder_pid) => {
                            // Another live process holds it: wait it out.
                            sleep(role.wait_interval());
                            continue;
                        }
                        _ => {
                            // Stale lock: either the holder is dead, or
                            // the target isn't even a pid. Reclaim it.
                            match unlinkat(Some(dir_fd), LOCK_NAME, UnlinkatFlags::NoRemoveDir) {
                                Ok(()) | Err(Errno::ENOENT) => continue,
                                Err(e) => return Err(DumpDirError::from_nix(path, e)),
                            }
                        }
                    }
                }
            },
            Err(Errno::ENOENT) | Err(Errno::ENOTDIR) => {
                return Err(DumpDirError::MissingPath(path.to_path_buf()));
            }
            Err(Errno::EACCES) => {
                return Err(DumpDirError::PermissionDenied(path.to_path_buf()));
            }
            Err(e) => return Err(DumpDirError::from_nix(path, e)),
        }
    }
}

fn proc_exists(pid: i32) -> bool {
    Path::new(&format!("/proc/{pid}")).exists()
}

fn release_best_effort(dir_fd: RawFd) {
    let _ = unlinkat(Some(dir_fd), LOCK_NAME, UnlinkatFlags::NoRemoveDir);
}

/// Releases the lock. Clears the in-memory flag *before* unlinking so a
/// failing unlink still leaves the handle correctly marked unlocked.
pub(crate) fn release(dir_fd: RawFd, locked: &mut bool, path: &Path) -> Result<()> {
    if !*locked {
        return Ok(());
    }
    *locked = false;
    match unlinkat(Some(dir_fd), LOCK_NAME, UnlinkatFlags::NoRemoveDir) {
        Ok(()) | Err(Errno::ENOENT) => Ok(()),
        Err(e) => {
            log::warn!("failed to unlink lock at '{}': {e}", path.display());
            Err(DumpDirError::from_nix(path, e))
        }
    }
}

pub(crate) fn lock_path(dir: &Path) -> PathBuf {
    dir.join(LOCK_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::os::unix::io::AsRawFd;

    fn open_dir_fd(path: &Path) -> File {
        File::open(path).unwrap()
    }

    #[test]
    fn acquire_then_release_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let dir_fd = open_dir_fd(tmp.path());
        File::create(tmp.path().join("time")).unwrap();
        std::fs::write(tmp.path().join("time"), b"123").unwrap();

        acquire(dir_fd.as_raw_fd(), tmp.path(), LockRole::Creator, OpenFlags::empty()).unwrap();
        assert!(tmp.path().join(LOCK_NAME).exists());

        let mut locked = true;
        release(dir_fd.as_raw_fd(), &mut locked, tmp.path()).unwrap();
        assert!(!locked);
        assert!(!tmp.path().join(LOCK_NAME).exists());
    }

    #[test]
    fn acquire_reclaims_a_stale_lock() {
        let tmp = tempfile::tempdir().unwrap();
        let dir_fd = open_dir_fd(tmp.path());

        // A pid that is vanishingly unlikely to be live: simulates a
        // lock left behind by a crashed holder.
        symlinkat("999999999", Some(dir_fd.as_raw_fd()), LOCK_NAME).unwrap();

        acquire_symlink(dir_fd.as_raw_fd(), tmp.path(), LockRole::Creator).unwrap();
        let target = readlinkat(dir_fd.as_raw_fd(), LOCK_NAME).unwrap();
        assert_eq!(target.to_string_lossy(), getpid().as_raw().to_string());
    }

    #[test]
    fn acquiring_ones_own_lock_twice_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let dir_fd = open_dir_fd(tmp.path());

        acquire_symlink(dir_fd.as_raw_fd(), tmp.path(), LockRole::Creator).unwrap();
        let err = acquire_symlink(dir_fd.as_raw_fd(), tmp.path(), LockRole::Creator).unwrap_err();
        assert!(matches!(err, DumpDirError::LockedBySelf(_)));
    }

    // Exercising a genuinely live competing holder needs a second
    // process; not reproducible in a single-process unit test.
    #[test]
    #[ignore]
    fn acquire_waits_out_a_live_holder() {}
}

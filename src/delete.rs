//! C8 — recursive removal of a dump directory's contents and,
//! optionally, the directory itself.

use std::os::unix::io::RawFd;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{openat, OFlag};
use nix::sys::stat::Mode;
use nix::unistd::{unlinkat, UnlinkatFlags};
use walkdir::WalkDir;

use crate::lock::LOCK_NAME;

const RMDIR_FAIL: Duration = Duration::from_millis(10);
const RMDIR_FAIL_COUNT: u32 = 50;

/// Outcome of [`delete_contents`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// Every item but the lock itself was removed.
    ContentsRemoved,
    /// At least one item could not be removed; the directory is left in
    /// a partially-cleaned state.
    ContentRemovalFailed,
}

/// Removes every entry in the directory except `.lock`, recursing into
/// subdirectories, then finally unlinks `.lock`. The caller is expected
/// to already hold the lock (enforced by the handle, not by this
/// function).
pub(crate) fn delete_contents(dir_fd: RawFd, dir_path: &Path) -> DeleteOutcome {
    let mut all_ok = true;

    // `WalkDir` only knows paths, so it re-opens `dir_path` by name
    // rather than walking `dir_fd` directly; this is safe here because
    // the lock is held by this process for the duration of the walk, so
    // no other dump-dir-store participant will be renaming the tree out
    // from under it. Entries are visited contents-first so subdirectory
    // removal happens after their own entries are gone.
    let walker = WalkDir::new(dir_path)
        .contents_first(true)
        .min_depth(1)
        .into_iter();

    for entry in walker {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                log::warn!("failed to walk '{}': {e}", dir_path.display());
                all_ok = false;
                continue;
            }
        };
        if entry.path() == dir_path.join(LOCK_NAME) {
            continue;
        }
        let relative = match entry.path().strip_prefix(dir_path) {
            Ok(r) => r,
            Err(_) => continue,
        };
        let is_dir = entry.file_type().is_dir();
        let flags = if is_dir {
            UnlinkatFlags::RemoveDir
        } else {
            UnlinkatFlags::NoRemoveDir
        };
        match unlinkat(Some(dir_fd), relative, flags) {
            Ok(()) | Err(Errno::ENOENT) => {}
            Err(e) => {
                log::warn!("failed to remove '{}': {e}", entry.path().display());
                all_ok = false;
            }
        }
    }

    if all_ok {
        match unlinkat(Some(dir_fd), LOCK_NAME, UnlinkatFlags::NoRemoveDir) {
            Ok(()) | Err(Errno::ENOENT) => DeleteOutcome::ContentsRemoved,
            Err(e) => {
                log::warn!("failed to remove lock at '{}': {e}", dir_path.display());
                DeleteOutcome::ContentRemovalFailed
            }
        }
    } else {
        DeleteOutcome::ContentRemovalFailed
    }
}

/// Removes the now-empty directory itself, retrying a bounded number of
/// times: another process briefly holding a dirfd open (e.g. mid-open
/// racing this delete) can make `rmdir` return `ENOTEMPTY`/`EBUSY`
/// transiently.
pub(crate) fn rmdir_retrying(parent_fd: RawFd, name: &str, path: &Path) -> bool {
    for attempt in 0..RMDIR_FAIL_COUNT {
        match unlinkat(Some(parent_fd), name, UnlinkatFlags::RemoveDir) {
            Ok(()) => return true,
            Err(Errno::ENOENT) => return true,
            Err(e) if attempt + 1 < RMDIR_FAIL_COUNT => {
                log::warn!("rmdir '{}' failed ({e}), retrying", path.display());
                sleep(RMDIR_FAIL);
            }
            Err(e) => {
                log::warn!("rmdir '{}' failed permanently: {e}", path.display());
                return false;
            }
        }
    }
    false
}

/// Reopens `name` read-only under `dir_fd` purely to confirm it is still
/// a directory before the rmdir retry loop starts; used by the handle's
/// `delete` to distinguish "someone replaced this with a file" from a
/// transient rmdir failure.
pub(crate) fn still_a_directory(dir_fd: RawFd, name: &str) -> bool {
    match openat(
        dir_fd,
        name,
        OFlag::O_RDONLY | OFlag::O_DIRECTORY | OFlag::O_NOFOLLOW,
        Mode::empty(),
    ) {
        Ok(fd) => {
            let _ = nix::unistd::close(fd);
            true
        }
        Err(_) => false,
    }
}

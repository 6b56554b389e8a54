//! C9 — item iteration and the sanitisation pass over a freshly created
//! directory's contents.

use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use nix::dir::Dir;
use nix::fcntl::AtFlags;
use nix::sys::stat::{fchmodat, fstatat, FchmodatFlags, Mode, SFlag};
use nix::unistd::{fchownat, FchownatFlags, Gid, Uid};

use crate::path::is_correct_filename;

/// A cursor over a dump directory's entries, backed by a dirfd duplicated
/// from the handle's own fd so callers may iterate while the handle
/// stays open (and, on Linux, even while items are added or removed).
pub(crate) struct DirCursor {
    dir: Dir,
}

impl DirCursor {
    pub(crate) fn open(dir_fd: RawFd) -> nix::Result<Self> {
        let dup = nix::unistd::dup(dir_fd)?;
        let owned = unsafe { OwnedFd::from_raw_fd(dup) };
        let dir = Dir::from_fd(owned)?;
        Ok(DirCursor { dir })
    }

    /// Rewinds to the first entry, matching `init_next_file`'s semantics
    /// of resetting any previous iteration on this handle.
    pub(crate) fn rewind(&mut self) {
        self.dir.rewind();
    }

    /// Returns the next item name, skipping `.`, `..`, the lock file,
    /// anything that fails the filename validity check, and anything
    /// that isn't a regular file (a directory or a symlink left behind
    /// by another process is never yielded).
    pub(crate) fn next_name(&mut self) -> Option<String> {
        loop {
            let entry = self.dir.next()?.ok()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name == "." || name == ".." || name == crate::lock::LOCK_NAME {
                continue;
            }
            if !is_correct_filename(&name) {
                continue;
            }
            match fstatat(Some(self.dir.as_raw_fd()), name.as_str(), AtFlags::AT_SYMLINK_NOFOLLOW) {
                Ok(st) if SFlag::from_bits_truncate(st.st_mode).contains(SFlag::S_IFREG) => return Some(name),
                _ => continue,
            }
        }
    }
}

impl AsRawFd for DirCursor {
    fn as_raw_fd(&self) -> RawFd {
        self.dir.as_raw_fd()
    }
}

/// Walks every regular-file item in the directory (skipping `.lock`) and
/// resets ownership and mode, tolerating per-item failures: one item a
/// caller can't chown shouldn't abort sanitisation of the rest.
pub(crate) fn sanitize_mode_and_owner(dir_fd: RawFd, owner: Option<(Uid, Gid)>, mode: Mode) -> nix::Result<()> {
    let mut cursor = DirCursor::open(dir_fd)?;
    while let Some(name) = cursor.next_name() {
        if let Some((uid, gid)) = owner {
            if let Err(e) = fchownat(
                Some(dir_fd),
                name.as_str(),
                Some(uid),
                Some(gid),
                FchownatFlags::NoFollowSymlink,
            ) {
                log::warn!("failed to chown item '{name}' during sanitisation: {e}");
            }
        }
        if let Err(e) = fchmodat(Some(dir_fd), name.as_str(), mode, FchmodatFlags::NoFollowSymlink) {
            log::warn!("failed to chmod item '{name}' during sanitisation: {e}");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::os::unix::io::AsRawFd as _;

    #[test]
    fn iterates_regular_items_skipping_lock_and_dots() {
        let dir = tempfile::tempdir().unwrap();
        File::create(dir.path().join("time")).unwrap();
        File::create(dir.path().join("uid")).unwrap();
        std::os::unix::fs::symlink("123", dir.path().join(".lock")).unwrap();

        let dir_fd = File::open(dir.path()).unwrap();
        let mut cursor = DirCursor::open(dir_fd.as_raw_fd()).unwrap();
        let mut names = Vec::new();
        while let Some(name) = cursor.next_name() {
            names.push(name);
        }
        names.sort();
        assert_eq!(names, vec!["time".to_owned(), "uid".to_owned()]);
    }
}

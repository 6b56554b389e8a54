//! C2 — safe file I/O primitives.
//!
//! Every item read or write inside a dump directory goes through here so
//! the no-follow / no-hardlink discipline is enforced in exactly one
//! place.

use std::fs::File;
use std::io::{Read, Write};
use std::os::unix::fs::{MetadataExt, OpenOptionsExt};
use std::os::unix::io::{FromRawFd, RawFd};
use std::path::Path;

use nix::errno::Errno;
use nix::fcntl::{openat, OFlag};
use nix::sys::stat::{fchmod, Mode};
use nix::unistd::{fchownat, unlinkat, FchownatFlags, Gid, Uid, UnlinkatFlags};

use crate::flags::LoadTextFlags;
use crate::path::is_correct_filename;

/// Opens `name` for reading relative to `dir_fd` with no symlink
/// dereference, and rejects anything that isn't a regular file with
/// exactly one hard link (defence against hardlink substitution by a
/// partially-trusted group member).
pub(crate) fn secure_open_item(dir_fd: RawFd, name: &str) -> Result<File, Errno> {
    let fd = openat(
        dir_fd,
        name,
        OFlag::O_RDONLY | OFlag::O_NOFOLLOW | OFlag::O_CLOEXEC,
        Mode::empty(),
    )?;
    let file = unsafe { File::from_raw_fd(fd) };
    match file.metadata() {
        Ok(meta) if meta.is_file() && meta.nlink() == 1 => Ok(file),
        Ok(_) => Err(Errno::ELOOP),
        Err(e) => Err(Errno::from_raw(e.raw_os_error().unwrap_or(libc_eio()))),
    }
}

// `nix` doesn't expose a bare EIO constructor helper; this keeps the
// fallback self-contained without adding a `libc` dependency just for one
// constant.
fn libc_eio() -> i32 {
    5 // EIO
}

/// Reads the whole of `name` (relative to `dir_fd`) and applies the
/// payload normalisation rules, or applies the flag-selected fallback on
/// any failure (missing item, invalid name, hardlinked/non-regular
/// item).
///
/// Returns `None` only when [`LoadTextFlags::RETURN_NULL_ON_FAILURE`] is
/// set and the read failed; otherwise a failure yields `Some(String::new())`.
pub(crate) fn load_text(dir_fd: RawFd, name: &str, flags: LoadTextFlags) -> Option<String> {
    if !is_correct_filename(name) {
        return on_failure(flags);
    }
    match secure_open_item(dir_fd, name) {
        Ok(mut file) => {
            let mut bytes = Vec::new();
            if file.read_to_end(&mut bytes).is_err() {
                return on_failure(flags);
            }
            Some(normalize_payload(&bytes))
        }
        Err(e) => {
            if !flags.contains(LoadTextFlags::FAIL_QUIETLY) {
                log::warn!("failed to open item '{name}': {e}");
            }
            on_failure(flags)
        }
    }
}

fn on_failure(flags: LoadTextFlags) -> Option<String> {
    if flags.contains(LoadTextFlags::RETURN_NULL_ON_FAILURE) {
        None
    } else {
        Some(String::new())
    }
}

/// Reads a path outside of any dump directory (e.g. `/etc/system-release`).
/// Symlinks are only followed here, and only when
/// [`LoadTextFlags::OPEN_FOLLOW`] is set — item reads inside a dump
/// directory never call this.
pub(crate) fn load_text_path(path: &Path, flags: LoadTextFlags) -> Option<String> {
    let follow = flags.contains(LoadTextFlags::OPEN_FOLLOW);
    let opened = if follow {
        File::open(path)
    } else {
        std::fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc_o_nofollow())
            .open(path)
    };
    match opened {
        Ok(mut f) => {
            let mut bytes = Vec::new();
            if f.read_to_end(&mut bytes).is_err() {
                return on_failure(flags);
            }
            Some(normalize_payload(&bytes))
        }
        Err(e) => {
            if !flags.contains(LoadTextFlags::FAIL_QUIETLY) {
                log::warn!("failed to open '{}': {e}", path.display());
            }
            on_failure(flags)
        }
    }
}

fn libc_o_nofollow() -> i32 {
    OFlag::O_NOFOLLOW.bits()
}

/// Applies the payload normalisation rules described for `load_text`:
/// whitespace and printable bytes (>= 0x20) pass through, NUL becomes a
/// space, other control bytes are dropped; then newlines are
/// normalised so the result has a trailing newline iff the input had
/// any, except that exactly one final newline is stripped (the common
/// `echo value > item` case).
pub(crate) fn normalize_payload(bytes: &[u8]) -> String {
    let mut out = Vec::with_capacity(bytes.len());
    let mut newline_count = 0usize;
    for &b in bytes {
        if b == 0 {
            out.push(b' ');
        } else if b == b'\n' {
            newline_count += 1;
            out.push(b);
        } else if b.is_ascii_whitespace() || b >= 0x20 {
            out.push(b);
        }
        // other control bytes are dropped
    }

    if newline_count == 0 {
        return String::from_utf8_lossy(&out).into_owned();
    }

    if newline_count == 1 && out.last() == Some(&b'\n') {
        out.pop();
    } else if out.last() != Some(&b'\n') {
        out.push(b'\n');
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Writes `data` to `name` (relative to `dir_fd`) by unlinking any
/// existing plain file first, then creating with `O_EXCL | O_NOFOLLOW` so
/// a symlink left at that name is never followed or clobbered. Applies
/// `chown`/`chmod` before the payload is written, so umask never
/// surprises the caller. Reports and returns `false` on any step's
/// failure; a partial file may be left behind — there is no fsync or
/// other durability promise here.
pub(crate) fn save_binary(
    dir_fd: RawFd,
    name: &str,
    data: &[u8],
    owner: Option<(Uid, Gid)>,
    mode: Mode,
) -> bool {
    if !is_correct_filename(name) {
        log::warn!("refusing to save invalid item name '{name}'");
        return false;
    }

    // Only unlink a plain file: if the existing entry is a directory
    // this intentionally fails rather than silently destroying it.
    match unlinkat(Some(dir_fd), name, UnlinkatFlags::NoRemoveDir) {
        Ok(()) | Err(Errno::ENOENT) => {}
        Err(e) => {
            log::warn!("failed to remove existing item '{name}': {e}");
            return false;
        }
    }

    let fd = match openat(
        dir_fd,
        name,
        OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_NOFOLLOW | OFlag::O_CLOEXEC,
        Mode::from_bits_truncate(0o600),
    ) {
        Ok(fd) => fd,
        Err(e) => {
            log::warn!("failed to create item '{name}': {e}");
            return false;
        }
    };

    if let Some((uid, gid)) = owner {
        if let Err(e) = fchownat(
            Some(dir_fd),
            name,
            Some(uid),
            Some(gid),
            FchownatFlags::NoFollowSymlink,
        ) {
            log::warn!("failed to chown item '{name}': {e}");
        }
    }
    if let Err(e) = fchmod(fd, mode) {
        log::warn!("failed to chmod item '{name}': {e}");
    }

    let mut file = unsafe { File::from_raw_fd(fd) };
    if let Err(e) = file.write_all(data) {
        log::warn!("failed to write item '{name}': {e}");
        return false;
    }
    true
}

pub(crate) fn save_text(dir_fd: RawFd, name: &str, value: &str, owner: Option<(Uid, Gid)>, mode: Mode) -> bool {
    save_binary(dir_fd, name, value.as_bytes(), owner, mode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_single_trailing_newline() {
        assert_eq!(normalize_payload(b"value\n"), "value");
    }

    #[test]
    fn keeps_value_with_no_newline_verbatim() {
        assert_eq!(normalize_payload(b"value"), "value");
    }

    #[test]
    fn appends_newline_when_last_byte_isnt_one_but_file_has_newlines() {
        assert_eq!(normalize_payload(b"a\nb"), "a\nb\n");
    }

    #[test]
    fn rewrites_nul_to_space_and_drops_other_control_bytes() {
        assert_eq!(normalize_payload(b"a\0b\x01c"), "a bc");
    }
}

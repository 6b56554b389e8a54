//! C3 — the `time` metadata item parser.
//!
//! `time` is the one item every dump directory must carry for the
//! directory to be considered valid (see [`crate::lock`]'s validity
//! check). It is a bounded decimal `unix timestamp`, optionally
//! newline-terminated.

use std::io::Read;
use std::os::unix::io::{FromRawFd, RawFd};

use nix::fcntl::{openat, OFlag};
use nix::sys::stat::Mode;

/// Upper bound mirroring `2^(bits(time_t)-1) - 1` for a 64-bit `time_t`:
/// values must be strictly less than this.
const MAX_TIME: i64 = i64::MAX;

/// `sizeof(time_t) * 3 + 1`: enough digits for any 64-bit value plus a
/// sign and a trailing newline, with one extra byte so a file that is
/// exactly this long (and thus possibly truncated/overflowing) is
/// detectable by having filled the whole buffer.
const MAX_TIME_FILE_LEN: usize = 8 * 3 + 1;

/// Reads and parses the `time` item relative to `dir_fd`. Returns `None`
/// on any failure: missing item, not a regular file with a single hard
/// link, overflow, or malformed content. Never panics and never treats a
/// missing `time` item as anything other than "invalid".
pub(crate) fn read_time(dir_fd: RawFd) -> Option<i64> {
    let fd = openat(
        dir_fd,
        "time",
        OFlag::O_RDONLY | OFlag::O_NOFOLLOW | OFlag::O_CLOEXEC,
        Mode::empty(),
    )
    .ok()?;
    let mut file = unsafe { std::fs::File::from_raw_fd(fd) };

    let metadata = file.metadata().ok()?;
    if !metadata.is_file() {
        return None;
    }
    use std::os::unix::fs::MetadataExt;
    if metadata.nlink() != 1 {
        return None;
    }

    let mut buf = [0u8; MAX_TIME_FILE_LEN];
    let mut read_total = 0usize;
    loop {
        let n = file.read(&mut buf[read_total..]).ok()?;
        if n == 0 {
            break;
        }
        read_total += n;
        if read_total == buf.len() {
            // Buffer filled completely: the value would overflow what we
            // are willing to parse.
            return None;
        }
    }

    parse_time_bytes(&buf[..read_total])
}

fn parse_time_bytes(bytes: &[u8]) -> Option<i64> {
    let mut s = std::str::from_utf8(bytes).ok()?;
    if let Some(stripped) = s.strip_suffix('\n') {
        s = stripped;
    }
    if s.is_empty() {
        return None;
    }
    if !s.bytes().all(|b| b.is_ascii_digit()) {
        // Rejects signed inputs, leading spaces, and trailing garbage;
        // the only thing accepted is a run of decimal digits.
        return None;
    }
    let value: i64 = s.parse().ok()?;
    if value < 0 || value >= MAX_TIME {
        return None;
    }
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_decimal() {
        assert_eq!(parse_time_bytes(b"1234567890"), Some(1_234_567_890));
    }

    #[test]
    fn strips_one_trailing_newline() {
        assert_eq!(parse_time_bytes(b"42\n"), Some(42));
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(parse_time_bytes(b""), None);
        assert_eq!(parse_time_bytes(b"\n"), None);
    }

    #[test]
    fn rejects_signed_and_spaced_input() {
        assert_eq!(parse_time_bytes(b"-1"), None);
        assert_eq!(parse_time_bytes(b" 42"), None);
        assert_eq!(parse_time_bytes(b"42 "), None);
        assert_eq!(parse_time_bytes(b"42garbage"), None);
    }

    #[test]
    fn rejects_values_past_the_bound() {
        assert_eq!(parse_time_bytes(MAX_TIME.to_string().as_bytes()), None);
        assert_eq!(
            parse_time_bytes((MAX_TIME - 1).to_string().as_bytes()),
            Some(MAX_TIME - 1)
        );
    }
}

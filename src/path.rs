//! C1 — path and item-name validation.

/// Returns true when `name` is a valid item filename: non-empty, every
/// byte is printable-or-whitespace (no control bytes), contains no `/`,
/// and is not `.` or `..`.
///
/// This is a content-display normalisation rule, not a security boundary
/// by itself — the `/` and `.`/`..` checks are the actual safety
/// discipline; the control-byte check just keeps names legible.
pub fn is_correct_filename(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return false;
    }
    if name.contains('/') {
        return false;
    }
    name.bytes().all(|b| !b.is_ascii_control())
}

/// Backward-compatibility rewrite: the legacy item name `release` is
/// read as `os_release`.
pub fn canonicalize_item_name(name: &str) -> &str {
    if name == "release" {
        "os_release"
    } else {
        name
    }
}

/// Rejects `.`/`..` as the final path component, used by the creation
/// flow so `create(".")` and `create("dir/..")` fail up front.
pub fn last_component_is_dot_or_dotdot(path: &str) -> bool {
    let trimmed = path.trim_end_matches('/');
    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    last == "." || last == ".."
}

/// Strips trailing `/` characters, matching the C behavior of treating
/// `"foo/"` the same as `"foo"`.
pub fn strip_trailing_slashes(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() && !path.is_empty() {
        "/"
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_dots() {
        assert!(!is_correct_filename(""));
        assert!(!is_correct_filename("."));
        assert!(!is_correct_filename(".."));
    }

    #[test]
    fn rejects_slash_and_control_bytes() {
        assert!(!is_correct_filename("a/b"));
        assert!(!is_correct_filename("a\nb"));
        assert!(!is_correct_filename("a\0b"));
    }

    #[test]
    fn accepts_ordinary_names() {
        assert!(is_correct_filename("time"));
        assert!(is_correct_filename("os_release"));
        assert!(is_correct_filename("last_occurrence"));
    }

    #[test]
    fn rewrites_release_to_os_release() {
        assert_eq!(canonicalize_item_name("release"), "os_release");
        assert_eq!(canonicalize_item_name("os_release"), "os_release");
        assert_eq!(canonicalize_item_name("uid"), "uid");
    }

    #[test]
    fn detects_dot_components() {
        assert!(last_component_is_dot_or_dotdot("."));
        assert!(last_component_is_dot_or_dotdot("dir/.."));
        assert!(!last_component_is_dot_or_dotdot("dir/name"));
    }

    #[test]
    fn strips_trailing_slashes() {
        assert_eq!(strip_trailing_slashes("/tmp/dd1/"), "/tmp/dd1");
        assert_eq!(strip_trailing_slashes("/tmp/dd1///"), "/tmp/dd1");
        assert_eq!(strip_trailing_slashes("/tmp/dd1"), "/tmp/dd1");
    }
}

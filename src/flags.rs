//! Caller-supplied flags, grouped by the flow they affect.

use bitflags::bitflags;

bitflags! {
    /// Flags accepted by [`crate::dump_dir::DumpDir::open`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        /// Suppress the diagnostic when the target is missing.
        const FAIL_QUIETLY_ENOENT = 0b0000_0001;
        /// Suppress the diagnostic when permission is denied.
        const FAIL_QUIETLY_EACCES = 0b0000_0010;
        /// Accept a read-only handle when the directory isn't writable.
        const OPEN_READONLY = 0b0000_0100;
        /// Skip the validity-fail backoff while acquiring the lock.
        const DONT_WAIT_FOR_LOCK = 0b0000_1000;
    }
}

bitflags! {
    /// Flags accepted by [`crate::dump_dir::DumpDir::create`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CreateFlags: u32 {
        /// Create missing parent directories.
        const CREATE_PARENTS = 0b0000_0001;
    }
}

bitflags! {
    /// Flags accepted by [`crate::io::load_text`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct LoadTextFlags: u32 {
        /// Return the null indicator (`None`) instead of an empty string
        /// on failure.
        const RETURN_NULL_ON_FAILURE = 0b0000_0001;
        /// Allow symlink dereference. Only meaningful for paths outside
        /// of a dump directory (e.g. `/etc/system-release`); items
        /// inside a dump directory are never opened with this flag.
        const OPEN_FOLLOW = 0b0000_0010;
        /// Suppress the diagnostic on open failure.
        const FAIL_QUIETLY = 0b0000_0100;
    }
}

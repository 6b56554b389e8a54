//! A filesystem-backed, concurrently-accessed store of problem-report
//! directories.
//!
//! Each problem (a crash, a kernel oops, a hang) is recorded as a plain
//! directory of small text/binary items (`time`, `reason`, `backtrace`,
//! ...) guarded by an advisory lock so multiple uncoordinated processes
//! (the thing that detected the problem, a local daemon enriching it, a
//! reporting tool uploading it) can safely take turns editing it.
//!
//! [`dump_dir::DumpDir`] is the entry point: [`dump_dir::DumpDir::create`]
//! makes a new directory and [`dump_dir::DumpDir::open`] opens an
//! existing one, both returning a locked handle that releases the lock
//! when dropped.

mod access;
mod delete;
mod dump_dir;
mod error;
mod flags;
mod identity;
mod io;
mod iter;
mod lock;
mod path;
mod reported_to;
mod timefile;

pub use access::accessible_by_uid;
pub use dump_dir::DumpDir;
pub use error::{DumpDirError, Result};
pub use flags::{CreateFlags, LoadTextFlags, OpenFlags};
pub use path::is_correct_filename;
pub use reported_to::ReportedToRecord;

/// Removes a dump directory and everything in it in one call, for
/// callers that don't need the handle for anything else first.
pub fn delete_dump_dir(path: impl AsRef<std::path::Path>) -> Result<()> {
    DumpDir::open(path, OpenFlags::empty())?.delete()
}

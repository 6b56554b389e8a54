//! C12 — identity resolution for ownership sanitisation.

use nix::unistd::{Gid, Uid, User};

const SERVICE_ACCOUNT: &str = "abrt";

/// Resolves the `(owner_uid, crashed_gid)` pair a freshly-created dump
/// directory's items get sanitised to. `crashed_uid == None` means the
/// creator asked for no sanitisation at all (the library-side analogue
/// of the C API's `-1` sentinel).
pub(crate) fn resolve_creation_identity(crashed_uid: Option<Uid>) -> Option<(Uid, Gid)> {
    let crashed_uid = crashed_uid?;

    let owner_uid = User::from_name(SERVICE_ACCOUNT)
        .ok()
        .flatten()
        .map(|u| u.uid)
        .unwrap_or(Uid::from_raw(0));

    let crashed_gid = User::from_uid(crashed_uid)
        .ok()
        .flatten()
        .map(|u| u.gid)
        .unwrap_or(Gid::from_raw(0));

    Some((owner_uid, crashed_gid))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_sanitisation_when_crashed_uid_absent() {
        assert!(resolve_creation_identity(None).is_none());
    }
}

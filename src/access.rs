//! C11 — the accessibility predicate.
//!
//! Decides whether a caller identified by `uid` may open a dump
//! directory whose metadata is `(st_mode, st_uid, st_gid)`. The two
//! relaxations beyond "root or world-readable" are compile-time
//! opt-ins, since a distribution picks exactly one access policy and
//! never switches between them at runtime.

use nix::unistd::{Gid, Group, Uid, User};

/// `uid == 0` is always accessible, regardless of mode bits. This is
/// intentionally independent of the `policy-*` features.
fn root_always_accessible(uid: Uid) -> bool {
    uid.is_root()
}

fn world_readable(mode: u32) -> bool {
    mode & 0o004 != 0
}

#[cfg(feature = "policy-owner")]
fn owner_accessible(uid: Uid, st_uid: Uid) -> bool {
    uid == st_uid
}

#[cfg(not(feature = "policy-owner"))]
fn owner_accessible(_uid: Uid, _st_uid: Uid) -> bool {
    false
}

#[cfg(feature = "policy-group")]
fn group_member_accessible(uid: Uid, st_gid: Gid) -> bool {
    if let Ok(Some(user)) = User::from_uid(uid) {
        if user.gid == st_gid {
            return true;
        }
    }
    if let Ok(Some(group)) = Group::from_gid(st_gid) {
        if let Ok(Some(user)) = User::from_uid(uid) {
            return group.mem.iter().any(|name| *name == user.name);
        }
    }
    false
}

#[cfg(not(feature = "policy-group"))]
fn group_member_accessible(_uid: Uid, _st_gid: Gid) -> bool {
    false
}

/// Whether `uid` may open a dump directory with the given owner metadata.
///
/// This is distinct from *ownership*: under `policy-group`, a caller in
/// the directory's group is accessible but not its owner, and callers
/// of this function never need to know which relaxation let them in.
pub fn accessible_by_uid(uid: Uid, st_mode: u32, st_uid: Uid, st_gid: Gid) -> bool {
    root_always_accessible(uid)
        || world_readable(st_mode)
        || owner_accessible(uid, st_uid)
        || group_member_accessible(uid, st_gid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_always_accessible() {
        assert!(accessible_by_uid(
            Uid::from_raw(0),
            0o000,
            Uid::from_raw(500),
            Gid::from_raw(500)
        ));
    }

    #[test]
    fn world_readable_mode_grants_access_to_anyone() {
        assert!(accessible_by_uid(
            Uid::from_raw(1000),
            0o604,
            Uid::from_raw(500),
            Gid::from_raw(500)
        ));
    }

    #[test]
    fn unrelated_uid_with_private_mode_is_denied() {
        assert!(!accessible_by_uid(
            Uid::from_raw(1000),
            0o600,
            Uid::from_raw(500),
            Gid::from_raw(500)
        ));
    }
}

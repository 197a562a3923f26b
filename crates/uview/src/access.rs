//! The access evaluator: a pure decision over a stat record, an optional
//! ACL and an identity. No I/O happens here; the gate fetches the inputs
//! fresh and hands them in.

use crate::acl::{Acl, AclTag};
use crate::error::{Error, Result};
use crate::ident::Identity;
use crate::perm::Access;
use crate::stat::FileStat;

/// Decide whether `id` holds every right in `perms` on the inode described
/// by `stat` and `acl`.
///
/// Classification picks exactly one of four cases, in order: owner (mode
/// user-triple, ACLs never apply to the owner), named-user ACL entry
/// (masked), group class, other (mode other-triple). The group class is the
/// union over the primary gid and every supplementary group of the masked
/// mode group-triple (where the inode's gid matches) and any masked
/// named-group entry; membership in the class is established as soon as
/// either source applies, even when that source denies, so a denied group
/// member never falls through to the other-triple.
pub(crate) fn check_permission(
    stat: &FileStat,
    acl: Option<&Acl>,
    id: &Identity,
    perms: &[Access],
) -> Result<()> {
    if id.uid() == 0 {
        return Ok(());
    }

    let mask = acl.map_or(0o7, Acl::mask);

    for &perm in perms {
        let granted = if stat.uid == id.uid() {
            perm.granted_by(stat.user_triple())
        } else if let Some(bits) = acl.and_then(|a| a.named(AclTag::User, id.uid())) {
            perm.granted_by(bits & mask)
        } else {
            let mut member = false;
            let mut granted = false;
            for gid in id.all_groups() {
                if stat.gid == gid {
                    member = true;
                    granted = granted || perm.granted_by(stat.group_triple() & mask);
                }
                if let Some(bits) = acl.and_then(|a| a.named(AclTag::Group, gid)) {
                    member = true;
                    granted = granted || perm.granted_by(bits & mask);
                }
            }
            if member {
                granted
            } else {
                perm.granted_by(stat.other_triple())
            }
        };

        if !granted {
            return Err(Error::Denied);
        }
    }

    Ok(())
}

/// Ownership check used by chmod/chown/sticky deletion. Root is exempted at
/// the call sites, which need to tell a root pass from an ordinary one.
pub(crate) fn check_ownership(stat: &FileStat, id: &Identity) -> Result<()> {
    if stat.uid == id.uid() {
        Ok(())
    } else {
        Err(Error::Denied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl::AclEntry;
    use crate::stat::FileKind;

    fn ident(uid: u32, gid: u32, groups: &[u32]) -> Identity {
        Identity::builder()
            .uid(uid)
            .gid(gid)
            .groups(groups.iter().copied().chain([u32::MAX]))
            .build()
    }

    // The builder treats an empty group list as "inherit", so tests always
    // pad the supplementary set with an id no fixture uses.
    fn plain(uid: u32, gid: u32) -> Identity {
        ident(uid, gid, &[])
    }

    fn stat(mode: u32, uid: u32, gid: u32) -> FileStat {
        FileStat {
            mode,
            uid,
            gid,
            kind: FileKind::File,
        }
    }

    fn acl(entries: &[(AclTag, Option<u32>, u32)]) -> Acl {
        Acl::new(
            entries
                .iter()
                .map(|&(tag, qualifier, perms)| AclEntry {
                    tag,
                    qualifier,
                    perms,
                })
                .collect(),
        )
    }

    fn granted(stat: &FileStat, acl: Option<&Acl>, id: &Identity, perm: Access) -> bool {
        check_permission(stat, acl, id, &[perm]).is_ok()
    }

    #[test]
    fn owner_class_uses_the_user_triple() {
        let s = stat(0o640, 1000, 1000);
        let me = plain(1000, 1000);
        assert!(granted(&s, None, &me, Access::Read));
        assert!(granted(&s, None, &me, Access::Write));
        assert!(!granted(&s, None, &me, Access::Execute));
    }

    #[test]
    fn owner_class_wins_even_when_it_denies() {
        // Owner has nothing, group and other have everything: the owner
        // still loses. This is the 0077-style corner the kernel enforces.
        let s = stat(0o077, 1000, 1000);
        let me = plain(1000, 1000);
        assert!(!granted(&s, None, &me, Access::Read));

        // A named-user ACL entry for the owner does not rescue the owner
        // either; ACLs never apply to the owner class.
        let a = acl(&[(AclTag::User, Some(1000), 0o7)]);
        assert!(!granted(&s, Some(&a), &me, Access::Read));
    }

    #[test]
    fn named_user_entry_applies_with_mask() {
        let s = stat(0o600, 1000, 1000);
        let other = plain(1001, 1001);
        let a = acl(&[
            (AclTag::User, Some(1001), 0o6),
            (AclTag::Mask, None, 0o4),
        ]);
        assert!(granted(&s, Some(&a), &other, Access::Read));
        // Write is in the entry but filtered by the mask.
        assert!(!granted(&s, Some(&a), &other, Access::Write));
    }

    #[test]
    fn group_class_via_primary_gid() {
        let s = stat(0o640, 1000, 2000);
        let member = plain(1001, 2000);
        assert!(granted(&s, None, &member, Access::Read));
        assert!(!granted(&s, None, &member, Access::Write));
    }

    #[test]
    fn group_class_via_supplementary_group() {
        let s = stat(0o640, 1000, 2000);
        let member = ident(1001, 3000, &[2000]);
        assert!(granted(&s, None, &member, Access::Read));
    }

    #[test]
    fn group_class_via_named_group_entry_of_a_supplementary_gid() {
        // The named-group entry qualifies a supplementary group, not the
        // primary gid; the union semantics must still find it.
        let s = stat(0o600, 1000, 2000);
        let member = ident(1001, 3000, &[4000]);
        let a = acl(&[(AclTag::Group, Some(4000), 0o4)]);
        assert!(granted(&s, Some(&a), &member, Access::Read));
        assert!(!granted(&s, Some(&a), &member, Access::Write));
    }

    #[test]
    fn group_sources_union_their_grants() {
        // Mode group-triple grants read, a named-group entry grants write;
        // a member of both gets both.
        let s = stat(0o640, 1000, 2000);
        let member = ident(1001, 2000, &[4000]);
        let a = acl(&[(AclTag::Group, Some(4000), 0o2)]);
        assert!(granted(&s, Some(&a), &member, Access::Read));
        assert!(granted(&s, Some(&a), &member, Access::Write));
    }

    #[test]
    fn denied_group_member_does_not_fall_through_to_other() {
        // Other grants everything, the group triple nothing: a group member
        // is still denied, exactly as the kernel decides it.
        let s = stat(0o607, 1000, 2000);
        let member = plain(1001, 2000);
        assert!(!granted(&s, None, &member, Access::Read));

        // Same through a named-group entry.
        let a = acl(&[(AclTag::Group, Some(5000), 0o0)]);
        let named = ident(1001, 3000, &[5000]);
        assert!(!granted(&s, Some(&a), &named, Access::Read));
    }

    #[test]
    fn the_mask_filters_group_sources() {
        let s = stat(0o670, 1000, 2000);
        let member = plain(1001, 2000);
        let a = acl(&[(AclTag::Mask, None, 0o4)]);
        assert!(granted(&s, Some(&a), &member, Access::Read));
        assert!(!granted(&s, Some(&a), &member, Access::Write));
    }

    #[test]
    fn the_mask_never_touches_owner_or_other() {
        let a = acl(&[(AclTag::Mask, None, 0o0)]);

        let s = stat(0o700, 1000, 2000);
        let owner = plain(1000, 1000);
        assert!(granted(&s, Some(&a), &owner, Access::Read));

        let s = stat(0o004, 1000, 2000);
        let stranger = plain(1001, 3000);
        assert!(granted(&s, Some(&a), &stranger, Access::Read));
    }

    #[test]
    fn other_class_is_the_last_resort() {
        let s = stat(0o604, 1000, 2000);
        let stranger = plain(1001, 3000);
        assert!(granted(&s, None, &stranger, Access::Read));
        assert!(!granted(&s, None, &stranger, Access::Write));
    }

    #[test]
    fn multi_perm_requires_every_right() {
        let s = stat(0o600, 1000, 1000);
        let me = plain(1000, 1000);
        assert!(check_permission(&s, None, &me, &[Access::Read, Access::Write]).is_ok());
        assert!(
            check_permission(&s, None, &me, &[Access::Read, Access::Execute])
                .unwrap_err()
                .is_denied()
        );
    }

    #[test]
    fn root_bypasses_everything() {
        let s = stat(0o000, 1000, 1000);
        let root = plain(0, 0);
        assert!(granted(&s, None, &root, Access::Read));
        assert!(granted(&s, None, &root, Access::Write));
        assert!(granted(&s, None, &root, Access::Execute));
    }

    #[test]
    fn ownership_is_uid_equality() {
        let s = stat(0o777, 1000, 1000);
        assert!(check_ownership(&s, &plain(1000, 2000)).is_ok());
        assert!(check_ownership(&s, &plain(1001, 1000))
            .unwrap_err()
            .is_denied());
    }
}

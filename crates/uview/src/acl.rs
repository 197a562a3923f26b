//! POSIX.1e access-control lists.
//!
//! The kernel stores the access ACL of an inode in the
//! `system.posix_acl_access` extended attribute as a little-endian array of
//! `(tag, perms, qualifier)` entries behind a version header. The engine
//! only ever reads ACLs; writing them stays with ordinary tooling.
//!
//! A filesystem that does not support ACLs (or an inode without one) is
//! reported as *absent* (`Option::None` at the fetch site), which is not the
//! same thing as an empty list: an empty ACL grants nothing, while an absent
//! one defers entirely to the mode bits.

use crate::error::{Error, Result};

const ACL_EA_VERSION: u32 = 2;
const ENTRY_SIZE: usize = 8;

// e_tag values from the xattr representation.
const TAG_USER_OBJ: u16 = 0x01;
const TAG_USER: u16 = 0x02;
const TAG_GROUP_OBJ: u16 = 0x04;
const TAG_GROUP: u16 = 0x08;
const TAG_MASK: u16 = 0x10;
const TAG_OTHER: u16 = 0x20;

const UNDEFINED_ID: u32 = u32::MAX;

/// Entry tag, mirroring the six POSIX.1e tag types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AclTag {
    /// The owning user (permissions live in the mode bits).
    UserObj,
    /// A named user; the entry carries the uid as qualifier.
    User,
    /// The owning group.
    GroupObj,
    /// A named group; the entry carries the gid as qualifier.
    Group,
    /// The effective-rights mask filtering every tag except `UserObj` and
    /// `Other`.
    Mask,
    /// Everybody else.
    Other,
}

/// One ACL entry: a tag, an optional numeric qualifier and an `rwx` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AclEntry {
    pub tag: AclTag,
    /// Uid or gid for `User`/`Group` entries, `None` for the rest.
    pub qualifier: Option<u32>,
    /// Low three bits: `r = 4`, `w = 2`, `x = 1`.
    pub perms: u32,
}

/// An ordered collection of ACL entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Acl {
    entries: Vec<AclEntry>,
}

impl Acl {
    pub fn new(entries: Vec<AclEntry>) -> Self {
        Acl { entries }
    }

    pub fn entries(&self) -> &[AclEntry] {
        &self.entries
    }

    /// Decode the xattr blob the kernel hands back for
    /// `system.posix_acl_access`.
    pub fn from_xattr(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(Error::BadRecord("acl"));
        }
        let version = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        if version != ACL_EA_VERSION {
            return Err(Error::BadRecord("acl"));
        }
        let body = &data[4..];
        if body.len() % ENTRY_SIZE != 0 {
            return Err(Error::BadRecord("acl"));
        }

        let mut entries = Vec::with_capacity(body.len() / ENTRY_SIZE);
        for raw in body.chunks_exact(ENTRY_SIZE) {
            let tag = u16::from_le_bytes([raw[0], raw[1]]);
            let perms = u16::from_le_bytes([raw[2], raw[3]]) as u32 & 0o7;
            let id = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]);

            let tag = match tag {
                TAG_USER_OBJ => AclTag::UserObj,
                TAG_USER => AclTag::User,
                TAG_GROUP_OBJ => AclTag::GroupObj,
                TAG_GROUP => AclTag::Group,
                TAG_MASK => AclTag::Mask,
                TAG_OTHER => AclTag::Other,
                _ => return Err(Error::BadRecord("acl")),
            };
            let qualifier = match tag {
                AclTag::User | AclTag::Group if id != UNDEFINED_ID => Some(id),
                AclTag::User | AclTag::Group => return Err(Error::BadRecord("acl")),
                _ => None,
            };
            entries.push(AclEntry {
                tag,
                qualifier,
                perms,
            });
        }
        Ok(Acl { entries })
    }

    /// Effective-rights mask. Without a `Mask` entry nothing is filtered.
    pub(crate) fn mask(&self) -> u32 {
        self.entries
            .iter()
            .find(|e| e.tag == AclTag::Mask)
            .map_or(0o7, |e| e.perms)
    }

    /// Permissions of the named-user or named-group entry for `id`, if one
    /// exists. The caller applies the mask.
    pub(crate) fn named(&self, tag: AclTag, id: u32) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.tag == tag && e.qualifier == Some(id))
            .map(|e| e.perms)
    }
}

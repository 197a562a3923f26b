//! Impersonated identities.

use nix::unistd::{getgroups, Gid, Uid};

use crate::os::Os;

/// A POSIX identity the engine impersonates: uid, primary gid and
/// supplementary groups. Immutable once built.
///
/// `uid == 0` designates the superuser and bypasses every access check the
/// engine performs (path resolution errors still surface).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    uid: u32,
    gid: u32,
    groups: Vec<u32>,
}

impl Identity {
    pub fn builder() -> IdentityBuilder {
        IdentityBuilder::default()
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn gid(&self) -> u32 {
        self.gid
    }

    pub fn groups(&self) -> &[u32] {
        &self.groups
    }

    /// Primary gid followed by the supplementary groups.
    pub(crate) fn all_groups(&self) -> impl Iterator<Item = u32> + '_ {
        std::iter::once(self.gid).chain(self.groups.iter().copied())
    }

    pub(crate) fn in_groups(&self, gid: u32) -> bool {
        self.all_groups().any(|g| g == gid)
    }

    /// The filesystem view for this identity.
    ///
    /// Impersonation only means something when the host process is root: a
    /// non-root process gets the plain pass-through view, as does a root
    /// process asking for its own effective identity. Everything else gets
    /// the permission-emulating view.
    pub fn view(&self) -> Os {
        let euid = Uid::effective().as_raw();
        if euid != 0 {
            return Os::host();
        }

        let egid = Gid::effective().as_raw();
        if self.uid == euid && self.gid == egid && same_set(&self.groups, &process_groups()) {
            return Os::host();
        }

        Os::user(self.clone())
    }
}

/// Builds an [`Identity`], inheriting unset fields from the calling
/// process's effective credentials at [`build`](IdentityBuilder::build)
/// time. An explicitly empty group list also inherits; there is no way to
/// impersonate "no supplementary groups at all", matching the semantics of
/// the configuration surface where a negative id means "inherit".
#[derive(Debug, Clone, Default)]
pub struct IdentityBuilder {
    uid: Option<u32>,
    gid: Option<u32>,
    groups: Option<Vec<u32>>,
}

impl IdentityBuilder {
    pub fn uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn gid(mut self, gid: u32) -> Self {
        self.gid = Some(gid);
        self
    }

    pub fn groups<I: IntoIterator<Item = u32>>(mut self, groups: I) -> Self {
        self.groups = Some(groups.into_iter().collect());
        self
    }

    pub fn build(self) -> Identity {
        let uid = self.uid.unwrap_or_else(|| Uid::effective().as_raw());
        let gid = self.gid.unwrap_or_else(|| Gid::effective().as_raw());
        let groups = match self.groups {
            Some(g) if !g.is_empty() => g,
            _ => process_groups(),
        };
        Identity { uid, gid, groups }
    }
}

fn process_groups() -> Vec<u32> {
    getgroups()
        .map(|gs| gs.into_iter().map(|g| g.as_raw()).collect())
        .unwrap_or_default()
}

fn same_set(a: &[u32], b: &[u32]) -> bool {
    let mut a = a.to_vec();
    let mut b = b.to_vec();
    a.sort_unstable();
    a.dedup();
    b.sort_unstable();
    b.dedup();
    a == b
}

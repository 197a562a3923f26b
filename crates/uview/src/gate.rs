//! The inode-access gate: traversal, object access and ownership queries,
//! plus the ownership rules for newly created objects.
//!
//! Every query re-fetches stat and ACL records fresh from the back-end;
//! nothing is cached across calls, so a stale decision cannot outlive the
//! operation that asked for it. A `not found` answer from the back-end is
//! passed through verbatim and never turned into a denial, or the other way
//! around.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::access::{check_ownership, check_permission};
use crate::acl::Acl;
use crate::error::{Error, Result};
use crate::perm::Access;
use crate::resolve;
use crate::stat::FileStat;
use crate::sys;
use crate::user::UserFs;

impl UserFs {
    /// Can the identity reach the directory entry at `path`, and, when
    /// `perm` is `Write`, create or delete that entry?
    ///
    /// Walks the resolved prefix chain requiring execute on every directory
    /// down to the direct parent, then write on the parent itself when
    /// asked. Returns the parent's stat and ACL for the creation rules. The
    /// entry itself is neither followed nor required to exist.
    pub(crate) fn inode_access(
        &self,
        path: &Path,
        perm: Access,
    ) -> Result<(FileStat, Option<Acl>)> {
        if self.id.uid() == 0 {
            // Root traverses anything that exists; only the shape of the
            // parent still matters.
            let parent = resolve::parent_dir(path);
            let stat = sys::stat(&parent)?;
            if !stat.is_dir() {
                return Err(Error::NotADirectory);
            }
            let acl = sys::acl(&parent)?;
            return Ok((stat, acl));
        }

        let chain = resolve::parent_chain(path)?;
        let mut checked: HashSet<PathBuf> = HashSet::with_capacity(chain.len());
        let mut parent: Option<(FileStat, Option<Acl>)> = None;

        let count = chain.len();
        for (i, dir) in chain.iter().enumerate() {
            // Symlink splices revisit prefixes; check each only once, but
            // never skip the final one, which is the parent we report back.
            if checked.contains(dir) && i + 1 < count {
                continue;
            }

            let stat = sys::stat(dir)?;
            if !stat.is_dir() {
                return Err(Error::NotADirectory);
            }
            let acl = sys::acl(dir)?;

            if let Err(e) = check_permission(&stat, acl.as_ref(), &self.id, &[Access::Execute]) {
                debug!(dir = %dir.display(), uid = self.id.uid(), "traversal denied");
                return Err(e);
            }

            checked.insert(dir.clone());
            parent = Some((stat, acl));
        }

        let (stat, acl) = parent.expect("a resolved chain always holds the root");

        if perm == Access::Write {
            if let Err(e) = check_permission(&stat, acl.as_ref(), &self.id, &[Access::Write]) {
                debug!(path = %path.display(), uid = self.id.uid(), "entry write denied");
                return Err(e);
            }
        }

        Ok((stat, acl))
    }

    /// Can the identity exercise `perm` on the object at `path` itself?
    /// Symlinks are followed; the object has to exist.
    pub(crate) fn object_access(&self, path: &Path, perm: Access) -> Result<()> {
        if self.id.uid() == 0 {
            sys::stat(path)?;
            return Ok(());
        }

        self.inode_access(path, Access::Execute)?;

        let stat = sys::stat(path)?;
        let acl = sys::acl(path)?;
        check_permission(&stat, acl.as_ref(), &self.id, &[perm]).map_err(|e| {
            debug!(path = %path.display(), uid = self.id.uid(), ?perm, "object access denied");
            e
        })
    }

    /// Execute on a single directory, without walking its ancestry. Used
    /// where the ancestry was already resolved, e.g. symlink evaluation.
    pub(crate) fn dir_execute_only(&self, path: &Path) -> Result<()> {
        let stat = sys::stat(path)?;
        if !stat.is_dir() {
            return Err(Error::NotADirectory);
        }
        let acl = sys::acl(path)?;
        check_permission(&stat, acl.as_ref(), &self.id, &[Access::Execute])
    }

    /// Does the identity own the object at `path`? Follows symlinks. Root
    /// owns everything that exists.
    pub(crate) fn owns_object(&self, path: &Path) -> Result<()> {
        let stat = sys::stat(path)?;
        if self.id.uid() == 0 {
            return Ok(());
        }
        check_ownership(&stat, &self.id)
    }

    /// As [`owns_object`](Self::owns_object) but on the entry itself,
    /// symlinks not followed.
    pub(crate) fn owns_entry(&self, path: &Path) -> Result<()> {
        let stat = sys::lstat(path)?;
        if self.id.uid() == 0 {
            return Ok(());
        }
        check_ownership(&stat, &self.id)
    }

    /// The gid a newly created child of `parent` receives: the directory's
    /// own gid under setgid inheritance, the identity's primary gid
    /// otherwise.
    pub(crate) fn gid_for_new(&self, parent: &FileStat) -> u32 {
        if parent.setgid() {
            parent.gid
        } else {
            self.id.gid()
        }
    }

    /// Stamp a just-created object with the impersonated ownership. Uses
    /// lchown so a fresh symlink never leaks the chown onto its target.
    pub(crate) fn chown_new(&self, path: &Path, gid: u32) -> Result<()> {
        sys::lchown(path, self.id.uid(), gid)
    }
}

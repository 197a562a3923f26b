//! The impersonating façade: every public operation sequences its guards,
//! performs the real syscall and applies the creation-time ownership rules,
//! so the outcome matches what the kernel would have given a real process
//! running as the impersonated identity.

use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::instrument;

use crate::error::{Error, Result};
use crate::file::UserFile;
use crate::ident::Identity;
use crate::perm::Access;
use crate::resolve;
use crate::stat::FileStat;
use crate::sys;

/// Batch size for the delete loop; the directory is re-read from a fresh
/// handle once a batch made progress, tolerating dirent reshuffling.
const REMOVE_BATCH: usize = 1024;

/// A filesystem view that behaves, for every operation, as if the
/// impersonated identity had issued the call itself.
///
/// The view is stateless between calls: each operation re-queries the
/// back-end, so it can be shared and called from any number of threads.
#[derive(Debug, Clone)]
pub struct UserFs {
    pub(crate) id: Identity,
}

impl UserFs {
    pub(crate) fn new(id: Identity) -> Self {
        UserFs { id }
    }

    pub fn identity(&self) -> &Identity {
        &self.id
    }

    /// stat(2) after the traversal guard.
    pub fn stat(&self, path: &Path) -> Result<FileStat> {
        self.inode_access(path, Access::Execute)?;
        sys::stat(path)
    }

    /// lstat(2) after the traversal guard.
    pub fn lstat(&self, path: &Path) -> Result<FileStat> {
        self.inode_access(path, Access::Execute)?;
        sys::lstat(path)
    }

    /// readlink(2) after the traversal guard.
    pub fn read_link(&self, path: &Path) -> Result<PathBuf> {
        self.inode_access(path, Access::Execute)?;
        sys::readlink(path)
    }

    /// Open for reading. Requires read on the object itself.
    pub fn open(&self, path: &Path) -> Result<UserFile> {
        self.object_access(path, Access::Read)?;
        let f = sys::open(path, libc::O_RDONLY | libc::O_CLOEXEC, 0)?;
        Ok(UserFile::checked(path, f, self.clone()))
    }

    /// Create or truncate a regular file, read-write, with permission bits
    /// `0666` before the umask, owned by the impersonated identity.
    pub fn create(&self, path: &Path) -> Result<UserFile> {
        self.open_file(
            path,
            libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC,
            0o666,
        )
    }

    /// open(2) with caller-controlled flags and permission bits.
    ///
    /// Creation is always expressed in `flags` (`O_CREAT`), never smuggled
    /// into `mode`, which carries permission bits only.
    ///
    /// The create path opens with `O_EXCL` first so "created" and "already
    /// existed" stay distinguishable. On "already existed", provided the
    /// caller did not ask for `O_EXCL`, the existing object is re-checked
    /// for the access the flags imply and reopened; if it vanished in between,
    /// the exclusive create is retried rather than failing with a spurious
    /// not-found. A file actually created is chown-ed to the impersonated
    /// identity (setgid parents donate their gid); when the write guard or
    /// the chown fails afterwards, the object is taken back out and the
    /// first error surfaces.
    #[instrument(level = "debug", skip(self), fields(uid = self.id.uid()))]
    pub fn open_file(&self, path: &Path, flags: i32, mode: u32) -> Result<UserFile> {
        let (parent, parent_acl) = self.inode_access(path, Access::Execute)?;

        let wanted = flags | libc::O_CLOEXEC;

        if flags & libc::O_CREAT == 0 {
            self.object_access(path, access_for_flags(flags))?;
            let f = sys::open(path, wanted, mode)?;
            return Ok(UserFile::checked(path, f, self.clone()));
        }

        loop {
            match sys::open(path, wanted | libc::O_EXCL, mode) {
                Ok(f) => {
                    // The object exists now, created with the host's
                    // credentials; finish making it the user's, or take it
                    // back out.
                    if let Err(e) = crate::access::check_permission(
                        &parent,
                        parent_acl.as_ref(),
                        &self.id,
                        &[Access::Write],
                    ) {
                        drop(f);
                        let _ = sys::remove(path);
                        return Err(e);
                    }
                    if let Err(e) = self.chown_new(path, self.gid_for_new(&parent)) {
                        drop(f);
                        let _ = sys::remove(path);
                        return Err(e);
                    }
                    return Ok(UserFile::checked(path, f, self.clone()));
                }
                Err(e) if e.is_already_exists() && flags & libc::O_EXCL == 0 => {
                    match self.object_access(path, access_for_flags(flags)) {
                        // Vanished between the exclusive open and the
                        // re-check; retry the create instead of reporting a
                        // not-found the caller never asked to see.
                        Err(Error::NotFound) => continue,
                        Err(e) => return Err(e),
                        Ok(()) => {
                            let f = sys::open(path, wanted, mode)?;
                            return Ok(UserFile::checked(path, f, self.clone()));
                        }
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// mkdir(2) behind the entry-write guard, then ownership stamping.
    pub fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        let (parent, _) = self.inode_access(path, Access::Write)?;
        sys::mkdir(path, mode)?;
        if let Err(e) = self.chown_new(path, self.gid_for_new(&parent)) {
            let _ = sys::remove(path);
            return Err(e);
        }
        Ok(())
    }

    /// Create `path` and every missing ancestor. Nothing to do when the
    /// path already is a directory; an existing non-directory is an error.
    pub fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()> {
        // Fast path: if the target can be statted, its shape decides.
        match self.stat(path) {
            Ok(st) if st.is_dir() => return Ok(()),
            Ok(_) => return Err(Error::NotADirectory),
            Err(_) => {}
        }

        let cleaned = resolve::clean(path);
        if let Some(parent) = cleaned.parent() {
            if !parent.as_os_str().is_empty() && parent != cleaned {
                self.mkdir_all(parent, mode)?;
            }
        }

        match self.mkdir(&cleaned, mode) {
            Ok(()) => Ok(()),
            // Tolerate arguments like "foo/." where the cleaned path
            // appeared while we were building its parents.
            Err(e) => match self.lstat(&cleaned) {
                Ok(st) if st.is_dir() => Ok(()),
                _ => Err(e),
            },
        }
    }

    /// symlink(2) behind the entry-write guard on the link name; the link
    /// itself (not its target) gets the impersonated ownership.
    pub fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        let (parent, _) = self.inode_access(link, Access::Write)?;
        sys::symlink(target, link)?;
        if let Err(e) = self.chown_new(link, self.gid_for_new(&parent)) {
            let _ = sys::remove(link);
            return Err(e);
        }
        Ok(())
    }

    /// rename(2); both the old and the new entry must be writable.
    pub fn rename(&self, old: &Path, new: &Path) -> Result<()> {
        self.inode_access(old, Access::Write)?;
        self.inode_access(new, Access::Write)?;
        sys::rename(old, new)
    }

    /// unlink(2)/rmdir(2) behind the entry-write guard. A sticky parent
    /// additionally demands ownership of the entry itself (checked without
    /// following symlinks), matching the kernel's deletion rule.
    pub fn remove(&self, path: &Path) -> Result<()> {
        let (parent, _) = self.inode_access(path, Access::Write)?;
        if parent.sticky() {
            self.owns_entry(path)?;
        }
        sys::remove(path)
    }

    /// Delete `path` and everything below it.
    ///
    /// Entries are deleted in batches of [`REMOVE_BATCH`] names; after each
    /// batch that made progress the directory is re-opened, because
    /// deletion reshuffles dirents and a stale stream would skip entries.
    /// An entry that disappears concurrently counts as deleted. The first
    /// real error is reported once the sweep is over.
    #[instrument(level = "debug", skip(self), fields(uid = self.id.uid()))]
    pub fn remove_all(&self, path: &Path) -> Result<()> {
        if path.as_os_str().is_empty() {
            // Historical contract: a no-op, not an error.
            return Ok(());
        }
        if ends_with_dot(path) {
            // rmdir(2) refuses to remove ".", so this refuses too.
            return Err(Error::InvalidPath);
        }

        // Simple case first: not a directory, or an empty one.
        let first = match self.remove(path) {
            Ok(()) => return Ok(()),
            Err(Error::NotFound) => return Ok(()),
            Err(e) => e,
        };

        let dir = match self.lstat(path) {
            Err(Error::NotFound) | Err(Error::NotADirectory) => return Ok(()),
            Err(e) => return Err(e),
            Ok(st) => st,
        };
        if !dir.is_dir() {
            return Err(first);
        }

        let mut kept: Option<Error> = None;
        loop {
            let mut handle = match self.open(path) {
                Err(Error::NotFound) => return Ok(()), // someone else finished the job
                Err(e) => return Err(e),
                Ok(f) => f,
            };

            let mut batch: Vec<OsString>;
            loop {
                let mut read_err = None;
                batch = match handle.read_dir_names(Some(REMOVE_BATCH)) {
                    Ok(names) => names,
                    Err(e) => {
                        read_err = Some(e);
                        Vec::new()
                    }
                };

                let mut failures = 0;
                for name in &batch {
                    if let Err(e) = self.remove_all(&path.join(name)) {
                        if kept.is_none() {
                            kept = Some(e);
                        }
                        failures += 1;
                    }
                }

                if let Some(e) = read_err {
                    if kept.is_none() {
                        kept = Some(e);
                    }
                    break;
                }

                // Progress (or an exhausted stream): re-open to see the
                // reshuffled directory. Only when the whole batch failed is
                // the same handle asked for the next slice.
                if failures != REMOVE_BATCH {
                    break;
                }
            }
            drop(handle);

            if batch.is_empty() {
                break;
            }

            if batch.len() < REMOVE_BATCH {
                // Probably nothing left; try finishing without re-reading.
                match self.remove(path) {
                    Ok(()) | Err(Error::NotFound) => return Ok(()),
                    Err(_) => {
                        if let Some(k) = kept.take() {
                            return Err(k);
                        }
                        // no earlier failure recorded: re-read and keep sweeping
                    }
                }
            }
        }

        match self.remove(path) {
            Ok(()) | Err(Error::NotFound) => Ok(()),
            Err(e) => Err(kept.unwrap_or(e)),
        }
    }

    /// chmod(2); the identity must reach and own the object.
    pub fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        self.inode_access(path, Access::Execute)?;
        self.owns_object(path)?;
        sys::chmod(path, mode)
    }

    /// chown(2); the identity must reach and own the object, and unless it
    /// is root may only "change" the uid to itself and the gid to one of
    /// its own groups.
    pub fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        self.inode_access(path, Access::Execute)?;
        self.owns_object(path)?;
        self.check_chown_target(uid, gid)?;
        sys::chown(path, uid, gid)
    }

    /// As [`chown`](Self::chown) but on the entry itself; a symlink's
    /// target is never touched.
    pub fn lchown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        self.inode_access(path, Access::Execute)?;
        self.owns_entry(path)?;
        self.check_chown_target(uid, gid)?;
        sys::lchown(path, uid, gid)
    }

    fn check_chown_target(&self, uid: u32, gid: u32) -> Result<()> {
        if self.id.uid() == 0 {
            return Ok(());
        }
        // Giving a file away, or joining a group one is not in, is the
        // kernel's EPERM for unprivileged processes.
        if uid != self.id.uid() {
            return Err(Error::Denied);
        }
        if !self.id.in_groups(gid) {
            return Err(Error::Denied);
        }
        Ok(())
    }

    /// utimensat(2) with explicit timestamps; needs write on the object.
    pub fn chtimes(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        self.inode_access(path, Access::Execute)?;
        self.object_access(path, Access::Write)?;
        sys::chtimes(path, atime, mtime)
    }

    /// truncate(2); needs write on the object.
    pub fn truncate(&self, path: &Path, size: u64) -> Result<()> {
        self.object_access(path, Access::Write)?;
        sys::truncate(path, size)
    }

    /// Read the whole file. The initial buffer is sized from the stat
    /// record, but never below 512 bytes because /proc files lie about
    /// their size, and grows geometrically until EOF.
    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let mut f = self.open(path)?;
        let size = f.metadata().map(|m| m.len() as usize).unwrap_or(0);
        let hint = (size + 1).max(512);

        let mut data = Vec::with_capacity(hint);
        f.read_to_end(&mut data)?;
        Ok(data)
    }

    /// Create-or-truncate `path` and write `data` to it. A write error
    /// outranks a close error; the close error is still surfaced when the
    /// write went through.
    #[instrument(level = "debug", skip(self, data), fields(uid = self.id.uid(), len = data.len()))]
    pub fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        let mut f = self.open_file(
            path,
            libc::O_WRONLY | libc::O_CREAT | libc::O_TRUNC,
            mode,
        )?;
        let wrote = f.write_all(data).map_err(Error::from);
        let closed = f.close();
        wrote.and(closed)
    }

    /// Entry names of the directory at `path`, sorted ascending.
    pub fn read_dir(&self, path: &Path) -> Result<Vec<OsString>> {
        let mut f = self.open(path)?;
        let mut names = f.read_dir_names(None)?;
        names.sort();
        Ok(names)
    }

    /// Resolve `path` through every symlink and verify the identity may
    /// traverse each intermediate directory. Returns the final resolved
    /// path.
    pub fn eval_symlinks(&self, path: &Path) -> Result<PathBuf> {
        let chain = resolve::resolve_chain(path)?;
        let (last, intermediate) = chain.split_last().ok_or(Error::InvalidPath)?;
        for dir in intermediate {
            self.dir_execute_only(dir)?;
        }
        Ok(last.clone())
    }
}

fn access_for_flags(flags: i32) -> Access {
    if flags & libc::O_ACCMODE == libc::O_RDONLY {
        Access::Read
    } else {
        Access::Write
    }
}

fn ends_with_dot(path: &Path) -> bool {
    use std::os::unix::ffi::OsStrExt;
    let bytes = path.as_os_str().as_bytes();
    bytes == b"." || bytes.ends_with(b"/.")
}

/// Pre-flight capability queries: what the façade would decide, without
/// performing any operation. Useful to provisioning tools that want to
/// report problems before touching anything.
impl Identity {
    /// Could this identity create or delete the directory entry at `path`?
    /// The entry itself does not have to exist, its parent does.
    pub fn can_write_entry(&self, path: &Path) -> Result<()> {
        UserFs::new(self.clone())
            .inode_access(path, Access::Write)
            .map(|_| ())
    }

    /// Could this identity reach (stat) the entry at `path`? This is the
    /// execute-on-every-parent traversal requirement.
    pub fn can_read_entry(&self, path: &Path) -> Result<()> {
        UserFs::new(self.clone())
            .inode_access(path, Access::Execute)
            .map(|_| ())
    }

    /// Could this identity write the existing object at `path`? Symlinks
    /// are followed.
    pub fn can_write_object(&self, path: &Path) -> Result<()> {
        UserFs::new(self.clone()).object_access(path, Access::Write)
    }

    /// Could this identity read the existing object at `path`? Symlinks
    /// are followed.
    pub fn can_read_object(&self, path: &Path) -> Result<()> {
        UserFs::new(self.clone()).object_access(path, Access::Read)
    }

    /// Does this identity own the object at `path`? Symlinks are followed.
    pub fn owns(&self, path: &Path) -> Result<()> {
        UserFs::new(self.clone()).owns_object(path)
    }

    /// Does this identity own the entry at `path` itself, symlinks not
    /// followed?
    pub fn owns_entry(&self, path: &Path) -> Result<()> {
        UserFs::new(self.clone()).owns_entry(path)
    }
}

//! The public façade: a two-variant sum over the pass-through and the
//! impersonating view, decided once at construction time.

use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::file::UserFile;
use crate::ident::Identity;
use crate::stat::FileStat;
use crate::sys;
use crate::user::UserFs;
use crate::walk::WalkFlow;

/// A filesystem view. Obtained from [`Identity::view`]; the choice between
/// the plain host view and the permission-emulating view is made there,
/// once, and never revisited at run time.
#[derive(Debug)]
pub enum Os {
    /// Direct pass-through to the host filesystem, used when impersonation
    /// would change nothing (non-root host, or the identity is the
    /// process's own).
    Host(HostFs),
    /// The permission-emulating view.
    User(UserFs),
}

impl Os {
    pub(crate) fn host() -> Self {
        Os::Host(HostFs)
    }

    pub(crate) fn user(id: Identity) -> Self {
        Os::User(UserFs::new(id))
    }

    /// The identity whose results this view reproduces.
    pub fn identity(&self) -> Identity {
        match self {
            Os::Host(_) => Identity::builder().build(),
            Os::User(u) => u.identity().clone(),
        }
    }

    pub fn stat(&self, path: &Path) -> Result<FileStat> {
        match self {
            Os::Host(h) => h.stat(path),
            Os::User(u) => u.stat(path),
        }
    }

    pub fn lstat(&self, path: &Path) -> Result<FileStat> {
        match self {
            Os::Host(h) => h.lstat(path),
            Os::User(u) => u.lstat(path),
        }
    }

    pub fn read_link(&self, path: &Path) -> Result<PathBuf> {
        match self {
            Os::Host(h) => h.read_link(path),
            Os::User(u) => u.read_link(path),
        }
    }

    pub fn open(&self, path: &Path) -> Result<UserFile> {
        match self {
            Os::Host(h) => h.open(path),
            Os::User(u) => u.open(path),
        }
    }

    pub fn create(&self, path: &Path) -> Result<UserFile> {
        match self {
            Os::Host(h) => h.create(path),
            Os::User(u) => u.create(path),
        }
    }

    pub fn open_file(&self, path: &Path, flags: i32, mode: u32) -> Result<UserFile> {
        match self {
            Os::Host(h) => h.open_file(path, flags, mode),
            Os::User(u) => u.open_file(path, flags, mode),
        }
    }

    pub fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        match self {
            Os::Host(h) => h.mkdir(path, mode),
            Os::User(u) => u.mkdir(path, mode),
        }
    }

    pub fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()> {
        match self {
            Os::Host(h) => h.mkdir_all(path, mode),
            Os::User(u) => u.mkdir_all(path, mode),
        }
    }

    pub fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        match self {
            Os::Host(h) => h.symlink(target, link),
            Os::User(u) => u.symlink(target, link),
        }
    }

    pub fn rename(&self, old: &Path, new: &Path) -> Result<()> {
        match self {
            Os::Host(h) => h.rename(old, new),
            Os::User(u) => u.rename(old, new),
        }
    }

    pub fn remove(&self, path: &Path) -> Result<()> {
        match self {
            Os::Host(h) => h.remove(path),
            Os::User(u) => u.remove(path),
        }
    }

    pub fn remove_all(&self, path: &Path) -> Result<()> {
        match self {
            Os::Host(h) => h.remove_all(path),
            Os::User(u) => u.remove_all(path),
        }
    }

    pub fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        match self {
            Os::Host(h) => h.chmod(path, mode),
            Os::User(u) => u.chmod(path, mode),
        }
    }

    pub fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        match self {
            Os::Host(h) => h.chown(path, uid, gid),
            Os::User(u) => u.chown(path, uid, gid),
        }
    }

    pub fn lchown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        match self {
            Os::Host(h) => h.lchown(path, uid, gid),
            Os::User(u) => u.lchown(path, uid, gid),
        }
    }

    pub fn chtimes(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        match self {
            Os::Host(h) => h.chtimes(path, atime, mtime),
            Os::User(u) => u.chtimes(path, atime, mtime),
        }
    }

    pub fn truncate(&self, path: &Path, size: u64) -> Result<()> {
        match self {
            Os::Host(h) => h.truncate(path, size),
            Os::User(u) => u.truncate(path, size),
        }
    }

    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        match self {
            Os::Host(h) => h.read_file(path),
            Os::User(u) => u.read_file(path),
        }
    }

    pub fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        match self {
            Os::Host(h) => h.write_file(path, data, mode),
            Os::User(u) => u.write_file(path, data, mode),
        }
    }

    pub fn read_dir(&self, path: &Path) -> Result<Vec<OsString>> {
        match self {
            Os::Host(h) => h.read_dir(path),
            Os::User(u) => u.read_dir(path),
        }
    }

    pub fn walk<F>(&self, path: &Path, visit: F) -> Result<()>
    where
        F: FnMut(&Path, Option<&FileStat>, Option<Error>) -> Result<WalkFlow>,
    {
        match self {
            Os::Host(h) => h.walk(path, visit),
            Os::User(u) => u.walk(path, visit),
        }
    }

    pub fn eval_symlinks(&self, path: &Path) -> Result<PathBuf> {
        match self {
            Os::Host(h) => h.eval_symlinks(path),
            Os::User(u) => u.eval_symlinks(path),
        }
    }
}

/// The pass-through view: the host filesystem, no emulation. Operation for
/// operation the same surface as the impersonating view, so callers can
/// hold either without caring which they got.
#[derive(Debug)]
pub struct HostFs;

impl HostFs {
    pub fn stat(&self, path: &Path) -> Result<FileStat> {
        sys::stat(path)
    }

    pub fn lstat(&self, path: &Path) -> Result<FileStat> {
        sys::lstat(path)
    }

    pub fn read_link(&self, path: &Path) -> Result<PathBuf> {
        sys::readlink(path)
    }

    pub fn open(&self, path: &Path) -> Result<UserFile> {
        let f = sys::open(path, libc::O_RDONLY | libc::O_CLOEXEC, 0)?;
        Ok(UserFile::unchecked(path, f))
    }

    pub fn create(&self, path: &Path) -> Result<UserFile> {
        self.open_file(
            path,
            libc::O_RDWR | libc::O_CREAT | libc::O_TRUNC,
            0o666,
        )
    }

    pub fn open_file(&self, path: &Path, flags: i32, mode: u32) -> Result<UserFile> {
        let f = sys::open(path, flags | libc::O_CLOEXEC, mode)?;
        Ok(UserFile::unchecked(path, f))
    }

    pub fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        sys::mkdir(path, mode)
    }

    pub fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()> {
        use std::os::unix::fs::DirBuilderExt;
        fs::DirBuilder::new()
            .recursive(true)
            .mode(mode)
            .create(path)?;
        Ok(())
    }

    pub fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        sys::symlink(target, link)
    }

    pub fn rename(&self, old: &Path, new: &Path) -> Result<()> {
        sys::rename(old, new)
    }

    pub fn remove(&self, path: &Path) -> Result<()> {
        sys::remove(path)
    }

    pub fn remove_all(&self, path: &Path) -> Result<()> {
        match sys::lstat(path) {
            Err(Error::NotFound) => Ok(()),
            Err(e) => Err(e),
            Ok(st) if st.is_dir() => {
                fs::remove_dir_all(path)?;
                Ok(())
            }
            Ok(_) => sys::remove(path),
        }
    }

    pub fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        sys::chmod(path, mode)
    }

    pub fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        sys::chown(path, uid, gid)
    }

    pub fn lchown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        sys::lchown(path, uid, gid)
    }

    pub fn chtimes(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        sys::chtimes(path, atime, mtime)
    }

    pub fn truncate(&self, path: &Path, size: u64) -> Result<()> {
        sys::truncate(path, size)
    }

    pub fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        Ok(fs::read(path)?)
    }

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

    pub fn read_dir(&self, path: &Path) -> Result<Vec<OsString>> {
        let mut names = fs::read_dir(path)?
            .map(|entry| entry.map(|e| e.file_name()))
            .collect::<std::io::Result<Vec<_>>>()?;
        names.sort();
        Ok(names)
    }

    pub fn walk<F>(&self, path: &Path, mut visit: F) -> Result<()>
    where
        F: FnMut(&Path, Option<&FileStat>, Option<Error>) -> Result<WalkFlow>,
    {
        let mut iter = WalkDir::new(path).sort_by_file_name().into_iter();
        loop {
            let entry = match iter.next() {
                None => return Ok(()),
                Some(Ok(entry)) => entry,
                Some(Err(err)) => {
                    let at = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| path.to_path_buf());
                    match visit(&at, None, Some(Error::from(std::io::Error::from(err))))? {
                        WalkFlow::SkipAll => return Ok(()),
                        _ => continue,
                    }
                }
            };

            let stat = match entry.metadata() {
                Ok(meta) => FileStat::from_metadata(&meta),
                Err(err) => {
                    match visit(
                        entry.path(),
                        None,
                        Some(Error::from(std::io::Error::from(err))),
                    )? {
                        WalkFlow::SkipAll => return Ok(()),
                        _ => continue,
                    }
                }
            };

            match visit(entry.path(), Some(&stat), None)? {
                WalkFlow::Continue => {}
                WalkFlow::SkipDir => iter.skip_current_dir(),
                WalkFlow::SkipAll => return Ok(()),
            }
        }
    }

    pub fn eval_symlinks(&self, path: &Path) -> Result<PathBuf> {
        Ok(fs::canonicalize(path)?)
    }
}

//! Shared fixture and credential harness for the kernel-conformance tests.
//!
//! The fixture needs real chown, so everything here is root-only; tests
//! call [`Tree::new`] and bail out quietly when it returns `None`.
//!
//! Conformance works by running every battery twice: once through the
//! engine (`Os` views) and once through a harness that actually flips the
//! process's effective credentials and calls the plain host view, making
//! the kernel itself the oracle. Credential changes hit the whole process,
//! so the harness serialises behind a process-wide lock and restores on
//! drop.

use std::ffi::OsString;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::SystemTime;

use uview::{Error, FileStat, HostFs, Identity, Os, Result, UserFile, WalkFlow};

/// Every root-only test runs under this lock: the credential harness
/// lowers the effective uid of the whole process, which would poison any
/// test running beside it.
pub static TEST_LOCK: Mutex<()> = Mutex::new(());

pub fn test_lock() -> MutexGuard<'static, ()> {
    TEST_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The fixture tree from the conformance scenarios, created with umask 0:
///
/// ```text
/// a/        0300       1000:1000
/// b/        0030       1001:1000
/// c/        0003+sgid  1001:1001
/// a/d/      0300       1001:1000
/// a/d/e/    0300       1001:1000
/// d -> a/d
/// e -> a/d/e
/// ```
pub struct Tree {
    dir: tempfile::TempDir,
}

impl Tree {
    pub fn new() -> Option<Tree> {
        if unsafe { libc::geteuid() } != 0 || unsafe { libc::getuid() } != 0 {
            eprintln!("skipping: this test needs to run as root");
            return None;
        }

        let dir = tempfile::Builder::new()
            .prefix("uview-fixture")
            .tempdir_in("/tmp")
            .expect("create fixture root");

        let tree = Tree { dir };
        let host = HostFs;
        host.chmod(tree.root(), 0o755).expect("fixture root mode");

        let old_umask = unsafe { libc::umask(0) };
        let built = tree.populate(&host);
        unsafe { libc::umask(old_umask) };
        built.expect("populate fixture");

        Some(tree)
    }

    fn populate(&self, host: &HostFs) -> Result<()> {
        host.mkdir(&self.path("a"), 0o300)?;
        host.mkdir(&self.path("b"), 0o030)?;
        host.mkdir(&self.path("c"), 0o003)?;
        host.chmod(&self.path("c"), 0o2003)?;
        host.mkdir(&self.path("a/d"), 0o300)?;
        host.mkdir(&self.path("a/d/e"), 0o300)?;
        host.chown(&self.path("a"), 1000, 1000)?;
        host.chown(&self.path("b"), 1001, 1000)?;
        host.chown(&self.path("c"), 1001, 1001)?;
        host.chown(&self.path("a/d"), 1001, 1000)?;
        host.chown(&self.path("a/d/e"), 1001, 1000)?;
        host.symlink(&self.path("a/d"), &self.path("d"))?;
        host.symlink(&self.path("a/d/e"), &self.path("e"))?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn assert_ownership(&self, rel: &str, uid: u32, gid: u32) {
        let meta = fs::symlink_metadata(self.path(rel)).expect("lstat fixture entry");
        assert_eq!(
            (meta.uid(), meta.gid()),
            (uid, gid),
            "wrong ownership on {rel}"
        );
    }

    pub fn assert_content(&self, rel: &str, body: &[u8]) {
        let content = fs::read(self.path(rel)).expect("read fixture entry");
        assert_eq!(content, body, "wrong content in {rel}");
    }
}

pub fn assert_ok<T>(res: Result<T>) {
    if let Err(e) = res {
        panic!("expected success, got {e}");
    }
}

pub fn assert_denied<T>(res: Result<T>) {
    match res {
        Ok(_) => panic!("succeeded but expected a permission denial"),
        Err(e) => assert!(e.is_denied(), "expected permission denial, got {e}"),
    }
}

pub fn assert_not_exist<T>(res: Result<T>) {
    match res {
        Ok(_) => panic!("succeeded but expected not-found"),
        Err(e) => assert!(e.is_not_found(), "expected not-found, got {e}"),
    }
}

pub fn assert_not_dir<T>(res: Result<T>) {
    match res {
        Ok(_) => panic!("succeeded but expected not-a-directory"),
        Err(e) => assert!(
            matches!(e, Error::NotADirectory),
            "expected not-a-directory, got {e}"
        ),
    }
}

static CRED_LOCK: Mutex<()> = Mutex::new(());

/// Holds the process's effective credentials switched to an identity; the
/// original (root) credentials come back on drop. All assumptions
/// serialise behind [`CRED_LOCK`].
pub struct CredGuard {
    _lock: MutexGuard<'static, ()>,
}

impl CredGuard {
    pub fn assume(id: &Identity) -> CredGuard {
        let lock = CRED_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        // Group changes need the privilege we are about to drop, so they
        // go first.
        unsafe {
            if libc::setegid(id.gid()) != 0 {
                panic!("setegid: {}", std::io::Error::last_os_error());
            }
            let groups: Vec<libc::gid_t> = id.groups().to_vec();
            if libc::setgroups(groups.len(), groups.as_ptr()) != 0 {
                panic!("setgroups: {}", std::io::Error::last_os_error());
            }
            if libc::seteuid(id.uid()) != 0 {
                panic!("seteuid: {}", std::io::Error::last_os_error());
            }
        }

        CredGuard { _lock: lock }
    }
}

impl Drop for CredGuard {
    fn drop(&mut self) {
        unsafe {
            // Regain the uid first; everything else needs it.
            if libc::seteuid(libc::getuid()) != 0 {
                panic!("restore seteuid: {}", std::io::Error::last_os_error());
            }
            if libc::setegid(libc::getgid()) != 0 {
                panic!("restore setegid: {}", std::io::Error::last_os_error());
            }
            if libc::setgroups(0, std::ptr::null()) != 0 {
                panic!("restore setgroups: {}", std::io::Error::last_os_error());
            }
        }
    }
}

/// The operation surface the batteries exercise, so each battery can run
/// against the engine and against the kernel oracle without caring which
/// it got.
pub trait TestOs {
    fn stat(&self, path: &Path) -> Result<FileStat>;
    fn lstat(&self, path: &Path) -> Result<FileStat>;
    fn read_link(&self, path: &Path) -> Result<PathBuf>;
    fn open(&self, path: &Path) -> Result<UserFile>;
    fn create(&self, path: &Path) -> Result<UserFile>;
    fn open_file(&self, path: &Path, flags: i32, mode: u32) -> Result<UserFile>;
    fn mkdir(&self, path: &Path, mode: u32) -> Result<()>;
    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()>;
    fn symlink(&self, target: &Path, link: &Path) -> Result<()>;
    fn rename(&self, old: &Path, new: &Path) -> Result<()>;
    fn remove(&self, path: &Path) -> Result<()>;
    fn remove_all(&self, path: &Path) -> Result<()>;
    fn chmod(&self, path: &Path, mode: u32) -> Result<()>;
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()>;
    fn lchown(&self, path: &Path, uid: u32, gid: u32) -> Result<()>;
    fn chtimes(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> Result<()>;
    fn truncate(&self, path: &Path, size: u64) -> Result<()>;
    fn read_file(&self, path: &Path) -> Result<Vec<u8>>;
    fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<()>;
    fn read_dir(&self, path: &Path) -> Result<Vec<OsString>>;
    fn eval_symlinks(&self, path: &Path) -> Result<PathBuf>;
    fn walk(
        &self,
        path: &Path,
        visit: &mut dyn FnMut(&Path, Option<&FileStat>, Option<Error>) -> Result<WalkFlow>,
    ) -> Result<()>;
}

impl TestOs for Os {
    fn stat(&self, path: &Path) -> Result<FileStat> {
        Os::stat(self, path)
    }
    fn lstat(&self, path: &Path) -> Result<FileStat> {
        Os::lstat(self, path)
    }
    fn read_link(&self, path: &Path) -> Result<PathBuf> {
        Os::read_link(self, path)
    }
    fn open(&self, path: &Path) -> Result<UserFile> {
        Os::open(self, path)
    }
    fn create(&self, path: &Path) -> Result<UserFile> {
        Os::create(self, path)
    }
    fn open_file(&self, path: &Path, flags: i32, mode: u32) -> Result<UserFile> {
        Os::open_file(self, path, flags, mode)
    }
    fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        Os::mkdir(self, path, mode)
    }
    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()> {
        Os::mkdir_all(self, path, mode)
    }
    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        Os::symlink(self, target, link)
    }
    fn rename(&self, old: &Path, new: &Path) -> Result<()> {
        Os::rename(self, old, new)
    }
    fn remove(&self, path: &Path) -> Result<()> {
        Os::remove(self, path)
    }
    fn remove_all(&self, path: &Path) -> Result<()> {
        Os::remove_all(self, path)
    }
    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        Os::chmod(self, path, mode)
    }
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        Os::chown(self, path, uid, gid)
    }
    fn lchown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        Os::lchown(self, path, uid, gid)
    }
    fn chtimes(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        Os::chtimes(self, path, atime, mtime)
    }
    fn truncate(&self, path: &Path, size: u64) -> Result<()> {
        Os::truncate(self, path, size)
    }
    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        Os::read_file(self, path)
    }
    fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        Os::write_file(self, path, data, mode)
    }
    fn read_dir(&self, path: &Path) -> Result<Vec<OsString>> {
        Os::read_dir(self, path)
    }
    fn eval_symlinks(&self, path: &Path) -> Result<PathBuf> {
        Os::eval_symlinks(self, path)
    }
    fn walk(
        &self,
        path: &Path,
        visit: &mut dyn FnMut(&Path, Option<&FileStat>, Option<Error>) -> Result<WalkFlow>,
    ) -> Result<()> {
        Os::walk(self, path, |p, s, e| visit(p, s, e))
    }
}

/// The kernel oracle: each call really runs as the identity, bracketed by
/// a [`CredGuard`], against the plain host view.
pub struct AsUser {
    id: Identity,
}

impl AsUser {
    pub fn new(id: Identity) -> AsUser {
        AsUser { id }
    }
}

impl TestOs for AsUser {
    fn stat(&self, path: &Path) -> Result<FileStat> {
        let _g = CredGuard::assume(&self.id);
        HostFs.stat(path)
    }
    fn lstat(&self, path: &Path) -> Result<FileStat> {
        let _g = CredGuard::assume(&self.id);
        HostFs.lstat(path)
    }
    fn read_link(&self, path: &Path) -> Result<PathBuf> {
        let _g = CredGuard::assume(&self.id);
        HostFs.read_link(path)
    }
    fn open(&self, path: &Path) -> Result<UserFile> {
        let _g = CredGuard::assume(&self.id);
        HostFs.open(path)
    }
    fn create(&self, path: &Path) -> Result<UserFile> {
        let _g = CredGuard::assume(&self.id);
        HostFs.create(path)
    }
    fn open_file(&self, path: &Path, flags: i32, mode: u32) -> Result<UserFile> {
        let _g = CredGuard::assume(&self.id);
        HostFs.open_file(path, flags, mode)
    }
    fn mkdir(&self, path: &Path, mode: u32) -> Result<()> {
        let _g = CredGuard::assume(&self.id);
        HostFs.mkdir(path, mode)
    }
    fn mkdir_all(&self, path: &Path, mode: u32) -> Result<()> {
        let _g = CredGuard::assume(&self.id);
        HostFs.mkdir_all(path, mode)
    }
    fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        let _g = CredGuard::assume(&self.id);
        HostFs.symlink(target, link)
    }
    fn rename(&self, old: &Path, new: &Path) -> Result<()> {
        let _g = CredGuard::assume(&self.id);
        HostFs.rename(old, new)
    }
    fn remove(&self, path: &Path) -> Result<()> {
        let _g = CredGuard::assume(&self.id);
        HostFs.remove(path)
    }
    fn remove_all(&self, path: &Path) -> Result<()> {
        let _g = CredGuard::assume(&self.id);
        HostFs.remove_all(path)
    }
    fn chmod(&self, path: &Path, mode: u32) -> Result<()> {
        let _g = CredGuard::assume(&self.id);
        HostFs.chmod(path, mode)
    }
    fn chown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        let _g = CredGuard::assume(&self.id);
        HostFs.chown(path, uid, gid)
    }
    fn lchown(&self, path: &Path, uid: u32, gid: u32) -> Result<()> {
        let _g = CredGuard::assume(&self.id);
        HostFs.lchown(path, uid, gid)
    }
    fn chtimes(&self, path: &Path, atime: SystemTime, mtime: SystemTime) -> Result<()> {
        let _g = CredGuard::assume(&self.id);
        HostFs.chtimes(path, atime, mtime)
    }
    fn truncate(&self, path: &Path, size: u64) -> Result<()> {
        let _g = CredGuard::assume(&self.id);
        HostFs.truncate(path, size)
    }
    fn read_file(&self, path: &Path) -> Result<Vec<u8>> {
        let _g = CredGuard::assume(&self.id);
        HostFs.read_file(path)
    }
    fn write_file(&self, path: &Path, data: &[u8], mode: u32) -> Result<()> {
        let _g = CredGuard::assume(&self.id);
        HostFs.write_file(path, data, mode)
    }
    fn read_dir(&self, path: &Path) -> Result<Vec<OsString>> {
        let _g = CredGuard::assume(&self.id);
        HostFs.read_dir(path)
    }
    fn eval_symlinks(&self, path: &Path) -> Result<PathBuf> {
        let _g = CredGuard::assume(&self.id);
        HostFs.eval_symlinks(path)
    }
    fn walk(
        &self,
        path: &Path,
        visit: &mut dyn FnMut(&Path, Option<&FileStat>, Option<Error>) -> Result<WalkFlow>,
    ) -> Result<()> {
        let _g = CredGuard::assume(&self.id);
        HostFs.walk(path, |p, s, e| visit(p, s, e))
    }
}

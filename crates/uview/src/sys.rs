//! Thin wrappers over the back-end syscalls.
//!
//! Every primitive here is treated as atomic with POSIX semantics, maps its
//! error through the taxonomy exactly once, and caches nothing. Anything
//! `std::fs` covers goes through `std::fs`; the rest goes through `nix` or
//! raw `libc`.

use std::ffi::{CStr, CString, OsStr, OsString};
use std::fs::{self, File};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::{FromRawFd, IntoRawFd};
use std::path::{Path, PathBuf};
use std::ptr::{self, NonNull};
use std::time::SystemTime;

use nix::sys::stat::Mode;

use crate::acl::Acl;
use crate::error::{Error, Result};
use crate::stat::FileStat;

const ACL_ACCESS_XATTR: &CStr = match CStr::from_bytes_with_nul(b"system.posix_acl_access\0") {
    Ok(name) => name,
    Err(_) => unreachable!(),
};

fn cpath(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| Error::InvalidPath)
}

/// stat(2): follows symlinks.
pub(crate) fn stat(path: &Path) -> Result<FileStat> {
    let meta = fs::metadata(path)?;
    Ok(FileStat::from_metadata(&meta))
}

/// lstat(2): the record of the entry itself.
pub(crate) fn lstat(path: &Path) -> Result<FileStat> {
    let meta = fs::symlink_metadata(path)?;
    Ok(FileStat::from_metadata(&meta))
}

/// open(2) with explicit `O_*` flags and permission bits. The mode argument
/// carries permission bits only; creation behaviour always travels in the
/// flags.
pub(crate) fn open(path: &Path, flags: i32, mode: u32) -> Result<File> {
    let c = cpath(path)?;
    let fd = unsafe { libc::open(c.as_ptr(), flags, mode as libc::c_uint) };
    if fd < 0 {
        return Err(io::Error::last_os_error().into());
    }
    Ok(unsafe { File::from_raw_fd(fd) })
}

pub(crate) fn mkdir(path: &Path, mode: u32) -> Result<()> {
    nix::unistd::mkdir(path, Mode::from_bits_truncate(mode))?;
    Ok(())
}

pub(crate) fn symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

pub(crate) fn readlink(path: &Path) -> Result<PathBuf> {
    Ok(fs::read_link(path)?)
}

pub(crate) fn rename(old: &Path, new: &Path) -> Result<()> {
    fs::rename(old, new)?;
    Ok(())
}

/// unlink(2), falling back to rmdir(2) for directories.
pub(crate) fn remove(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(libc::EISDIR) => {
            fs::remove_dir(path)?;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn chmod(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    Ok(())
}

pub(crate) fn chown(path: &Path, uid: u32, gid: u32) -> Result<()> {
    let c = cpath(path)?;
    let rc = unsafe { libc::chown(c.as_ptr(), uid, gid) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error().into())
    }
}

/// lchown(2): never follows the path, so a fresh symlink can be stamped
/// without touching whatever it points at.
pub(crate) fn lchown(path: &Path, uid: u32, gid: u32) -> Result<()> {
    let c = cpath(path)?;
    let rc = unsafe { libc::lchown(c.as_ptr(), uid, gid) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error().into())
    }
}

/// utimensat(2) with explicit timestamps, following symlinks.
pub(crate) fn chtimes(path: &Path, atime: SystemTime, mtime: SystemTime) -> Result<()> {
    let times = [timespec(atime), timespec(mtime)];
    let c = cpath(path)?;
    let rc = unsafe { libc::utimensat(libc::AT_FDCWD, c.as_ptr(), times.as_ptr(), 0) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error().into())
    }
}

fn timespec(t: SystemTime) -> libc::timespec {
    let (sec, nsec) = match t.duration_since(SystemTime::UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, d.subsec_nanos() as i64),
        Err(e) => {
            let d = e.duration();
            // Round pre-epoch instants toward minus infinity so the
            // nanosecond field stays in range.
            let mut sec = -(d.as_secs() as i64);
            let mut nsec = -(d.subsec_nanos() as i64);
            if nsec < 0 {
                sec -= 1;
                nsec += 1_000_000_000;
            }
            (sec, nsec)
        }
    };
    libc::timespec {
        tv_sec: sec,
        tv_nsec: nsec,
    }
}

pub(crate) fn truncate(path: &Path, size: u64) -> Result<()> {
    nix::unistd::truncate(path, size as libc::off_t)?;
    Ok(())
}

/// Access ACL of the inode at `path`, following symlinks.
///
/// `None` means the ACL is absent or the filesystem does not support them;
/// the caller falls back to mode bits alone. A blob that does not parse is
/// a malformed-record error, never silently ignored.
pub(crate) fn acl(path: &Path) -> Result<Option<Acl>> {
    let c = cpath(path)?;
    loop {
        let size = unsafe {
            libc::getxattr(
                c.as_ptr(),
                ACL_ACCESS_XATTR.as_ptr(),
                ptr::null_mut(),
                0,
            )
        };
        if size < 0 {
            return acl_absent_or_err();
        }

        let mut buf = vec![0u8; size as usize];
        let read = unsafe {
            libc::getxattr(
                c.as_ptr(),
                ACL_ACCESS_XATTR.as_ptr(),
                buf.as_mut_ptr().cast(),
                buf.len(),
            )
        };
        if read < 0 {
            let errno = io::Error::last_os_error();
            // The attribute grew between the size probe and the read.
            if errno.raw_os_error() == Some(libc::ERANGE) {
                continue;
            }
            return acl_absent_or_err();
        }

        buf.truncate(read as usize);
        return Acl::from_xattr(&buf).map(Some);
    }
}

fn acl_absent_or_err() -> Result<Option<Acl>> {
    let errno = io::Error::last_os_error();
    match errno.raw_os_error() {
        Some(code) if code == libc::ENODATA || code == libc::EOPNOTSUPP => Ok(None),
        _ => Err(errno.into()),
    }
}

/// A dirent stream over an already-open directory handle.
///
/// `std::fs::read_dir` always opens its own descriptor, which breaks the
/// batched delete loop: after removing a batch the directory must be read
/// *from the same handle* to make progress on entries the first batch
/// failed on. fdopendir(3) gives exactly that.
pub(crate) struct DirStream {
    dirp: NonNull<libc::DIR>,
}

impl DirStream {
    /// Takes over the descriptor of `file`.
    pub(crate) fn from_file(file: File) -> Result<Self> {
        let fd = file.into_raw_fd();
        let dirp = unsafe { libc::fdopendir(fd) };
        match NonNull::new(dirp) {
            Some(dirp) => Ok(DirStream { dirp }),
            None => {
                let err = io::Error::last_os_error();
                unsafe { libc::close(fd) };
                Err(err.into())
            }
        }
    }

    /// Read up to `n` entry names, every remaining one when `n` is `None`.
    /// `.` and `..` are skipped. An empty vector means the stream is
    /// exhausted.
    pub(crate) fn next_names(&mut self, n: Option<usize>) -> Result<Vec<OsString>> {
        let mut names = Vec::new();
        loop {
            if n.is_some_and(|n| names.len() >= n) {
                return Ok(names);
            }

            // readdir(3) reports both the end of the stream and failure by
            // returning null; only errno tells them apart.
            nix::errno::Errno::clear();
            let entry = unsafe { libc::readdir(self.dirp.as_ptr()) };
            if entry.is_null() {
                let errno = io::Error::last_os_error();
                return match errno.raw_os_error() {
                    Some(0) | None => Ok(names),
                    Some(_) => Err(errno.into()),
                };
            }

            let name = unsafe { CStr::from_ptr((*entry).d_name.as_ptr()) };
            let bytes = name.to_bytes();
            if bytes == b"." || bytes == b".." {
                continue;
            }
            names.push(OsStr::from_bytes(bytes).to_os_string());
        }
    }
}

impl Drop for DirStream {
    fn drop(&mut self) {
        unsafe { libc::closedir(self.dirp.as_ptr()) };
    }
}

// The stream owns its DIR handle exclusively; moving it across threads is
// fine, sharing it is already impossible through &mut receivers.
unsafe impl Send for DirStream {}

//! Open file handles returned by the façade.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::io::IntoRawFd;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::sys::{self, DirStream};
use crate::user::UserFs;

/// A handle created through the façade. The caller owns it; the engine
/// keeps no reference and performs no implicit cleanup beyond closing the
/// descriptor on drop.
///
/// Plain I/O goes straight to the descriptor: the access decision was made
/// when the handle was opened, exactly like a real process keeps using an
/// fd whose file was since chmod-ed away. Metadata mutations by path
/// (`chmod`, `chown`) re-run the full guard pipeline of the view the handle
/// came from.
pub struct UserFile {
    path: PathBuf,
    file: Option<File>,
    dir: Option<DirStream>,
    view: Option<UserFs>,
}

impl UserFile {
    pub(crate) fn checked(path: &Path, file: File, view: UserFs) -> Self {
        UserFile {
            path: path.to_path_buf(),
            file: Some(file),
            dir: None,
            view: Some(view),
        }
    }

    pub(crate) fn unchecked(path: &Path, file: File) -> Self {
        UserFile {
            path: path.to_path_buf(),
            file: Some(file),
            dir: None,
            view: None,
        }
    }

    /// The path the handle was opened with.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// fstat(2) on the open descriptor.
    pub fn metadata(&self) -> io::Result<std::fs::Metadata> {
        self.live()?.metadata()
    }

    /// ftruncate(2) on the open descriptor; the open-time access decision
    /// carries it, the same way it would for a real process.
    pub fn set_len(&self, size: u64) -> io::Result<()> {
        self.live()?.set_len(size)
    }

    pub fn sync_all(&self) -> io::Result<()> {
        self.live()?.sync_all()
    }

    /// Permission-checked chmod by path on the view this handle came from.
    pub fn chmod(&self, mode: u32) -> Result<()> {
        match &self.view {
            Some(view) => view.chmod(&self.path, mode),
            None => sys::chmod(&self.path, mode),
        }
    }

    /// Permission-checked chown by path on the view this handle came from.
    pub fn chown(&self, uid: u32, gid: u32) -> Result<()> {
        match &self.view {
            Some(view) => view.chown(&self.path, uid, gid),
            None => sys::chown(&self.path, uid, gid),
        }
    }

    /// Read up to `n` directory entry names from the handle, every
    /// remaining one when `n` is `None`. The stream keeps its position
    /// across calls; an empty batch means exhaustion.
    pub fn read_dir_names(&mut self, n: Option<usize>) -> Result<Vec<std::ffi::OsString>> {
        if self.dir.is_none() {
            let file = self.file.take().ok_or_else(closed)?;
            self.dir = Some(DirStream::from_file(file)?);
        }
        self.dir
            .as_mut()
            .expect("directory stream was just installed")
            .next_names(n)
    }

    /// Close the handle, surfacing the close error instead of discarding it
    /// the way an implicit drop has to.
    pub fn close(mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            let fd = file.into_raw_fd();
            let rc = unsafe { libc::close(fd) };
            if rc != 0 {
                return Err(io::Error::last_os_error().into());
            }
        }
        // A directory stream closes with its DIR handle.
        self.dir = None;
        Ok(())
    }

    fn live(&self) -> io::Result<&File> {
        self.file
            .as_ref()
            .ok_or_else(closed)
    }
}

fn closed() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "file handle is closed")
}

impl Read for UserFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(f) => f.read(buf),
            None => Err(closed()),
        }
    }
}

impl Write for UserFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self.file.as_mut() {
            Some(f) => f.write(buf),
            None => Err(closed()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.file.as_mut() {
            Some(f) => f.flush(),
            None => Err(closed()),
        }
    }
}

impl Seek for UserFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match self.file.as_mut() {
            Some(f) => f.seek(pos),
            None => Err(closed()),
        }
    }
}

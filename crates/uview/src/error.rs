//! Error taxonomy of the engine.
//!
//! The categories are orthogonal to the raw OS error codes: every guard
//! failure is reported in the same class the kernel would have used for a
//! real process carrying the impersonated credentials, so callers cannot
//! tell an emulated denial from a genuine one.

use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A DAC or ACL check failed. The kernel equivalent is `EACCES`.
    #[error("permission denied")]
    Denied,

    /// A path component does not exist (`ENOENT`). Never synthesised from a
    /// permission failure, and a permission failure is never reported as
    /// this.
    #[error("no such file or directory")]
    NotFound,

    /// A path prefix that had to be a directory was something else
    /// (`ENOTDIR`).
    #[error("not a directory")]
    NotADirectory,

    /// Empty or malformed path, or a symlink chain longer than
    /// [`MAX_SYMLINK_HOPS`](crate::MAX_SYMLINK_HOPS) (`EINVAL`).
    #[error("invalid path")]
    InvalidPath,

    /// The platform handed back a record the engine cannot interpret, e.g.
    /// a truncated ACL blob. A platform or programmer error, not a user one.
    #[error("malformed {0} record")]
    BadRecord(&'static str),

    /// Any other back-end error, propagated verbatim.
    #[error(transparent)]
    Io(io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// The errno a real kernel would have reported for this category.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::Denied => Some(libc::EACCES),
            Error::NotFound => Some(libc::ENOENT),
            Error::NotADirectory => Some(libc::ENOTDIR),
            Error::InvalidPath => Some(libc::EINVAL),
            Error::BadRecord(_) => None,
            Error::Io(e) => e.raw_os_error(),
        }
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, Error::Denied)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound)
    }

    pub(crate) fn is_already_exists(&self) -> bool {
        match self {
            Error::Io(e) => e.kind() == io::ErrorKind::AlreadyExists,
            _ => false,
        }
    }
}

/// Classification happens once, at the back-end boundary. `EPERM` joins
/// `EACCES` in the denied class because the kernel uses both for ownership
/// and DAC refusals.
impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        match e.raw_os_error() {
            Some(libc::ENOENT) => Error::NotFound,
            Some(libc::EACCES) | Some(libc::EPERM) => Error::Denied,
            Some(libc::ENOTDIR) => Error::NotADirectory,
            Some(libc::EINVAL) => Error::InvalidPath,
            Some(_) => Error::Io(e),
            None => match e.kind() {
                io::ErrorKind::NotFound => Error::NotFound,
                io::ErrorKind::PermissionDenied => Error::Denied,
                _ => Error::Io(e),
            },
        }
    }
}

impl From<nix::Error> for Error {
    fn from(e: nix::Error) -> Self {
        Error::from(io::Error::from(e))
    }
}

/// Restores the POSIX shape for callers that need an `io::Error`.
impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(io) => io,
            Error::BadRecord(what) => io::Error::other(format!("malformed {what} record")),
            other => io::Error::from_raw_os_error(
                other.raw_os_error().expect("category carries an errno"),
            ),
        }
    }
}

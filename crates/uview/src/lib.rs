//! # uview
//!
//! A virtual user view of a POSIX filesystem.
//!
//! A root process hands `uview` an identity (uid, primary gid,
//! supplementary groups) and gets back a filesystem façade whose every
//! operation behaves as if that identity had issued the call itself:
//! permission checks follow the POSIX DAC model plus POSIX.1e ACLs,
//! newly created objects are owned by the impersonated identity (setgid
//! directories donate their group), sticky directories restrict deletion to
//! owners, and error categories match what the kernel would have returned.
//! Installers, provisioners and archive extractors get to pre-check and
//! execute work *as* a target user without switching process credentials.
//!
//! ```no_run
//! use uview::Identity;
//!
//! # fn main() -> uview::Result<()> {
//! let view = Identity::builder().uid(1000).gid(1000).build().view();
//! view.write_file("/srv/app/config.toml".as_ref(), b"answer = 42", 0o640)?;
//! # Ok(())
//! # }
//! ```
//!
//! On a non-root host, or for the process's own identity, the returned
//! view is a plain pass-through, so the same call sites work with and
//! without privileges.
//!
//! ## What this is not
//!
//! The engine emulates discretionary access control only: no MAC
//! (SELinux/AppArmor), no capabilities beyond the uid-0 bypass, no hard
//! links, no transactional multi-step operations. Decisions are made
//! against fresh stat/ACL records per call; concurrent mutation by other
//! processes can still race the operation itself, exactly as it can for a
//! real process.

mod access;
mod acl;
mod error;
mod file;
mod gate;
mod ident;
mod os;
mod perm;
mod resolve;
mod stat;
mod sys;
mod user;
mod walk;

pub use acl::{Acl, AclEntry, AclTag};
pub use error::{Error, Result};
pub use file::UserFile;
pub use ident::{Identity, IdentityBuilder};
pub use os::{HostFs, Os};
pub use perm::Access;
pub use resolve::MAX_SYMLINK_HOPS;
pub use stat::{FileKind, FileStat};
pub use user::UserFs;
pub use walk::WalkFlow;

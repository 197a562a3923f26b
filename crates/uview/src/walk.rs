//! Depth-first directory walking with visitor-driven pruning.

use std::path::Path;

use crate::error::{Error, Result};
use crate::stat::FileStat;
use crate::user::UserFs;

/// What the visitor wants the walk to do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkFlow {
    /// Keep going.
    Continue,
    /// Skip the contents of the directory just visited, or, when returned
    /// for a non-directory, the rest of its containing directory.
    SkipDir,
    /// Stop the whole walk, successfully.
    SkipAll,
}

impl UserFs {
    /// Walk the tree rooted at `path` depth-first, children in ascending
    /// name order, entries lstat-ed (symlinks are reported, not followed).
    ///
    /// The visitor receives every path together with its stat record, or
    /// with the error that made the record (or a directory's listing)
    /// unavailable; returning the error propagates it, returning a
    /// [`WalkFlow`] swallows it and steers the walk.
    pub fn walk<F>(&self, path: &Path, mut visit: F) -> Result<()>
    where
        F: FnMut(&Path, Option<&FileStat>, Option<Error>) -> Result<WalkFlow>,
    {
        match self.lstat(path) {
            Ok(stat) => {
                self.walk_node(path, &stat, &mut visit)?;
            }
            Err(e) => {
                visit(path, None, Some(e))?;
            }
        }
        // A skip reaching the top level just ends the walk.
        Ok(())
    }

    fn walk_node<F>(&self, path: &Path, stat: &FileStat, visit: &mut F) -> Result<WalkFlow>
    where
        F: FnMut(&Path, Option<&FileStat>, Option<Error>) -> Result<WalkFlow>,
    {
        if !stat.is_dir() {
            return visit(path, Some(stat), None);
        }

        let names = match self.read_dir(path) {
            Ok(names) => names,
            // The directory cannot be descended either way; the visitor
            // decides whether that sinks the walk.
            Err(e) => return visit(path, Some(stat), Some(e)),
        };

        match visit(path, Some(stat), None)? {
            WalkFlow::Continue => {}
            WalkFlow::SkipDir => return Ok(WalkFlow::Continue),
            WalkFlow::SkipAll => return Ok(WalkFlow::SkipAll),
        }

        for name in names {
            let child = path.join(&name);
            let flow = match self.lstat(&child) {
                Ok(child_stat) => self.walk_node(&child, &child_stat, visit)?,
                Err(e) => visit(&child, None, Some(e))?,
            };
            match flow {
                WalkFlow::Continue => {}
                // A skip on a non-directory entry prunes the rest of this
                // directory.
                WalkFlow::SkipDir => break,
                WalkFlow::SkipAll => return Ok(WalkFlow::SkipAll),
            }
        }

        Ok(WalkFlow::Continue)
    }
}

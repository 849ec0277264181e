//! Request-scoped working directories.
//!
//! Every request stages generated code under its own temporary directory.
//! The directory is released when its owner drops it — on success, failure,
//! and panic alike — so no exit path can leak a tree and no background
//! cleanup task races the response.

use std::io;
use std::path::Path;

use tempfile::TempDir;

/// An owned temporary directory for one request's generated files.
pub struct WorkDir {
    inner: TempDir,
}

impl WorkDir {
    pub fn create() -> io::Result<Self> {
        let inner = tempfile::Builder::new().prefix("paperforge-").tempdir()?;
        Ok(Self { inner })
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }
}

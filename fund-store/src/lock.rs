//! Lock file that keeps two task runs from overlapping.

use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::AppError;

/// Held for the duration of a run; the file is removed on drop if this run
/// created it.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    owned: bool,
}

impl RunLock {
    /// Create the lock file at `path`.
    ///
    /// Fails with [`AppError::Locked`] when the file already exists, unless
    /// `force` is set, in which case the run proceeds without owning it.
    pub fn acquire(path: impl AsRef<Path>, force: bool) -> Result<Self, AppError> {
        let path = path.as_ref().to_path_buf();
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}", std::process::id())?;
                debug!(path = %path.display(), "Acquired run lock");
                Ok(Self { path, owned: true })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists && force => {
                warn!(
                    path = %path.display(),
                    "Run lock already held, continuing because of --force"
                );
                Ok(Self { path, owned: false })
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(AppError::Locked(path.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn is_owned(&self) -> bool {
        self.owned
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if self.owned {
            if let Err(e) = std::fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "Failed to remove run lock");
            }
        }
    }
}

//! Flash filesystem boundary
//!
//! The store never keeps file handles open across calls: every operation
//! opens, acts, and closes. This mirrors how the controller talks to its
//! SPIFFS partition and keeps the trait trivially mockable in tests.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::errors::FlashError;

/// Directory-scoped flash operations used by the record stores
///
/// Implementations must guarantee whole-file atomicity for `write_exact`:
/// a failed write may leave nothing behind, but never a readable partial
/// file.
pub trait Flash: Send + Sync {
    /// File names (not paths) of the regular files in `dir`
    fn list_entries(&self, dir: &str) -> Result<Vec<String>, FlashError>;

    /// Fill `buf` from `path`; errors if the file holds fewer bytes
    fn read_exact(&self, path: &str, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Atomically replace `path` with `bytes`
    fn write_exact(&self, path: &str, bytes: &[u8]) -> Result<(), FlashError>;

    /// Delete the file at `path`
    fn remove(&self, path: &str) -> Result<(), FlashError>;

    /// Create `dir` and any missing parents; existing dirs are fine
    fn mkdir_if_absent(&self, dir: &str) -> Result<(), FlashError>;
}

/// `std::fs`-backed flash rooted at a base directory
///
/// Store paths like `store/log_data/pump` resolve below the root, so tests
/// can point the whole subsystem at a temp dir.
pub struct StdFlash {
    root: PathBuf,
}

impl StdFlash {
    /// Flash rooted at `root`; the directory need not exist yet
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }
}

impl Flash for StdFlash {
    fn list_entries(&self, dir: &str) -> Result<Vec<String>, FlashError> {
        let full = self.resolve(dir);
        let mut names = Vec::new();
        for entry in fs::read_dir(&full).map_err(|e| FlashError::io(dir, e))? {
            let entry = entry.map_err(|e| FlashError::io(dir, e))?;
            if entry.file_type().map_err(|e| FlashError::io(dir, e))?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_owned());
                }
            }
        }
        Ok(names)
    }

    fn read_exact(&self, path: &str, buf: &mut [u8]) -> Result<(), FlashError> {
        let mut file = fs::File::open(self.resolve(path)).map_err(|e| FlashError::io(path, e))?;
        file.read_exact(buf).map_err(|e| FlashError::io(path, e))
    }

    fn write_exact(&self, path: &str, bytes: &[u8]) -> Result<(), FlashError> {
        let full = self.resolve(path);
        // Write-then-rename so a crash mid-write never leaves a readable
        // partial batch.
        let tmp = tmp_path(&full);
        fs::write(&tmp, bytes).map_err(|e| FlashError::io(path, e))?;
        fs::rename(&tmp, &full).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            FlashError::io(path, e)
        })
    }

    fn remove(&self, path: &str) -> Result<(), FlashError> {
        fs::remove_file(self.resolve(path)).map_err(|e| FlashError::io(path, e))
    }

    fn mkdir_if_absent(&self, dir: &str) -> Result<(), FlashError> {
        fs::create_dir_all(self.resolve(dir)).map_err(|e| FlashError::io(dir, e))
    }
}

fn tmp_path(full: &Path) -> PathBuf {
    let mut os = full.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}

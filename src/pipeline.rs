//! Local file handling around a dump: removal and a guard that guarantees it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Removes `file_name`. A file that is already gone only earns a warning.
pub async fn remove_local_file(file_name: &Path) {
    info!("Removing local backup {}", file_name.display());
    match tokio::fs::remove_file(file_name).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!("Local backup {} was already removed", file_name.display())
        }
        Err(e) => warn!("Failed to remove {}: {}", file_name.display(), e),
    }
}

/// Local files of one job. Whatever is still registered when the guard drops
/// is removed synchronously, so early returns and panics leave nothing behind.
#[derive(Debug, Default)]
pub struct ArtifactGuard {
    paths: Vec<PathBuf>,
}

impl ArtifactGuard {
    pub fn new() -> Self {
        ArtifactGuard::default()
    }

    pub fn track(&mut self, path: &Path) {
        self.paths.push(path.to_path_buf());
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Keeps every tracked file. Used once they are complete and handed on.
    pub fn release(mut self) {
        self.paths.clear();
    }

    /// Removes every tracked file now.
    pub async fn cleanup(mut self) {
        for path in std::mem::take(&mut self.paths) {
            remove_local_file(&path).await;
        }
    }
}

impl Drop for ArtifactGuard {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => info!("Removing local backup {}", path.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

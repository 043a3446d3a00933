//! Delayed removal of temporary export files

use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Delete `paths` once `grace` has elapsed, giving the persistence sink time
/// to finish reading. Resolves to the number of files removed.
pub fn schedule_cleanup(paths: Vec<PathBuf>, grace: Duration) -> JoinHandle<usize> {
    tokio::spawn(async move {
        tokio::time::sleep(grace).await;
        remove_files(&paths).await
    })
}

/// Remove files now; missing files are not an error
pub async fn remove_files(paths: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Failed to remove temporary file {:?}: {}", path, e),
        }
    }
    tracing::debug!("Cleaned up {} of {} temporary files", removed, paths.len());
    removed
}

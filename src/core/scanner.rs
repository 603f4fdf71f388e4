/*!
 * Directory scanner: the single producer feeding the worker pool
 */

use std::path::PathBuf;
use std::sync::Arc;

use async_channel::Receiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::FileTask;
use crate::error::{Result, UploadError};

/// List the direct children of `dir` that are not directories
///
/// The listing is read in full before anything is returned, so a read
/// failure yields no tasks at all. Symbolic links are followed; a link whose
/// target cannot be resolved is skipped with a warning.
pub async fn scan_directory(dir: PathBuf) -> Result<Vec<FileTask>> {
    let discovery = |source| UploadError::Discovery {
        path: dir.clone(),
        source,
    };

    let mut entries = tokio::fs::read_dir(&dir).await.map_err(discovery)?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(discovery)? {
        paths.push((entry.path(), entry.file_name()));
    }

    info!("Found {} files", paths.len());

    let dir = Arc::new(dir);
    let mut tasks = Vec::with_capacity(paths.len());

    for (path, file_name) in paths {
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
        };

        if metadata.is_dir() {
            debug!("Skipping directory {}", path.display());
            continue;
        }

        tasks.push(FileTask::new(dir.clone(), file_name, metadata.len()));
    }

    Ok(tasks)
}

/// Start scanning `dir` in the background
///
/// Returns the receiving end of a multi-consumer channel holding at most
/// `capacity` pending tasks, and a handle resolving to the number of tasks
/// sent. Tasks come out in scan order. The channel closes once every task
/// has been sent or the scan failed.
pub fn spawn_scanner(
    dir: PathBuf,
    capacity: usize,
) -> (Receiver<FileTask>, JoinHandle<Result<usize>>) {
    let (tx, rx) = async_channel::bounded(capacity.max(1));

    let handle = tokio::spawn(async move {
        let tasks = scan_directory(dir).await?;
        let mut sent = 0;

        for task in tasks {
            // Blocks while the channel is full
            if tx.send(task).await.is_err() {
                break;
            }
            sent += 1;
        }

        Ok(sent)
    });

    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_scan_skips_subdirectories() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("a.txt"), b"aaa").unwrap();
        fs::write(temp.path().join("b.bin"), vec![0u8; 1024]).unwrap();
        fs::create_dir(temp.path().join("nested")).unwrap();
        fs::write(temp.path().join("nested").join("inner.txt"), b"x").unwrap();

        let mut tasks = scan_directory(temp.path().to_path_buf()).await.unwrap();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].name, "a.txt");
        assert_eq!(tasks[0].size, 3);
        assert_eq!(tasks[1].name, "b.bin");
        assert_eq!(tasks[1].size, 1024);
        assert_eq!(tasks[0].dir.as_path(), temp.path());
    }

    #[tokio::test]
    async fn test_scan_missing_directory_is_discovery_error() {
        let result = scan_directory(PathBuf::from("/nonexistent/s3push-source")).await;
        assert!(matches!(result, Err(UploadError::Discovery { .. })));
    }

    #[tokio::test]
    async fn test_scan_empty_directory() {
        let temp = TempDir::new().unwrap();
        let tasks = scan_directory(temp.path().to_path_buf()).await.unwrap();
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_spawned_scanner_closes_channel() {
        let temp = TempDir::new().unwrap();
        for i in 0..5 {
            fs::write(temp.path().join(format!("f{}", i)), b"data").unwrap();
        }

        let (rx, handle) = spawn_scanner(temp.path().to_path_buf(), 1);
        let mut received = Vec::new();
        while let Ok(task) = rx.recv().await {
            received.push(task.name);
        }

        assert_eq!(received.len(), 5);
        assert_eq!(handle.await.unwrap().unwrap(), 5);
    }

    #[tokio::test]
    async fn test_spawned_scanner_reports_failure() {
        let (rx, handle) = spawn_scanner(PathBuf::from("/nonexistent/s3push-source"), 4);
        assert!(rx.recv().await.is_err());
        assert!(matches!(
            handle.await.unwrap(),
            Err(UploadError::Discovery { .. })
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_scan_skips_dangling_symlink() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("real.txt"), b"ok").unwrap();
        std::os::unix::fs::symlink(
            temp.path().join("missing-target"),
            temp.path().join("dangling"),
        )
        .unwrap();

        let tasks = scan_directory(temp.path().to_path_buf()).await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name, "real.txt");
    }
}

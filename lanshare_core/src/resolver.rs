//! Save path resolution
//!
//! The file receive handler never decides where a file goes. It asks a
//! [`SavePathResolver`], which may answer from another execution context
//! (a UI thread, a terminal prompt) at its own pace.

use futures::future::BoxFuture;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// Turns a suggested file name into a destination path, or `None` to cancel
#[cfg_attr(test, mockall::automock)]
pub trait SavePathResolver: Send + Sync {
    fn resolve_save_path(&self, suggested_name: &str) -> BoxFuture<'static, Option<PathBuf>>;
}

/// A pending save decision delivered to the application
#[derive(Debug)]
pub struct SaveRequest {
    suggested_name: String,
    reply: oneshot::Sender<Option<PathBuf>>,
}

impl SaveRequest {
    pub fn suggested_name(&self) -> &str {
        &self.suggested_name
    }

    /// True once the receive handler stopped waiting for this answer
    pub fn is_cancelled(&self) -> bool {
        self.reply.is_closed()
    }

    /// Answer with a destination path
    pub fn accept(self, path: impl Into<PathBuf>) {
        let _ = self.reply.send(Some(path.into()));
    }

    /// Refuse the file
    pub fn decline(self) {
        let _ = self.reply.send(None);
    }

    /// Answer with an optional path
    pub fn respond(self, path: Option<PathBuf>) {
        let _ = self.reply.send(path);
    }
}

/// Forwards each decision to a receiver owned by the application.
///
/// Each request carries a single-shot reply channel. Dropping a request
/// without answering, or dropping the receiver, counts as a cancellation.
#[derive(Debug, Clone)]
pub struct ChannelResolver {
    requests: mpsc::Sender<SaveRequest>,
}

impl ChannelResolver {
    /// Create a resolver and the receiving end for the application
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<SaveRequest>) {
        let (requests, rx) = mpsc::channel(capacity);
        (Self { requests }, rx)
    }
}

impl SavePathResolver for ChannelResolver {
    fn resolve_save_path(&self, suggested_name: &str) -> BoxFuture<'static, Option<PathBuf>> {
        let requests = self.requests.clone();
        let suggested_name = suggested_name.to_string();

        Box::pin(async move {
            let (reply, response) = oneshot::channel();
            let request = SaveRequest {
                suggested_name,
                reply,
            };

            if requests.send(request).await.is_err() {
                debug!("Save request receiver is gone, cancelling");
                return None;
            }

            response.await.ok().flatten()
        })
    }
}

/// Accepts every file into one directory without asking
#[derive(Debug, Clone)]
pub struct DirectoryResolver {
    dir: PathBuf,
}

impl DirectoryResolver {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl SavePathResolver for DirectoryResolver {
    fn resolve_save_path(&self, suggested_name: &str) -> BoxFuture<'static, Option<PathBuf>> {
        let dir = self.dir.clone();
        let suggested_name = suggested_name.to_string();

        Box::pin(async move {
            if let Err(e) = tokio::fs::create_dir_all(&dir).await {
                tracing::warn!("Cannot create download directory {}: {}", dir.display(), e);
                return None;
            }
            Some(unique_path(&dir, &suggested_name))
        })
    }
}

/// First path in `dir` for `name` that does not exist yet: `name`,
/// `stem (1).ext`, `stem (2).ext`, ...
pub fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| name.to_string());
    let extension = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    (1..)
        .map(|n| dir.join(format!("{} ({}){}", stem, n, extension)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_channel_resolver_accept() {
        let (resolver, mut requests) = ChannelResolver::new(4);

        let ui = tokio::spawn(async move {
            let request = requests.recv().await.unwrap();
            assert_eq!(request.suggested_name(), "photo.jpg");
            request.accept("/tmp/photo.jpg");
        });

        let path = resolver.resolve_save_path("photo.jpg").await;
        ui.await.unwrap();
        assert_eq!(path, Some(PathBuf::from("/tmp/photo.jpg")));
    }

    #[tokio::test]
    async fn test_channel_resolver_decline() {
        let (resolver, mut requests) = ChannelResolver::new(4);

        tokio::spawn(async move {
            requests.recv().await.unwrap().decline();
        });

        assert_eq!(resolver.resolve_save_path("a.txt").await, None);
    }

    #[tokio::test]
    async fn test_channel_resolver_dropped_request_cancels() {
        let (resolver, mut requests) = ChannelResolver::new(4);

        tokio::spawn(async move {
            drop(requests.recv().await);
        });

        assert_eq!(resolver.resolve_save_path("a.txt").await, None);
    }

    #[tokio::test]
    async fn test_channel_resolver_closed_receiver_cancels() {
        let (resolver, requests) = ChannelResolver::new(4);
        drop(requests);

        assert_eq!(resolver.resolve_save_path("a.txt").await, None);
    }

    #[tokio::test]
    async fn test_abandoned_request_reports_cancelled() {
        let (resolver, mut requests) = ChannelResolver::new(4);

        let answer = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            resolver.resolve_save_path("a.txt"),
        )
        .await;
        assert!(answer.is_err());

        let request = requests.try_recv().unwrap();
        assert!(request.is_cancelled());
    }

    #[tokio::test]
    async fn test_pending_request_is_not_cancelled() {
        let (resolver, mut requests) = ChannelResolver::new(4);
        let pending = tokio::spawn(async move { resolver.resolve_save_path("a.txt").await });

        let request = requests.recv().await.unwrap();
        assert!(!request.is_cancelled());
        request.accept("/tmp/a.txt");
        assert_eq!(pending.await.unwrap(), Some(PathBuf::from("/tmp/a.txt")));
    }

    #[tokio::test]
    async fn test_directory_resolver_creates_dir() {
        let temp_dir = TempDir::new().unwrap();
        let downloads = temp_dir.path().join("downloads");
        let resolver = DirectoryResolver::new(&downloads);

        let path = resolver.resolve_save_path("report.pdf").await.unwrap();
        assert_eq!(path, downloads.join("report.pdf"));
        assert!(downloads.is_dir());
    }

    #[test]
    fn test_unique_path_avoids_existing_files() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        assert_eq!(unique_path(dir, "notes.txt"), dir.join("notes.txt"));

        std::fs::write(dir.join("notes.txt"), "x").unwrap();
        assert_eq!(unique_path(dir, "notes.txt"), dir.join("notes (1).txt"));

        std::fs::write(dir.join("notes (1).txt"), "x").unwrap();
        assert_eq!(unique_path(dir, "notes.txt"), dir.join("notes (2).txt"));
    }

    #[test]
    fn test_unique_path_without_extension() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();
        std::fs::write(dir.join("Makefile"), "x").unwrap();

        assert_eq!(unique_path(dir, "Makefile"), dir.join("Makefile (1)"));
    }
}

use std::path::{Path, PathBuf};
use tracing::warn;
use uuid::Uuid;

use crate::debounce::FlushMessage;
use crate::error::Result;

/// Local file outbox for flushes received from the expiry channel but not yet
/// confirmed on the bus. One JSON file per flush.
///
/// The expiry channel cannot be acknowledged, so this is what survives a crash
/// between "expiry received" and "flush enqueued".
#[derive(Debug, Clone)]
pub struct Outbox {
    dir: PathBuf,
}

impl Outbox {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Writes `message` under a fresh name. The rename makes the entry appear whole or not at all.
    pub async fn stage(&self, message: &FlushMessage) -> Result<PathBuf> {
        self.stage_with(message, |_| {}).await
    }

    /// Like [`stage`](Self::stage), calling `before_visible` with the final
    /// path before the entry can show up in [`pending`](Self::pending).
    pub async fn stage_with<F>(&self, message: &FlushMessage, before_visible: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path),
    {
        let id = Uuid::new_v4();
        let tmp = self.dir.join(format!("{}.tmp", id));
        let path = self.dir.join(format!("{}.json", id));

        tokio::fs::write(&tmp, serde_json::to_vec(message)?).await?;
        before_visible(&path);
        tokio::fs::rename(&tmp, &path).await?;

        Ok(path)
    }

    pub async fn contains(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    pub async fn clear(&self, path: &Path) -> Result<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Staged entries, oldest name first. Unreadable entries are discarded.
    pub async fn pending(&self) -> Result<Vec<(PathBuf, FlushMessage)>> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut pending = Vec::with_capacity(paths.len());
        for path in paths {
            let bytes = match tokio::fs::read(&path).await {
                Ok(bytes) => bytes,
                // Cleared by its owner after the directory listing.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            match serde_json::from_slice::<FlushMessage>(&bytes) {
                Ok(message) => pending.push((path, message)),
                Err(e) => {
                    warn!(path = %path.display(), "Discarding unreadable outbox entry: {}", e);
                    self.clear(&path).await?;
                }
            }
        }

        Ok(pending)
    }
}

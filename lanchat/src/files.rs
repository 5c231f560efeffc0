//! File-store collaborator for received attachments.
//!
//! The reconciler hands decoded attachment bytes to a [`FileStore`] and
//! records the returned path on the stored message.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::store::MessageKind;

/// Errors reported by a [`FileStore`].
#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    /// Text messages have no attachment to materialize.
    #[error("message kind {0:?} has no attachment")]
    NotAnAttachment(MessageKind),

    /// Writing the file failed.
    #[error("failed to write {path}: {source}")]
    Write {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
}

/// Persists attachment bytes and returns where they landed.
pub trait FileStore: Send + Sync {
    /// Writes `bytes` for an attachment of `kind`, using `suggested_name`
    /// as a hint for the file name.
    fn save(
        &self,
        kind: MessageKind,
        suggested_name: &str,
        bytes: &[u8],
    ) -> impl std::future::Future<Output = Result<PathBuf, FileStoreError>> + Send;
}

/// [`FileStore`] rooted at a directory.
///
/// Images go to `<root>/images/img_<millis>.jpg`; documents go to
/// `<root>/documents/<millis>_<name>` so same-named files never collide.
#[derive(Debug, Clone)]
pub struct DirFileStore {
    root: PathBuf,
}

impl DirFileStore {
    /// Creates a store rooted at `root`. Directories are created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path for the `attempt`-th try at saving; later attempts add a counter
    /// so an existing file is never replaced.
    fn target(
        &self,
        kind: MessageKind,
        suggested_name: &str,
        millis: i64,
        attempt: u32,
    ) -> Result<PathBuf, FileStoreError> {
        let stamp = if attempt == 0 {
            millis.to_string()
        } else {
            format!("{millis}_{attempt}")
        };
        match kind {
            MessageKind::Image => Ok(self.root.join("images").join(format!("img_{stamp}.jpg"))),
            MessageKind::Document => {
                // Only the final path component of a peer-supplied name is used.
                let name = Path::new(suggested_name)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("document");
                Ok(self.root.join("documents").join(format!("{stamp}_{name}")))
            }
            MessageKind::Text => Err(FileStoreError::NotAnAttachment(kind)),
        }
    }
}

impl FileStore for DirFileStore {
    async fn save(
        &self,
        kind: MessageKind,
        suggested_name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, FileStoreError> {
        let millis = chrono::Utc::now().timestamp_millis();
        let mut attempt = 0;
        let (path, mut file) = loop {
            let path = self.target(kind, suggested_name, millis, attempt)?;
            if let Some(dir) = path.parent() {
                tokio::fs::create_dir_all(dir)
                    .await
                    .map_err(|source| FileStoreError::Write {
                        path: dir.to_path_buf(),
                        source,
                    })?;
            }
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(source) => return Err(FileStoreError::Write { path, source }),
            }
        };
        let written = async {
            file.write_all(bytes).await?;
            file.flush().await
        };
        written.await.map_err(|source| FileStoreError::Write {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(path = %path.display(), size = bytes.len(), "attachment saved");
        Ok(path)
    }
}

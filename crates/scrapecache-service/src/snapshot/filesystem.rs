use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, DirBuilder, OpenOptions};
use tokio::io::AsyncWriteExt;

use super::StoreError;

/// A snapshot store keeping the snapshot in a single local file.
///
/// Writes go to a hidden sibling file first, which is then renamed over the destination. The
/// destination therefore always holds either the previous or the new complete snapshot, even
/// if the process dies in the middle of a write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesystemStore {
    path: PathBuf,
}

impl FilesystemStore {
    /// Creates a store for the snapshot file at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The destination file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The directory containing the destination file.
    pub fn parent_dir(&self) -> &Path {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }

    /// The temporary file written before it replaces the destination.
    ///
    /// This is `.<name>.tmp` next to the destination, so that the final rename never crosses
    /// filesystem boundaries.
    pub fn temp_path(&self) -> PathBuf {
        let mut name = OsString::from(".");
        name.push(self.path.file_name().unwrap_or_default());
        name.push(".tmp");
        self.parent_dir().join(name)
    }

    /// Reads the whole snapshot file, or `None` if it does not exist.
    pub async fn read(&self) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Atomically replaces the snapshot file with `content`.
    pub async fn write(&self, content: &[u8]) -> Result<(), StoreError> {
        let mut dir_builder = DirBuilder::new();
        dir_builder.recursive(true);
        #[cfg(unix)]
        dir_builder.mode(0o700);
        dir_builder.create(self.parent_dir()).await?;

        let temp_path = self.temp_path();
        let result = self.write_and_rename(&temp_path, content).await;
        if result.is_err() {
            // The destination is untouched, we only clean up our own leftovers.
            if let Err(err) = fs::remove_file(&temp_path).await {
                if err.kind() != io::ErrorKind::NotFound {
                    tracing::debug!(
                        path = %temp_path.display(),
                        error = &err as &dyn std::error::Error,
                        "Failed to remove temporary snapshot file"
                    );
                }
            }
        }
        result
    }

    async fn write_and_rename(&self, temp_path: &Path, content: &[u8]) -> Result<(), StoreError> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(temp_path).await?;
        file.write_all(content).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(temp_path, &self.path).await?;
        Ok(())
    }
}

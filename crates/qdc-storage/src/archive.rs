//! Content-addressed archive for downloaded report documents.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchivedDocument {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Files live at `<root>/<yyyymmdd>/<sha256>.<ext>`; identical bytes on the
/// same listing date are written once.
#[derive(Debug, Clone)]
pub struct DocumentArchive {
    root: PathBuf,
}

impl DocumentArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn content_hash(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    pub fn relative_path_for(listing_date: NaiveDate, content_hash: &str, extension: &str) -> PathBuf {
        let extension = extension.trim_start_matches('.');
        PathBuf::from(listing_date.format("%Y%m%d").to_string())
            .join(format!("{content_hash}.{extension}"))
    }

    pub async fn archive(
        &self,
        listing_date: NaiveDate,
        extension: &str,
        bytes: &[u8],
    ) -> Result<ArchivedDocument> {
        let content_hash = Self::content_hash(bytes);
        let relative_path = Self::relative_path_for(listing_date, &content_hash, extension);
        let absolute_path = self.root.join(&relative_path);
        let directory = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .with_context(|| format!("archive path {} has no parent", absolute_path.display()))?;

        fs::create_dir_all(&directory)
            .await
            .with_context(|| format!("creating archive directory {}", directory.display()))?;

        let mut archived = ArchivedDocument {
            content_hash,
            relative_path,
            absolute_path,
            byte_size: bytes.len(),
            deduplicated: true,
        };

        if fs::try_exists(&archived.absolute_path)
            .await
            .with_context(|| format!("checking {}", archived.absolute_path.display()))?
        {
            return Ok(archived);
        }

        archived.deduplicated = !write_atomically(&directory, &archived.absolute_path, bytes).await?;
        Ok(archived)
    }
}

/// Writes through a temp file and renames into place. Returns `false` when a
/// concurrent writer got there first.
async fn write_atomically(directory: &Path, target: &Path, bytes: &[u8]) -> Result<bool> {
    let temp_path = directory.join(format!(".{}.partial", Uuid::new_v4()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening {}", temp_path.display()))?;
    file.write_all(bytes)
        .await
        .with_context(|| format!("writing {}", temp_path.display()))?;
    file.flush()
        .await
        .with_context(|| format!("flushing {}", temp_path.display()))?;
    drop(file);

    if fs::try_exists(target).await.unwrap_or(false) {
        let _ = fs::remove_file(&temp_path).await;
        return Ok(false);
    }

    match fs::rename(&temp_path, target).await {
        Ok(()) => Ok(true),
        Err(err) => {
            let _ = fs::remove_file(&temp_path).await;
            Err(err).with_context(|| format!("moving archive file into {}", target.display()))
        }
    }
}

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::types::UserId;

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("blob not found")]
    NotFound,
    #[error("invalid blob locator")]
    InvalidLocator,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BlobError {
    fn from_io(e: std::io::Error) -> Self {
        if e.kind() == ErrorKind::NotFound {
            Self::NotFound
        } else {
            Self::Io(e)
        }
    }
}

impl From<BlobError> for crate::error::Error {
    fn from(e: BlobError) -> Self {
        match e {
            BlobError::NotFound => Self::NotFound,
            BlobError::InvalidLocator => Self::validation("invalid blob locator"),
            BlobError::Io(e) => Self::Io(e),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    /// `<owner>/<sha256>`, relative to the blob root.
    pub locator: String,
    pub size: i64,
}

/// Content-addressed file storage, partitioned by owner.
///
/// Identical uploads share one blob, so callers that add or drop a file row
/// pointing at a blob hold [`BlobStore::lock_refs`] across the blob write or
/// delete and the row change.
pub struct BlobStore {
    base_path: PathBuf,
    refs: Mutex<()>,
}

impl BlobStore {
    pub fn new(blob_dir: &Path) -> Self {
        Self {
            base_path: blob_dir.to_path_buf(),
            refs: Mutex::new(()),
        }
    }

    pub async fn lock_refs(&self) -> MutexGuard<'_, ()> {
        self.refs.lock().await
    }

    fn blob_path(&self, locator: &str) -> Result<PathBuf, BlobError> {
        let (owner, oid) = parse_locator(locator)?;
        Ok(self
            .base_path
            .join(owner.to_string())
            .join(&oid[0..2])
            .join(&oid[2..4])
            .join(oid))
    }

    fn temp_path(&self, owner: UserId) -> PathBuf {
        self.base_path
            .join(owner.to_string())
            .join("tmp")
            .join(Uuid::new_v4().to_string())
    }

    /// Writes `data` and returns its locator. Identical content from one
    /// owner lands on the same blob.
    pub async fn put(&self, owner: UserId, data: &[u8]) -> Result<StoredBlob, BlobError> {
        let oid = hex::encode(Sha256::digest(data));
        let locator = format!("{owner}/{oid}");
        let final_path = self.blob_path(&locator)?;

        let temp_path = self.temp_path(owner);
        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut temp_file = File::create(&temp_path).await?;
        temp_file.write_all(data).await?;
        temp_file.sync_all().await?;

        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::rename(&temp_path, &final_path).await?;

        Ok(StoredBlob {
            locator,
            size: data.len() as i64,
        })
    }

    pub async fn open(&self, locator: &str) -> Result<(BufReader<File>, i64), BlobError> {
        let path = self.blob_path(locator)?;
        let file = File::open(&path).await.map_err(BlobError::from_io)?;

        let metadata = file.metadata().await?;
        let size = metadata.len() as i64;

        Ok((BufReader::new(file), size))
    }

    /// Reads at most `limit` bytes. The flag is set when the blob is longer.
    pub async fn read_prefix(&self, locator: &str, limit: usize) -> Result<(Vec<u8>, bool), BlobError> {
        let (reader, size) = self.open(locator).await?;

        let mut buf = Vec::with_capacity(limit.min(size.max(0) as usize));
        reader.take(limit as u64).read_to_end(&mut buf).await?;

        Ok((buf, size > limit as i64))
    }

    pub async fn delete(&self, locator: &str) -> Result<bool, BlobError> {
        let path = self.blob_path(locator)?;

        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(BlobError::Io(e)),
        }
    }
}

fn parse_locator(locator: &str) -> Result<(UserId, &str), BlobError> {
    let (owner, oid) = locator.split_once('/').ok_or(BlobError::InvalidLocator)?;
    let owner: UserId = owner.parse().map_err(|_| BlobError::InvalidLocator)?;

    if owner <= 0 || oid.len() != 64 {
        return Err(BlobError::InvalidLocator);
    }

    if !oid
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_uppercase())
    {
        return Err(BlobError::InvalidLocator);
    }

    Ok((owner, oid))
}

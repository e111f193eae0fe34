//! Single-pass digest computation
//!
//! The artifact is read once; every chunk is fed to both the MD5 and the
//! SHA-256 accumulator before the next read.

use crate::core::error::{PublishError, Result};
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt};

const READ_CHUNK: usize = 64 * 1024;

/// Content digests of an artifact, lowercase hex
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactDigests {
    pub md5: String,
    pub sha256: String,
}

/// The local file being published. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    path: PathBuf,
    size: u64,
    digests: ArtifactDigests,
}

impl ArtifactDescriptor {
    /// Describe `path` with digests computed by the caller.
    ///
    /// Only the size is read from the file system.
    pub async fn with_digests(path: impl AsRef<Path>, digests: ArtifactDigests) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|source| PublishError::Io {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            size: metadata.len(),
            digests: ArtifactDigests {
                md5: digests.md5.to_ascii_lowercase(),
                sha256: digests.sha256.to_ascii_lowercase(),
            },
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn digests(&self) -> &ArtifactDigests {
        &self.digests
    }
}

pub struct ChecksumComputer;

impl ChecksumComputer {
    /// Read the file at `path` to the end and describe it
    pub async fn compute(path: impl AsRef<Path>) -> Result<ArtifactDescriptor> {
        let path = path.as_ref().to_path_buf();
        let io_error = |source| PublishError::Io {
            path: path.clone(),
            source,
        };

        let file = tokio::fs::File::open(&path).await.map_err(io_error)?;
        let (size, digests) = Self::compute_reader(file).await.map_err(io_error)?;

        tracing::debug!(
            path = %path.display(),
            size,
            md5 = %digests.md5,
            sha256 = %digests.sha256,
            "computed artifact digests"
        );

        Ok(ArtifactDescriptor {
            path,
            size,
            digests,
        })
    }

    /// Digest an arbitrary byte stream, returning the byte count and digests
    pub async fn compute_reader<R>(mut reader: R) -> std::io::Result<(u64, ArtifactDigests)>
    where
        R: AsyncRead + Unpin,
    {
        let mut md5 = Md5::new();
        let mut sha256 = Sha256::new();
        let mut buffer = vec![0u8; READ_CHUNK];
        let mut size: u64 = 0;

        loop {
            let read = reader.read(&mut buffer).await?;
            if read == 0 {
                break;
            }
            let chunk = &buffer[..read];
            md5.update(chunk);
            sha256.update(chunk);
            size += read as u64;
        }

        Ok((
            size,
            ArtifactDigests {
                md5: hex::encode(md5.finalize()),
                sha256: hex::encode(sha256.finalize()),
            },
        ))
    }

    /// MD5 of `length` bytes starting at `offset`, used as a segment etag
    pub async fn md5_range(path: &Path, offset: u64, length: u64) -> Result<String> {
        use tokio::io::AsyncSeekExt;

        let io_error = |source| PublishError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::open(path).await.map_err(io_error)?;
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(io_error)?;

        let mut reader = file.take(length);
        let mut md5 = Md5::new();
        let mut buffer = vec![0u8; READ_CHUNK];
        loop {
            let read = reader.read(&mut buffer).await.map_err(io_error)?;
            if read == 0 {
                break;
            }
            md5.update(&buffer[..read]);
        }

        Ok(hex::encode(md5.finalize()))
    }
}

//! Streamed bundle upload with simultaneous hashing and size accounting

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
};
use types::{BundleError, Result};

/// Default chunk size for reader-backed producers (64 KiB).
pub const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Result of a finished upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Hex-encoded SHA-256 of everything written
    pub hash: String,
    /// Number of bytes written
    pub size: u64,
}

/// Destination for upload chunks
///
/// Each chunk is written to the artifact file, fed to the digest and counted,
/// in that order, before `write` returns.
pub struct UploadSink {
    file: File,
    path: PathBuf,
    hasher: Sha256,
    size: u64,
}

impl UploadSink {
    /// Open `path` for writing, truncating previous content
    pub(crate) async fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .await
            .map_err(|e| BundleError::storage(path, e))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
            hasher: Sha256::new(),
            size: 0,
        })
    }

    /// Append one chunk
    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.file
            .write_all(chunk)
            .await
            .map_err(|e| BundleError::storage(&self.path, e))?;
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
        Ok(())
    }

    /// Bytes accepted so far
    pub fn bytes_written(&self) -> u64 {
        self.size
    }

    /// Flush and close the file, then finalize the digest
    pub(crate) async fn finish(self) -> Result<UploadReceipt> {
        let UploadSink {
            mut file,
            path,
            hasher,
            size,
        } = self;

        file.flush().await.map_err(|e| BundleError::storage(&path, e))?;
        file.sync_all().await.map_err(|e| BundleError::storage(&path, e))?;
        drop(file);

        Ok(UploadReceipt {
            hash: hex::encode(hasher.finalize()),
            size,
        })
    }
}

/// Caller-supplied source of upload content
///
/// `produce` is called exactly once and should push every chunk, in order,
/// to the sink before returning. Returning an error aborts the upload.
#[async_trait]
pub trait BundleProducer: Send {
    async fn produce(&mut self, sink: &mut UploadSink) -> Result<()>;
}

/// Producer over chunks already held in memory
#[derive(Debug, Clone, Default)]
pub struct ChunkProducer {
    chunks: Vec<Vec<u8>>,
}

impl ChunkProducer {
    pub fn new<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Vec<u8>>,
    {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl BundleProducer for ChunkProducer {
    async fn produce(&mut self, sink: &mut UploadSink) -> Result<()> {
        for chunk in self.chunks.drain(..) {
            sink.write(&chunk).await?;
        }
        Ok(())
    }
}

/// Producer streaming fixed-size reads from an async reader
#[derive(Debug)]
pub struct ReaderProducer<R> {
    reader: R,
    chunk_size: usize,
}

impl<R> ReaderProducer<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self::with_chunk_size(reader, STREAM_CHUNK_SIZE)
    }

    pub fn with_chunk_size(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            chunk_size: chunk_size.max(1),
        }
    }
}

#[async_trait]
impl<R> BundleProducer for ReaderProducer<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn produce(&mut self, sink: &mut UploadSink) -> Result<()> {
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = self
                .reader
                .read(&mut buf)
                .await
                .map_err(|e| BundleError::Producer(e.to_string()))?;
            if n == 0 {
                break;
            }
            sink.write(&buf[..n]).await?;
        }
        Ok(())
    }
}

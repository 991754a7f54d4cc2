//! Append-side WAL writer.
//!
//! Lays down `[header || payload]` records in the wire format the reader
//! validates: size and xxhash-32 checksum in the header, payload bytes
//! following. The writer tracks its own byte offset; callers feed the
//! returned delta to
//! [`WalPageCache::update_file_size_by`](crate::WalPageCache::update_file_size_by)
//! when reader and writer share a file.

use std::{fs::File, path::Path, sync::Arc};

use bytes::BytesMut;
use courier_proto::{Letter, LetterHeader};

use crate::errors::WalError;

/// Sequential record appender.
#[derive(Debug)]
pub struct WalWriter {
    file: Arc<File>,
    offset: u64,
}

impl WalWriter {
    /// Create (or truncate) the log file at `path`.
    ///
    /// # Errors
    ///
    /// I/O errors creating the file.
    pub async fn create(path: impl AsRef<Path>) -> Result<Self, WalError> {
        let path = path.as_ref().to_owned();
        let file = tokio::task::spawn_blocking(move || File::create(&path))
            .await
            .map_err(|e| WalError::Io(std::io::Error::other(e)))??;
        Ok(Self { file: Arc::new(file), offset: 0 })
    }

    /// Bytes written so far.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Append one record; returns the byte delta it added to the file.
    ///
    /// # Errors
    ///
    /// - `InvalidInput` for an empty payload or one over the wire ceiling
    /// - I/O errors from the write
    pub async fn append(&mut self, payload: &[u8]) -> Result<u64, WalError> {
        if payload.len() as u64 > u64::from(LetterHeader::DEFAULT_MAX_PAYLOAD) {
            return Err(WalError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "record exceeds maximum payload size",
            )));
        }

        let mut letter = Letter::new(BytesMut::from(payload));
        let mut wire = Vec::with_capacity(letter.wire_size());
        letter
            .encode(&mut wire)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

        let file = Arc::clone(&self.file);
        let offset = self.offset;
        let len = wire.len() as u64;
        tokio::task::spawn_blocking(move || write_all_at(&file, &wire, offset))
            .await
            .map_err(|e| WalError::Io(std::io::Error::other(e)))??;

        self.offset += len;
        Ok(len)
    }

    /// Flush file contents and metadata to stable storage.
    ///
    /// # Errors
    ///
    /// I/O errors from `fsync`.
    pub async fn sync(&self) -> Result<(), WalError> {
        let file = Arc::clone(&self.file);
        tokio::task::spawn_blocking(move || file.sync_all())
            .await
            .map_err(|e| WalError::Io(std::io::Error::other(e)))??;
        Ok(())
    }
}

#[cfg(unix)]
fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(not(unix))]
fn write_all_at(mut file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::io::{Seek, SeekFrom, Write};
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(buf)
}

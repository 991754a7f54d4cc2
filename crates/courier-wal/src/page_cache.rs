//! DMA-aligned page cache over a WAL file.
//!
//! A page index `p` maps to file offset `p * alignment`. Fetches are aligned
//! reads of exactly one page; direct I/O is attempted on Linux (with a
//! buffered fallback for filesystems that refuse `O_DIRECT`), and the buffer
//! handed to the kernel is aligned either way. Records are *not* aligned:
//! [`WalPageCache::read_exactly`] stitches reads that straddle page
//! boundaries.

use std::{
    fs::File,
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use bytes::{Bytes, BytesMut};
use courier_proto::{LetterHeader, payload_checksum};
use tokio::sync::Mutex;

use crate::{clock_pro::ClockProCache, errors::WalError};

/// Block size at which the file supports direct I/O.
pub const DEFAULT_DMA_ALIGNMENT: u64 = 4096;

const HEADER_SIZE: u64 = LetterHeader::SIZE as u64;

/// Cache observability counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Page lookups served from memory.
    pub hits: AtomicU64,
    /// Page lookups that had to touch the disk.
    pub misses: AtomicU64,
    /// Aligned reads issued; one per miss.
    pub dma_reads: AtomicU64,
}

/// A framed-record read: start offset and the reply size ceiling.
#[derive(Debug, Clone, Copy)]
pub struct ReadRequest {
    /// Byte offset of the first record header.
    pub offset: u64,
    /// Stop once the reply's total bytes reach this.
    pub max_size: u64,
}

/// One `[header || payload]` record read back from the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalRecord {
    /// Record header.
    pub header: LetterHeader,
    /// Verified payload bytes.
    pub payload: Bytes,
}

/// Records accumulated by [`WalPageCache::read`].
#[derive(Debug, Default)]
pub struct ReadReply {
    /// Records in log order.
    pub records: Vec<WalRecord>,
}

impl ReadReply {
    /// Total bytes these records occupy on disk.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.records
            .iter()
            .map(|r| HEADER_SIZE + r.payload.len() as u64)
            .sum()
    }

    /// No records were read.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// CLOCK-Pro page cache over one WAL file.
#[derive(Debug)]
pub struct WalPageCache {
    file: Arc<File>,
    alignment: u64,
    file_size: AtomicU64,
    max_resident: u64,
    cache: Mutex<ClockProCache<Bytes>>,
    stats: CacheStats,
}

impl WalPageCache {
    /// Open `path` for cached reads.
    ///
    /// `max_pages_in_memory` bounds residency; zero lets the implementation
    /// choose (10% of the file, at least 10 pages).
    ///
    /// # Errors
    ///
    /// I/O errors opening or statting the file.
    pub async fn open(
        path: impl AsRef<Path>,
        max_pages_in_memory: u32,
    ) -> Result<Self, WalError> {
        let path = path.as_ref().to_owned();
        let (file, file_size) = tokio::task::spawn_blocking(
            move || -> std::io::Result<(File, u64)> {
                let file = open_direct(&path)?;
                let size = file.metadata()?.len();
                Ok((file, size))
            },
        )
        .await
        .map_err(|e| WalError::Io(std::io::Error::other(e)))??;

        let alignment = DEFAULT_DMA_ALIGNMENT;
        let total_pages = file_size.div_ceil(alignment);
        let max_resident = if max_pages_in_memory == 0 {
            (total_pages / 10).max(10)
        } else {
            u64::from(max_pages_in_memory)
        };

        tracing::debug!(file_size, total_pages, max_resident, "WAL page cache opened");
        Ok(Self {
            file: Arc::new(file),
            alignment,
            file_size: AtomicU64::new(file_size),
            max_resident,
            cache: Mutex::new(ClockProCache::new(max_resident.max(1) as usize)),
            stats: CacheStats::default(),
        })
    }

    /// The file's DMA alignment.
    #[must_use]
    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Tracked file size in bytes.
    #[must_use]
    pub fn file_size(&self) -> u64 {
        self.file_size.load(Ordering::Acquire)
    }

    /// Total pages the file currently spans.
    #[must_use]
    pub fn number_of_pages(&self) -> u64 {
        self.file_size().div_ceil(self.alignment)
    }

    /// Observability counters.
    #[must_use]
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Currently resident pages.
    pub async fn resident_pages(&self) -> usize {
        self.cache.lock().await.resident()
    }

    /// Grow the tracked file size after the writer appended `delta` bytes.
    ///
    /// The previous tail page, if partial, is dropped from the cache so the
    /// next read refetches the grown page instead of serving stale bytes.
    pub async fn update_file_size_by(&self, delta: u64) {
        let old = self.file_size.fetch_add(delta, Ordering::AcqRel);
        if old % self.alignment != 0 {
            self.cache.lock().await.invalidate(old / self.alignment);
        }
    }

    /// Residency bound: `min(configured_max, total_pages_in_file)`.
    fn k(&self) -> u64 {
        self.max_resident.min(self.number_of_pages()).max(1)
    }

    /// Get a page through the cache, fetching and admitting on a miss.
    ///
    /// Pages are admitted without eviction while residency is below the
    /// bound (warmup pre-fill); at the bound, the cold hand, the hot hand,
    /// and `fix_hands` run before the fetch. Admission always succeeds after
    /// the hands.
    async fn page(&self, page: u64) -> Result<Bytes, WalError> {
        let mut cache = self.cache.lock().await;
        if let Some(data) = cache.get(page) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(data.clone());
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);

        if (cache.resident() as u64) >= self.k() {
            cache.run_cold_hand();
            cache.run_hot_hand();
            cache.fix_hands();
        }

        let data = self.fetch_page(page).await?;
        cache.insert(page, data.clone());
        Ok(data)
    }

    /// Issue exactly one aligned read for `page`.
    async fn fetch_page(&self, page: u64) -> Result<Bytes, WalError> {
        self.stats.dma_reads.fetch_add(1, Ordering::Relaxed);
        let file = Arc::clone(&self.file);
        let alignment = self.alignment;
        let data = tokio::task::spawn_blocking(move || read_page(&file, page, alignment))
            .await
            .map_err(|e| WalError::Io(std::io::Error::other(e)))??;
        debug_assert!(data.len() as u64 <= alignment, "read more than one page");
        Ok(data)
    }

    /// Read `size` bytes starting at `offset`, stitching straddled pages
    /// into one buffer.
    ///
    /// # Errors
    ///
    /// - [`WalError::OutOfRange`] if the request spans more pages than the
    ///   file holds
    /// - [`WalError::ShortPage`] if a resident page is shorter than the copy
    ///   requires
    pub async fn read_exactly(&self, offset: u64, size: u64) -> Result<Bytes, WalError> {
        if size.div_ceil(self.alignment) > self.number_of_pages() {
            return Err(WalError::OutOfRange { offset, size, file_size: self.file_size() });
        }

        let mut out = BytesMut::with_capacity(size as usize);
        let mut pos = offset;
        let mut remaining = size;
        while remaining > 0 {
            let page = pos / self.alignment;
            let data = self.page(page).await?;
            let buffer_offset = (pos % self.alignment) as usize;
            if buffer_offset >= data.len() {
                return Err(WalError::ShortPage {
                    page,
                    have: data.len() as u64,
                    need: buffer_offset as u64 + 1,
                });
            }
            let step = ((data.len() - buffer_offset) as u64).min(remaining);
            out.extend_from_slice(&data[buffer_offset..buffer_offset + step as usize]);
            pos += step;
            remaining -= step;
        }
        Ok(out.freeze())
    }

    /// Read framed `[header || payload]` records starting at
    /// `request.offset`.
    ///
    /// Every record is validated (`checksum != 0`, `size != 0`,
    /// `size <= file_size`, payload hash matches) and appended to the reply;
    /// the loop stops at end of file or once the reply's total bytes reach
    /// `request.max_size`.
    ///
    /// # Errors
    ///
    /// - [`WalError::OutOfRange`] if the start offset is past the file
    /// - [`WalError::CorruptRecord`] / [`WalError::ChecksumMismatch`] on a
    ///   record that fails validation
    pub async fn read(&self, request: ReadRequest) -> Result<ReadReply, WalError> {
        let file_size = self.file_size();
        if request.offset > file_size {
            return Err(WalError::OutOfRange {
                offset: request.offset,
                size: 0,
                file_size,
            });
        }

        let mut reply = ReadReply::default();
        let mut next_offset = request.offset;
        while reply.size() < request.max_size {
            if next_offset + HEADER_SIZE > file_size {
                break;
            }
            let header_bytes = self.read_exactly(next_offset, HEADER_SIZE).await?;
            let header = *LetterHeader::from_bytes(&header_bytes)
                .map_err(|_| WalError::CorruptRecord { offset: next_offset })?;

            if header.checksum() == 0
                || header.size() == 0
                || u64::from(header.size()) > file_size
            {
                return Err(WalError::CorruptRecord { offset: next_offset });
            }

            let payload = self
                .read_exactly(next_offset + HEADER_SIZE, u64::from(header.size()))
                .await?;
            let actual = payload_checksum(&payload);
            if actual != header.checksum() {
                return Err(WalError::ChecksumMismatch {
                    offset: next_offset,
                    expected: header.checksum(),
                    actual,
                });
            }

            next_offset += HEADER_SIZE + u64::from(header.size());
            reply.records.push(WalRecord { header, payload });
        }
        Ok(reply)
    }
}

/// Open with `O_DIRECT` where the platform and filesystem allow, falling
/// back to buffered reads (alignment semantics are preserved either way).
fn open_direct(path: &Path) -> std::io::Result<File> {
    #[cfg(target_os = "linux")]
    {
        use std::os::unix::fs::OpenOptionsExt;
        match std::fs::OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECT)
            .open(path)
        {
            Ok(file) => return Ok(file),
            Err(e) => {
                tracing::debug!(error = %e, "O_DIRECT unavailable, using buffered reads");
            },
        }
    }
    std::fs::OpenOptions::new().read(true).open(path)
}

/// Blocking aligned read of one page. Returns however many bytes the file
/// holds for that page (short at the tail).
fn read_page(file: &File, page: u64, alignment: u64) -> std::io::Result<Bytes> {
    let offset = page * alignment;
    let len = alignment as usize;

    // Alignment slack so the kernel sees an aligned buffer under O_DIRECT.
    let mut raw = vec![0u8; len * 2];
    let start = raw.as_ptr().align_offset(len);

    let mut filled = 0usize;
    while filled < len {
        let dst = &mut raw[start + filled..start + len];
        let wanted = dst.len();
        let n = read_at(file, dst, offset + filled as u64)?;
        filled += n;
        // A short read means EOF on a regular file; a follow-up read from a
        // now-unaligned buffer position would violate O_DIRECT.
        if n < wanted {
            break;
        }
    }
    Ok(Bytes::copy_from_slice(&raw[start..start + filled]))
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(not(unix))]
fn read_at(mut file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<usize> {
    use std::io::{Read, Seek, SeekFrom};
    file.seek(SeekFrom::Start(offset))?;
    file.read(buf)
}

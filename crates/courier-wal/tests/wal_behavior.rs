//! Page cache and record reader behavior over real files.

use std::sync::atomic::Ordering;

use courier_wal::{ReadRequest, WalError, WalPageCache, WalWriter};

const ALIGN: u64 = 4096;

fn patterned(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn cache_over(bytes: &[u8], max_pages: u32) -> (tempfile::TempDir, WalPageCache) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wal.log");
    std::fs::write(&path, bytes).expect("write fixture");
    let cache = WalPageCache::open(&path, max_pages).await.expect("open");
    (dir, cache)
}

#[tokio::test]
async fn straddle_read_spans_two_pages_then_hits() {
    // 8200 bytes: two full-ish pages at alignment 4096.
    let content = patterned(8200);
    let (_dir, cache) = cache_over(&content, 8).await;
    assert_eq!(cache.alignment(), ALIGN);
    assert_eq!(cache.number_of_pages(), 3);

    let got = cache.read_exactly(4090, 20).await.expect("straddle read");
    assert_eq!(&got[..], &content[4090..4110]);

    // Both touched pages are resident; each miss issued one aligned read.
    assert_eq!(cache.resident_pages().await, 2);
    assert_eq!(cache.stats().dma_reads.load(Ordering::Relaxed), 2);

    // An identical read is served without I/O.
    let again = cache.read_exactly(4090, 20).await.expect("hit");
    assert_eq!(&again[..], &content[4090..4110]);
    assert_eq!(cache.stats().dma_reads.load(Ordering::Relaxed), 2);
    assert_eq!(cache.stats().hits.load(Ordering::Relaxed), 2);
}

#[tokio::test]
async fn resident_pages_never_exceed_the_bound() {
    // Ten pages of data, three resident slots.
    let content = patterned(10 * ALIGN as usize);
    let (_dir, cache) = cache_over(&content, 3).await;

    for page in 0..10u64 {
        let offset = page * ALIGN;
        let got = cache.read_exactly(offset, 64).await.expect("read");
        assert_eq!(&got[..], &content[offset as usize..offset as usize + 64]);
        assert!(cache.resident_pages().await <= 3, "resident exceeded bound");
    }

    // Every page was a miss exactly once.
    assert_eq!(cache.stats().misses.load(Ordering::Relaxed), 10);
    assert_eq!(cache.stats().dma_reads.load(Ordering::Relaxed), 10);
}

#[tokio::test]
async fn oversized_request_is_out_of_range() {
    let content = patterned(2 * ALIGN as usize);
    let (_dir, cache) = cache_over(&content, 4).await;

    let result = cache.read_exactly(0, 3 * ALIGN).await;
    assert!(matches!(result, Err(WalError::OutOfRange { .. })));
}

#[tokio::test]
async fn framed_records_round_trip() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wal.log");

    let mut writer = WalWriter::create(&path).await.expect("create");
    let payloads: [&[u8]; 3] = [b"alpha", b"bravo-bravo", b"charlie"];
    for payload in payloads {
        writer.append(payload).await.expect("append");
    }
    writer.sync().await.expect("sync");

    let cache = WalPageCache::open(&path, 8).await.expect("open");
    let reply = cache
        .read(ReadRequest { offset: 0, max_size: u64::MAX })
        .await
        .expect("read records");

    assert_eq!(reply.records.len(), 3);
    for (record, payload) in reply.records.iter().zip(payloads) {
        assert_eq!(&record.payload[..], payload);
        assert_eq!(record.header.size() as usize, payload.len());
    }
    assert_eq!(reply.size(), writer.offset());
}

#[tokio::test]
async fn read_stops_at_max_size() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wal.log");

    let mut writer = WalWriter::create(&path).await.expect("create");
    let first = writer.append(b"first record").await.expect("append");
    writer.append(b"second record").await.expect("append");
    writer.sync().await.expect("sync");

    let cache = WalPageCache::open(&path, 8).await.expect("open");
    let reply = cache
        .read(ReadRequest { offset: 0, max_size: first })
        .await
        .expect("read records");

    assert_eq!(reply.records.len(), 1);
    assert_eq!(&reply.records[0].payload[..], b"first record");
}

#[tokio::test]
async fn zeroed_header_is_corrupt() {
    let (_dir, cache) = cache_over(&[0u8; 64], 4).await;

    let result = cache.read(ReadRequest { offset: 0, max_size: u64::MAX }).await;
    assert!(matches!(result, Err(WalError::CorruptRecord { offset: 0 })));
}

#[tokio::test]
async fn flipped_payload_byte_fails_the_checksum() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wal.log");

    let mut writer = WalWriter::create(&path).await.expect("create");
    writer.append(b"stable bytes").await.expect("append");
    writer.sync().await.expect("sync");

    // Corrupt one payload byte on disk.
    let mut raw = std::fs::read(&path).expect("read back");
    let last = raw.len() - 1;
    raw[last] ^= 0xFF;
    std::fs::write(&path, &raw).expect("rewrite");

    let cache = WalPageCache::open(&path, 4).await.expect("open");
    let result = cache.read(ReadRequest { offset: 0, max_size: u64::MAX }).await;
    assert!(matches!(result, Err(WalError::ChecksumMismatch { offset: 0, .. })));
}

#[tokio::test]
async fn appends_become_visible_after_size_update() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("wal.log");

    let mut writer = WalWriter::create(&path).await.expect("create");
    writer.append(b"first").await.expect("append");
    writer.sync().await.expect("sync");

    let cache = WalPageCache::open(&path, 4).await.expect("open");
    let reply = cache
        .read(ReadRequest { offset: 0, max_size: u64::MAX })
        .await
        .expect("read");
    assert_eq!(reply.records.len(), 1);

    // Writer appends; the cache learns about it via the size delta and
    // drops its stale tail page.
    let delta = writer.append(b"second").await.expect("append");
    writer.sync().await.expect("sync");
    cache.update_file_size_by(delta).await;

    let reply = cache
        .read(ReadRequest { offset: 0, max_size: u64::MAX })
        .await
        .expect("read after append");
    assert_eq!(reply.records.len(), 2);
    assert_eq!(&reply.records[1].payload[..], b"second");
}

#[tokio::test]
async fn read_past_the_end_is_out_of_range() {
    let (_dir, cache) = cache_over(&patterned(100), 4).await;

    let result = cache
        .read(ReadRequest { offset: 10_000, max_size: u64::MAX })
        .await;
    assert!(matches!(result, Err(WalError::OutOfRange { .. })));
}

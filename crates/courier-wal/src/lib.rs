//! Page-cached write-ahead log reader.
//!
//! A WAL file is a sequence of `[header || payload]` records in the Courier
//! wire format, laid down by [`WalWriter`]. Reads go through
//! [`WalPageCache`]: a bounded set of DMA-aligned file pages governed by the
//! CLOCK-Pro replacement policy, so a hit never touches the disk and a miss
//! issues exactly one aligned read.

mod clock_pro;
mod errors;
mod page_cache;
mod writer;

pub use clock_pro::ClockProCache;
pub use errors::WalError;
pub use page_cache::{
    CacheStats, DEFAULT_DMA_ALIGNMENT, ReadRequest, ReadReply, WalPageCache, WalRecord,
};
pub use writer::WalWriter;

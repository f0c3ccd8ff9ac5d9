/// Byte size at which a table's buffered rows are flushed as one INSERT (800 KiB)
pub const BATCH_THRESHOLD_BYTES: usize = 800 * 1024;

/// Progress update interval (tick every N pages)
pub const PROGRESS_INTERVAL: u64 = 1000;

/// Read buffer placed in front of the (possibly decompressed) dump
pub const READ_BUFFER_CAPACITY: usize = 1024 * 1024;

/// Write buffer placed in front of the SQL sink
pub const WRITE_BUFFER_CAPACITY: usize = 256 * 1024;

/// Run-time knobs for a conversion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvertOptions {
    /// Per-table flush threshold in bytes of buffered row literals.
    pub batch_bytes: usize,
    /// When set, emit `COMMIT;` / `BEGIN;` once this many bytes were written
    /// since the last `BEGIN;`. `None` keeps the whole dump in one transaction.
    pub commit_every: Option<u64>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            batch_bytes: BATCH_THRESHOLD_BYTES,
            commit_every: None,
        }
    }
}

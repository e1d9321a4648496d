//! Default thresholds and timings for the file engine.
//!
//! # Design
//! - Centralise policy constants so the model, loader, and tests agree.
//! - Sizes are bytes, durations are milliseconds.

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

/// Files below this size load synchronously on the calling thread.
pub const SYNC_THRESHOLD_BYTES: u64 = 64 * KIB;
/// Files at or above this size load through the streaming path.
pub const STREAMING_THRESHOLD_BYTES: u64 = 512 * KIB;
/// Encoded payloads above this size are written in a chunk loop.
pub const CHUNKED_WRITE_THRESHOLD_BYTES: u64 = 512 * KIB;
/// Chunk size used by the chunked write loop.
pub const WRITE_CHUNK_BYTES: usize = 64 * 1024;

/// Smallest streaming read chunk.
pub const MIN_CHUNK_BYTES: usize = 16 * 1024;
/// Streaming read chunk for medium files.
pub const DEFAULT_CHUNK_BYTES: usize = 64 * 1024;
/// Largest streaming read chunk.
pub const MAX_CHUNK_BYTES: usize = 256 * 1024;
/// Files at or above this size use the medium chunk.
pub const MEDIUM_FILE_BYTES: u64 = MIB;
/// Files at or above this size use the maximum chunk.
pub const LARGE_FILE_BYTES: u64 = 10 * MIB;

/// Pause between chunks so one operation does not monopolise the runtime.
pub const CHUNK_PAUSE_MS: u64 = 1;
/// How long shutdown waits for active operations before forcing them.
pub const DRAIN_TIMEOUT_MS: u64 = 3_000;
/// How long forced cancellation waits before aborting tasks outright.
pub const FORCE_GRACE_MS: u64 = 1_000;
/// Capacity of the dispatcher request queue.
pub const QUEUE_CAPACITY: usize = 64;

/// WHATWG label of the legacy fallback encoding.
pub const LEGACY_ENCODING: &str = "shift_jis";
/// Whether saved files start with a UTF-8 byte-order mark.
pub const WRITE_BOM: bool = true;

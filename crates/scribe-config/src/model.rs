//! Typed configuration model for the file engine.
//!
//! # Design
//! - Pure data carriers; loading lives in `loader.rs`, checks in `validate.rs`.
//! - Every field has a default so partial documents are accepted.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Chunk-size bands used when streaming large files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ChunkSettings {
    /// Chunk used for files below `medium_from_bytes`.
    pub min_bytes: usize,
    /// Chunk used for files below `large_from_bytes`.
    pub default_bytes: usize,
    /// Chunk used for everything larger.
    pub max_bytes: usize,
    /// First file size that gets the default chunk.
    pub medium_from_bytes: u64,
    /// First file size that gets the maximum chunk.
    pub large_from_bytes: u64,
}

impl Default for ChunkSettings {
    fn default() -> Self {
        Self {
            min_bytes: defaults::MIN_CHUNK_BYTES,
            default_bytes: defaults::DEFAULT_CHUNK_BYTES,
            max_bytes: defaults::MAX_CHUNK_BYTES,
            medium_from_bytes: defaults::MEDIUM_FILE_BYTES,
            large_from_bytes: defaults::LARGE_FILE_BYTES,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Files below this size load synchronously on the calling thread.
    pub sync_threshold_bytes: u64,
    /// Files at or above this size load through the streaming path.
    pub streaming_threshold_bytes: u64,
    /// Encoded payloads above this size are written in a chunk loop.
    pub chunked_write_threshold_bytes: u64,
    /// Chunk size for the chunked write loop.
    pub write_chunk_bytes: usize,
    /// Streaming read chunk bands.
    pub chunks: ChunkSettings,
    /// Pause between chunks, in milliseconds (zero yields instead of sleeping).
    pub chunk_pause_ms: u64,
    /// Shutdown drain budget, in milliseconds.
    pub drain_timeout_ms: u64,
    /// Grace period after forced cancellation, in milliseconds.
    pub force_grace_ms: u64,
    /// Capacity of the dispatcher request queue.
    pub queue_capacity: usize,
    /// WHATWG label of the legacy fallback encoding.
    pub legacy_encoding: String,
    /// Prefix saved files with a UTF-8 byte-order mark.
    pub write_bom: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_threshold_bytes: defaults::SYNC_THRESHOLD_BYTES,
            streaming_threshold_bytes: defaults::STREAMING_THRESHOLD_BYTES,
            chunked_write_threshold_bytes: defaults::CHUNKED_WRITE_THRESHOLD_BYTES,
            write_chunk_bytes: defaults::WRITE_CHUNK_BYTES,
            chunks: ChunkSettings::default(),
            chunk_pause_ms: defaults::CHUNK_PAUSE_MS,
            drain_timeout_ms: defaults::DRAIN_TIMEOUT_MS,
            force_grace_ms: defaults::FORCE_GRACE_MS,
            queue_capacity: defaults::QUEUE_CAPACITY,
            legacy_encoding: defaults::LEGACY_ENCODING.to_string(),
            write_bom: defaults::WRITE_BOM,
        }
    }
}

impl EngineConfig {
    /// Pause inserted between chunks.
    #[must_use]
    pub const fn chunk_pause(&self) -> Duration {
        Duration::from_millis(self.chunk_pause_ms)
    }

    /// Shutdown drain budget.
    #[must_use]
    pub const fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Grace period after forced cancellation.
    #[must_use]
    pub const fn force_grace(&self) -> Duration {
        Duration::from_millis(self.force_grace_ms)
    }
}

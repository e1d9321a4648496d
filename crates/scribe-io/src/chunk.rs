//! Chunk sizing for streaming reads.

use scribe_config::ChunkSettings;

/// Maps a file size onto a read chunk size.
///
/// The mapping is pure, stays within `[min, max]`, and never shrinks as the
/// file grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    min: usize,
    default: usize,
    max: usize,
    medium_from: u64,
    large_from: u64,
}

impl ChunkPolicy {
    /// Build a policy from validated settings.
    #[must_use]
    pub const fn new(settings: &ChunkSettings) -> Self {
        Self {
            min: settings.min_bytes,
            default: settings.default_bytes,
            max: settings.max_bytes,
            medium_from: settings.medium_from_bytes,
            large_from: settings.large_from_bytes,
        }
    }

    /// Chunk size for a file of `file_size` bytes.
    #[must_use]
    pub const fn plan(&self, file_size: u64) -> usize {
        if file_size < self.medium_from {
            self.min
        } else if file_size < self.large_from {
            self.default
        } else {
            self.max
        }
    }

    /// Smallest chunk this policy hands out.
    #[must_use]
    pub const fn min(&self) -> usize {
        self.min
    }

    /// Largest chunk this policy hands out.
    #[must_use]
    pub const fn max(&self) -> usize {
        self.max
    }
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self::new(&ChunkSettings::default())
    }
}

//! Consistency checks applied after defaults, file, and environment layers merge.

use encoding_rs::{Encoding, REPLACEMENT, UTF_8, UTF_16BE, UTF_16LE};

use crate::error::{ConfigError, ConfigResult};
use crate::model::{ChunkSettings, EngineConfig};

const ENGINE: &str = "engine";
const CHUNKS: &str = "chunks";

/// Validate a merged configuration.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] naming the first offending field.
pub fn validate(config: &EngineConfig) -> ConfigResult<()> {
    if config.sync_threshold_bytes > config.streaming_threshold_bytes {
        return Err(ConfigError::invalid_field(
            ENGINE,
            "sync_threshold_bytes",
            config.sync_threshold_bytes,
            "must_not_exceed_streaming_threshold",
        ));
    }
    if config.write_chunk_bytes == 0 {
        return Err(ConfigError::invalid_field(
            ENGINE,
            "write_chunk_bytes",
            config.write_chunk_bytes,
            "must_be_positive",
        ));
    }
    if config.queue_capacity == 0 {
        return Err(ConfigError::invalid_field(
            ENGINE,
            "queue_capacity",
            config.queue_capacity,
            "must_be_positive",
        ));
    }
    validate_chunks(&config.chunks)?;
    legacy_encoding(&config.legacy_encoding).map(|_| ())
}

fn validate_chunks(chunks: &ChunkSettings) -> ConfigResult<()> {
    if chunks.min_bytes == 0 {
        return Err(ConfigError::invalid_field(
            CHUNKS,
            "min_bytes",
            chunks.min_bytes,
            "must_be_positive",
        ));
    }
    if chunks.min_bytes > chunks.default_bytes || chunks.default_bytes > chunks.max_bytes {
        return Err(ConfigError::invalid_field(
            CHUNKS,
            "default_bytes",
            chunks.default_bytes,
            "must_sit_between_min_and_max",
        ));
    }
    if chunks.medium_from_bytes > chunks.large_from_bytes {
        return Err(ConfigError::invalid_field(
            CHUNKS,
            "medium_from_bytes",
            chunks.medium_from_bytes,
            "must_not_exceed_large_from_bytes",
        ));
    }
    Ok(())
}

/// Resolve the legacy fallback label to a concrete single-byte or multi-byte
/// decoder.
///
/// UTF-8, UTF-16, and the replacement encoding are rejected: the fallback stage
/// must differ from the primary stage and must be able to decode any byte run.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidField`] when the label is unknown or rejected.
pub fn legacy_encoding(label: &str) -> ConfigResult<&'static Encoding> {
    let encoding = Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| {
        ConfigError::invalid_field(ENGINE, "legacy_encoding", label, "unknown_label")
    })?;
    if [UTF_8, UTF_16LE, UTF_16BE, REPLACEMENT].contains(&encoding) {
        return Err(ConfigError::invalid_field(
            ENGINE,
            "legacy_encoding",
            label,
            "must_be_legacy_encoding",
        ));
    }
    Ok(encoding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{SHIFT_JIS, WINDOWS_1252};

    #[test]
    fn defaults_pass_validation() -> ConfigResult<()> {
        validate(&EngineConfig::default())
    }

    #[test]
    fn legacy_labels_resolve_through_whatwg_aliases() -> ConfigResult<()> {
        assert_eq!(legacy_encoding("shift_jis")?, SHIFT_JIS);
        assert_eq!(legacy_encoding("windows-31j")?, SHIFT_JIS);
        assert_eq!(legacy_encoding(" latin1 ")?, WINDOWS_1252);
        Ok(())
    }

    #[test]
    fn unicode_and_unknown_labels_are_rejected() {
        for label in ["utf-8", "utf-16le", "replacement", "klingon"] {
            assert!(
                matches!(
                    legacy_encoding(label),
                    Err(ConfigError::InvalidField {
                        field: "legacy_encoding",
                        ..
                    })
                ),
                "label {label} should be rejected"
            );
        }
    }

    #[test]
    fn inverted_thresholds_are_rejected() {
        let config = EngineConfig {
            sync_threshold_bytes: 2_000_000,
            ..EngineConfig::default()
        };
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidField {
                field: "sync_threshold_bytes",
                ..
            })
        ));
    }

    #[test]
    fn chunk_bands_must_be_ordered() {
        let mut config = EngineConfig::default();
        config.chunks.default_bytes = config.chunks.max_bytes + 1;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidField {
                section: "chunks",
                reason: "must_sit_between_min_and_max",
                ..
            })
        ));

        let mut config = EngineConfig::default();
        config.queue_capacity = 0;
        assert!(matches!(
            validate(&config),
            Err(ConfigError::InvalidField {
                field: "queue_capacity",
                ..
            })
        ));
    }
}

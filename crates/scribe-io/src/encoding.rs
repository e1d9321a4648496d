//! Text decoding with an ordered fallback, and UTF-8 encoding for saves.
//!
//! # Design
//! - Decoding tries UTF-8 with a stripped byte-order mark, then plain UTF-8,
//!   then a configured legacy encoding that replaces malformed input.
//! - Only the legacy stage is lossy; it is the last resort and never fails.
//! - Saves are always UTF-8.

use std::fmt;

use encoding_rs::{CoderResult, Decoder, DecoderResult, Encoding, UTF_8};
use scribe_config::{ConfigResult, EngineConfig, legacy_encoding};

/// UTF-8 byte-order mark.
pub const UTF8_BOM: &[u8; 3] = b"\xEF\xBB\xBF";

/// Encoding that produced a piece of text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    /// UTF-8 whose leading byte-order mark was stripped.
    Utf8Bom,
    /// Plain UTF-8.
    Utf8,
    /// Legacy fallback, by WHATWG encoding name.
    Legacy(&'static str),
}

impl TextEncoding {
    /// Human-readable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Utf8Bom => "UTF-8 (BOM)",
            Self::Utf8 => "UTF-8",
            Self::Legacy(name) => name,
        }
    }

    /// `true` for either UTF-8 variant.
    #[must_use]
    pub const fn is_utf8(self) -> bool {
        matches!(self, Self::Utf8Bom | Self::Utf8)
    }
}

impl fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of decoding a whole buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    /// Decoded text.
    pub text: String,
    /// Encoding that succeeded.
    pub encoding: TextEncoding,
    /// `true` when the legacy fallback was used.
    pub lossy: bool,
}

/// Ordered decoding strategy plus the save-side encoding rule.
#[derive(Debug, Clone, Copy)]
pub struct EncodingCascade {
    legacy: &'static Encoding,
    write_bom: bool,
}

impl EncodingCascade {
    /// Build a cascade with an explicit legacy encoding.
    #[must_use]
    pub const fn new(legacy: &'static Encoding, write_bom: bool) -> Self {
        Self { legacy, write_bom }
    }

    /// Build the cascade described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error when the configured legacy label is unusable.
    pub fn from_config(config: &EngineConfig) -> ConfigResult<Self> {
        Ok(Self::new(
            legacy_encoding(&config.legacy_encoding)?,
            config.write_bom,
        ))
    }

    /// The legacy fallback encoding.
    #[must_use]
    pub fn legacy(&self) -> TextEncoding {
        TextEncoding::Legacy(self.legacy.name())
    }

    /// Decode `bytes`, falling back through the cascade.
    #[must_use]
    pub fn decode(&self, bytes: &[u8]) -> Decoded {
        if let Some(rest) = bytes.strip_prefix(UTF8_BOM.as_slice())
            && let Ok(text) = std::str::from_utf8(rest)
        {
            return Decoded {
                text: text.to_owned(),
                encoding: TextEncoding::Utf8Bom,
                lossy: false,
            };
        }
        if let Ok(text) = std::str::from_utf8(bytes) {
            return Decoded {
                text: text.to_owned(),
                encoding: TextEncoding::Utf8,
                lossy: false,
            };
        }
        let (text, _) = self.legacy.decode_without_bom_handling(bytes);
        Decoded {
            text: text.into_owned(),
            encoding: self.legacy(),
            lossy: true,
        }
    }

    /// Encode `text` for writing: UTF-8, with a byte-order mark when configured.
    #[must_use]
    pub fn encode(&self, text: &str) -> Vec<u8> {
        let prefix = if self.write_bom { UTF8_BOM.len() } else { 0 };
        let mut bytes = Vec::with_capacity(prefix + text.len());
        if self.write_bom {
            bytes.extend_from_slice(UTF8_BOM);
        }
        bytes.extend_from_slice(text.as_bytes());
        bytes
    }

    /// Incremental decoder for the primary (strict UTF-8) stage.
    #[must_use]
    pub fn primary_stream(&self) -> StreamDecoder {
        StreamDecoder {
            decoder: UTF_8.new_decoder_with_bom_removal(),
            strict: true,
            encoding: TextEncoding::Utf8,
            started: false,
        }
    }

    /// Incremental decoder for the legacy (replacing) stage.
    #[must_use]
    pub fn legacy_stream(&self) -> StreamDecoder {
        StreamDecoder {
            decoder: self.legacy.new_decoder_without_bom_handling(),
            strict: false,
            encoding: self.legacy(),
            started: false,
        }
    }
}

/// Input was not valid under a strict decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Malformed;

/// Chunk-at-a-time decoder that keeps multi-byte sequences split across
/// chunk boundaries intact.
pub struct StreamDecoder {
    decoder: Decoder,
    strict: bool,
    encoding: TextEncoding,
    started: bool,
}

impl StreamDecoder {
    /// Decode the next chunk. Pass `last = true` (possibly with an empty
    /// slice) to flush pending bytes.
    ///
    /// # Errors
    ///
    /// A strict decoder returns [`Malformed`] on invalid input; a replacing
    /// decoder never fails.
    pub fn feed(&mut self, bytes: &[u8], last: bool) -> Result<String, Malformed> {
        if !self.started && !bytes.is_empty() {
            self.started = true;
            if self.strict && bytes.starts_with(UTF8_BOM) {
                self.encoding = TextEncoding::Utf8Bom;
            }
        }
        if self.strict {
            self.feed_strict(bytes, last)
        } else {
            Ok(self.feed_replacing(bytes, last))
        }
    }

    fn feed_strict(&mut self, mut bytes: &[u8], last: bool) -> Result<String, Malformed> {
        let mut out = String::new();
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length_without_replacement(bytes.len())
                .unwrap_or(bytes.len() * 3 + 16);
            out.reserve(needed);
            let (result, read) =
                self.decoder
                    .decode_to_string_without_replacement(bytes, &mut out, last);
            bytes = &bytes[read..];
            match result {
                DecoderResult::InputEmpty => return Ok(out),
                DecoderResult::OutputFull => {}
                DecoderResult::Malformed(_, _) => return Err(Malformed),
            }
        }
    }

    fn feed_replacing(&mut self, mut bytes: &[u8], last: bool) -> String {
        let mut out = String::new();
        loop {
            let needed = self
                .decoder
                .max_utf8_buffer_length(bytes.len())
                .unwrap_or(bytes.len() * 3 + 16);
            out.reserve(needed);
            let (result, read, _) = self.decoder.decode_to_string(bytes, &mut out, last);
            bytes = &bytes[read..];
            if result == CoderResult::InputEmpty {
                return out;
            }
        }
    }

    /// Encoding this decoder produces.
    #[must_use]
    pub const fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// `true` for the replacing (legacy) stage.
    #[must_use]
    pub const fn is_lossy(&self) -> bool {
        !self.strict
    }
}

impl fmt::Debug for StreamDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamDecoder")
            .field("encoding", &self.encoding)
            .field("strict", &self.strict)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::{SHIFT_JIS, WINDOWS_1252};

    fn cascade() -> EncodingCascade {
        EncodingCascade::new(SHIFT_JIS, true)
    }

    #[test]
    fn valid_utf8_decodes_exactly() {
        let decoded = cascade().decode("メモ, notes".as_bytes());
        assert_eq!(decoded.text, "メモ, notes");
        assert_eq!(decoded.encoding, TextEncoding::Utf8);
        assert!(!decoded.lossy);
    }

    #[test]
    fn bom_is_stripped_and_reported() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice(b"hello");
        let decoded = cascade().decode(&bytes);
        assert_eq!(decoded.text, "hello");
        assert_eq!(decoded.encoding, TextEncoding::Utf8Bom);
        assert!(!decoded.lossy);
    }

    #[test]
    fn empty_input_is_utf8() {
        let decoded = cascade().decode(&[]);
        assert_eq!(decoded.text, "");
        assert!(decoded.encoding.is_utf8());
        assert!(!decoded.lossy);
    }

    #[test]
    fn legacy_bytes_fall_back_lossy() {
        let (bytes, _, _) = SHIFT_JIS.encode("日本語のメモ");
        assert!(std::str::from_utf8(&bytes).is_err());
        let decoded = cascade().decode(&bytes);
        assert_eq!(decoded.text, "日本語のメモ");
        assert_eq!(decoded.encoding, TextEncoding::Legacy("Shift_JIS"));
        assert!(decoded.lossy);
    }

    #[test]
    fn encode_prefixes_bom_only_when_configured() {
        assert_eq!(cascade().encode("ab"), b"\xEF\xBB\xBFab");
        assert_eq!(EncodingCascade::new(WINDOWS_1252, false).encode("ab"), b"ab");
    }

    #[test]
    fn stream_decoder_joins_split_sequences() -> Result<(), Malformed> {
        let bytes = "añb€".as_bytes();
        let mut decoder = cascade().primary_stream();
        let mut text = String::new();
        for piece in bytes.chunks(2) {
            text.push_str(&decoder.feed(piece, false)?);
        }
        text.push_str(&decoder.feed(&[], true)?);
        assert_eq!(text, "añb€");
        assert_eq!(decoder.encoding(), TextEncoding::Utf8);
        Ok(())
    }

    #[test]
    fn strict_stream_rejects_malformed_and_legacy_stream_replaces() {
        let mut strict = cascade().primary_stream();
        assert_eq!(strict.feed(b"ok\xFF", false), Err(Malformed));

        let mut legacy = EncodingCascade::new(WINDOWS_1252, true).legacy_stream();
        assert_eq!(legacy.feed(b"caf\xE9", true), Ok("café".to_string()));
        assert!(legacy.is_lossy());
    }

    #[test]
    fn truncated_sequence_is_malformed_on_flush() {
        let mut strict = cascade().primary_stream();
        assert_eq!(strict.feed(&"€".as_bytes()[..2], false), Ok(String::new()));
        assert_eq!(strict.feed(&[], true), Err(Malformed));
    }

    #[test]
    fn stream_reports_bom_stage() -> Result<(), Malformed> {
        let mut decoder = cascade().primary_stream();
        let text = decoder.feed(b"\xEF\xBB\xBFhi", true)?;
        assert_eq!(text, "hi");
        assert_eq!(decoder.encoding(), TextEncoding::Utf8Bom);
        Ok(())
    }
}

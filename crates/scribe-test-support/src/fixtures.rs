//! Scratch directories and sample text for file-engine tests.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use encoding_rs::SHIFT_JIS;
use tempfile::TempDir;

const ASCII_LINE: &str = "The quick brown fox jumps over the lazy dog.\n";
const MULTIBYTE_LINE: &str = "日本語のメモ。買い物リスト🍣と予定表\n";

/// Fresh scratch directory removed on drop.
///
/// # Errors
///
/// Returns an error when the temporary directory cannot be created.
pub fn scratch_dir() -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix("scribe-")
        .tempdir()
        .context("failed to create scratch directory")
}

/// ASCII text of exactly `len` bytes.
#[must_use]
pub fn ascii_text(len: usize) -> String {
    ASCII_LINE.chars().cycle().take(len).collect()
}

/// Text mixing two-, three-, and four-byte UTF-8 sequences, at least
/// `min_len` bytes long and always ending on a full line.
#[must_use]
pub fn multibyte_text(min_len: usize) -> String {
    let lines = min_len.div_ceil(MULTIBYTE_LINE.len()).max(1);
    MULTIBYTE_LINE.repeat(lines)
}

/// `text` encoded as Shift_JIS.
///
/// # Errors
///
/// Returns an error when `text` has characters Shift_JIS cannot represent.
pub fn shift_jis_bytes(text: &str) -> Result<Vec<u8>> {
    let (bytes, _, unmappable) = SHIFT_JIS.encode(text);
    ensure!(!unmappable, "text is not representable in Shift_JIS");
    Ok(bytes.into_owned())
}

/// Write `bytes` to `dir/name` and return the full path.
///
/// # Errors
///
/// Returns an error when the file cannot be written.
pub fn write_fixture(dir: &Path, name: &str, bytes: impl AsRef<[u8]>) -> Result<PathBuf> {
    let path = dir.join(name);
    fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

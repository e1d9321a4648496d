//! File-name rules applied before a note is created or renamed.

use crate::error::FileNameError;

const ILLEGAL_CHARACTERS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];
const RESERVED_STEMS: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];
const MAX_NAME_CHARS: usize = 255;
const NOTE_EXTENSION: &str = ".txt";

/// Check `name` against the portable file-name rules.
///
/// Rejects empty names, reserved characters, reserved device stems (case
/// insensitive, extension ignored), a trailing dot or space, a leading space,
/// and names over 255 characters.
///
/// # Errors
///
/// Returns the first rule the name breaks.
pub fn validate_file_name(name: &str) -> Result<(), FileNameError> {
    if name.is_empty() {
        return Err(FileNameError::Empty);
    }
    if let Some(character) = name.chars().find(|c| ILLEGAL_CHARACTERS.contains(c)) {
        return Err(FileNameError::IllegalCharacter { character });
    }
    let stem = name
        .split('.')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    if RESERVED_STEMS.contains(&stem.as_str()) {
        return Err(FileNameError::Reserved { stem });
    }
    if name.ends_with('.') || name.ends_with(' ') {
        return Err(FileNameError::TrailingDotOrSpace);
    }
    if name.starts_with(' ') {
        return Err(FileNameError::LeadingSpace);
    }
    let length = name.chars().count();
    if length > MAX_NAME_CHARS {
        return Err(FileNameError::TooLong { length });
    }
    Ok(())
}

/// `name` without a trailing `.txt` (any case).
pub(crate) fn note_stem(name: &str) -> &str {
    name.len()
        .checked_sub(NOTE_EXTENSION.len())
        .and_then(|cut| {
            name.get(cut..)
                .filter(|ext| ext.eq_ignore_ascii_case(NOTE_EXTENSION))
                .and(name.get(..cut))
        })
        .unwrap_or(name)
}

/// Candidate file name for the `attempt`-th try: `stem.txt`, `stem_1.txt`, ...
pub(crate) fn note_file_name(stem: &str, attempt: u32) -> String {
    if attempt == 0 {
        format!("{stem}{NOTE_EXTENSION}")
    } else {
        format!("{stem}_{attempt}{NOTE_EXTENSION}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinary_names_pass() {
        for name in ["todo", "買い物リスト", "notes.v2.txt", "a b"] {
            assert_eq!(validate_file_name(name), Ok(()), "{name}");
        }
    }

    #[test]
    fn each_rule_is_enforced() {
        assert_eq!(validate_file_name(""), Err(FileNameError::Empty));
        assert_eq!(
            validate_file_name("a:b"),
            Err(FileNameError::IllegalCharacter { character: ':' })
        );
        assert_eq!(
            validate_file_name("com3.txt"),
            Err(FileNameError::Reserved {
                stem: "COM3".to_string()
            })
        );
        assert_eq!(
            validate_file_name("draft."),
            Err(FileNameError::TrailingDotOrSpace)
        );
        assert_eq!(
            validate_file_name("draft "),
            Err(FileNameError::TrailingDotOrSpace)
        );
        assert_eq!(validate_file_name(" draft"), Err(FileNameError::LeadingSpace));
        assert_eq!(
            validate_file_name(&"あ".repeat(256)),
            Err(FileNameError::TooLong { length: 256 })
        );
        assert_eq!(validate_file_name(&"あ".repeat(255)), Ok(()));
    }

    #[test]
    fn reserved_check_ignores_near_misses() {
        assert_eq!(validate_file_name("console"), Ok(()));
        assert_eq!(validate_file_name("COM10"), Ok(()));
    }

    #[test]
    fn stems_drop_txt_extension_case_insensitively() {
        assert_eq!(note_stem("todo.TXT"), "todo");
        assert_eq!(note_stem("todo.md"), "todo.md");
        assert_eq!(note_stem("メモ.txt"), "メモ");
        assert_eq!(note_stem("txt"), "txt");
    }

    #[test]
    fn candidates_number_from_one() {
        assert_eq!(note_file_name("todo", 0), "todo.txt");
        assert_eq!(note_file_name("todo", 2), "todo_2.txt");
    }
}

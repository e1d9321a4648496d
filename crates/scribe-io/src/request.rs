//! Operation identifiers and immutable request descriptors.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use scribe_events::OperationKind;

use crate::error::{FileIoError, FileIoResult};

/// Deterministic identifier of an operation: `"<kind>:<path>"`.
///
/// Two requests of the same kind for the same normalized path share an id,
/// which is what makes them mutually exclusive in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperationId(String);

impl OperationId {
    /// Derive the identifier for `kind` on an already-normalized `path`.
    #[must_use]
    pub fn new(kind: OperationKind, path: &Path) -> Self {
        Self(format!("{}:{}", kind.as_str(), path.display()))
    }

    /// Borrow the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single unit of file work. Immutable once built.
#[derive(Debug, Clone)]
pub struct FileOperationRequest {
    kind: OperationKind,
    path: PathBuf,
    content: Option<Arc<str>>,
    id: OperationId,
}

impl FileOperationRequest {
    /// Whole-file load.
    ///
    /// # Errors
    ///
    /// Fails only when a relative path cannot be resolved against the current
    /// directory.
    pub fn load(path: impl AsRef<Path>) -> FileIoResult<Self> {
        Self::build(OperationKind::Load, path.as_ref(), None)
    }

    /// Backed-up save of `content`.
    ///
    /// # Errors
    ///
    /// See [`FileOperationRequest::load`].
    pub fn save(path: impl AsRef<Path>, content: impl Into<Arc<str>>) -> FileIoResult<Self> {
        Self::build(OperationKind::Save, path.as_ref(), Some(content.into()))
    }

    /// Creation of a zero-length file.
    ///
    /// # Errors
    ///
    /// See [`FileOperationRequest::load`].
    pub fn create_empty(path: impl AsRef<Path>) -> FileIoResult<Self> {
        Self::build(OperationKind::CreateEmpty, path.as_ref(), None)
    }

    /// Chunked streaming load.
    ///
    /// # Errors
    ///
    /// See [`FileOperationRequest::load`].
    pub fn stream_load(path: impl AsRef<Path>) -> FileIoResult<Self> {
        Self::build(OperationKind::StreamLoad, path.as_ref(), None)
    }

    fn build(kind: OperationKind, path: &Path, content: Option<Arc<str>>) -> FileIoResult<Self> {
        let path = normalize_path(path).map_err(|source| FileIoError::from_io(kind, path, source))?;
        let id = OperationId::new(kind, &path);
        Ok(Self {
            kind,
            path,
            content,
            id,
        })
    }

    /// Operation kind.
    #[must_use]
    pub const fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Absolute, normalized target path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Content to write; present only for saves.
    #[must_use]
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// Derived identifier.
    #[must_use]
    pub const fn id(&self) -> &OperationId {
        &self.id
    }
}

/// Make `path` absolute and lexically remove `.` and `..` components.
///
/// Symlinks are not resolved; the path does not need to exist.
///
/// # Errors
///
/// Returns an error when the current directory cannot be determined for a
/// relative input.
pub fn normalize_path(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

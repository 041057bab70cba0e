//! Typed errors for validation, group construction and archive parsing.
//!
//! Orchestration code (filesystem, external tools, the store) uses
//! `anyhow::Result`; the errors here are the ones callers are expected to
//! match on.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Why a candidate image could not become an [`ImageRecord`](crate::record::ImageRecord).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("has an invalid name ({len} bytes; expected 1..={max})")]
    InvalidName { len: usize, max: usize },

    /// Width or height is zero or was never set (unset is reported as 0).
    #[error("requires a non-zero width and height (got {width}x{height})")]
    MissingDimension { width: u32, height: u32 },

    #[error("is missing pixel data")]
    MissingData,

    #[error("has an unresolvable path '{}'", .path.display())]
    UnresolvablePath { path: PathBuf },

    #[error(
        "could not be exported: {reason}. PNG and JPEG sources are used directly; \
         anything else must be declared as raw RGBA8"
    )]
    UnsupportedFormat { reason: String },

    #[error("timed out after {timeout:?} loading '{}'", .path.display())]
    DecodeTimeout { path: PathBuf, timeout: Duration },
}

/// Violations of group and archive structure.
///
/// The package builder never lets these reach an archive; they surface as
/// library failures when the input itself is contradictory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StructuralError {
    #[error("duplicate record name '{name}' in group '{group}'")]
    DuplicateName { group: String, name: String },

    #[error("duplicate resource group '{name}'")]
    DuplicateGroup { name: String },

    #[error("resource group '{group}' is frozen")]
    GroupFrozen { group: String },

    #[error("invalid resource group name ({len} bytes; expected 1..=65535)")]
    InvalidName { len: usize },
}

/// Failure to parse an archive byte stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("unknown archive format version {0}")]
    UnknownVersion(u32),

    #[error("archive truncated at byte {offset} while reading {field}")]
    Truncated { offset: usize, field: &'static str },

    #[error("duplicate name '{name}' in archive")]
    DuplicateName { name: String },

    #[error("unknown image format tag {tag} at byte {offset}")]
    UnknownFormatTag { offset: usize, tag: u8 },

    #[error("name at byte {offset} is not valid UTF-8")]
    InvalidUtf8 { offset: usize },

    #[error("empty name at byte {offset}")]
    EmptyName { offset: usize },

    #[error("record '{name}' is invalid: {reason}")]
    InvalidRecord { name: String, reason: &'static str },

    #[error("{remaining} trailing bytes after archive end at byte {offset}")]
    TrailingBytes { offset: usize, remaining: usize },
}

/// The first problem found in a library.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LibraryError {
    #[error("reference image at index {index} named '{name}' {error}")]
    Record {
        index: usize,
        name: String,
        locator: Option<PathBuf>,
        error: ValidationError,
    },

    #[error("{}{error}", index_prefix(.index))]
    Structure {
        index: Option<usize>,
        error: StructuralError,
    },
}

impl LibraryError {
    /// Index of the offending record, when the failure is tied to one.
    pub fn index(&self) -> Option<usize> {
        match self {
            LibraryError::Record { index, .. } => Some(*index),
            LibraryError::Structure { index, .. } => *index,
        }
    }

    pub fn validation(&self) -> Option<&ValidationError> {
        match self {
            LibraryError::Record { error, .. } => Some(error),
            LibraryError::Structure { .. } => None,
        }
    }

    pub fn structural(&self) -> Option<&StructuralError> {
        match self {
            LibraryError::Structure { error, .. } => Some(error),
            LibraryError::Record { .. } => None,
        }
    }
}

/// One failing library and the first error found in it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{error} in library '{library}'{}", origin_suffix(.origin))]
pub struct LibraryFailure {
    pub library: String,
    /// Where the library was declared (manifest path), if known.
    pub origin: Option<PathBuf>,
    pub error: LibraryError,
}

fn index_prefix(index: &Option<usize>) -> String {
    index
        .map(|i| format!("reference image at index {i}: "))
        .unwrap_or_default()
}

fn origin_suffix(origin: &Option<PathBuf>) -> String {
    origin
        .as_deref()
        .map(|p: &Path| format!(" ({})", p.display()))
        .unwrap_or_default()
}

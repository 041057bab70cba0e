//! The reference image archive: a format version plus ordered resource groups.
//!
//! - [`codec`] - the bit-exact byte layout (`write` / `read`)
//!
//! Groups are frozen as they enter an archive, so an archive is effectively
//! immutable once assembled.

pub mod codec;

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

use crate::error::{FormatError, StructuralError};
use crate::group::ResourceGroup;

pub use codec::{read, write, FORMAT_VERSION};

/// Ordered set of uniquely named, frozen resource groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Archive {
    format_version: u32,
    groups: Vec<ResourceGroup>,
}

impl Default for Archive {
    fn default() -> Self {
        Self::new()
    }
}

impl Archive {
    /// Empty archive at the current [`FORMAT_VERSION`].
    pub fn new() -> Self {
        Self::with_version(FORMAT_VERSION)
    }

    pub(crate) fn with_version(format_version: u32) -> Self {
        Self {
            format_version,
            groups: Vec::new(),
        }
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }

    pub fn groups(&self) -> &[ResourceGroup] {
        &self.groups
    }

    pub fn group(&self, name: &str) -> Option<&ResourceGroup> {
        self.groups.iter().find(|g| g.name() == name)
    }

    /// Freeze `group` and append it. Group names must be unique.
    pub fn push_group(&mut self, mut group: ResourceGroup) -> Result<(), StructuralError> {
        if self.group(group.name()).is_some() {
            return Err(StructuralError::DuplicateGroup {
                name: group.name().to_string(),
            });
        }
        group.freeze();
        self.groups.push(group);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of records across all groups.
    pub fn record_count(&self) -> usize {
        self.groups.iter().map(ResourceGroup::len).sum()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        codec::write(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FormatError> {
        codec::read(bytes)
    }

    /// Write the encoded archive to `path` (via a sibling temp file + rename).
    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, self.to_bytes())
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| {
            format!("Failed to move {} to {}", tmp.display(), path.display())
        })?;
        Ok(())
    }

    /// Read and parse an archive file.
    pub fn read_from(path: &Path) -> Result<Self> {
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read archive {}", path.display()))?;
        let archive = codec::read(&bytes)
            .with_context(|| format!("Failed to parse archive {}", path.display()))?;
        Ok(archive)
    }
}

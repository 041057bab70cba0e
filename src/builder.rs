//! Package builder: validates every library and assembles one archive.
//!
//! Packaging is all-or-nothing. Each library stops at its first bad record
//! (fail-fast per group), every other library is still checked, and the
//! caller gets either a complete [`Archive`] or one [`LibraryFailure`] per
//! failing library, in input order.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::thread;

use crate::archive::Archive;
use crate::error::{LibraryError, LibraryFailure, StructuralError};
use crate::group::ResourceGroup;
use crate::record::{validate_with, Candidate, ValidateOptions};

/// One reference image library as supplied by an asset source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Library {
    pub name: String,
    /// Stable asset identifier. When set it is folded into the group name so
    /// that libraries sharing a display name stay distinct.
    pub guid: Option<String>,
    /// Where the library was declared.
    pub origin: Option<PathBuf>,
    pub candidates: Vec<Candidate>,
}

impl Library {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_guid(mut self, guid: impl Into<String>) -> Self {
        self.guid = Some(guid.into());
        self
    }

    pub fn with_origin(mut self, origin: impl Into<PathBuf>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_candidate(mut self, candidate: Candidate) -> Self {
        self.candidates.push(candidate);
        self
    }

    /// Name of the resource group built from this library:
    /// `name`, or `name_GUID` (upper-case hex, no dashes) when a GUID is set.
    pub fn group_name(&self) -> String {
        match &self.guid {
            Some(guid) => {
                let guid: String = guid
                    .chars()
                    .filter(|c| *c != '-')
                    .map(|c| c.to_ascii_uppercase())
                    .collect();
                format!("{}_{}", self.name, guid)
            }
            None => self.name.clone(),
        }
    }
}

/// Outcome of [`PackageBuilder::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildResult {
    Built(Archive),
    Failed(Vec<LibraryFailure>),
}

impl BuildResult {
    pub fn is_built(&self) -> bool {
        matches!(self, BuildResult::Built(_))
    }

    pub fn archive(&self) -> Option<&Archive> {
        match self {
            BuildResult::Built(archive) => Some(archive),
            BuildResult::Failed(_) => None,
        }
    }

    pub fn failures(&self) -> &[LibraryFailure] {
        match self {
            BuildResult::Built(_) => &[],
            BuildResult::Failed(failures) => failures,
        }
    }

    pub fn into_result(self) -> Result<Archive, Vec<LibraryFailure>> {
        match self {
            BuildResult::Built(archive) => Ok(archive),
            BuildResult::Failed(failures) => Err(failures),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PackageBuilder {
    options: ValidateOptions,
    parallel: bool,
}

impl PackageBuilder {
    pub fn new(options: ValidateOptions) -> Self {
        Self {
            options,
            parallel: false,
        }
    }

    /// Validate libraries on separate threads. Output order is unchanged.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn build(&self, libraries: &[Library]) -> BuildResult {
        let results = if self.parallel && libraries.len() > 1 {
            let options = self.options;
            thread::scope(|scope| {
                let handles: Vec<_> = libraries
                    .iter()
                    .map(|library| scope.spawn(move || build_group(library, &options)))
                    .collect();
                handles
                    .into_iter()
                    .map(|h| h.join().unwrap_or_else(|e| std::panic::resume_unwind(e)))
                    .collect::<Vec<_>>()
            })
        } else {
            libraries
                .iter()
                .map(|library| build_group(library, &self.options))
                .collect::<Vec<_>>()
        };

        let mut archive = Archive::new();
        let mut failures = Vec::new();
        let mut seen = BTreeSet::new();

        for (library, result) in libraries.iter().zip(results) {
            let fresh = seen.insert(library.group_name());
            let outcome = match result {
                Ok(group) if !fresh => Err(StructuralError::DuplicateGroup {
                    name: group.name().to_string(),
                }),
                Ok(group) => archive.push_group(group),
                Err(f) => {
                    tracing::warn!(library = %library.name, "{f}");
                    failures.push(f);
                    continue;
                }
            };

            if let Err(error) = outcome {
                let f = failure(library, LibraryError::Structure { index: None, error });
                tracing::warn!(library = %library.name, "{f}");
                failures.push(f);
            }
        }

        if failures.is_empty() {
            tracing::info!(
                groups = archive.len(),
                records = archive.record_count(),
                "packaged reference image libraries"
            );
            BuildResult::Built(archive)
        } else {
            BuildResult::Failed(failures)
        }
    }
}

fn build_group(
    library: &Library,
    options: &ValidateOptions,
) -> Result<ResourceGroup, LibraryFailure> {
    let mut group = ResourceGroup::new(library.group_name())
        .map_err(|error| failure(library, LibraryError::Structure { index: None, error }))?;

    for (index, candidate) in library.candidates.iter().enumerate() {
        let record = validate_with(candidate, options).map_err(|error| {
            failure(
                library,
                LibraryError::Record {
                    index,
                    name: candidate.name.clone(),
                    locator: candidate.locator().map(|p| p.to_path_buf()),
                    error,
                },
            )
        })?;

        group.add_record(record).map_err(|error| {
            failure(
                library,
                LibraryError::Structure {
                    index: Some(index),
                    error,
                },
            )
        })?;
    }

    group.freeze();
    tracing::debug!(
        library = %library.name,
        group = %group.name(),
        records = group.len(),
        "built resource group"
    );
    Ok(group)
}

fn failure(library: &Library, error: LibraryError) -> LibraryFailure {
    LibraryFailure {
        library: library.name.clone(),
        origin: library.origin.clone(),
        error,
    }
}

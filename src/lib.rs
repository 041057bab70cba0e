//! Reference image packaging for AR image tracking.
//!
//! Libraries of reference images (name, physical size in pixels, encoded
//! pixel data) are validated and packed into one versioned binary archive.
//! Packaging is all-or-nothing: every library is checked, and a single bad
//! record anywhere means no archive and a per-library failure report.
//!
//! - **Validation** - [`record`] turns loose [`record::Candidate`]s into
//!   immutable [`record::ImageRecord`]s
//! - **Grouping** - [`group`] keeps record names unique per library
//! - **Archive** - [`archive`] reads and writes the little-endian format
//! - **Packaging** - [`builder`] validates and assembles, [`pipeline`] adds
//!   catalog compilation, caching and project attachment
//!
//! # Architecture
//!
//! ```text
//! refpack.toml ──► config ──► source ──► builder ──► archive (.refpack)
//!                                           │
//!                                           ▼
//!                                        pipeline ──► catalog ──► actool (.car)
//!                                           │             │
//!                                           │             ▼
//!                                           │           store (cache)
//!                                           ▼
//!                                        integrate (project directory)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use refpack::builder::{Library, PackageBuilder};
//! use refpack::record::{Candidate, ValidateOptions};
//!
//! let logos = Library::new("Logos")
//!     .with_candidate(Candidate::new("Icon").with_size(64, 64).with_file("icon.png"));
//!
//! match PackageBuilder::new(ValidateOptions::default()).build(&[logos]).into_result() {
//!     Ok(archive) => std::fs::write("refs.refpack", archive.to_bytes())?,
//!     Err(failures) => failures.iter().for_each(|f| eprintln!("{f}")),
//! }
//! ```

pub mod archive;
pub mod builder;
pub mod catalog;
pub mod config;
pub mod error;
pub mod group;
pub mod integrate;
pub mod pipeline;
pub mod preflight;
pub mod process;
pub mod record;
pub mod source;
pub mod store;

pub use archive::Archive;
pub use builder::{BuildResult, Library, PackageBuilder};
pub use config::PackConfig;
pub use error::{FormatError, LibraryError, LibraryFailure, StructuralError, ValidationError};
pub use group::ResourceGroup;
pub use pipeline::{AttachReport, Pipeline, PrepareOutcome, Prepared};
pub use record::{validate, Candidate, ImageFormat, ImageRecord};

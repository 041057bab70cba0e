//! Handing packaged groups to a consuming project.
//!
//! A project receives compiled `.car` artifacts for groups the packager has
//! already compiled, and at most one uncompiled catalog directory for the
//! rest. Nothing is written for an empty attachment.

use anyhow::{Context, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

use crate::catalog::{catalog_dir_name, StemSet};

/// Attachment manifest written by [`DirectoryProject::finish`].
pub const ATTACH_MANIFEST: &str = "refpack-attach.json";

/// Receives packaged reference images.
pub trait ProjectIntegrator {
    /// Attach a compiled artifact for one resource group.
    fn attach_compiled(&mut self, group: &str, car: &[u8]) -> Result<()>;

    /// Attach an exported, uncompiled catalog directory.
    fn attach_catalog(&mut self, catalog_dir: &Path) -> Result<()>;

    /// Called once after all attachments.
    fn finish(&mut self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttachedArtifact {
    pub group: String,
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
}

#[derive(Debug, Serialize)]
struct AttachManifest<'a> {
    catalog_name: &'a str,
    attached_at: String,
    compiled: &'a [AttachedArtifact],
    catalogs: &'a [PathBuf],
}

/// A project laid out as a plain directory.
///
/// ```text
/// <root>/<catalog>/<group>.car     compiled groups, one file each
/// <root>/<catalog>.xcassets/       uncompiled catalog
/// <root>/refpack-attach.json       what was attached, and when
/// ```
#[derive(Debug)]
pub struct DirectoryProject {
    root: PathBuf,
    catalog_name: String,
    compiled: Vec<AttachedArtifact>,
    catalogs: Vec<PathBuf>,
    car_stems: StemSet,
}

impl DirectoryProject {
    pub fn open(root: &Path, catalog_name: &str) -> Result<Self> {
        fs::create_dir_all(root)
            .with_context(|| format!("Failed to create project directory {}", root.display()))?;
        Ok(Self {
            root: root.to_path_buf(),
            catalog_name: catalog_name.to_string(),
            compiled: Vec::new(),
            catalogs: Vec::new(),
            car_stems: StemSet::default(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn compiled(&self) -> &[AttachedArtifact] {
        &self.compiled
    }

    pub fn catalogs(&self) -> &[PathBuf] {
        &self.catalogs
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty() && self.catalogs.is_empty()
    }
}

impl ProjectIntegrator for DirectoryProject {
    fn attach_compiled(&mut self, group: &str, car: &[u8]) -> Result<()> {
        let dir = self.root.join(&self.catalog_name);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let stem = self.car_stems.claim(group, self.compiled.len());
        let path = dir.join(format!("{stem}.car"));
        fs::write(&path, car).with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::debug!(group, path = %path.display(), "attached compiled group");
        self.compiled.push(AttachedArtifact {
            group: group.to_string(),
            path,
            sha256: format!("{:x}", Sha256::digest(car)),
            size_bytes: car.len() as u64,
        });
        Ok(())
    }

    fn attach_catalog(&mut self, catalog_dir: &Path) -> Result<()> {
        let dest = self.root.join(catalog_dir_name(&self.catalog_name));
        if dest.exists() {
            fs::remove_dir_all(&dest)
                .with_context(|| format!("Failed to replace {}", dest.display()))?;
        }
        copy_dir_recursive(catalog_dir, &dest)?;

        tracing::debug!(path = %dest.display(), "attached catalog");
        self.catalogs.push(dest);
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }

        let manifest = AttachManifest {
            catalog_name: &self.catalog_name,
            attached_at: now_utc_rfc3339(),
            compiled: &self.compiled,
            catalogs: &self.catalogs,
        };
        let path = self.root.join(ATTACH_MANIFEST);
        let mut json = serde_json::to_vec_pretty(&manifest)?;
        json.push(b'\n');
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::info!(
            project = %self.root.display(),
            compiled = self.compiled.len(),
            catalogs = self.catalogs.len(),
            "attached reference images"
        );
        Ok(())
    }
}

fn now_utc_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    format!(
        "{:04}-{:02}-{:02}T{:02}:{:02}:{:02}Z",
        now.year(),
        now.month() as u8,
        now.day(),
        now.hour(),
        now.minute(),
        now.second()
    )
}

/// Copy a catalog tree. Catalogs hold only directories and regular files.
fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)
        .with_context(|| format!("Failed to create directory: {}", dst.display()))?;

    for entry in fs::read_dir(src)
        .with_context(|| format!("Failed to read directory: {}", src.display()))?
    {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            fs::copy(&src_path, &dst_path)
                .with_context(|| format!("Failed to copy file: {}", src_path.display()))?;
        }
    }

    Ok(())
}

//! Two-phase packaging: prepare, then attach.
//!
//! **Prepare** validates every library, writes the archive, and compiles each
//! group the artifact store has not seen yet. **Attach** hands the results to
//! a project: stored `.car` files for compiled groups, plus one exported
//! catalog for everything else.
//!
//! Compiled output is keyed by [`ResourceGroup::cache_key`], so an unchanged
//! group is compiled once no matter how often it is packaged.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::archive::Archive;
use crate::builder::{BuildResult, Library, PackageBuilder};
use crate::catalog::actool::{compile_groups, Actool};
use crate::catalog::{catalog_dir_name, AssetCatalog, ScratchDir};
use crate::config::PackConfig;
use crate::error::LibraryFailure;
use crate::group::ResourceGroup;
use crate::integrate::ProjectIntegrator;
use crate::source::AssetSource;
use crate::store::{ArtifactStore, KIND_CAR, KIND_CATALOG};

#[derive(Debug)]
pub struct Pipeline {
    config: PackConfig,
    store: Option<ArtifactStore>,
    compiler: Option<Actool>,
}

/// Result of [`Pipeline::prepare`].
#[derive(Debug)]
pub enum PrepareOutcome {
    /// At least one library failed. Nothing was written.
    Failed(Vec<LibraryFailure>),
    Prepared(Prepared),
}

impl PrepareOutcome {
    pub fn failures(&self) -> &[LibraryFailure] {
        match self {
            PrepareOutcome::Failed(failures) => failures,
            PrepareOutcome::Prepared(_) => &[],
        }
    }

    pub fn prepared(&self) -> Option<&Prepared> {
        match self {
            PrepareOutcome::Prepared(prepared) => Some(prepared),
            PrepareOutcome::Failed(_) => None,
        }
    }
}

/// A packaged archive ready to attach.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prepared {
    archive: Archive,
    archive_path: PathBuf,
    cache_keys: Vec<String>,
    /// Groups compiled during this prepare.
    pub compiled: Vec<String>,
    /// Groups whose compiled artifact was already stored.
    pub cached: Vec<String>,
}

impl Prepared {
    fn new(archive: Archive, archive_path: PathBuf) -> Self {
        let cache_keys = archive.groups().iter().map(ResourceGroup::cache_key).collect();
        Self {
            archive,
            archive_path,
            cache_keys,
            compiled: Vec::new(),
            cached: Vec::new(),
        }
    }

    /// Reopen an archive written by an earlier prepare.
    pub fn load(archive_path: &Path) -> Result<Self> {
        let archive = Archive::read_from(archive_path)?;
        Ok(Self::new(archive, archive_path.to_path_buf()))
    }

    pub fn archive(&self) -> &Archive {
        &self.archive
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    /// Groups paired with their cache keys, in archive order.
    pub fn groups(&self) -> impl Iterator<Item = (&ResourceGroup, &str)> {
        self.archive
            .groups()
            .iter()
            .zip(self.cache_keys.iter().map(String::as_str))
    }
}

/// What [`Pipeline::attach`] handed to the project.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachReport {
    /// Groups attached as compiled artifacts.
    pub compiled: Vec<String>,
    /// Groups attached through the uncompiled catalog.
    pub catalog: Vec<String>,
}

impl AttachReport {
    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty() && self.catalog.is_empty()
    }
}

impl Pipeline {
    pub fn new(config: PackConfig, store: Option<ArtifactStore>, compiler: Option<Actool>) -> Self {
        Self {
            config,
            store,
            compiler,
        }
    }

    pub fn config(&self) -> &PackConfig {
        &self.config
    }

    pub fn store(&self) -> Option<&ArtifactStore> {
        self.store.as_ref()
    }

    pub fn compiler(&self) -> Option<&Actool> {
        self.compiler.as_ref()
    }

    /// [`prepare`](Self::prepare) the libraries an asset source supplies.
    pub fn prepare_source(&self, source: &dyn AssetSource) -> Result<PrepareOutcome> {
        let libraries = source.libraries()?;
        self.prepare(&libraries)
    }

    pub fn prepare(&self, libraries: &[Library]) -> Result<PrepareOutcome> {
        tracing::info!(libraries = libraries.len(), "preparing reference images");

        let builder = PackageBuilder::new(self.config.validate_options())
            .with_parallel(self.config.parallel);
        let archive = match builder.build(libraries) {
            BuildResult::Built(archive) => archive,
            BuildResult::Failed(failures) => return Ok(PrepareOutcome::Failed(failures)),
        };

        archive
            .write_to(&self.config.output)
            .with_context(|| format!("writing archive '{}'", self.config.output.display()))?;
        tracing::info!(
            path = %self.config.output.display(),
            groups = archive.len(),
            records = archive.record_count(),
            "wrote archive"
        );

        let mut prepared = Prepared::new(archive, self.config.output.clone());
        if let Some(store) = &self.store {
            self.compile_uncached(store, &mut prepared)?;
        }
        Ok(PrepareOutcome::Prepared(prepared))
    }

    fn compile_uncached(&self, store: &ArtifactStore, prepared: &mut Prepared) -> Result<()> {
        let mut compiled = Vec::new();
        let mut cached = Vec::new();
        let mut degraded = false;

        for (group, key) in prepared.groups() {
            if store.contains(KIND_CAR, key)? {
                tracing::debug!(group = group.name(), key, "compiled artifact already stored");
                cached.push(group.name().to_string());
                continue;
            }

            if degraded {
                continue;
            }

            match compile_groups(
                &self.config.catalog_name,
                &[group],
                self.compiler.as_ref(),
                self.config.compiler.required,
            )? {
                Some(car) => {
                    let mut meta = BTreeMap::new();
                    meta.insert("group".to_string(), serde_json::json!(group.name()));
                    meta.insert("records".to_string(), serde_json::json!(group.len()));
                    store.put_bytes(KIND_CAR, key, &car, meta)?;
                    compiled.push(group.name().to_string());
                }
                // No compiler: uncached groups ship uncompiled.
                None => degraded = true,
            }
        }

        prepared.compiled = compiled;
        prepared.cached = cached;
        Ok(())
    }

    /// Attach a prepared archive to `project`.
    pub fn attach(
        &self,
        prepared: &Prepared,
        project: &mut dyn ProjectIntegrator,
    ) -> Result<AttachReport> {
        let mut report = AttachReport::default();
        let mut uncompiled: Vec<(&ResourceGroup, &str)> = Vec::new();

        for (group, key) in prepared.groups() {
            match self.stored_car(key) {
                Some(car) => {
                    project.attach_compiled(group.name(), &car)?;
                    report.compiled.push(group.name().to_string());
                }
                None => uncompiled.push((group, key)),
            }
        }

        if !uncompiled.is_empty() {
            let scratch = ScratchDir::create("attach")?;
            let catalog_dir = scratch.path().join(catalog_dir_name(&self.config.catalog_name));
            self.export_catalog(&uncompiled, &catalog_dir)?;
            project.attach_catalog(&catalog_dir)?;
            report.catalog = uncompiled
                .iter()
                .map(|(group, _)| group.name().to_string())
                .collect();
        }

        project.finish()?;
        tracing::info!(
            compiled = report.compiled.len(),
            uncompiled = report.catalog.len(),
            "attach finished"
        );
        Ok(report)
    }

    /// A stored `.car`, or `None` when missing or unreadable.
    fn stored_car(&self, key: &str) -> Option<Vec<u8>> {
        let store = self.store.as_ref()?;
        match store.read_bytes(KIND_CAR, key) {
            Ok(car) => car,
            Err(e) => {
                tracing::warn!(key, error = %format!("{e:#}"), "skipping unreadable cache entry");
                None
            }
        }
    }

    /// Export `groups` as one catalog at `dest`, reusing a stored export of
    /// the same groups when there is one.
    fn export_catalog(&self, groups: &[(&ResourceGroup, &str)], dest: &Path) -> Result<()> {
        let key = catalog_key(&self.config.catalog_name, groups.iter().map(|(_, key)| *key));

        if let Some(store) = &self.store {
            if store.contains(KIND_CATALOG, &key)? {
                match store.materialize_to(KIND_CATALOG, &key, dest) {
                    Ok(()) => {
                        tracing::debug!(key = %key, "reused stored catalog export");
                        return Ok(());
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %format!("{e:#}"), "skipping unreadable cache entry");
                    }
                }
            }
        }

        let mut catalog = AssetCatalog::new(&self.config.catalog_name);
        for (group, _) in groups {
            catalog.add_group(*group)?;
        }
        catalog.write(dest)?;

        if let Some(store) = &self.store {
            let mut meta = BTreeMap::new();
            meta.insert(
                "groups".to_string(),
                serde_json::json!(groups.iter().map(|(g, _)| g.name()).collect::<Vec<_>>()),
            );
            store.put_dir_as_tar_zst(KIND_CATALOG, &key, dest, meta)?;
        }
        Ok(())
    }
}

/// Store key of a catalog export: digest of its name and group keys.
fn catalog_key<'k>(catalog_name: &str, group_keys: impl Iterator<Item = &'k str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(catalog_name.as_bytes());
    for key in group_keys {
        hasher.update([0]);
        hasher.update(key.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

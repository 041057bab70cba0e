//! `xcrun actool` wrapper.
//!
//! Compiling is optional: without Xcode on the host the pipeline degrades to
//! shipping uncompiled catalogs, unless the caller requires compilation.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::{catalog_dir_name, AssetCatalog, ScratchDir};
use crate::group::ResourceGroup;
use crate::process::{self, Cmd};

pub const DEFAULT_PLATFORM: &str = "xros";
pub const DEFAULT_DEPLOYMENT_TARGET: &str = "1.0";

/// File actool writes into its `--compile` directory.
pub const COMPILED_CATALOG_FILE: &str = "Assets.car";

/// A located `xcrun` and the target it compiles for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actool {
    xcrun: PathBuf,
    platform: String,
    minimum_deployment_target: String,
}

impl Actool {
    pub fn new(xcrun: impl Into<PathBuf>) -> Self {
        Self {
            xcrun: xcrun.into(),
            platform: DEFAULT_PLATFORM.to_string(),
            minimum_deployment_target: DEFAULT_DEPLOYMENT_TARGET.to_string(),
        }
    }

    /// Find `xcrun` in PATH.
    pub fn locate() -> Option<Self> {
        process::which("xcrun").map(Self::new)
    }

    pub fn with_platform(mut self, platform: impl Into<String>) -> Self {
        self.platform = platform.into();
        self
    }

    pub fn with_deployment_target(mut self, target: impl Into<String>) -> Self {
        self.minimum_deployment_target = target.into();
        self
    }

    pub fn xcrun(&self) -> &Path {
        &self.xcrun
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }

    pub fn minimum_deployment_target(&self) -> &str {
        &self.minimum_deployment_target
    }

    fn command(&self, catalog_dir: &Path, out_dir: &Path) -> Cmd {
        Cmd::new(&self.xcrun)
            .arg("actool")
            .arg_path(catalog_dir)
            .arg("--compile")
            .arg_path(out_dir)
            .args(["--platform", self.platform.as_str()])
            .args([
                "--minimum-deployment-target",
                self.minimum_deployment_target.as_str(),
            ])
            .args([
                "--warnings",
                "--errors",
                "--output-format",
                "human-readable-text",
            ])
            .error_msg(format!("actool failed to compile {}", catalog_dir.display()))
    }

    /// Compile `catalog_dir` into `out_dir` and return the `.car` path.
    pub fn compile(&self, catalog_dir: &Path, out_dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("Failed to create {}", out_dir.display()))?;

        let result = self.command(catalog_dir, out_dir).run()?;
        let out = result.stdout_trimmed();
        if !out.is_empty() {
            tracing::debug!(output = %out, "actool");
        }

        let car = out_dir.join(COMPILED_CATALOG_FILE);
        if !car.is_file() {
            bail!(
                "actool reported success but produced no {} in {}",
                COMPILED_CATALOG_FILE,
                out_dir.display()
            );
        }
        Ok(car)
    }
}

/// Export `groups` as one catalog and compile it.
///
/// `Ok(None)` when no compiler is available and `required` is false. A
/// compiler that runs and fails is always an error.
pub fn compile_groups(
    catalog_name: &str,
    groups: &[&ResourceGroup],
    compiler: Option<&Actool>,
    required: bool,
) -> Result<Option<Vec<u8>>> {
    let Some(actool) = compiler else {
        if required {
            bail!(
                "Compiling catalog '{}' requires xcrun, which was not found in PATH",
                catalog_name
            );
        }
        tracing::warn!(
            catalog = catalog_name,
            "xcrun not found, skipping catalog compilation"
        );
        return Ok(None);
    };

    let mut catalog = AssetCatalog::new(catalog_name);
    for group in groups {
        catalog.add_group(*group)?;
    }

    let scratch = ScratchDir::create("compile")?;
    let catalog_dir = scratch.path().join(catalog_dir_name(catalog_name));
    catalog.write(&catalog_dir)?;

    let car = actool.compile(&catalog_dir, &scratch.path().join("out"))?;
    let bytes = fs::read(&car).with_context(|| format!("Failed to read {}", car.display()))?;

    tracing::info!(
        catalog = catalog_name,
        groups = groups.len(),
        bytes = bytes.len(),
        "compiled catalog"
    );
    Ok(Some(bytes))
}

//! Package manifest (`refpack.toml`).
//!
//! Relative paths in the manifest resolve against the manifest's directory.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::actool::{Actool, DEFAULT_DEPLOYMENT_TARGET, DEFAULT_PLATFORM};
use crate::catalog::DEFAULT_CATALOG_NAME;
use crate::record::{ImageFormat, ValidateOptions};
use crate::store::DEFAULT_STORE_DIR;

pub const DEFAULT_MANIFEST: &str = "refpack.toml";
pub const DEFAULT_OUTPUT: &str = "reference-images.refpack";

/// A loaded manifest with every path resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct PackConfig {
    /// Manifest file, when loaded from disk.
    pub manifest_path: Option<PathBuf>,
    pub base_dir: PathBuf,
    pub output: PathBuf,
    pub catalog_name: String,
    pub decode_timeout: Option<Duration>,
    pub parallel: bool,
    pub compiler: CompilerConfig,
    /// `None` means the per-user cache directory.
    pub store_dir: Option<PathBuf>,
    pub libraries: Vec<LibraryConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerConfig {
    pub platform: String,
    pub minimum_deployment_target: String,
    /// Fail instead of degrading when `xcrun` is missing.
    pub required: bool,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            platform: DEFAULT_PLATFORM.to_string(),
            minimum_deployment_target: DEFAULT_DEPLOYMENT_TARGET.to_string(),
            required: false,
        }
    }
}

impl CompilerConfig {
    /// Locate `xcrun` and configure it for this target.
    pub fn locate(&self) -> Option<Actool> {
        Actool::locate().map(|actool| {
            actool
                .with_platform(&self.platform)
                .with_deployment_target(&self.minimum_deployment_target)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryConfig {
    pub name: String,
    pub guid: Option<String>,
    pub images: Vec<ImageConfig>,
}

/// One `[[library.image]]` entry. Missing fields are left for the validator
/// to report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageConfig {
    pub name: String,
    pub path: Option<PathBuf>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub format: Option<ImageFormat>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestToml {
    #[serde(default)]
    package: PackageToml,
    #[serde(default)]
    compiler: CompilerToml,
    #[serde(default)]
    store: StoreToml,
    #[serde(default)]
    library: Vec<LibraryToml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PackageToml {
    output: Option<String>,
    catalog_name: Option<String>,
    decode_timeout_ms: Option<u64>,
    parallel: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct CompilerToml {
    platform: Option<String>,
    minimum_deployment_target: Option<String>,
    required: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct StoreToml {
    dir: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LibraryToml {
    name: String,
    guid: Option<String>,
    #[serde(default)]
    image: Vec<ImageToml>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ImageToml {
    name: String,
    path: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    format: Option<ImageFormat>,
}

impl PackConfig {
    /// Load and resolve a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading manifest '{}'", path.display()))?;
        let base_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let mut config = Self::parse(&text, &base_dir)
            .with_context(|| format!("parsing manifest '{}'", path.display()))?;
        config.manifest_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Parse manifest text, resolving relative paths against `base_dir`.
    pub fn parse(text: &str, base_dir: &Path) -> Result<Self> {
        let parsed: ManifestToml = toml::from_str(text)?;

        let catalog_name = parsed
            .package
            .catalog_name
            .map(|name| name.trim().to_string())
            .unwrap_or_else(|| DEFAULT_CATALOG_NAME.to_string());
        if catalog_name.is_empty() {
            bail!("package.catalog_name must not be empty");
        }

        let decode_timeout = match parsed.package.decode_timeout_ms {
            Some(0) => bail!("package.decode_timeout_ms must be greater than zero"),
            Some(ms) => Some(Duration::from_millis(ms)),
            None => None,
        };

        let defaults = CompilerConfig::default();
        let compiler = CompilerConfig {
            platform: parsed.compiler.platform.unwrap_or(defaults.platform),
            minimum_deployment_target: parsed
                .compiler
                .minimum_deployment_target
                .unwrap_or(defaults.minimum_deployment_target),
            required: parsed.compiler.required.unwrap_or(defaults.required),
        };

        let mut seen = BTreeSet::new();
        let mut libraries = Vec::with_capacity(parsed.library.len());
        for library in parsed.library {
            let key = (library.name.clone(), library.guid.clone());
            if !seen.insert(key) {
                bail!(
                    "library '{}' is declared more than once with the same guid",
                    library.name
                );
            }
            libraries.push(LibraryConfig {
                name: library.name,
                guid: library.guid,
                images: library
                    .image
                    .into_iter()
                    .map(|image| ImageConfig {
                        name: image.name,
                        path: image.path.map(|p| resolve_path(base_dir, &p)),
                        width: image.width,
                        height: image.height,
                        format: image.format,
                    })
                    .collect(),
            });
        }

        Ok(Self {
            manifest_path: None,
            base_dir: base_dir.to_path_buf(),
            output: resolve_path(
                base_dir,
                parsed.package.output.as_deref().unwrap_or(DEFAULT_OUTPUT),
            ),
            catalog_name,
            decode_timeout,
            parallel: parsed.package.parallel.unwrap_or(false),
            compiler,
            store_dir: parsed.store.dir.map(|dir| resolve_path(base_dir, &dir)),
            libraries,
        })
    }

    pub fn validate_options(&self) -> ValidateOptions {
        ValidateOptions {
            decode_timeout: self.decode_timeout,
        }
    }

    /// Store directory: the manifest's, or `<cache_dir>/refpack`.
    pub fn resolved_store_dir(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.store_dir {
            return Ok(dir.clone());
        }
        dirs::cache_dir()
            .map(|dir| dir.join(DEFAULT_STORE_DIR))
            .context("no per-user cache directory on this host; set [store] dir")
    }
}

fn resolve_path(base_dir: &Path, raw: &str) -> PathBuf {
    let path = Path::new(raw.trim());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FULL: &str = r#"
[package]
output = "build/refs.refpack"
catalog_name = "Markers"
decode_timeout_ms = 2500
parallel = true

[compiler]
platform = "iphoneos"
minimum_deployment_target = "17.0"
required = true

[store]
dir = ".store"

[[library]]
name = "Logos"
guid = "0a1b-2c3d"

  [[library.image]]
  name = "Icon"
  path = "images/icon.png"
  width = 64
  height = 64
  format = "png"

  [[library.image]]
  name = "Wordmark"
  path = "/abs/wordmark.jpg"
  width = 300
  height = 100

[[library]]
name = "Empty"
"#;

    #[test]
    fn parses_full_manifest() {
        let base = Path::new("/project");
        let config = PackConfig::parse(FULL, base).unwrap();

        assert_eq!(config.output, Path::new("/project/build/refs.refpack"));
        assert_eq!(config.catalog_name, "Markers");
        assert_eq!(config.decode_timeout, Some(Duration::from_millis(2500)));
        assert!(config.parallel);
        assert_eq!(config.compiler.platform, "iphoneos");
        assert_eq!(config.compiler.minimum_deployment_target, "17.0");
        assert!(config.compiler.required);
        assert_eq!(config.store_dir.as_deref(), Some(Path::new("/project/.store")));

        assert_eq!(config.libraries.len(), 2);
        let logos = &config.libraries[0];
        assert_eq!(logos.guid.as_deref(), Some("0a1b-2c3d"));
        assert_eq!(logos.images[0].path.as_deref(), Some(Path::new("/project/images/icon.png")));
        assert_eq!(logos.images[0].format, Some(ImageFormat::Png));
        assert_eq!(logos.images[1].path.as_deref(), Some(Path::new("/abs/wordmark.jpg")));
        assert_eq!(logos.images[1].format, None);
        assert!(config.libraries[1].images.is_empty());
    }

    #[test]
    fn empty_manifest_uses_defaults() {
        let config = PackConfig::parse("", Path::new("/p")).unwrap();
        assert_eq!(config.output, Path::new("/p").join(DEFAULT_OUTPUT));
        assert_eq!(config.catalog_name, "ARReferenceImages");
        assert_eq!(config.decode_timeout, None);
        assert!(!config.parallel);
        assert_eq!(config.compiler, CompilerConfig::default());
        assert_eq!(config.store_dir, None);
        assert!(config.libraries.is_empty());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = PackConfig::parse("[package]\nouput = \"x\"\n", Path::new("/p")).unwrap_err();
        assert!(format!("{err:#}").contains("ouput"), "{err:#}");

        let err = PackConfig::parse(
            "[[library]]\nname = \"A\"\n[[library.image]]\nname = \"I\"\nsize = 3\n",
            Path::new("/p"),
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("size"), "{err:#}");
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(PackConfig::parse("[package]\ndecode_timeout_ms = 0\n", Path::new("/p")).is_err());
        assert!(PackConfig::parse("[package]\ncatalog_name = \" \"\n", Path::new("/p")).is_err());
        assert!(PackConfig::parse(
            "[[library]]\nname = \"A\"\n[[library.image]]\nname = \"I\"\nformat = \"gif\"\n",
            Path::new("/p"),
        )
        .is_err());
        assert!(PackConfig::parse(
            "[[library]]\nname = \"A\"\n[[library]]\nname = \"A\"\n",
            Path::new("/p"),
        )
        .is_err());
    }

    #[test]
    fn load_resolves_against_manifest_dir() {
        let tmp = TempDir::new().unwrap();
        let manifest = tmp.path().join(DEFAULT_MANIFEST);
        fs::write(&manifest, FULL).unwrap();

        let config = PackConfig::load(&manifest).unwrap();
        assert_eq!(config.manifest_path.as_deref(), Some(manifest.as_path()));
        assert_eq!(config.output, tmp.path().join("build/refs.refpack"));
        assert_eq!(config.resolved_store_dir().unwrap(), tmp.path().join(".store"));
    }

    #[test]
    fn load_reports_path() {
        let err = PackConfig::load(Path::new("/definitely/missing/refpack.toml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/missing/refpack.toml"));
    }
}

//! Asset catalog export: the on-disk layout a native catalog compiler reads.
//!
//! - [`actool`] - compiles an exported catalog with `xcrun actool`
//!
//! ```text
//! <Name>.xcassets/
//!     Contents.json
//!     <group>.arresourcegroup/
//!         Contents.json                       resources, in record order
//!         <stem>.arreferenceimage/
//!             Contents.json                   image filename + pixel size
//!             <stem>.<png|jpg|rgba>
//! ```
//!
//! File and directory names are derived from group/record names with
//! path-hostile characters replaced, so the same input always produces the
//! same tree.

pub mod actool;

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::archive::Archive;
use crate::error::StructuralError;
use crate::group::ResourceGroup;

/// Catalog name the runtime looks up reference images under.
pub const DEFAULT_CATALOG_NAME: &str = "ARReferenceImages";

const AUTHOR: &str = "refpack";
const CONTENTS_FILE: &str = "Contents.json";

#[derive(Serialize)]
struct Info {
    author: &'static str,
    version: u32,
}

const INFO: Info = Info {
    author: AUTHOR,
    version: 1,
};

#[derive(Serialize)]
struct CatalogContents {
    info: Info,
}

#[derive(Serialize)]
struct GroupContents {
    info: Info,
    resources: Vec<ResourceRef>,
}

#[derive(Serialize)]
struct ResourceRef {
    filename: String,
}

#[derive(Serialize)]
struct ImageContents {
    info: Info,
    images: Vec<ImageEntry>,
    properties: ImageProperties,
}

#[derive(Serialize)]
struct ImageEntry {
    idiom: &'static str,
    filename: String,
}

#[derive(Serialize)]
struct ImageProperties {
    width: u32,
    height: u32,
    unit: &'static str,
}

/// `<name>.xcassets`
pub fn catalog_dir_name(name: &str) -> String {
    format!("{}.xcassets", sanitize(name))
}

/// A set of resource groups to export as one catalog.
#[derive(Debug, Clone)]
pub struct AssetCatalog<'a> {
    name: String,
    groups: Vec<&'a ResourceGroup>,
}

impl<'a> AssetCatalog<'a> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
        }
    }

    /// Catalog holding every group of `archive`, in archive order.
    pub fn from_archive(name: impl Into<String>, archive: &'a Archive) -> Self {
        Self {
            name: name.into(),
            groups: archive.groups().iter().collect(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_group(&mut self, group: &'a ResourceGroup) -> Result<(), StructuralError> {
        if self.groups.iter().any(|g| g.name() == group.name()) {
            return Err(StructuralError::DuplicateGroup {
                name: group.name().to_string(),
            });
        }
        self.groups.push(group);
        Ok(())
    }

    pub fn groups(&self) -> &[&'a ResourceGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Write the catalog tree at `dir`, replacing anything already there.
    ///
    /// Returns the image files written, in group then record order.
    pub fn write(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if dir.exists() {
            fs::remove_dir_all(dir)
                .with_context(|| format!("Failed to remove existing catalog {}", dir.display()))?;
        }
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create catalog {}", dir.display()))?;
        write_json(&dir.join(CONTENTS_FILE), &CatalogContents { info: INFO })?;

        let group_stems = unique_stems(self.groups.iter().map(|g| g.name()));
        let mut written = Vec::new();
        for (group, stem) in self.groups.iter().zip(group_stems) {
            let group_dir = dir.join(format!("{stem}.arresourcegroup"));
            written.extend(write_group(group, &group_dir)?);
        }

        tracing::info!(
            catalog = %self.name,
            path = %dir.display(),
            groups = self.groups.len(),
            images = written.len(),
            "exported asset catalog"
        );
        Ok(written)
    }
}

fn write_group(group: &ResourceGroup, group_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(group_dir)
        .with_context(|| format!("Failed to create {}", group_dir.display()))?;

    let stems = unique_stems(group.iter().map(|r| r.name()));
    let mut resources = Vec::with_capacity(group.len());
    let mut written = Vec::with_capacity(group.len());

    for (record, stem) in group.iter().zip(stems) {
        let image_dir_name = format!("{stem}.arreferenceimage");
        let image_dir = group_dir.join(&image_dir_name);
        fs::create_dir_all(&image_dir)
            .with_context(|| format!("Failed to create {}", image_dir.display()))?;

        let filename = format!("{stem}.{}", record.format().extension());
        let image_path = image_dir.join(&filename);
        fs::write(&image_path, record.pixel_data())
            .with_context(|| format!("Failed to write {}", image_path.display()))?;

        write_json(
            &image_dir.join(CONTENTS_FILE),
            &ImageContents {
                info: INFO,
                images: vec![ImageEntry {
                    idiom: "universal",
                    filename,
                }],
                properties: ImageProperties {
                    width: record.width(),
                    height: record.height(),
                    unit: "pixels",
                },
            },
        )?;

        resources.push(ResourceRef {
            filename: image_dir_name,
        });
        written.push(image_path);
    }

    write_json(
        &group_dir.join(CONTENTS_FILE),
        &GroupContents {
            info: INFO,
            resources,
        },
    )?;
    Ok(written)
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    fs::write(path, bytes).with_context(|| format!("Failed to write {}", path.display()))
}

/// Replace anything that is not safe in a single path segment.
pub fn sanitize(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, ' ' | '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if out.starts_with('.') {
        out.replace_range(0..1, "_");
    }
    if out.is_empty() {
        out.push('_');
    }
    out
}

/// Hands out sanitized file stems that stay distinct on case-insensitive
/// filesystems. A stem that is already taken, ignoring case, gets `-<index>`.
#[derive(Debug, Default)]
pub(crate) struct StemSet {
    used: BTreeSet<String>,
}

impl StemSet {
    pub(crate) fn claim(&mut self, name: &str, index: usize) -> String {
        let base = sanitize(name);
        let mut stem = base.clone();
        let mut n = index;
        while !self.used.insert(stem.to_lowercase()) {
            stem = format!("{base}-{n}");
            n += 1;
        }
        stem
    }
}

fn unique_stems<'n>(names: impl Iterator<Item = &'n str>) -> Vec<String> {
    let mut stems = StemSet::default();
    names
        .enumerate()
        .map(|(index, name)| stems.claim(name, index))
        .collect()
}

static SCRATCH_SEQ: AtomicU64 = AtomicU64::new(0);

/// Temporary directory removed on drop.
pub(crate) struct ScratchDir(PathBuf);

impl ScratchDir {
    pub(crate) fn create(label: &str) -> Result<Self> {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let seq = SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "refpack-{}-{}-{}-{}",
            label,
            std::process::id(),
            nanos,
            seq
        ));
        fs::create_dir_all(&path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        Ok(Self(path))
    }

    pub(crate) fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::{jpeg_bytes, png_bytes};
    use crate::record::{validate, Candidate, ImageFormat};
    use tempfile::TempDir;
    use walkdir::WalkDir;

    fn group(name: &str, records: Vec<Candidate>) -> ResourceGroup {
        let mut group = ResourceGroup::new(name).unwrap();
        for candidate in records {
            group.add_record(validate(&candidate).unwrap()).unwrap();
        }
        group
    }

    fn listing(root: &Path) -> Vec<String> {
        WalkDir::new(root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .map(|e| {
                e.path()
                    .strip_prefix(root)
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    #[test]
    fn writes_expected_layout() {
        let tmp = TempDir::new().unwrap();
        let logos = group(
            "Logos",
            vec![Candidate::new("Icon")
                .with_size(64, 64)
                .with_data(png_bytes(b"icon"))],
        );
        let signs = group(
            "Signs",
            vec![
                Candidate::new("Stop")
                    .with_size(120, 80)
                    .with_data(jpeg_bytes(b"stop")),
                Candidate::new("Grid")
                    .with_size(1, 1)
                    .with_format(ImageFormat::Raw)
                    .with_data(vec![0, 0, 0, 255]),
            ],
        );

        let mut catalog = AssetCatalog::new(DEFAULT_CATALOG_NAME);
        catalog.add_group(&logos).unwrap();
        catalog.add_group(&signs).unwrap();
        assert!(catalog.add_group(&logos).is_err());

        let root = tmp.path().join(catalog_dir_name(catalog.name()));
        let written = catalog.write(&root).unwrap();
        assert_eq!(written.len(), 3);

        assert_eq!(
            listing(&root),
            [
                "",
                "Contents.json",
                "Logos.arresourcegroup",
                "Logos.arresourcegroup/Contents.json",
                "Logos.arresourcegroup/Icon.arreferenceimage",
                "Logos.arresourcegroup/Icon.arreferenceimage/Contents.json",
                "Logos.arresourcegroup/Icon.arreferenceimage/Icon.png",
                "Signs.arresourcegroup",
                "Signs.arresourcegroup/Contents.json",
                "Signs.arresourcegroup/Grid.arreferenceimage",
                "Signs.arresourcegroup/Grid.arreferenceimage/Contents.json",
                "Signs.arresourcegroup/Grid.arreferenceimage/Grid.rgba",
                "Signs.arresourcegroup/Stop.arreferenceimage",
                "Signs.arresourcegroup/Stop.arreferenceimage/Contents.json",
                "Signs.arresourcegroup/Stop.arreferenceimage/Stop.jpg",
            ]
        );

        let contents: serde_json::Value = serde_json::from_slice(
            &fs::read(root.join("Signs.arresourcegroup/Contents.json")).unwrap(),
        )
        .unwrap();
        // Resource order follows record order, not directory order.
        assert_eq!(contents["resources"][0]["filename"], "Stop.arreferenceimage");
        assert_eq!(contents["resources"][1]["filename"], "Grid.arreferenceimage");

        let image: serde_json::Value = serde_json::from_slice(
            &fs::read(root.join("Signs.arresourcegroup/Stop.arreferenceimage/Contents.json"))
                .unwrap(),
        )
        .unwrap();
        assert_eq!(image["images"][0]["filename"], "Stop.jpg");
        assert_eq!(image["properties"]["width"], 120);
        assert_eq!(image["properties"]["height"], 80);

        assert_eq!(
            fs::read(root.join("Logos.arresourcegroup/Icon.arreferenceimage/Icon.png")).unwrap(),
            png_bytes(b"icon")
        );
    }

    #[test]
    fn rewrite_replaces_previous_tree() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("ARReferenceImages.xcassets");
        fs::create_dir_all(root.join("Stale.arresourcegroup")).unwrap();

        let logos = group(
            "Logos",
            vec![Candidate::new("Icon")
                .with_size(8, 8)
                .with_data(png_bytes(b""))],
        );
        let mut catalog = AssetCatalog::new("ARReferenceImages");
        catalog.add_group(&logos).unwrap();
        catalog.write(&root).unwrap();

        assert!(!root.join("Stale.arresourcegroup").exists());
        assert!(root.join("Logos.arresourcegroup").is_dir());
    }

    #[test]
    fn hostile_names_are_sanitized_and_deduplicated() {
        assert_eq!(sanitize("a/b\\c:d"), "a_b_c_d");
        assert_eq!(sanitize(".hidden"), "_hidden");
        assert_eq!(sanitize("Exit Sign-2.v1"), "Exit Sign-2.v1");

        let stems = unique_stems(["a/b", "a:b", "a_b", "c"].into_iter());
        assert_eq!(stems, ["a_b", "a_b-1", "a_b-2", "c"]);

        let stems = unique_stems(["Logo", "logo", "LOGO-1"].into_iter());
        assert_eq!(stems, ["Logo", "logo-1", "LOGO-1-2"]);
    }

    #[test]
    fn from_archive_keeps_order() {
        let mut archive = Archive::new();
        for name in ["Zeta", "Alpha"] {
            archive
                .push_group(group(
                    name,
                    vec![Candidate::new("Icon")
                        .with_size(8, 8)
                        .with_data(png_bytes(b""))],
                ))
                .unwrap();
        }
        let catalog = AssetCatalog::from_archive("Refs", &archive);
        let names: Vec<_> = catalog.groups().iter().map(|g| g.name()).collect();
        assert_eq!(names, ["Zeta", "Alpha"]);
        assert_eq!(catalog_dir_name("Refs"), "Refs.xcassets");
    }
}

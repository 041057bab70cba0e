//! Asset sources: where libraries of reference image candidates come from.

use anyhow::Result;

use crate::builder::Library;
use crate::config::PackConfig;
use crate::record::{Candidate, PixelSource};

/// Supplies the libraries to package.
pub trait AssetSource {
    fn libraries(&self) -> Result<Vec<Library>>;
}

/// Libraries declared in a `refpack.toml` manifest.
#[derive(Debug, Clone)]
pub struct ManifestSource<'a> {
    config: &'a PackConfig,
}

impl<'a> ManifestSource<'a> {
    pub fn new(config: &'a PackConfig) -> Self {
        Self { config }
    }
}

impl AssetSource for ManifestSource<'_> {
    fn libraries(&self) -> Result<Vec<Library>> {
        let origin = self
            .config
            .manifest_path
            .clone()
            .unwrap_or_else(|| self.config.base_dir.clone());

        Ok(self
            .config
            .libraries
            .iter()
            .map(|library| Library {
                name: library.name.clone(),
                guid: library.guid.clone(),
                origin: Some(origin.clone()),
                candidates: library
                    .images
                    .iter()
                    .map(|image| Candidate {
                        name: image.name.clone(),
                        width: image.width,
                        height: image.height,
                        format: image.format,
                        pixels: image
                            .path
                            .clone()
                            .map(PixelSource::File)
                            .unwrap_or_default(),
                    })
                    .collect(),
            })
            .collect())
    }
}

/// Libraries built in code.
impl AssetSource for [Library] {
    fn libraries(&self) -> Result<Vec<Library>> {
        Ok(self.to_vec())
    }
}

impl AssetSource for Vec<Library> {
    fn libraries(&self) -> Result<Vec<Library>> {
        Ok(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ImageFormat;
    use std::path::Path;

    #[test]
    fn manifest_libraries_become_candidates() {
        let config = PackConfig::parse(
            r#"
[[library]]
name = "Logos"
guid = "ab-cd"

  [[library.image]]
  name = "Icon"
  path = "icon.png"
  width = 64
  height = 64
  format = "png"

  [[library.image]]
  name = "Untextured"
  width = 10
"#,
            Path::new("/assets"),
        )
        .unwrap();

        let libraries = ManifestSource::new(&config).libraries().unwrap();
        assert_eq!(libraries.len(), 1);

        let logos = &libraries[0];
        assert_eq!(logos.group_name(), "Logos_ABCD");
        assert_eq!(logos.origin.as_deref(), Some(Path::new("/assets")));

        let icon = &logos.candidates[0];
        assert_eq!(icon.width, Some(64));
        assert_eq!(icon.format, Some(ImageFormat::Png));
        assert_eq!(icon.locator(), Some(Path::new("/assets/icon.png")));

        let untextured = &logos.candidates[1];
        assert_eq!(untextured.height, None);
        assert_eq!(untextured.pixels, PixelSource::Missing);
    }

    #[test]
    fn in_memory_libraries_are_a_source() {
        let libraries = vec![Library::new("A"), Library::new("B")];
        let listed = libraries.libraries().unwrap();
        assert_eq!(listed, libraries);
        assert_eq!(libraries[..1].libraries().unwrap().len(), 1);
    }
}

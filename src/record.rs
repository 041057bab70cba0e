//! Reference image records and the validator that produces them.
//!
//! A [`Candidate`] is whatever the asset source handed us: a name, maybe some
//! dimensions, maybe a format, and somewhere to find the pixels. [`validate`]
//! turns it into an immutable [`ImageRecord`] or explains why it can't.
//!
//! Checks run in a fixed order so the reported error is stable:
//!
//! 1. name length
//! 2. dimensions
//! 3. presence of a pixel source
//! 4. path resolution and loading (optionally under a timeout)
//! 5. non-empty data
//! 6. format (declared vs. file signature)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use crate::error::ValidationError;

/// Longest name the archive can carry (`u16` length prefix).
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const JPEG_SIGNATURE: &[u8] = &[0xFF, 0xD8, 0xFF];

/// Bytes per pixel of [`ImageFormat::Raw`] data (RGBA8).
pub const RAW_BYTES_PER_PIXEL: u64 = 4;

/// Encoding of a record's pixel data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    /// Tightly packed 8-bit RGBA, row-major.
    Raw,
}

impl ImageFormat {
    /// Wire tag used by the archive format.
    pub fn tag(self) -> u8 {
        match self {
            ImageFormat::Png => 0,
            ImageFormat::Jpeg => 1,
            ImageFormat::Raw => 2,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(ImageFormat::Png),
            1 => Some(ImageFormat::Jpeg),
            2 => Some(ImageFormat::Raw),
            _ => None,
        }
    }

    /// File extension used when exporting the record to disk.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Raw => "rgba",
        }
    }

    /// Identify PNG or JPEG data by its leading signature.
    ///
    /// Raw data has no signature and is never sniffed.
    pub fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(PNG_SIGNATURE) {
            Some(ImageFormat::Png)
        } else if bytes.starts_with(JPEG_SIGNATURE) {
            Some(ImageFormat::Jpeg)
        } else {
            None
        }
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Png => write!(f, "PNG"),
            ImageFormat::Jpeg => write!(f, "JPEG"),
            ImageFormat::Raw => write!(f, "RAW"),
        }
    }
}

/// Where a candidate's pixels come from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PixelSource {
    /// No texture attached.
    #[default]
    Missing,
    Inline(Vec<u8>),
    File(PathBuf),
}

/// Unvalidated input for one reference image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Candidate {
    pub name: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    /// Declared format. When absent, PNG/JPEG are recognized by signature.
    pub format: Option<ImageFormat>,
    pub pixels: PixelSource,
}

impl Candidate {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn with_format(mut self, format: ImageFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_data(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.pixels = PixelSource::Inline(bytes.into());
        self
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.pixels = PixelSource::File(path.into());
        self
    }

    /// The external file this candidate points at, if any.
    pub fn locator(&self) -> Option<&Path> {
        match &self.pixels {
            PixelSource::File(path) => Some(path),
            _ => None,
        }
    }
}

/// A validated reference image. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRecord {
    name: String,
    width: u32,
    height: u32,
    format: ImageFormat,
    pixel_data: Vec<u8>,
}

impl ImageRecord {
    /// Rebuild a record from decoded archive fields, enforcing the record
    /// invariants. Returns the violated invariant on failure.
    pub(crate) fn from_parts(
        name: String,
        width: u32,
        height: u32,
        format: ImageFormat,
        pixel_data: Vec<u8>,
    ) -> Result<Self, &'static str> {
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err("name must be 1..=65535 bytes");
        }
        if width == 0 || height == 0 {
            return Err("width and height must be non-zero");
        }
        if pixel_data.is_empty() {
            return Err("pixel data is empty");
        }
        Ok(Self {
            name,
            width,
            height,
            format,
            pixel_data,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> ImageFormat {
        self.format
    }

    pub fn pixel_data(&self) -> &[u8] {
        &self.pixel_data
    }
}

/// Validation knobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidateOptions {
    /// Give up on a file load after this long. `None` waits indefinitely.
    pub decode_timeout: Option<Duration>,
}

/// Validate a candidate with default options.
pub fn validate(candidate: &Candidate) -> Result<ImageRecord, ValidationError> {
    validate_with(candidate, &ValidateOptions::default())
}

/// Validate a candidate, producing an immutable record.
pub fn validate_with(
    candidate: &Candidate,
    options: &ValidateOptions,
) -> Result<ImageRecord, ValidationError> {
    let name_len = candidate.name.len();
    if name_len == 0 || name_len > MAX_NAME_LEN {
        return Err(ValidationError::InvalidName {
            len: name_len,
            max: MAX_NAME_LEN,
        });
    }

    let width = candidate.width.unwrap_or(0);
    let height = candidate.height.unwrap_or(0);
    if width == 0 || height == 0 {
        return Err(ValidationError::MissingDimension { width, height });
    }

    let pixel_data = match &candidate.pixels {
        PixelSource::Missing => return Err(ValidationError::MissingData),
        PixelSource::Inline(bytes) => bytes.clone(),
        PixelSource::File(path) => {
            if !path.exists() {
                return Err(ValidationError::UnresolvablePath { path: path.clone() });
            }
            load_file(path, options.decode_timeout)?
        }
    };

    if pixel_data.is_empty() {
        return Err(ValidationError::MissingData);
    }

    let format = resolve_format(candidate.format, &pixel_data, width, height)?;

    tracing::debug!(
        record = %candidate.name,
        %format,
        width,
        height,
        bytes = pixel_data.len(),
        "validated reference image"
    );

    Ok(ImageRecord {
        name: candidate.name.clone(),
        width,
        height,
        format,
        pixel_data,
    })
}

fn load_file(path: &Path, timeout: Option<Duration>) -> Result<Vec<u8>, ValidationError> {
    let unresolvable = || ValidationError::UnresolvablePath {
        path: path.to_path_buf(),
    };

    let Some(timeout) = timeout else {
        return fs::read(path).map_err(|_| unresolvable());
    };

    // The reader thread is abandoned on timeout; it exits whenever the read returns.
    let (tx, rx) = mpsc::channel();
    let owned = path.to_path_buf();
    thread::spawn(move || {
        let _ = tx.send(fs::read(&owned));
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(_)) | Err(RecvTimeoutError::Disconnected) => Err(unresolvable()),
        Err(RecvTimeoutError::Timeout) => Err(ValidationError::DecodeTimeout {
            path: path.to_path_buf(),
            timeout,
        }),
    }
}

fn resolve_format(
    declared: Option<ImageFormat>,
    bytes: &[u8],
    width: u32,
    height: u32,
) -> Result<ImageFormat, ValidationError> {
    let unsupported = |reason: String| ValidationError::UnsupportedFormat { reason };

    match (declared, ImageFormat::sniff(bytes)) {
        (Some(ImageFormat::Raw), _) => {
            let expected = u64::from(width) * u64::from(height) * RAW_BYTES_PER_PIXEL;
            let actual = bytes.len() as u64;
            if actual != expected {
                return Err(unsupported(format!(
                    "raw data is {actual} bytes, expected {expected} for {width}x{height} RGBA8"
                )));
            }
            Ok(ImageFormat::Raw)
        }
        (Some(declared), Some(sniffed)) if declared == sniffed => Ok(declared),
        (Some(declared), Some(sniffed)) => Err(unsupported(format!(
            "declared {declared} but the data is {sniffed}"
        ))),
        (Some(declared), None) => Err(unsupported(format!(
            "declared {declared} but the data has no {declared} signature"
        ))),
        (None, Some(sniffed)) => Ok(sniffed),
        (None, None) => Err(unsupported("unrecognized encoding".to_string())),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Minimal bytes that pass the PNG signature check.
    pub(crate) fn png_bytes(extra: &[u8]) -> Vec<u8> {
        let mut bytes = PNG_SIGNATURE.to_vec();
        bytes.extend_from_slice(extra);
        bytes
    }

    pub(crate) fn jpeg_bytes(extra: &[u8]) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xD8, 0xFF, 0xE0];
        bytes.extend_from_slice(extra);
        bytes
    }

    #[test]
    fn valid_inline_png() {
        let candidate = Candidate::new("Icon")
            .with_size(64, 64)
            .with_data(png_bytes(b"IHDR"));

        let record = validate(&candidate).unwrap();
        assert_eq!(record.name(), "Icon");
        assert_eq!(record.width(), 64);
        assert_eq!(record.height(), 64);
        assert_eq!(record.format(), ImageFormat::Png);
        assert_eq!(record.pixel_data(), png_bytes(b"IHDR").as_slice());
    }

    #[test]
    fn zero_or_unset_dimension() {
        let zero = Candidate::new("Wide")
            .with_size(0, 10)
            .with_data(png_bytes(b""));
        assert_eq!(
            validate(&zero),
            Err(ValidationError::MissingDimension {
                width: 0,
                height: 10
            })
        );

        let unset = Candidate::new("Unset").with_data(png_bytes(b""));
        assert_eq!(
            validate(&unset),
            Err(ValidationError::MissingDimension {
                width: 0,
                height: 0
            })
        );
    }

    #[test]
    fn dimension_checked_before_data() {
        let candidate = Candidate::new("Both");
        assert!(matches!(
            validate(&candidate),
            Err(ValidationError::MissingDimension { .. })
        ));
    }

    #[test]
    fn missing_or_empty_data() {
        let missing = Candidate::new("NoTexture").with_size(8, 8);
        assert_eq!(validate(&missing), Err(ValidationError::MissingData));

        let empty = Candidate::new("Empty").with_size(8, 8).with_data(Vec::new());
        assert_eq!(validate(&empty), Err(ValidationError::MissingData));
    }

    #[test]
    fn unresolvable_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nope.png");
        let candidate = Candidate::new("Gone").with_size(8, 8).with_file(&path);
        assert_eq!(
            validate(&candidate),
            Err(ValidationError::UnresolvablePath { path })
        );
    }

    #[test]
    fn loads_file_and_sniffs_jpeg() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sign.jpg");
        fs::write(&path, jpeg_bytes(b"JFIF")).unwrap();

        let candidate = Candidate::new("Sign").with_size(32, 16).with_file(&path);
        assert_eq!(candidate.locator(), Some(path.as_path()));

        let record = validate(&candidate).unwrap();
        assert_eq!(record.format(), ImageFormat::Jpeg);
        assert_eq!(record.pixel_data(), jpeg_bytes(b"JFIF").as_slice());
    }

    #[test]
    fn empty_file_is_missing_data() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("empty.png");
        fs::write(&path, b"").unwrap();

        let candidate = Candidate::new("Empty").with_size(8, 8).with_file(&path);
        assert_eq!(validate(&candidate), Err(ValidationError::MissingData));
    }

    #[test]
    fn unsupported_formats() {
        let unknown = Candidate::new("Tga")
            .with_size(8, 8)
            .with_data(vec![0u8, 0, 2, 0, 0]);
        assert!(matches!(
            validate(&unknown),
            Err(ValidationError::UnsupportedFormat { .. })
        ));

        let mismatch = Candidate::new("Liar")
            .with_size(8, 8)
            .with_format(ImageFormat::Jpeg)
            .with_data(png_bytes(b""));
        let err = validate(&mismatch).unwrap_err();
        assert!(err.to_string().contains("declared JPEG but the data is PNG"));
    }

    #[test]
    fn raw_requires_exact_rgba_length() {
        let ok = Candidate::new("Raw")
            .with_size(2, 2)
            .with_format(ImageFormat::Raw)
            .with_data(vec![7u8; 16]);
        assert_eq!(validate(&ok).unwrap().format(), ImageFormat::Raw);

        let short = Candidate::new("Short")
            .with_size(2, 2)
            .with_format(ImageFormat::Raw)
            .with_data(vec![7u8; 15]);
        assert!(matches!(
            validate(&short),
            Err(ValidationError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn invalid_names() {
        let empty = Candidate::new("").with_size(1, 1).with_data(png_bytes(b""));
        assert!(matches!(
            validate(&empty),
            Err(ValidationError::InvalidName { len: 0, .. })
        ));

        let long = Candidate::new("x".repeat(MAX_NAME_LEN + 1))
            .with_size(1, 1)
            .with_data(png_bytes(b""));
        assert!(matches!(
            validate(&long),
            Err(ValidationError::InvalidName { .. })
        ));
    }

    #[test]
    fn format_tags_are_stable() {
        for format in [ImageFormat::Png, ImageFormat::Jpeg, ImageFormat::Raw] {
            assert_eq!(ImageFormat::from_tag(format.tag()), Some(format));
        }
        assert_eq!(ImageFormat::Png.tag(), 0);
        assert_eq!(ImageFormat::Jpeg.tag(), 1);
        assert_eq!(ImageFormat::Raw.tag(), 2);
        assert_eq!(ImageFormat::from_tag(3), None);
    }

    #[cfg(unix)]
    #[test]
    fn decode_timeout_on_blocked_read() {
        use std::process::Command;

        let tmp = TempDir::new().unwrap();
        let fifo = tmp.path().join("blocked.png");
        let status = Command::new("mkfifo").arg(&fifo).status().unwrap();
        assert!(status.success());

        // Opening a FIFO with no writer blocks, so the load can never finish.
        let candidate = Candidate::new("Blocked").with_size(8, 8).with_file(&fifo);
        let options = ValidateOptions {
            decode_timeout: Some(Duration::from_millis(50)),
        };
        assert_eq!(
            validate_with(&candidate, &options),
            Err(ValidationError::DecodeTimeout {
                path: fifo,
                timeout: Duration::from_millis(50),
            })
        );
    }
}

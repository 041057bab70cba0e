//! Bit-exact archive encoding.
//!
//! ```text
//! formatVersion   u32
//! groupCount      u32
//!   nameLen       u16, name (UTF-8)
//!   recordCount   u32
//!     nameLen     u16, name (UTF-8)
//!     width       u32
//!     height      u32
//!     formatTag   u8   (0=PNG, 1=JPEG, 2=RAW)
//!     dataLen     u64
//!     pixelData   dataLen bytes
//! ```
//!
//! All integers are little-endian. The byte stream is untrusted on read:
//! every length is checked against the remaining input before it is used, and
//! the group/record invariants are re-validated.

use crate::archive::Archive;
use crate::error::FormatError;
use crate::group::ResourceGroup;
use crate::record::{ImageFormat, ImageRecord};

/// Current archive format version.
pub const FORMAT_VERSION: u32 = 1;

/// Versions this reader understands.
pub const SUPPORTED_VERSIONS: &[u32] = &[FORMAT_VERSION];

/// Smallest possible encoded group: 1-byte name, zero records.
const MIN_GROUP_LEN: u64 = 2 + 1 + 4;

/// Smallest possible encoded record: 1-byte name, 1 byte of pixel data.
const MIN_RECORD_LEN: u64 = 2 + 1 + 4 + 4 + 1 + 8 + 1;

/// Serialize an archive.
pub fn write(archive: &Archive) -> Vec<u8> {
    let mut out = Vec::new();
    put_u32(&mut out, archive.format_version());
    put_u32(&mut out, archive.groups().len() as u32);
    for group in archive.groups() {
        encode_group(group, &mut out);
    }
    out
}

/// Parse an archive, re-checking every structural invariant.
pub fn read(bytes: &[u8]) -> Result<Archive, FormatError> {
    let mut r = Reader::new(bytes);

    let version = r.u32("format version")?;
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(FormatError::UnknownVersion(version));
    }

    let mut archive = Archive::with_version(version);
    let group_count = r.u32("group count")?;
    r.ensure_room(group_count, MIN_GROUP_LEN, "groups")?;
    for _ in 0..group_count {
        let group = decode_group(&mut r)?;
        let name = group.name().to_string();
        archive
            .push_group(group)
            .map_err(|_| FormatError::DuplicateName { name })?;
    }

    if r.remaining() > 0 {
        return Err(FormatError::TrailingBytes {
            offset: r.pos,
            remaining: r.remaining(),
        });
    }

    Ok(archive)
}

/// Append one group's encoding (name, count, records) to `out`.
pub(crate) fn encode_group(group: &ResourceGroup, out: &mut Vec<u8>) {
    put_name(out, group.name());
    put_u32(out, group.len() as u32);
    for record in group {
        put_name(out, record.name());
        put_u32(out, record.width());
        put_u32(out, record.height());
        out.push(record.format().tag());
        put_u64(out, record.pixel_data().len() as u64);
        out.extend_from_slice(record.pixel_data());
    }
}

fn decode_group(r: &mut Reader<'_>) -> Result<ResourceGroup, FormatError> {
    let name = r.name("group name")?;
    let mut group = ResourceGroup::new(name.clone())
        .map_err(|_| FormatError::EmptyName { offset: r.pos })?;

    let record_count = r.u32("record count")?;
    r.ensure_room(record_count, MIN_RECORD_LEN, "records")?;
    for _ in 0..record_count {
        let record = decode_record(r)?;
        let record_name = record.name().to_string();
        group
            .add_record(record)
            .map_err(|_| FormatError::DuplicateName { name: record_name })?;
    }
    Ok(group)
}

fn decode_record(r: &mut Reader<'_>) -> Result<ImageRecord, FormatError> {
    let name = r.name("record name")?;
    let width = r.u32("record width")?;
    let height = r.u32("record height")?;

    let tag_offset = r.pos;
    let tag = r.u8("format tag")?;
    let format = ImageFormat::from_tag(tag).ok_or(FormatError::UnknownFormatTag {
        offset: tag_offset,
        tag,
    })?;

    let data_len = r.u64("pixel data length")?;
    let data = r.take_u64(data_len, "pixel data")?.to_vec();

    ImageRecord::from_parts(name.clone(), width, height, format, data)
        .map_err(|reason| FormatError::InvalidRecord { name, reason })
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_u64(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_name(out: &mut Vec<u8>, name: &str) {
    // Names are capped at u16::MAX bytes when groups and records are built.
    debug_assert!(name.len() <= u16::MAX as usize);
    out.extend_from_slice(&(name.len() as u16).to_le_bytes());
    out.extend_from_slice(name.as_bytes());
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Fail early when `count` items of at least `min_len` bytes cannot fit.
    fn ensure_room(
        &self,
        count: u32,
        min_len: u64,
        field: &'static str,
    ) -> Result<(), FormatError> {
        if u64::from(count) * min_len > self.remaining() as u64 {
            return Err(FormatError::Truncated {
                offset: self.pos,
                field,
            });
        }
        Ok(())
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], FormatError> {
        if n > self.remaining() {
            return Err(FormatError::Truncated {
                offset: self.pos,
                field,
            });
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn take_u64(&mut self, n: u64, field: &'static str) -> Result<&'a [u8], FormatError> {
        match usize::try_from(n) {
            Ok(n) => self.take(n, field),
            Err(_) => Err(FormatError::Truncated {
                offset: self.pos,
                field,
            }),
        }
    }

    fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], FormatError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, FormatError> {
        Ok(self.array::<1>(field)?[0])
    }

    fn u16(&mut self, field: &'static str) -> Result<u16, FormatError> {
        Ok(u16::from_le_bytes(self.array(field)?))
    }

    fn u32(&mut self, field: &'static str) -> Result<u32, FormatError> {
        Ok(u32::from_le_bytes(self.array(field)?))
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, FormatError> {
        Ok(u64::from_le_bytes(self.array(field)?))
    }

    fn name(&mut self, field: &'static str) -> Result<String, FormatError> {
        let len = self.u16(field)? as usize;
        let offset = self.pos;
        let raw = self.take(len, field)?;
        if raw.is_empty() {
            return Err(FormatError::EmptyName { offset });
        }
        std::str::from_utf8(raw)
            .map(str::to_string)
            .map_err(|_| FormatError::InvalidUtf8 { offset })
    }
}

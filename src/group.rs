//! Resource groups: named, ordered, append-only sets of records.

use sha2::{Digest, Sha256};

use crate::archive::codec;
use crate::error::StructuralError;
use crate::record::{ImageRecord, MAX_NAME_LEN};

/// A named collection of records packaged together as one catalog resource.
///
/// Records keep insertion order and names are unique. Once frozen the group
/// rejects further additions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroup {
    name: String,
    records: Vec<ImageRecord>,
    frozen: bool,
}

impl ResourceGroup {
    pub fn new(name: impl Into<String>) -> Result<Self, StructuralError> {
        let name = name.into();
        if name.is_empty() || name.len() > MAX_NAME_LEN {
            return Err(StructuralError::InvalidName { len: name.len() });
        }
        Ok(Self {
            name,
            records: Vec::new(),
            frozen: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Append a record. On error the group is left untouched.
    pub fn add_record(&mut self, record: ImageRecord) -> Result<(), StructuralError> {
        if self.get(record.name()).is_some() {
            return Err(StructuralError::DuplicateName {
                group: self.name.clone(),
                name: record.name().to_string(),
            });
        }
        if self.frozen {
            return Err(StructuralError::GroupFrozen {
                group: self.name.clone(),
            });
        }
        self.records.push(record);
        Ok(())
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ImageRecord> {
        self.records.iter()
    }

    pub fn get(&self, name: &str) -> Option<&ImageRecord> {
        self.records.iter().find(|r| r.name() == name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Content digest of the group's encoded form (sha256, lowercase hex).
    ///
    /// Used as the artifact store input key: any change to a name, dimension,
    /// format or pixel byte yields a different key.
    pub fn cache_key(&self) -> String {
        let mut encoded = Vec::new();
        codec::encode_group(self, &mut encoded);
        format!("{:x}", Sha256::digest(&encoded))
    }
}

impl<'a> IntoIterator for &'a ResourceGroup {
    type Item = &'a ImageRecord;
    type IntoIter = std::slice::Iter<'a, ImageRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::png_bytes;
    use crate::record::{validate, Candidate};

    fn record(name: &str) -> ImageRecord {
        validate(
            &Candidate::new(name)
                .with_size(4, 4)
                .with_data(png_bytes(name.as_bytes())),
        )
        .unwrap()
    }

    #[test]
    fn preserves_insertion_order() {
        let mut group = ResourceGroup::new("Signs").unwrap();
        for name in ["Stop", "Yield", "Exit"] {
            group.add_record(record(name)).unwrap();
        }
        let names: Vec<_> = group.iter().map(|r| r.name()).collect();
        assert_eq!(names, ["Stop", "Yield", "Exit"]);
        assert_eq!(group.len(), 3);
    }

    #[test]
    fn duplicate_name_does_not_mutate() {
        let mut group = ResourceGroup::new("Signs").unwrap();
        group.add_record(record("Stop")).unwrap();
        let before = group.clone();

        let err = group.add_record(record("Stop")).unwrap_err();
        assert_eq!(
            err,
            StructuralError::DuplicateName {
                group: "Signs".to_string(),
                name: "Stop".to_string()
            }
        );
        assert_eq!(group, before);
    }

    #[test]
    fn duplicate_in_frozen_group_reports_duplicate() {
        let mut group = ResourceGroup::new("Signs").unwrap();
        group.add_record(record("Stop")).unwrap();
        group.freeze();
        let before = group.clone();

        assert!(matches!(
            group.add_record(record("Stop")),
            Err(StructuralError::DuplicateName { .. })
        ));
        assert_eq!(group, before);
    }

    #[test]
    fn frozen_group_rejects_new_records() {
        let mut group = ResourceGroup::new("Logos").unwrap();
        group.freeze();
        assert!(group.is_frozen());
        assert_eq!(
            group.add_record(record("Icon")),
            Err(StructuralError::GroupFrozen {
                group: "Logos".to_string()
            })
        );
        assert!(group.is_empty());
    }

    #[test]
    fn rejects_empty_name() {
        assert_eq!(
            ResourceGroup::new(""),
            Err(StructuralError::InvalidName { len: 0 })
        );
    }

    #[test]
    fn cache_key_tracks_content() {
        let mut a = ResourceGroup::new("Logos").unwrap();
        a.add_record(record("Icon")).unwrap();
        let mut b = ResourceGroup::new("Logos").unwrap();
        b.add_record(record("Icon")).unwrap();
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key().len(), 64);

        b.add_record(record("Badge")).unwrap();
        assert_ne!(a.cache_key(), b.cache_key());

        // Freezing does not change the content.
        let before = a.cache_key();
        a.freeze();
        assert_eq!(a.cache_key(), before);
    }
}

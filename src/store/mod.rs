//! Content-addressed store for compiled catalogs and exported catalog trees.
//!
//! Layout under the store root:
//!
//! ```text
//! blobs/sha256/<aa>/<sha256>     blob bytes
//! index/<kind>/<input_key>.json  IndexEntry pointing at a blob
//! tmp/                           staging for atomic renames
//! locks/<kind>/<input_key>.lock  per-key advisory locks
//! ```
//!
//! The input key of a resource group is its [`cache_key`](crate::group::ResourceGroup::cache_key).
//! Callers check [`ArtifactStore::contains`] before compiling; the store never
//! decides on its own whether something needs rebuilding.

use anyhow::{bail, Context, Result};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tar::Builder as TarBuilder;
use time::OffsetDateTime;
use walkdir::WalkDir;

/// Store directory name under the user cache dir.
pub const DEFAULT_STORE_DIR: &str = "refpack";

/// Compiled asset catalog (`.car`) for one resource group.
pub const KIND_CAR: &str = "car";

/// Exported catalog directory of the groups attached uncompiled, as `tar.zst`.
pub const KIND_CATALOG: &str = "catalog";

/// Artifact encoding format stored as a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactFormat {
    /// A single file blob.
    File,
    /// A tar archive compressed with zstd.
    TarZst,
}

/// Index entry mapping an input key to a content-addressed blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    pub kind: String,
    pub input_key: String,
    pub blob_sha256: String,
    pub format: ArtifactFormat,
    pub size_bytes: u64,
    pub stored_at_unix: u64,
    #[serde(default)]
    pub meta: BTreeMap<String, serde_json::Value>,
}

/// A stored artifact resolved from the index.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub entry: IndexEntry,
    pub blob_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        let store = Self {
            root: root.to_path_buf(),
        };
        store
            .ensure_layout()
            .with_context(|| format!("Failed to initialize store at {}", root.display()))?;
        Ok(store)
    }

    /// Open the store under the user's cache directory (`<cache>/refpack`).
    pub fn open_default() -> Result<Self> {
        let cache = dirs::cache_dir().context("Could not determine the user cache directory")?;
        Self::open(&cache.join(DEFAULT_STORE_DIR))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_layout(&self) -> Result<()> {
        fs::create_dir_all(self.blobs_dir().join("sha256"))?;
        fs::create_dir_all(self.index_dir())?;
        fs::create_dir_all(self.tmp_dir())?;
        fs::create_dir_all(self.locks_dir())?;
        Ok(())
    }

    fn blobs_dir(&self) -> PathBuf {
        self.root.join("blobs")
    }

    fn index_dir(&self) -> PathBuf {
        self.root.join("index")
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    fn kind_dir(&self, kind: &str) -> Result<PathBuf> {
        validate_kind(kind)?;
        Ok(self.index_dir().join(kind))
    }

    fn index_path(&self, kind: &str, input_key: &str) -> Result<PathBuf> {
        validate_key(input_key)?;
        Ok(self.kind_dir(kind)?.join(format!("{}.json", input_key)))
    }

    fn lock_path(&self, kind: &str, input_key: &str) -> Result<PathBuf> {
        validate_kind(kind)?;
        validate_key(input_key)?;
        Ok(self
            .locks_dir()
            .join(kind)
            .join(format!("{}.lock", input_key)))
    }

    fn blob_path(&self, sha256: &str) -> Result<PathBuf> {
        validate_sha256(sha256)?;
        let prefix = &sha256[0..2];
        Ok(self.blobs_dir().join("sha256").join(prefix).join(sha256))
    }

    /// Get an artifact from the index if present.
    pub fn get(&self, kind: &str, input_key: &str) -> Result<Option<StoredArtifact>> {
        let index_path = self.index_path(kind, input_key)?;
        if !index_path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&index_path)
            .with_context(|| format!("Failed to read index {}", index_path.display()))?;
        let entry: IndexEntry = serde_json::from_slice(&bytes)
            .with_context(|| format!("Failed to parse index {}", index_path.display()))?;

        let blob_path = self.blob_path(&entry.blob_sha256)?;
        Ok(Some(StoredArtifact { entry, blob_path }))
    }

    /// True when an index entry exists and its blob is on disk.
    pub fn contains(&self, kind: &str, input_key: &str) -> Result<bool> {
        Ok(self
            .get(kind, input_key)?
            .is_some_and(|stored| stored.blob_path.is_file()))
    }

    /// Store in-memory bytes as a file blob and update the index.
    pub fn put_bytes(
        &self,
        kind: &str,
        input_key: &str,
        bytes: &[u8],
        meta: BTreeMap<String, serde_json::Value>,
    ) -> Result<String> {
        let _lock = self.acquire_lock(kind, input_key)?;

        let sha256 = format!("{:x}", Sha256::digest(bytes));
        let blob_path = self.blob_path(&sha256)?;
        if !blob_path.exists() {
            let tmp = self
                .tmp_dir()
                .join(tmp_name(&format!("blob-{}", &sha256[..16])));
            fs::write(&tmp, bytes)
                .with_context(|| format!("Failed to write {}", tmp.display()))?;
            atomic_rename(&tmp, &blob_path)?;
        }

        let entry = IndexEntry {
            kind: kind.to_string(),
            input_key: input_key.to_string(),
            blob_sha256: sha256.clone(),
            format: ArtifactFormat::File,
            size_bytes: bytes.len() as u64,
            stored_at_unix: now_unix(),
            meta,
        };
        self.write_index(kind, input_key, &entry)?;

        tracing::debug!(kind, input_key, sha256 = %sha256, "stored artifact");
        Ok(sha256)
    }

    /// Store a directory as a deterministic `tar.zst` blob and update the index.
    pub fn put_dir_as_tar_zst(
        &self,
        kind: &str,
        input_key: &str,
        src_dir: &Path,
        mut meta: BTreeMap<String, serde_json::Value>,
    ) -> Result<String> {
        if !src_dir.is_dir() {
            bail!("Source directory not found: {}", src_dir.display());
        }

        let _lock = self.acquire_lock(kind, input_key)?;

        let tmp_tar = self.tmp_dir().join(tmp_name("artifact.tar.zst"));
        create_tar_zst(src_dir, &tmp_tar)?;

        let (sha256, size_bytes) = sha256_file(&tmp_tar)?;
        let blob_path = self.blob_path(&sha256)?;

        if !blob_path.exists() {
            atomic_rename(&tmp_tar, &blob_path)?;
        } else {
            let _ = fs::remove_file(&tmp_tar);
        }

        meta.insert(
            "source_path".to_string(),
            serde_json::Value::String(src_dir.display().to_string()),
        );

        let entry = IndexEntry {
            kind: kind.to_string(),
            input_key: input_key.to_string(),
            blob_sha256: sha256.clone(),
            format: ArtifactFormat::TarZst,
            size_bytes,
            stored_at_unix: now_unix(),
            meta,
        };
        self.write_index(kind, input_key, &entry)?;

        Ok(sha256)
    }

    /// Read a file blob, verifying its hash. `Ok(None)` when not indexed.
    pub fn read_bytes(&self, kind: &str, input_key: &str) -> Result<Option<Vec<u8>>> {
        let Some(stored) = self.get(kind, input_key)? else {
            return Ok(None);
        };
        if stored.entry.format != ArtifactFormat::File {
            bail!(
                "{}:{} has format {:?}, expected file",
                kind,
                input_key,
                stored.entry.format
            );
        }

        let bytes = fs::read(&stored.blob_path)
            .with_context(|| format!("Failed to read blob {}", stored.blob_path.display()))?;
        let actual = format!("{:x}", Sha256::digest(&bytes));
        if actual != stored.entry.blob_sha256 {
            bail!(
                "Blob hash mismatch for {}:{}\n  expected: {}\n  actual:   {}",
                kind,
                input_key,
                stored.entry.blob_sha256,
                actual
            );
        }
        Ok(Some(bytes))
    }

    /// Materialize an artifact from the store into the requested destination.
    ///
    /// - `ArtifactFormat::File`: `dest` is a file path.
    /// - `ArtifactFormat::TarZst`: `dest` is a directory path.
    pub fn materialize_to(&self, kind: &str, input_key: &str, dest: &Path) -> Result<()> {
        let stored = self
            .get(kind, input_key)?
            .with_context(|| format!("No stored artifact for {kind}:{input_key}"))?;

        if !stored.blob_path.exists() {
            bail!(
                "Blob missing for index entry {}:{} (expected {})",
                kind,
                input_key,
                stored.blob_path.display()
            );
        }

        let (actual_sha, _sz) = sha256_file(&stored.blob_path)?;
        if actual_sha != stored.entry.blob_sha256 {
            bail!(
                "Blob hash mismatch for {}:{}\n  expected: {}\n  actual:   {}",
                kind,
                input_key,
                stored.entry.blob_sha256,
                actual_sha
            );
        }

        match stored.entry.format {
            ArtifactFormat::File => materialize_file(&stored.blob_path, dest),
            ArtifactFormat::TarZst => materialize_tar_zst_dir(&stored.blob_path, dest),
        }
    }

    /// List index entries for a kind, newest first.
    pub fn list_kind(&self, kind: &str) -> Result<Vec<IndexEntry>> {
        let dir = self.kind_dir(kind)?;
        if !dir.exists() {
            return Ok(vec![]);
        }

        let mut out = vec![];
        for ent in
            fs::read_dir(&dir).with_context(|| format!("Failed to read {}", dir.display()))?
        {
            let path = ent?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path)?;
            let entry: IndexEntry = serde_json::from_slice(&bytes)
                .with_context(|| format!("Failed to parse index {}", path.display()))?;
            out.push(entry);
        }

        out.sort_by(|a, b| {
            b.stored_at_unix
                .cmp(&a.stored_at_unix)
                .then_with(|| a.input_key.cmp(&b.input_key))
        });
        Ok(out)
    }

    /// Remove blobs not referenced by any index entry. Returns the count removed.
    pub fn gc(&self) -> Result<usize> {
        let referenced = self.collect_referenced_blobs()?;

        let blobs_root = self.blobs_dir().join("sha256");
        if !blobs_root.exists() {
            return Ok(0);
        }

        let mut removed = 0usize;
        for ent in WalkDir::new(&blobs_root).into_iter().filter_map(Result::ok) {
            if !ent.file_type().is_file() {
                continue;
            }
            let name = ent.file_name().to_string_lossy().to_string();
            if !is_hex_64(&name) || referenced.contains(&name) {
                continue;
            }
            fs::remove_file(ent.path()).with_context(|| {
                format!(
                    "Failed to remove unreferenced blob {}",
                    ent.path().display()
                )
            })?;
            removed += 1;
        }

        tracing::info!(removed, "store gc finished");
        Ok(removed)
    }

    /// Keep only the newest `keep_last` index entries per kind.
    /// Returns the number of index entries removed.
    pub fn prune_keep_last(&self, keep_last: usize) -> Result<usize> {
        if keep_last == 0 {
            bail!("keep_last must be >= 1");
        }

        let mut removed = 0usize;
        for kind in self.list_kinds()? {
            for entry in self.list_kind(&kind)?.iter().skip(keep_last) {
                let path = self.index_path(&kind, &entry.input_key)?;
                if path.exists() {
                    fs::remove_file(&path)?;
                    removed += 1;
                }
            }
        }

        Ok(removed)
    }

    pub fn status(&self) -> Result<StoreStatus> {
        let referenced = self.collect_referenced_blobs()?;
        let mut blob_bytes = 0u64;
        let mut blob_files = 0u64;
        for sha in &referenced {
            if let Ok(md) = fs::metadata(self.blob_path(sha)?) {
                blob_files += 1;
                blob_bytes += md.len();
            }
        }

        let mut index_files = 0u64;
        let idx = self.index_dir();
        if idx.exists() {
            for ent in WalkDir::new(&idx).into_iter().filter_map(Result::ok) {
                if ent.file_type().is_file()
                    && ent.path().extension().and_then(|s| s.to_str()) == Some("json")
                {
                    index_files += 1;
                }
            }
        }

        Ok(StoreStatus {
            root: self.root.clone(),
            index_entries: index_files,
            referenced_blobs: blob_files,
            referenced_bytes: blob_bytes,
        })
    }

    fn write_index(&self, kind: &str, input_key: &str, entry: &IndexEntry) -> Result<()> {
        fs::create_dir_all(self.kind_dir(kind)?)?;
        let path = self.index_path(kind, input_key)?;

        let bytes = serde_json::to_vec_pretty(entry)?;
        let tmp = self.tmp_dir().join(tmp_name("index.json"));
        fs::write(&tmp, bytes)?;
        atomic_rename(&tmp, &path)?;
        Ok(())
    }

    fn collect_referenced_blobs(&self) -> Result<BTreeSet<String>> {
        let idx = self.index_dir();
        let mut out = BTreeSet::new();
        if !idx.exists() {
            return Ok(out);
        }

        for ent in WalkDir::new(&idx).into_iter().filter_map(Result::ok) {
            if !ent.file_type().is_file()
                || ent.path().extension().and_then(|s| s.to_str()) != Some("json")
            {
                continue;
            }
            // Unreadable entries keep nothing alive.
            let Ok(bytes) = fs::read(ent.path()) else {
                continue;
            };
            let Ok(entry) = serde_json::from_slice::<IndexEntry>(&bytes) else {
                continue;
            };
            if is_hex_64(&entry.blob_sha256) {
                out.insert(entry.blob_sha256);
            }
        }
        Ok(out)
    }

    fn list_kinds(&self) -> Result<Vec<String>> {
        let idx = self.index_dir();
        if !idx.exists() {
            return Ok(vec![]);
        }
        let mut out = vec![];
        for ent in fs::read_dir(&idx)? {
            let ent = ent?;
            if ent.file_type()?.is_dir() {
                if let Some(s) = ent.file_name().to_str() {
                    out.push(s.to_string());
                }
            }
        }
        out.sort();
        Ok(out)
    }

    fn acquire_lock(&self, kind: &str, input_key: &str) -> Result<ArtifactLock> {
        let lock_path = self.lock_path(kind, input_key)?;
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Never unlink a lock file we don't hold: a second process could then
        // lock a fresh file at the same path.
        let lock_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;

        if lock_file.try_lock_exclusive().is_err() {
            drop(lock_file);
            bail!(
                "Artifact store key is locked by another process: {}",
                lock_path.display()
            );
        }

        Ok(ArtifactLock {
            _file: lock_file,
            path: lock_path,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StoreStatus {
    pub root: PathBuf,
    pub index_entries: u64,
    pub referenced_blobs: u64,
    pub referenced_bytes: u64,
}

/// RAII guard: unlocks and removes the lock file on drop.
#[derive(Debug)]
struct ArtifactLock {
    _file: File,
    path: PathBuf,
}

impl Drop for ArtifactLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn now_unix() -> u64 {
    OffsetDateTime::now_utc().unix_timestamp().max(0) as u64
}

fn tmp_name(prefix: &str) -> String {
    let n = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{prefix}-{}-{n}", std::process::id())
}

fn atomic_rename(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            // EXDEV and friends: copy then remove.
            fs::copy(src, dst).with_context(|| {
                format!("Failed to copy {} to {}", src.display(), dst.display())
            })?;
            fs::remove_file(src)
                .with_context(|| format!("Failed to remove tmp {}", src.display()))?;
            Ok(())
        }
    }
}

fn sha256_file(path: &Path) -> Result<(String, u64)> {
    let f = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut r = BufReader::new(f);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    let mut size = 0u64;
    loop {
        let n = r.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        size += n as u64;
    }
    Ok((format!("{:x}", hasher.finalize()), size))
}

fn validate_kind(kind: &str) -> Result<()> {
    if kind.is_empty() {
        bail!("artifact kind must not be empty");
    }
    if kind.contains('/') || kind.contains('\\') || kind.contains("..") {
        bail!("artifact kind must be a safe filename segment: {kind}");
    }
    Ok(())
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        bail!("artifact input key must not be empty");
    }
    if key.contains('/') || key.contains('\\') || key.contains("..") {
        bail!("artifact input key must be a safe filename segment");
    }
    Ok(())
}

fn validate_sha256(sha256: &str) -> Result<()> {
    if !is_hex_64(sha256) {
        bail!("invalid sha256: {sha256}");
    }
    Ok(())
}

fn is_hex_64(s: &str) -> bool {
    s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn materialize_file(blob: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    if dest.exists() {
        fs::remove_file(dest)
            .with_context(|| format!("Failed to remove existing {}", dest.display()))?;
    }

    let tmp = dest.with_extension("tmp");
    fs::copy(blob, &tmp).with_context(|| {
        format!(
            "Failed to copy blob {} to {}",
            blob.display(),
            tmp.display()
        )
    })?;
    atomic_rename(&tmp, dest)
}

fn materialize_tar_zst_dir(blob: &Path, dest_dir: &Path) -> Result<()> {
    if dest_dir.exists() {
        fs::remove_dir_all(dest_dir)
            .with_context(|| format!("Failed to remove {}", dest_dir.display()))?;
    }

    let parent = dest_dir.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let tmp = parent.join(tmp_name("extract"));
    fs::create_dir_all(&tmp)?;

    let f = File::open(blob)?;
    let decoder = zstd::stream::Decoder::new(f)?;
    let mut archive = tar::Archive::new(decoder);
    archive
        .unpack(&tmp)
        .with_context(|| format!("Failed to unpack {}", blob.display()))?;

    fs::rename(&tmp, dest_dir).with_context(|| {
        format!(
            "Failed to move extracted dir {} to {}",
            tmp.display(),
            dest_dir.display()
        )
    })?;

    Ok(())
}

/// Pack `src_dir` into a reproducible `tar.zst`: sorted entries, zeroed
/// mtimes and owners, regular files and directories only.
fn create_tar_zst(src_dir: &Path, out_path: &Path) -> Result<()> {
    let out = File::create(out_path)
        .with_context(|| format!("Failed to create {}", out_path.display()))?;
    let encoder = zstd::stream::Encoder::new(out, 3)?;
    let mut builder = TarBuilder::new(encoder);

    let mut entries: Vec<PathBuf> = WalkDir::new(src_dir)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .map(|ent| ent.into_path())
        .filter(|p| p != src_dir)
        .collect();
    entries.sort();

    for p in entries {
        let rel = p
            .strip_prefix(src_dir)
            .unwrap_or(&p)
            .to_string_lossy()
            .replace('\\', "/");

        let md = fs::symlink_metadata(&p)?;
        let mut header = tar::Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);

        if md.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(0o755);
            header.set_cksum();
            builder.append_data(&mut header, rel, std::io::empty())?;
        } else if md.is_file() {
            let mut f = File::open(&p)?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(md.len());
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, rel, &mut f)?;
        }
    }

    let encoder = builder
        .into_inner()
        .context("Failed to finalize tar builder")?;
    encoder.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn bytes_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::open(&tmp.path().join("store")).unwrap();
        let key = "a".repeat(64);

        assert!(!store.contains(KIND_CAR, &key).unwrap());
        assert_eq!(store.read_bytes(KIND_CAR, &key).unwrap(), None);

        let sha = store
            .put_bytes(KIND_CAR, &key, b"compiled", BTreeMap::new())
            .unwrap();
        assert!(is_hex_64(&sha));
        assert!(store.contains(KIND_CAR, &key).unwrap());
        assert_eq!(
            store.read_bytes(KIND_CAR, &key).unwrap().as_deref(),
            Some(&b"compiled"[..])
        );
    }

    #[test]
    fn corrupted_blob_is_detected() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::open(tmp.path()).unwrap();
        store
            .put_bytes(KIND_CAR, "logos", b"compiled", BTreeMap::new())
            .unwrap();

        let stored = store.get(KIND_CAR, "logos").unwrap().unwrap();
        fs::write(&stored.blob_path, b"tampered").unwrap();

        let err = store.read_bytes(KIND_CAR, "logos").unwrap_err();
        assert!(err.to_string().contains("Blob hash mismatch"));
    }

    #[test]
    fn file_materializes_to_path() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::open(&tmp.path().join("store")).unwrap();

        let mut meta = BTreeMap::new();
        meta.insert("group".to_string(), serde_json::json!("Logos"));
        store
            .put_bytes(KIND_CAR, "deadbeef", b"hello", meta)
            .unwrap();

        let dest = tmp.path().join("out/Assets.car");
        store.materialize_to(KIND_CAR, "deadbeef", &dest).unwrap();
        assert_eq!(fs::read(&dest).unwrap(), b"hello");

        let entry = &store.list_kind(KIND_CAR).unwrap()[0];
        assert_eq!(entry.meta["group"], "Logos");
    }

    #[test]
    fn dir_tar_zst_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::open(&tmp.path().join("store")).unwrap();

        let src_dir = tmp.path().join("Logos.arresourcegroup");
        fs::create_dir_all(src_dir.join("Icon.arreferenceimage")).unwrap();
        fs::write(src_dir.join("Contents.json"), b"{}").unwrap();
        fs::write(src_dir.join("Icon.arreferenceimage/Icon.png"), b"png").unwrap();

        let first = store
            .put_dir_as_tar_zst(KIND_CATALOG, "cafebabe", &src_dir, BTreeMap::new())
            .unwrap();
        let second = store
            .put_dir_as_tar_zst(KIND_CATALOG, "cafebabe", &src_dir, BTreeMap::new())
            .unwrap();
        assert_eq!(first, second, "tar.zst output must be reproducible");

        let dest_dir = tmp.path().join("restored");
        store
            .materialize_to(KIND_CATALOG, "cafebabe", &dest_dir)
            .unwrap();
        assert_eq!(
            fs::read(dest_dir.join("Icon.arreferenceimage/Icon.png")).unwrap(),
            b"png"
        );
    }

    #[test]
    fn gc_and_prune() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::open(tmp.path()).unwrap();

        store
            .put_bytes(KIND_CAR, "one", b"first", BTreeMap::new())
            .unwrap();
        store
            .put_bytes(KIND_CAR, "two", b"second", BTreeMap::new())
            .unwrap();
        assert_eq!(store.status().unwrap().index_entries, 2);

        assert_eq!(store.prune_keep_last(1).unwrap(), 1);
        assert_eq!(store.list_kind(KIND_CAR).unwrap().len(), 1);
        assert_eq!(store.gc().unwrap(), 1);

        let status = store.status().unwrap();
        assert_eq!(status.index_entries, 1);
        assert_eq!(status.referenced_blobs, 1);
        assert!(store.prune_keep_last(0).is_err());
    }

    #[test]
    fn rejects_unsafe_keys() {
        let tmp = TempDir::new().unwrap();
        let store = ArtifactStore::open(tmp.path()).unwrap();
        assert!(store.get(KIND_CAR, "../escape").is_err());
        assert!(store.get("a/b", "key").is_err());
        assert!(store
            .put_bytes(KIND_CAR, "", b"x", BTreeMap::new())
            .is_err());
    }
}

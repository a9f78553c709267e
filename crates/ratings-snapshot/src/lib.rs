//! Named on-disk snapshots of the record store.
//!
//! A snapshot is one JSON document, `{"ver": 5, "data": {...}}`,
//! living under a flat directory; this crate is the only writer of
//! that representation. The directory is scanned once on open and the
//! tracked entry set (name, mtime, path) is kept in memory so listing
//! never re-reads files.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use ratings_core::query::{Criterion, DateRange};
use ratings_core::store::{ChannelBucket, ConflictPolicy, Store};

/// Version tag written into every snapshot; any other value on read is
/// a hard failure, there is no migration path.
pub const FORMAT_VERSION: u32 = 5;

/// Hard ceiling on tracked snapshots per directory.
pub const MAX_ENTRIES: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("entry not found")]
    NotFound,
    #[error("bad entry name (expected only letters, digits, '_' or '-')")]
    NameInvalid,
    #[error("entry '{0}' already exists")]
    AlreadyExists(String),
    #[error("entry count limit ({MAX_ENTRIES}) reached")]
    EntryLimitReached,
    #[error("entry has incompatible data format: version {found}, expected {FORMAT_VERSION}")]
    IncompatibleFormat { found: i64 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// How `write` treats an existing (or missing) entry of the same name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMethod {
    /// Create; fails on an existing name or a full directory.
    New,
    /// Replace an existing entry's contents with the live store.
    Overwrite,
    /// Merge the existing snapshot with the live store, later
    /// `captured_at` winning per record, and write the result back.
    Update,
}

impl WriteMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Overwrite => "overwrite",
            Self::Update => "update",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(Self::New),
            "overwrite" => Some(Self::Overwrite),
            "update" => Some(Self::Update),
            _ => None,
        }
    }
}

/// Restriction applied to the store as it is written: an inclusive
/// posted-at range and/or a single channel. Channels not matching are
/// dropped from the written snapshot entirely, not merely emptied.
#[derive(Debug, Clone, Default)]
pub struct WriteFilter {
    pub date0: Option<OffsetDateTime>,
    pub date1: Option<OffsetDateTime>,
    pub channel: Option<String>,
}

impl WriteFilter {
    #[must_use]
    fn is_unrestricted(&self) -> bool {
        self.date0.is_none() && self.date1.is_none() && self.channel.is_none()
    }

    #[must_use]
    fn apply(&self, store: &Store) -> Store {
        if self.is_unrestricted() {
            return store.clone();
        }
        let range = DateRange {
            date0: self.date0.unwrap_or(OffsetDateTime::UNIX_EPOCH),
            date1: self.date1.unwrap_or_else(OffsetDateTime::now_utc),
        };
        let mut filtered = Store::new();
        for (channel_id, bucket) in &store.channels {
            if self.channel.as_deref().is_some_and(|wanted| wanted != channel_id) {
                continue;
            }
            let records =
                bucket.records.iter().filter(|record| range.filter(record)).cloned().collect();
            filtered.channels.insert(
                channel_id.clone(),
                ChannelBucket { name: bucket.name.clone(), records },
            );
        }
        filtered
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDocument {
    ver: u32,
    data: Store,
}

#[derive(Debug, Deserialize)]
struct VersionProbe {
    #[serde(default)]
    ver: i64,
}

/// One tracked directory entry.
#[derive(Debug, Clone)]
pub struct SnapshotEntry {
    pub name: String,
    pub modified_at: OffsetDateTime,
    path: PathBuf,
}

/// The snapshot directory and its tracked entries.
#[derive(Debug)]
pub struct SnapshotStore {
    dir: PathBuf,
    entries: Vec<SnapshotEntry>,
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
}

impl SnapshotStore {
    /// Open (creating if missing) a snapshot directory and scan its
    /// `*.json` entries. Files whose stem fails the name pattern are
    /// silently excluded from tracking but left on disk.
    ///
    /// # Errors
    /// I/O failures creating or reading the directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, SnapshotError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&dir)? {
            let dirent = dirent?;
            let path = dirent.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                continue;
            };
            if !valid_name(name) {
                tracing::debug!(file = %path.display(), "skipping badly named snapshot file");
                continue;
            }
            let modified_at = OffsetDateTime::from(dirent.metadata()?.modified()?);
            entries.push(SnapshotEntry { name: name.to_string(), modified_at, path });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self { dir, entries })
    }

    #[must_use]
    pub fn list(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    /// Deserialize a tracked snapshot into a store.
    ///
    /// # Errors
    /// `NotFound` for untracked names; `IncompatibleFormat` when the
    /// stored version tag differs from [`FORMAT_VERSION`]; I/O and
    /// JSON failures otherwise.
    pub fn read(&self, name: &str) -> Result<Store, SnapshotError> {
        let entry = self.find(name).ok_or(SnapshotError::NotFound)?;
        read_document(&entry.path)
    }

    /// Write the (filtered) store under `name` according to `method`.
    /// See [`WriteMethod`] for the outcome matrix.
    ///
    /// # Errors
    /// `NameInvalid`, `AlreadyExists`, `NotFound`, `EntryLimitReached`
    /// per the method contract; I/O and JSON failures otherwise.
    pub fn write(
        &mut self,
        name: &str,
        method: WriteMethod,
        store: &Store,
        filter: &WriteFilter,
    ) -> Result<(), SnapshotError> {
        if !valid_name(name) {
            return Err(SnapshotError::NameInvalid);
        }

        if let Some(entry) = self.find(name) {
            let path = entry.path.clone();
            match method {
                WriteMethod::New => {
                    return Err(SnapshotError::AlreadyExists(name.to_string()));
                }
                WriteMethod::Overwrite => {
                    write_document(&path, &filter.apply(store))?;
                }
                WriteMethod::Update => {
                    let on_disk = read_document(&path)?;
                    let merged = Store::merge(
                        &on_disk,
                        &filter.apply(store),
                        ConflictPolicy::LatestCaptured,
                    );
                    write_document(&path, &merged)?;
                }
            }
            self.touch(name)?;
            return Ok(());
        }

        if method != WriteMethod::New {
            return Err(SnapshotError::NotFound);
        }
        if self.entries.len() + 1 > MAX_ENTRIES {
            return Err(SnapshotError::EntryLimitReached);
        }

        let path = self.dir.join(format!("{name}.json"));
        write_document(&path, &filter.apply(store))?;
        let modified_at = OffsetDateTime::from(fs::metadata(&path)?.modified()?);
        self.entries.push(SnapshotEntry { name: name.to_string(), modified_at, path });
        self.entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(())
    }

    /// Delete the entry's file and stop tracking it.
    ///
    /// # Errors
    /// `NotFound` for untracked names; I/O failures otherwise.
    pub fn remove(&mut self, name: &str) -> Result<(), SnapshotError> {
        let index = self
            .entries
            .iter()
            .position(|entry| entry.name == name)
            .ok_or(SnapshotError::NotFound)?;
        fs::remove_file(&self.entries[index].path)?;
        self.entries.remove(index);
        Ok(())
    }

    fn find(&self, name: &str) -> Option<&SnapshotEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    fn touch(&mut self, name: &str) -> Result<(), SnapshotError> {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.name == name) {
            entry.modified_at = OffsetDateTime::from(fs::metadata(&entry.path)?.modified()?);
        }
        Ok(())
    }
}

/// Read one store document (the snapshot file format) from an
/// arbitrary path, outside the tracked directory. Used for the live
/// store file a CLI process persists between invocations.
///
/// # Errors
/// `IncompatibleFormat` on a version tag mismatch; I/O and JSON
/// failures otherwise.
pub fn read_store_file(path: &Path) -> Result<Store, SnapshotError> {
    read_document(path)
}

/// Counterpart of [`read_store_file`]: whole-file rewrite through a
/// temporary sibling and rename.
///
/// # Errors
/// I/O and JSON failures.
pub fn write_store_file(path: &Path, store: &Store) -> Result<(), SnapshotError> {
    write_document(path, store)
}

fn read_document(path: &Path) -> Result<Store, SnapshotError> {
    let body = fs::read_to_string(path)?;
    let probe: VersionProbe = serde_json::from_str(&body)?;
    if probe.ver != i64::from(FORMAT_VERSION) {
        return Err(SnapshotError::IncompatibleFormat { found: probe.ver });
    }
    let document: SnapshotDocument = serde_json::from_str(&body)?;
    Ok(document.data)
}

/// Whole-file rewrite through a temporary sibling and a rename, so a
/// failure mid-write leaves the previous snapshot intact.
fn write_document(path: &Path, store: &Store) -> Result<(), SnapshotError> {
    let document = SnapshotDocument { ver: FORMAT_VERSION, data: store.clone() };
    let dir = path.parent().map_or_else(|| PathBuf::from("."), Path::to_path_buf);
    let mut scratch = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut scratch, &document)?;
    scratch.flush()?;
    scratch.persist(path).map_err(|err| SnapshotError::Io(err.error))?;
    Ok(())
}

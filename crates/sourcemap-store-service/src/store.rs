//! The descriptor-keyed entry store.
//!
//! The store keeps one ordered collection of entries per [`EntryKind`](crate::types::EntryKind).
//! Insertion order is authoritative: it is the order entries are evicted in when a retention
//! group grows over its limit.
//!
//! Every mutation rewrites the whole database file before it returns. A crash in the middle of
//! a write can leave a truncated file behind, there is no recovery for that.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::config::RetentionLimit;
use crate::types::{AppDescriptor, Descriptor, Entry, EntryKind, Snapshot};

/// An error returned by the [`EntryStore`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// There is no entry for the requested descriptor.
    #[error("{kind} source map for {descriptor} does not exist in database")]
    NotFound {
        kind: EntryKind,
        descriptor: String,
    },
    #[error("failed to read database file {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse database file {}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write database file {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Source map entries persisted as a single JSON document.
#[derive(Debug)]
pub struct EntryStore {
    path: PathBuf,
    snapshot: Snapshot,
}

impl EntryStore {
    /// Opens the database at `path`.
    ///
    /// If the file does not exist yet, it is created along with its parent directory and
    /// initialized with `seed`, or an empty database.
    pub fn open(path: impl Into<PathBuf>, seed: Option<Snapshot>) -> Result<Self, StoreError> {
        let path = path.into();

        if path.exists() {
            tracing::debug!(path = %path.display(), "Loading source map database");
            let contents = fs::read(&path).map_err(|source| StoreError::Read {
                path: path.clone(),
                source,
            })?;
            let snapshot =
                serde_json::from_slice(&contents).map_err(|source| StoreError::Corrupt {
                    path: path.clone(),
                    source,
                })?;
            return Ok(Self { path, snapshot });
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: path.clone(),
                source,
            })?;
        }

        let store = Self {
            path,
            snapshot: seed.unwrap_or_default(),
        };
        write_snapshot(&store.path, &store.snapshot)?;
        tracing::info!(path = %store.path.display(), "Created new source map database");

        Ok(store)
    }

    /// The path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a copy of the complete database.
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.clone()
    }

    /// Checks whether an entry exists for exactly this descriptor.
    pub fn exists<D: Descriptor>(&self, descriptor: &D) -> bool {
        D::entries(&self.snapshot)
            .iter()
            .any(|entry| entry.descriptor == *descriptor)
    }

    /// Returns the entry stored for `descriptor`.
    ///
    /// Fails with [`StoreError::NotFound`] if there is none. Use [`exists`](Self::exists) to
    /// check beforehand.
    pub fn get<D: Descriptor>(&self, descriptor: &D) -> Result<Entry<D>, StoreError> {
        D::entries(&self.snapshot)
            .iter()
            .find(|entry| entry.descriptor == *descriptor)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                kind: D::KIND,
                descriptor: descriptor.to_string(),
            })
    }

    /// Returns all entries of the given retention group, oldest first.
    pub fn get_group<D: Descriptor>(&self, group: &AppDescriptor) -> Vec<Entry<D>> {
        D::entries(&self.snapshot)
            .iter()
            .filter(|entry| entry.descriptor.app_descriptor() == group)
            .cloned()
            .collect()
    }

    /// Appends an entry and persists the database.
    pub fn add<D: Descriptor>(&mut self, entry: Entry<D>) -> Result<Entry<D>, StoreError> {
        self.commit(|snapshot| D::entries_mut(snapshot).push(entry.clone()))?;
        Ok(entry)
    }

    /// Removes the first entry equal to `entry` and persists the database.
    pub fn delete<D: Descriptor>(&mut self, entry: &Entry<D>) -> Result<Entry<D>, StoreError> {
        self.commit(|snapshot| {
            let entries = D::entries_mut(snapshot);
            if let Some(index) = entries.iter().position(|e| e == entry) {
                entries.remove(index);
            }
        })?;
        Ok(entry.clone())
    }

    /// Makes room for one more entry in the given retention group.
    ///
    /// If the group already holds `limit` or more entries, the oldest one is deleted and
    /// returned so that the caller can remove its source map file. At most one entry is evicted
    /// per call. Reads never affect the eviction order.
    pub fn evict_oldest<D: Descriptor>(
        &mut self,
        group: &AppDescriptor,
        limit: RetentionLimit,
    ) -> Result<Option<Entry<D>>, StoreError> {
        self.commit(|snapshot| evict_oldest_entry(snapshot, group, limit))
    }

    /// Evicts the oldest entry of the group of `entry` if needed, then appends `entry`.
    ///
    /// Both changes are persisted with a single write. If that write fails, the store is left
    /// exactly as it was. Returns the evicted entry, if any.
    pub fn insert<D: Descriptor>(
        &mut self,
        entry: Entry<D>,
        limit: RetentionLimit,
    ) -> Result<Option<Entry<D>>, StoreError> {
        self.commit(|snapshot| {
            let group = entry.descriptor.app_descriptor().clone();
            let evicted = evict_oldest_entry(snapshot, &group, limit);
            D::entries_mut(snapshot).push(entry);
            evicted
        })
    }

    /// Applies `mutate` to a copy of the database and persists that copy.
    ///
    /// The in-memory state is only replaced once the write succeeded.
    fn commit<T>(&mut self, mutate: impl FnOnce(&mut Snapshot) -> T) -> Result<T, StoreError> {
        let mut snapshot = self.snapshot.clone();
        let result = mutate(&mut snapshot);
        write_snapshot(&self.path, &snapshot)?;
        self.snapshot = snapshot;
        Ok(result)
    }
}

fn evict_oldest_entry<D: Descriptor>(
    snapshot: &mut Snapshot,
    group: &AppDescriptor,
    limit: RetentionLimit,
) -> Option<Entry<D>> {
    let entries = D::entries_mut(snapshot);
    let mut members = entries
        .iter()
        .enumerate()
        .filter(|(_, entry)| entry.descriptor.app_descriptor() == group)
        .map(|(index, _)| index);
    let oldest = members.next()?;
    let len = 1 + members.count();
    if !limit.is_reached(len) {
        return None;
    }

    let oldest = entries.remove(oldest);
    tracing::debug!(
        kind = %D::KIND,
        descriptor = %oldest.descriptor,
        blob = %oldest.blob_id,
        "Evicting oldest source map"
    );
    Some(oldest)
}

fn write_snapshot(path: &Path, snapshot: &Snapshot) -> Result<(), StoreError> {
    tracing::trace!(path = %path.display(), "Writing source map database");
    let contents = serde_json::to_vec(snapshot).map_err(|source| StoreError::Corrupt {
        path: path.to_owned(),
        source,
    })?;
    fs::write(path, contents).map_err(|source| StoreError::Write {
        path: path.to_owned(),
        source,
    })
}

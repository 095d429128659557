//! The source map store service.
//!
//! [`SourceMapStore`] ties the [`EntryStore`] and the [`BlobStore`] together and implements the
//! operations exposed over HTTP: uploading, fetching and copying source maps, as well as
//! symbolicating stack traces with them.
//!
//! The entry store sits behind a mutex. All bookkeeping of a single operation, including
//! retention and the database write, happens while holding it, but no file I/O on source maps
//! does.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::io::AsyncRead;
use tokio::task::JoinError;

use crate::blobs::BlobStore;
use crate::config::{Config, RetentionLimit};
use crate::stacktrace::{parse_stacktrace, render_stacktrace};
use crate::store::{EntryStore, StoreError};
use crate::symbolication::{SymbolicationError, symbolicate_frames};
use crate::types::{BlobId, CodePushDescriptor, Descriptor, Entry, EntryKind, Snapshot};

/// An error returned by the [`SourceMapStore`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("failed to access source map file")]
    Blob(#[from] io::Error),
    #[error(transparent)]
    Symbolication(#[from] SymbolicationError),
    #[error("symbolication task failed")]
    Task(#[from] JoinError),
}

impl ServiceError {
    /// Whether the requested descriptor does not have an entry.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::Store(StoreError::NotFound { .. }))
    }
}

#[derive(Debug)]
struct Inner {
    db: Mutex<EntryStore>,
    blobs: BlobStore,
    max_container_maps: RetentionLimit,
    max_codepush_maps: RetentionLimit,
}

impl Inner {
    fn retention_limit(&self, kind: EntryKind) -> RetentionLimit {
        match kind {
            EntryKind::Container => self.max_container_maps,
            EntryKind::CodePush => self.max_codepush_maps,
        }
    }

    /// Locks the entry store.
    ///
    /// A panic while holding the lock cannot leave a half-applied change behind, since the
    /// store only swaps in a new state after it has been persisted. A poisoned lock is
    /// therefore still safe to use.
    fn db(&self) -> MutexGuard<'_, EntryStore> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an entry for `descriptor`, evicting the oldest entry of its group if needed.
    ///
    /// Returns the new entry and the evicted one, whose source map file still has to be
    /// removed.
    fn insert<D: Descriptor>(
        &self,
        descriptor: D,
        blob_id: BlobId,
    ) -> Result<(Entry<D>, Option<Entry<D>>), StoreError> {
        let limit = self.retention_limit(D::KIND);
        let entry = Entry::new(descriptor, blob_id);
        let evicted = self.db().insert(entry.clone(), limit)?;
        Ok((entry, evicted))
    }

    fn get<D: Descriptor>(&self, descriptor: &D) -> Result<Entry<D>, StoreError> {
        self.db().get(descriptor)
    }

    async fn remove_evicted<D: Descriptor>(&self, evicted: Option<Entry<D>>) {
        let Some(evicted) = evicted else {
            return;
        };

        metric!(counter("sourcemaps.evicted") += 1, "kind" => D::KIND.as_str());
        if let Err(err) = self.blobs.remove(&evicted.blob_id).await {
            tracing::warn!(
                error = &err as &dyn std::error::Error,
                blob = %evicted.blob_id,
                "Failed to remove evicted source map file"
            );
        }
    }
}

/// Stores source maps per build and symbolicates stack traces with them.
///
/// Cloning is cheap, all clones share the same state.
#[derive(Clone, Debug)]
pub struct SourceMapStore {
    inner: Arc<Inner>,
}

impl SourceMapStore {
    /// Opens the store at the locations given by `config`.
    ///
    /// Missing directories and the database file are created. Fails if the database cannot be
    /// read or created.
    pub fn create(config: &Config) -> Result<Self, ServiceError> {
        let paths = config.store_paths();
        std::fs::create_dir_all(&paths.sourcemaps)?;
        let db = EntryStore::open(&paths.db, config.db_seed.clone())?;

        tracing::info!(
            db = %paths.db.display(),
            sourcemaps = %paths.sourcemaps.display(),
            max_container_maps = %config.max_container_maps,
            max_codepush_maps = %config.max_codepush_maps,
            "Opened source map store"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                db: Mutex::new(db),
                blobs: BlobStore::new(paths.sourcemaps),
                max_container_maps: config.retention_limit(EntryKind::Container),
                max_codepush_maps: config.retention_limit(EntryKind::CodePush),
            }),
        })
    }

    /// Returns a copy of all stored entries.
    pub fn snapshot(&self) -> Snapshot {
        self.inner.db().snapshot()
    }

    /// Checks whether a source map is stored for `descriptor`.
    pub fn exists<D: Descriptor>(&self, descriptor: &D) -> bool {
        self.inner.db().exists(descriptor)
    }

    /// Stores the source map read from `reader` for `descriptor`.
    ///
    /// If the retention group of the descriptor is full, its oldest entry and source map are
    /// removed first. Uploading for a descriptor that already has an entry adds another one,
    /// lookups keep returning the older entry until it is evicted.
    pub async fn upload<D, R>(&self, descriptor: D, reader: &mut R) -> Result<Entry<D>, ServiceError>
    where
        D: Descriptor,
        R: AsyncRead + Unpin + ?Sized,
    {
        let blob_id = BlobId::generate();
        let size = self.inner.blobs.write(&blob_id, reader).await?;

        let (entry, evicted) = match self.inner.insert(descriptor, blob_id.clone()) {
            Ok(inserted) => inserted,
            Err(err) => {
                self.inner.blobs.remove(&blob_id).await.ok();
                return Err(err.into());
            }
        };

        tracing::info!(
            kind = %D::KIND,
            descriptor = %entry.descriptor,
            blob = %entry.blob_id,
            size,
            "Stored source map"
        );
        metric!(counter("sourcemaps.uploaded") += 1, "kind" => D::KIND.as_str());
        metric!(time_raw("sourcemaps.upload_size") = size, "kind" => D::KIND.as_str());

        self.inner.remove_evicted(evicted).await;
        Ok(entry)
    }

    /// Returns the contents of the source map stored for `descriptor`.
    pub async fn fetch<D: Descriptor>(&self, descriptor: &D) -> Result<Vec<u8>, ServiceError> {
        let entry = self.inner.get(descriptor)?;
        Ok(self.inner.blobs.read(&entry.blob_id).await?)
    }

    /// Stores a copy of the code push source map of `from` for `to`.
    ///
    /// The source map file is duplicated before the new entry is added, so a failed copy leaves
    /// the database untouched. If adding the entry fails, the duplicate is removed again.
    /// Retention applies to the group of `to`. The entry of `from` is never modified.
    pub async fn copy_code_push(
        &self,
        from: &CodePushDescriptor,
        to: CodePushDescriptor,
    ) -> Result<Entry<CodePushDescriptor>, ServiceError> {
        let source = self.inner.get(from)?;

        let blob_id = BlobId::generate();
        self.inner.blobs.copy(&source.blob_id, &blob_id).await?;
        let (entry, evicted) = match self.inner.insert(to, blob_id.clone()) {
            Ok(inserted) => inserted,
            Err(err) => {
                self.inner.blobs.remove(&blob_id).await.ok();
                return Err(err.into());
            }
        };

        tracing::info!(
            from = %from,
            to = %entry.descriptor,
            blob = %entry.blob_id,
            "Copied code push source map"
        );
        metric!(counter("sourcemaps.copied") += 1);

        self.inner.remove_evicted(evicted).await;
        Ok(entry)
    }

    /// Symbolicates the stack trace in `text` with the source map stored for `descriptor`.
    ///
    /// Returns the rendered frames, one per line. Text without any recognizable frames
    /// renders as an empty string.
    pub async fn symbolicate<D: Descriptor>(
        &self,
        descriptor: &D,
        text: &str,
    ) -> Result<String, ServiceError> {
        let entry = self.inner.get(descriptor)?;
        let sourcemap = self.inner.blobs.read(&entry.blob_id).await?;

        let frames = parse_stacktrace(text);
        let symbolicated =
            tokio::task::spawn_blocking(move || symbolicate_frames(&frames, &sourcemap)).await??;

        let resolved = symbolicated
            .iter()
            .filter(|frame| frame.file.is_some())
            .count();
        tracing::debug!(
            kind = %D::KIND,
            descriptor = %descriptor,
            frames = symbolicated.len(),
            resolved,
            "Symbolicated stack trace"
        );
        metric!(
            counter("symbolication.frames") += symbolicated.len() as i64,
            "kind" => D::KIND.as_str(),
        );
        metric!(
            counter("symbolication.unresolved_frames") += (symbolicated.len() - resolved) as i64,
            "kind" => D::KIND.as_str(),
        );

        Ok(render_stacktrace(&symbolicated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::path::Path;

    use sourcemap_store_test::{read_fixture, setup, tempdir};

    use crate::config::StorePaths;
    use crate::types::{AppDescriptor, ContainerDescriptor, Platform};

    fn config(root: &Path, max_codepush_maps: RetentionLimit) -> Config {
        Config {
            root_path: Some(root.to_owned()),
            max_codepush_maps,
            ..Config::default()
        }
    }

    fn container() -> ContainerDescriptor {
        ContainerDescriptor::new(
            AppDescriptor::new("testsm-miniapp", Platform::Android, "1.0.0"),
            "1.0.0",
        )
    }

    fn code_push(version: &str, label: &str) -> CodePushDescriptor {
        CodePushDescriptor::new(
            AppDescriptor::new("testsm-miniapp", Platform::Android, version),
            "Staging",
            label,
        )
    }

    #[tokio::test]
    async fn test_upload_and_fetch() {
        setup();
        let dir = tempdir();
        let store = SourceMapStore::create(&config(dir.path(), RetentionLimit::Unbounded)).unwrap();
        let sourcemap = read_fixture("sourcemaps/index.android.bundle.map");

        let entry = store
            .upload(container(), &mut sourcemap.as_slice())
            .await
            .unwrap();
        assert!(store.exists(&container()));
        assert_eq!(store.fetch(&container()).await.unwrap(), sourcemap);

        let paths = StorePaths::in_root(dir.path());
        assert!(paths.sourcemaps.join(entry.blob_id.as_str()).exists());

        // the database survives a restart
        let reopened =
            SourceMapStore::create(&config(dir.path(), RetentionLimit::Unbounded)).unwrap();
        assert_eq!(reopened.snapshot(), store.snapshot());
        assert_eq!(reopened.fetch(&container()).await.unwrap(), sourcemap);
    }

    #[tokio::test]
    async fn test_fetch_missing() {
        setup();
        let dir = tempdir();
        let store = SourceMapStore::create(&config(dir.path(), RetentionLimit::Unbounded)).unwrap();

        let err = store.fetch(&container()).await.unwrap_err();
        assert!(err.is_not_found());
        insta::assert_snapshot!(
            err.to_string(),
            @"Container source map for testsm-miniapp/android/1.0.0/1.0.0 does not exist in database"
        );

        let err = store.symbolicate(&container(), "value@1:1").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_upload_evicts_oldest() {
        setup();
        let dir = tempdir();
        let limit = RetentionLimit::max(2);
        let store = SourceMapStore::create(&config(dir.path(), limit)).unwrap();

        let mut entries = vec![];
        for label in ["v1", "v2", "v3"] {
            let entry = store
                .upload(code_push("1.0.0", label), &mut &b"{}"[..])
                .await
                .unwrap();
            entries.push(entry);
        }
        // other groups are not affected
        store
            .upload(code_push("2.0.0", "v1"), &mut &b"{}"[..])
            .await
            .unwrap();

        let blobs = BlobStore::new(StorePaths::in_root(dir.path()).sourcemaps);
        assert!(!store.exists(&code_push("1.0.0", "v1")));
        assert!(!blobs.path(&entries[0].blob_id).exists());
        assert!(store.exists(&code_push("1.0.0", "v2")));
        assert!(store.exists(&code_push("1.0.0", "v3")));
        assert!(store.exists(&code_push("2.0.0", "v1")));
        assert_eq!(store.snapshot().code_push_source_maps.len(), 3);

        // container maps have their own limit
        store
            .upload(container(), &mut &b"{}"[..])
            .await
            .unwrap();
        assert_eq!(store.snapshot().container_source_maps.len(), 1);
    }

    #[tokio::test]
    async fn test_copy_code_push() {
        setup();
        let dir = tempdir();
        let store = SourceMapStore::create(&config(dir.path(), RetentionLimit::Unbounded)).unwrap();
        let sourcemap = read_fixture("sourcemaps/index.android.bundle.map");

        let source = store
            .upload(code_push("1.0.0", "v1"), &mut sourcemap.as_slice())
            .await
            .unwrap();
        let copy = store
            .copy_code_push(&code_push("1.0.0", "v1"), code_push("1.1.0", "v4"))
            .await
            .unwrap();

        assert_ne!(copy.blob_id, source.blob_id);
        assert_eq!(copy.descriptor, code_push("1.1.0", "v4"));
        assert_eq!(store.fetch(&code_push("1.1.0", "v4")).await.unwrap(), sourcemap);
        assert_eq!(store.fetch(&code_push("1.0.0", "v1")).await.unwrap(), sourcemap);
        assert_eq!(
            store.snapshot().code_push_source_maps,
            vec![source, copy]
        );
    }

    #[tokio::test]
    async fn test_copy_applies_retention_to_target() {
        setup();
        let dir = tempdir();
        let limit = RetentionLimit::max(1);
        let store = SourceMapStore::create(&config(dir.path(), limit)).unwrap();

        store
            .upload(code_push("1.0.0", "v1"), &mut &b"{}"[..])
            .await
            .unwrap();
        store
            .upload(code_push("1.1.0", "v1"), &mut &b"{}"[..])
            .await
            .unwrap();
        store
            .copy_code_push(&code_push("1.0.0", "v1"), code_push("1.1.0", "v2"))
            .await
            .unwrap();

        assert!(store.exists(&code_push("1.0.0", "v1")));
        assert!(!store.exists(&code_push("1.1.0", "v1")));
        assert!(store.exists(&code_push("1.1.0", "v2")));
    }

    #[tokio::test]
    async fn test_copy_missing_source() {
        setup();
        let dir = tempdir();
        let store = SourceMapStore::create(&config(dir.path(), RetentionLimit::Unbounded)).unwrap();

        let err = store
            .copy_code_push(&code_push("1.0.0", "v1"), code_push("1.1.0", "v1"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.snapshot(), Snapshot::default());
    }

    #[tokio::test]
    async fn test_symbolicate() {
        setup();
        let dir = tempdir();
        let store = SourceMapStore::create(&config(dir.path(), RetentionLimit::Unbounded)).unwrap();
        let sourcemap = read_fixture("sourcemaps/index.android.bundle.map");
        store
            .upload(container(), &mut sourcemap.as_slice())
            .await
            .unwrap();

        let text = "Error: BOUM\nonPress@364:619\nvalue@-1\ntouchableHandlePress@195:9628";
        let symbolicated = store.symbolicate(&container(), text).await.unwrap();
        insta::assert_snapshot!(symbolicated, @r"
        onPress@25:65 [testsm-miniapp/App.js]
        value@undefined:undefined [undefined]
        touchableHandlePress@878:34 [react-native/Libraries/Components/Touchable/Touchable.js]
        ");

        assert_eq!(store.symbolicate(&container(), "no frames here").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_symbolicate_malformed_sourcemap() {
        setup();
        let dir = tempdir();
        let store = SourceMapStore::create(&config(dir.path(), RetentionLimit::Unbounded)).unwrap();
        store
            .upload(container(), &mut &b"not a source map"[..])
            .await
            .unwrap();

        let err = store
            .symbolicate(&container(), "value@1:1")
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Symbolication(_)));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_failed_upload_keeps_previous_state() {
        setup();
        let dir = tempdir();
        let store = SourceMapStore::create(&config(dir.path(), RetentionLimit::max(1))).unwrap();
        let paths = StorePaths::in_root(dir.path());

        store
            .upload(code_push("1.0.0", "v1"), &mut &b"first"[..])
            .await
            .unwrap();
        let before = store.snapshot();

        // a directory in place of the database file makes every write fail
        std::fs::remove_file(&paths.db).unwrap();
        std::fs::create_dir(&paths.db).unwrap();

        let err = store
            .upload(code_push("1.0.0", "v2"), &mut &b"second"[..])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Store(StoreError::Write { .. })));

        // the entry that would have been evicted is still served, and no file is left behind
        assert_eq!(store.snapshot(), before);
        assert!(!store.exists(&code_push("1.0.0", "v2")));
        assert_eq!(
            store.fetch(&code_push("1.0.0", "v1")).await.unwrap(),
            b"first"
        );
        assert_eq!(std::fs::read_dir(&paths.sourcemaps).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_store_usable_after_panic_while_locked() {
        setup();
        let dir = tempdir();
        let store = SourceMapStore::create(&config(dir.path(), RetentionLimit::Unbounded)).unwrap();
        store
            .upload(code_push("1.0.0", "v1"), &mut &b"{}"[..])
            .await
            .unwrap();

        let inner = Arc::clone(&store.inner);
        std::thread::spawn(move || {
            let _db = inner.db.lock().unwrap();
            panic!("panicking while holding the database lock");
        })
        .join()
        .unwrap_err();
        assert!(store.inner.db.is_poisoned());

        assert!(store.exists(&code_push("1.0.0", "v1")));
        assert_eq!(store.snapshot().code_push_source_maps.len(), 1);
        store
            .upload(code_push("1.0.0", "v2"), &mut &b"{}"[..])
            .await
            .unwrap();
        assert_eq!(store.fetch(&code_push("1.0.0", "v2")).await.unwrap(), b"{}");
    }
}

//! Storage of the uploaded source map files.
//!
//! Every source map is a single file in the source map directory, named after its [`BlobId`].
//! The contents are opaque to the store.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncWriteExt};

use crate::types::BlobId;

#[derive(Clone, Debug)]
pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The directory holding all source map files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The path of the file stored under `id`.
    pub fn path(&self, id: &BlobId) -> PathBuf {
        self.dir.join(id.as_str())
    }

    /// Streams `reader` into a new file stored under `id`.
    ///
    /// If writing fails, the partially written file is removed again.
    pub async fn write<R>(&self, id: &BlobId, reader: &mut R) -> io::Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let path = self.path(id);
        let result = async {
            let mut file = File::create(&path).await?;
            let written = tokio::io::copy(reader, &mut file).await?;
            file.flush().await?;
            Ok(written)
        }
        .await;

        if result.is_err() {
            fs::remove_file(&path).await.ok();
        }
        result
    }

    /// Reads the complete file stored under `id`.
    pub async fn read(&self, id: &BlobId) -> io::Result<Vec<u8>> {
        fs::read(self.path(id)).await
    }

    /// Duplicates the file stored under `from` into a new file stored under `to`.
    pub async fn copy(&self, from: &BlobId, to: &BlobId) -> io::Result<u64> {
        fs::copy(self.path(from), self.path(to)).await
    }

    /// Deletes the file stored under `id`. Deleting a missing file is not an error.
    pub async fn remove(&self, id: &BlobId) -> io::Result<()> {
        match fs::remove_file(self.path(id)).await {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            result => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use sourcemap_store_test::{setup, tempdir};

    #[tokio::test]
    async fn test_write_read_copy_remove() {
        setup();
        let dir = tempdir();
        let blobs = BlobStore::new(dir.path());

        let id = BlobId::generate();
        let written = blobs.write(&id, &mut &b"{\"version\":3}"[..]).await.unwrap();
        assert_eq!(written, 13);
        assert_eq!(blobs.read(&id).await.unwrap(), b"{\"version\":3}");

        let copy = BlobId::generate();
        blobs.copy(&id, &copy).await.unwrap();
        assert_eq!(blobs.read(&copy).await.unwrap(), b"{\"version\":3}");

        blobs.remove(&id).await.unwrap();
        assert!(!blobs.path(&id).exists());
        assert!(blobs.path(&copy).exists());

        // removing twice is fine
        blobs.remove(&id).await.unwrap();
    }

    #[tokio::test]
    async fn test_read_missing() {
        setup();
        let dir = tempdir();
        let blobs = BlobStore::new(dir.path());

        let err = blobs.read(&BlobId::from("missing")).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}

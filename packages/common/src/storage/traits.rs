use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::error::StorageError;

/// Type alias for a boxed async reader.
pub type BoxReader = Box<dyn AsyncRead + Unpin + Send>;

/// Byte-level access to one storage volume. Paths are relative,
/// `/`-separated, and produced by the path resolver.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Store `size` bytes at `path`, overwriting any previous object.
    async fn write(&self, path: &str, reader: BoxReader, size: u64) -> Result<(), StorageError>;

    /// Open the object as a streaming async reader.
    async fn read(&self, path: &str) -> Result<BoxReader, StorageError>;

    /// Delete the object.
    ///
    /// Returns `true` if it was deleted, `false` if it did not exist.
    async fn delete(&self, path: &str) -> Result<bool, StorageError>;

    /// Check whether the object exists.
    async fn exists(&self, path: &str) -> Result<bool, StorageError>;

    /// Size of the object in bytes.
    async fn size(&self, path: &str) -> Result<u64, StorageError>;

    /// Copy an object from another provider onto this one.
    async fn copy_from(
        &self,
        src: &dyn StorageProvider,
        src_path: &str,
        dst_path: &str,
    ) -> Result<(), StorageError> {
        let size = src.size(src_path).await?;
        let reader = src.read(src_path).await?;
        self.write(dst_path, reader, size).await
    }
}

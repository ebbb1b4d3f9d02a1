use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncWriteExt, BufReader};

use super::error::StorageError;
use super::traits::{BoxReader, StorageProvider};

/// Filesystem-backed storage volume rooted at a directory.
///
/// Relative paths are resolved beneath the root; anything that would
/// escape it (absolute paths, `..` components) is refused before any
/// filesystem call. Writes go through a temp file and a rename so readers
/// never observe a half-written object.
pub struct LocalProvider {
    root: PathBuf,
}

impl LocalProvider {
    pub async fn new(root: PathBuf) -> Result<Self, StorageError> {
        fs::create_dir_all(&root).await?;
        fs::create_dir_all(root.join(".tmp")).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative object path, rejecting traversal.
    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        let rel = Path::new(path);
        for component in rel.components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(StorageError::PathEscape(path.to_string())),
            }
        }
        if rel.as_os_str().is_empty() {
            return Err(StorageError::PathEscape(path.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn temp_path(&self) -> PathBuf {
        self.root
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }

    /// Free bytes on the filesystem backing this volume.
    pub async fn available_bytes(&self) -> Result<u64, StorageError> {
        let root = self.root.clone();
        let stat = tokio::task::spawn_blocking(move || nix::sys::statvfs::statvfs(&root))
            .await
            .map_err(|e| StorageError::backend("statvfs task failed", e))?
            .map_err(|e| StorageError::backend("statvfs failed", e))?;
        Ok(stat.blocks_available() as u64 * stat.fragment_size() as u64)
    }

    /// Total bytes on the filesystem backing this volume.
    pub async fn total_bytes(&self) -> Result<u64, StorageError> {
        let root = self.root.clone();
        let stat = tokio::task::spawn_blocking(move || nix::sys::statvfs::statvfs(&root))
            .await
            .map_err(|e| StorageError::backend("statvfs task failed", e))?
            .map_err(|e| StorageError::backend("statvfs failed", e))?;
        Ok(stat.blocks() as u64 * stat.fragment_size() as u64)
    }
}

#[async_trait]
impl StorageProvider for LocalProvider {
    async fn write(
        &self,
        path: &str,
        mut reader: BoxReader,
        _size: u64,
    ) -> Result<(), StorageError> {
        let target = self.resolve(path)?;
        let temp_path = self.temp_path();

        let mut temp_file = fs::File::create(&temp_path).await?;
        if let Err(e) = tokio::io::copy(&mut reader, &mut temp_file).await {
            drop(temp_file);
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = temp_file.flush().await {
            drop(temp_file);
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        drop(temp_file);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        if let Err(e) = fs::rename(&temp_path, &target).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<BoxReader, StorageError> {
        let target = self.resolve(path)?;
        match fs::File::open(&target).await {
            Ok(file) => Ok(Box::new(BufReader::new(file))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<bool, StorageError> {
        let target = self.resolve(path)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, path: &str) -> Result<bool, StorageError> {
        let target = self.resolve(path)?;
        Ok(fs::try_exists(&target).await?)
    }

    async fn size(&self, path: &str) -> Result<u64, StorageError> {
        let target = self.resolve(path)?;
        match fs::metadata(&target).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn temp_volume() -> (LocalProvider, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(dir.path().join("vol")).await.unwrap();
        (provider, dir)
    }

    fn reader(data: &[u8]) -> BoxReader {
        Box::new(std::io::Cursor::new(data.to_vec()))
    }

    #[tokio::test]
    async fn write_read_round_trip() {
        let (provider, _dir) = temp_volume().await;
        let data = b"dicom bytes";
        provider
            .write("h1/2024/01/file.dcm", reader(data), data.len() as u64)
            .await
            .unwrap();

        let mut stream = provider.read("h1/2024/01/file.dcm").await.unwrap();
        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut stream, &mut buf)
            .await
            .unwrap();
        assert_eq!(buf, data);
        assert_eq!(provider.size("h1/2024/01/file.dcm").await.unwrap(), 11);
    }

    #[tokio::test]
    async fn write_is_idempotent_overwrite() {
        let (provider, _dir) = temp_volume().await;
        provider.write("h1/a.dcm", reader(b"one"), 3).await.unwrap();
        provider.write("h1/a.dcm", reader(b"two!"), 4).await.unwrap();
        assert_eq!(provider.size("h1/a.dcm").await.unwrap(), 4);
    }

    #[tokio::test]
    async fn traversal_is_rejected() {
        let (provider, _dir) = temp_volume().await;
        for path in ["../escape", "h1/../../etc/passwd", "/abs/path", ""] {
            let err = provider.read(path).await.unwrap_err();
            assert!(
                matches!(err, StorageError::PathEscape(_)),
                "path {path:?} was not rejected"
            );
        }
    }

    #[tokio::test]
    async fn missing_object_maps_to_not_found() {
        let (provider, _dir) = temp_volume().await;
        assert!(matches!(
            provider.read("h1/missing.dcm").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(matches!(
            provider.size("h1/missing.dcm").await,
            Err(StorageError::NotFound(_))
        ));
        assert!(!provider.exists("h1/missing.dcm").await.unwrap());
        assert!(!provider.delete("h1/missing.dcm").await.unwrap());
    }

    #[tokio::test]
    async fn copy_from_another_volume() {
        let (src, _d1) = temp_volume().await;
        let (dst, _d2) = temp_volume().await;
        src.write("h1/x.dcm", reader(b"payload"), 7).await.unwrap();

        dst.copy_from(&src, "h1/x.dcm", "h1/x.dcm").await.unwrap();
        assert!(dst.exists("h1/x.dcm").await.unwrap());
        assert_eq!(dst.size("h1/x.dcm").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn capacity_probes_return_plausible_values() {
        let (provider, _dir) = temp_volume().await;
        let total = provider.total_bytes().await.unwrap();
        let available = provider.available_bytes().await.unwrap();
        assert!(total > 0);
        assert!(available <= total);
    }
}

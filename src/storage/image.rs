use crate::storage::{ImageStore, StoreError};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Where an uploaded image came from and where it ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub laptop_id: String,
    pub image_type: String,
    pub path: PathBuf,
}

/// Stores images on disk as `<folder>/<image-id><image_type>` and keeps
/// their info in memory.
#[derive(Debug, Clone)]
pub struct DiskImageStore {
    folder: PathBuf,
    images: Arc<RwLock<HashMap<String, ImageInfo>>>,
}

impl DiskImageStore {
    pub async fn new(folder: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let folder = folder.into();
        tokio::fs::create_dir_all(&folder).await?;
        Ok(Self {
            folder,
            images: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub async fn info(&self, image_id: &str) -> Option<ImageInfo> {
        self.images.read().await.get(image_id).cloned()
    }
}

#[async_trait]
impl ImageStore for DiskImageStore {
    async fn save(
        &self,
        laptop_id: &str,
        image_type: &str,
        data: Bytes,
    ) -> Result<String, StoreError> {
        if !is_safe_image_type(image_type) {
            return Err(StoreError::Internal(format!(
                "refusing image type {image_type:?}"
            )));
        }

        let image_id = Uuid::new_v4().to_string();
        let path = self.folder.join(format!("{image_id}{image_type}"));

        tokio::fs::write(&path, &data).await.map_err(|e| {
            StoreError::Internal(format!(
                "writing laptop {laptop_id} image {}: {e}",
                path.display()
            ))
        })?;

        let mut images = self.images.write().await;
        images.insert(
            image_id.clone(),
            ImageInfo {
                laptop_id: laptop_id.to_string(),
                image_type: image_type.to_string(),
                path,
            },
        );
        Ok(image_id)
    }
}

/// An image type is empty or a dot followed by ASCII letters and digits.
pub fn is_safe_image_type(image_type: &str) -> bool {
    match image_type.strip_prefix('.') {
        Some(ext) => !ext.is_empty() && ext.bytes().all(|b| b.is_ascii_alphanumeric()),
        None => image_type.is_empty(),
    }
}

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub laptop_id: String,
    pub image_type: String,
    pub data: Bytes,
}

/// Keeps uploaded images in memory. Used when no image folder is configured.
#[derive(Debug, Clone, Default)]
pub struct InMemoryImageStore {
    images: Arc<RwLock<HashMap<String, StoredImage>>>,
}

impl InMemoryImageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, image_id: &str) -> Option<StoredImage> {
        self.images.read().await.get(image_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.images.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.images.read().await.is_empty()
    }
}

#[async_trait]
impl ImageStore for InMemoryImageStore {
    async fn save(
        &self,
        laptop_id: &str,
        image_type: &str,
        data: Bytes,
    ) -> Result<String, StoreError> {
        let image_id = Uuid::new_v4().to_string();
        let mut images = self.images.write().await;
        images.insert(
            image_id.clone(),
            StoredImage {
                laptop_id: laptop_id.to_string(),
                image_type: image_type.to_string(),
                data,
            },
        );
        Ok(image_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disk_store_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskImageStore::new(dir.path().join("img")).await.unwrap();

        let id = store
            .save("laptop-1", ".jpg", Bytes::from_static(b"jpeg bytes"))
            .await
            .unwrap();

        let info = store.info(&id).await.unwrap();
        assert_eq!(info.laptop_id, "laptop-1");
        assert_eq!(info.image_type, ".jpg");
        assert_eq!(info.path, store.folder().join(format!("{id}.jpg")));
        assert_eq!(std::fs::read(&info.path).unwrap(), b"jpeg bytes");
    }

    #[tokio::test]
    async fn test_disk_store_rejects_path_in_type() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskImageStore::new(dir.path()).await.unwrap();
        let err = store
            .save("laptop-1", "/../../etc", Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Internal(_)));

        for bad in [".\\..\\x", ".png\0", ".p g", "."] {
            assert!(store.save("laptop-1", bad, Bytes::new()).await.is_err(), "{bad:?}");
        }
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_safe_image_types() {
        assert!(is_safe_image_type(".jpg"));
        assert!(is_safe_image_type(".PNG"));
        assert!(is_safe_image_type(""));
        assert!(!is_safe_image_type("jpg"));
        assert!(!is_safe_image_type(".tar.gz"));
        assert!(!is_safe_image_type(".\u{e9}"));
    }

    #[tokio::test]
    async fn test_in_memory_store_keeps_bytes() {
        let store = InMemoryImageStore::new();
        let id = store
            .save("laptop-1", ".png", Bytes::from_static(b"png"))
            .await
            .unwrap();
        assert_eq!(store.len().await, 1);
        let image = store.get(&id).await.unwrap();
        assert_eq!(&image.data[..], b"png");
        assert_eq!(image.image_type, ".png");
    }
}

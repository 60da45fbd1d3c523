use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::path::{Path, PathBuf};

use super::{ObjectStore, ObjectStoreError, SignedUrl, SignedUrlRequest, StoredObject};
use crate::signing::UrlSigner;

/// Local filesystem object store for development and testing.
///
/// Signed URLs point back at this service's `/blobs/:key` route, which
/// re-checks the HMAC and expiry before serving.
pub struct LocalStore {
    base_path: PathBuf,
    signing: Option<(UrlSigner, String)>,
}

impl LocalStore {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, std::io::Error> {
        let base_path = base_path.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self {
            base_path,
            signing: None,
        })
    }

    /// Enable signed URLs rooted at `public_base_url`.
    pub fn with_signed_urls(mut self, signer: UrlSigner, public_base_url: &str) -> Self {
        self.signing = Some((signer, public_base_url.trim_end_matches('/').to_string()));
        self
    }

    fn object_path(&self, key: &str) -> Result<PathBuf, ObjectStoreError> {
        // Keys are flat identifiers; anything path-like would escape base_path
        if key.is_empty() || key.contains(|c: char| c == '/' || c == '\\') || key.starts_with('.') {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }
        Ok(self.base_path.join(key))
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<StoredObject, ObjectStoreError> {
        let path = self.object_path(key)?;
        tokio::fs::write(&path, &data).await?;
        Ok(StoredObject {
            key: key.to_string(),
            byte_size: data.len() as u64,
        })
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let path = self.object_path(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ObjectStoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let path = self.object_path(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn signed_url(
        &self,
        key: &str,
        request: SignedUrlRequest<'_>,
    ) -> Result<SignedUrl, ObjectStoreError> {
        let (signer, base_url) = self.signing.as_ref().ok_or_else(|| {
            ObjectStoreError::Unsupported("local signed URLs are not configured".to_string())
        })?;

        let expires_at = Utc::now() + request.ttl;
        let grant = signer.sign_blob(key, request.download_name, request.content_type, expires_at);
        let query = serde_qs::to_string(&grant)
            .map_err(|e| ObjectStoreError::Backend(format!("Failed to encode grant: {e}")))?;

        Ok(SignedUrl {
            url: format!("{base_url}/blobs/{key}?{query}"),
            expires_at,
        })
    }
}

use bytes::Bytes;
use serde::Deserialize;

use super::Workflow;
use crate::auth::Actor;
use crate::error::ServiceError;
use crate::object_store::{ObjectStoreError, SignedUrl, SignedUrlRequest};
use crate::state_machine::ManuscriptStatus;
use crate::storage::models::{Manuscript, Role};

const MISSING_PAYLOAD: &str = "Manuscript file is missing from storage";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    #[default]
    Stream,
    Url,
}

/// A fully fetched blob, ready to be written as a response body
#[derive(Debug, Clone)]
pub struct BlobStream {
    pub data: Bytes,
    pub content_type: String,
    /// Filename for Content-Disposition
    pub filename: String,
}

#[derive(Debug, Clone)]
pub enum Delivery {
    Stream(BlobStream),
    Url(SignedUrl),
}

/// Whether `actor` may see `manuscript` and its files. Published manuscripts
/// are public; anonymous callers see nothing else.
///
/// Publication is the act of releasing the final file, so once published
/// every caller, signed in or not, is served the same file and metadata.
/// Role no longer narrows anything at that point, and `toggle_publish` back
/// to `Accepted` restores the per-role rules below.
pub fn can_view(actor: Option<&Actor>, manuscript: &Manuscript) -> bool {
    if manuscript.status == ManuscriptStatus::Published {
        return true;
    }
    match actor {
        None => false,
        Some(actor) => match actor.role {
            Role::Admin => true,
            Role::Author => manuscript.author_id == actor.id,
            Role::Expert => manuscript.reviewer_id.as_deref() == Some(actor.id.as_str()),
        },
    }
}

impl Workflow {
    /// Fetch a manuscript the actor is allowed to see
    pub fn get_visible(
        &self,
        actor: Option<&Actor>,
        id: &str,
    ) -> Result<Manuscript, ServiceError> {
        let manuscript = self.get_manuscript(id)?;
        if !can_view(actor, &manuscript) {
            return Err(ServiceError::forbidden(
                "You do not have access to this manuscript",
            ));
        }
        Ok(manuscript)
    }

    /// Deliver the manuscript file. URL mode signs a fresh URL on every call.
    pub async fn deliver_file(
        &self,
        actor: Option<&Actor>,
        id: &str,
        mode: DeliveryMode,
    ) -> Result<Delivery, ServiceError> {
        let manuscript = self.get_visible(actor, id)?;
        let download_name = manuscript.download_name();

        match mode {
            DeliveryMode::Stream => {
                let data = self.fetch(&manuscript.file_id).await?;
                Ok(Delivery::Stream(BlobStream {
                    data,
                    content_type: manuscript.content_type,
                    filename: download_name,
                }))
            }
            DeliveryMode::Url => {
                let present = self
                    .object_store
                    .exists(&manuscript.file_id)
                    .await
                    .map_err(|e| ServiceError::storage("Failed to check manuscript file", e))?;
                if !present {
                    return Err(ServiceError::PayloadMissing(MISSING_PAYLOAD.to_string()));
                }

                let url = self
                    .object_store
                    .signed_url(
                        &manuscript.file_id,
                        SignedUrlRequest {
                            download_name: &download_name,
                            content_type: &manuscript.content_type,
                            ttl: self.signed_url_ttl,
                        },
                    )
                    .await
                    .map_err(|e| ServiceError::storage("Failed to sign download URL", e))?;
                tracing::debug!(manuscript_id = %id, expires_at = %url.expires_at, "Issued signed URL");
                Ok(Delivery::Url(url))
            }
        }
    }

    pub async fn deliver_thumbnail(
        &self,
        actor: Option<&Actor>,
        id: &str,
    ) -> Result<BlobStream, ServiceError> {
        let manuscript = self.get_visible(actor, id)?;
        let thumbnail = manuscript
            .thumbnail
            .ok_or_else(|| ServiceError::not_found("Manuscript has no thumbnail"))?;

        let data = self.fetch(&thumbnail.file_id).await?;
        let ext = mime_guess::get_mime_extensions_str(&thumbnail.content_type)
            .and_then(|e| e.first())
            .copied()
            .unwrap_or("img");
        Ok(BlobStream {
            data,
            content_type: thumbnail.content_type,
            filename: format!("thumbnail.{ext}"),
        })
    }

    async fn fetch(&self, key: &str) -> Result<Bytes, ServiceError> {
        match self.object_store.get(key).await {
            Ok(data) => Ok(data),
            Err(ObjectStoreError::NotFound(_)) => {
                tracing::warn!(key, "Blob referenced by a manuscript is missing");
                Err(ServiceError::PayloadMissing(MISSING_PAYLOAD.to_string()))
            }
            Err(e) => Err(ServiceError::storage("Failed to read manuscript file", e)),
        }
    }
}

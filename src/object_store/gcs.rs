use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{ObjectStore, ObjectStoreError, SignedUrl, SignedUrlRequest, StoredObject};

const STORAGE_HOST: &str = "storage.googleapis.com";

/// Longest lifetime GCS accepts for a V4 signed URL (7 days)
const MAX_SIGNED_TTL_SECS: i64 = 604_800;

/// Google Cloud Storage object store backend.
pub struct GcsStore {
    bucket: String,
    client: Client,
    access_token: tokio::sync::RwLock<String>,
    credentials_file: Option<String>,
    /// Present only with a key file; required to sign URLs
    service_account: Option<ServiceAccountKey>,
}

#[derive(Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    token_uri: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl GcsStore {
    pub async fn new(bucket: &str, credentials_file: Option<&str>) -> Result<Self, anyhow::Error> {
        let client = Client::builder().build()?;

        let service_account = match credentials_file {
            Some(path) => {
                let key_json = tokio::fs::read_to_string(path).await?;
                Some(serde_json::from_str::<ServiceAccountKey>(&key_json)?)
            }
            None => None,
        };

        let store = Self {
            bucket: bucket.to_string(),
            client,
            access_token: tokio::sync::RwLock::new(String::new()),
            credentials_file: credentials_file.map(|s| s.to_string()),
            service_account,
        };

        store.refresh_token().await?;
        Ok(store)
    }

    async fn refresh_token(&self) -> Result<(), anyhow::Error> {
        let token = match (&self.service_account, &self.credentials_file) {
            (Some(key), Some(_)) => self.token_from_service_account(key).await?,
            _ => self.token_from_metadata_server().await?,
        };

        let mut lock = self.access_token.write().await;
        *lock = token;
        Ok(())
    }

    async fn token_from_service_account(
        &self,
        key: &ServiceAccountKey,
    ) -> Result<String, anyhow::Error> {
        let now = Utc::now().timestamp();
        let claims = serde_json::json!({
            "iss": key.client_email,
            "scope": "https://www.googleapis.com/auth/devstorage.read_write",
            "aud": key.token_uri,
            "iat": now,
            "exp": now + 3600,
        });

        // Build JWT (header.claims.signature)
        let header = base64_url_encode(&serde_json::to_vec(&serde_json::json!({
            "alg": "RS256",
            "typ": "JWT"
        }))?);
        let payload = base64_url_encode(&serde_json::to_vec(&claims)?);
        let unsigned = format!("{header}.{payload}");

        let signature = sign_rs256(unsigned.as_bytes(), &key.private_key)?;
        let jwt = format!("{unsigned}.{}", base64_url_encode(&signature));

        let resp: TokenResponse = self
            .client
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await?
            .json()
            .await?;

        Ok(resp.access_token)
    }

    async fn token_from_metadata_server(&self) -> Result<String, anyhow::Error> {
        let resp: TokenResponse = self
            .client
            .get("http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token")
            .header("Metadata-Flavor", "Google")
            .send()
            .await?
            .json()
            .await?;

        Ok(resp.access_token)
    }

    /// Send a request, refreshing the access token once if GCS answers 401.
    async fn send_authed<F>(&self, build: F) -> Result<reqwest::Response, ObjectStoreError>
    where
        F: Fn(&str) -> reqwest::RequestBuilder,
    {
        let token = self.access_token.read().await.clone();
        let resp = build(&token)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        if resp.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        tracing::debug!("GCS access token rejected, refreshing");
        self.refresh_token()
            .await
            .map_err(|e| ObjectStoreError::Backend(format!("Token refresh failed: {e}")))?;
        let token = self.access_token.read().await.clone();
        build(&token)
            .send()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))
    }

    fn upload_url(&self, key: &str) -> String {
        format!(
            "https://{STORAGE_HOST}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.bucket,
            uri_encode(key)
        )
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "https://{STORAGE_HOST}/storage/v1/b/{}/o/{}?alt=media",
            self.bucket,
            uri_encode(key)
        )
    }

    fn metadata_url(&self, key: &str) -> String {
        format!(
            "https://{STORAGE_HOST}/storage/v1/b/{}/o/{}",
            self.bucket,
            uri_encode(key)
        )
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    async fn put(&self, key: &str, data: Bytes) -> Result<StoredObject, ObjectStoreError> {
        let byte_size = data.len() as u64;
        let url = self.upload_url(key);
        let resp = self
            .send_authed(|token| {
                self.client
                    .post(&url)
                    .bearer_auth(token)
                    .header("Content-Type", "application/octet-stream")
                    .body(data.clone())
            })
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ObjectStoreError::Backend(format!(
                "GCS upload failed ({status}): {body}"
            )));
        }

        Ok(StoredObject {
            key: key.to_string(),
            byte_size,
        })
    }

    async fn get(&self, key: &str) -> Result<Bytes, ObjectStoreError> {
        let url = self.object_url(key);
        let resp = self
            .send_authed(|token| self.client.get(&url).bearer_auth(token))
            .await?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ObjectStoreError::NotFound(key.to_string()));
        }

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ObjectStoreError::Backend(format!(
                "GCS download failed ({status}): {body}"
            )));
        }

        resp.bytes()
            .await
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<(), ObjectStoreError> {
        let url = self.metadata_url(key);
        let resp = self
            .send_authed(|token| self.client.delete(&url).bearer_auth(token))
            .await?;

        // 404 is fine -- object already gone
        if !resp.status().is_success() && resp.status() != reqwest::StatusCode::NOT_FOUND {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ObjectStoreError::Backend(format!(
                "GCS delete failed ({status}): {body}"
            )));
        }

        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, ObjectStoreError> {
        let url = self.metadata_url(key);
        let resp = self
            .send_authed(|token| self.client.get(&url).bearer_auth(token))
            .await?;

        Ok(resp.status().is_success())
    }

    /// V4 signed URL (GOOG4-RSA-SHA256) that forces the download filename.
    async fn signed_url(
        &self,
        key: &str,
        request: SignedUrlRequest<'_>,
    ) -> Result<SignedUrl, ObjectStoreError> {
        let account = self.service_account.as_ref().ok_or_else(|| {
            ObjectStoreError::Unsupported(
                "GCS signed URLs require GCS_CREDENTIALS_FILE".to_string(),
            )
        })?;

        let now = Utc::now();
        let ttl = request.ttl.num_seconds().clamp(1, MAX_SIGNED_TTL_SECS);
        let timestamp = now.format("%Y%m%dT%H%M%SZ").to_string();
        let scope = format!("{}/auto/storage/goog4_request", now.format("%Y%m%d"));

        let mut params = vec![
            ("X-Goog-Algorithm", "GOOG4-RSA-SHA256".to_string()),
            (
                "X-Goog-Credential",
                format!("{}/{scope}", account.client_email),
            ),
            ("X-Goog-Date", timestamp.clone()),
            ("X-Goog-Expires", ttl.to_string()),
            ("X-Goog-SignedHeaders", "host".to_string()),
            (
                "response-content-disposition",
                format!("attachment; filename=\"{}\"", request.download_name),
            ),
            ("response-content-type", request.content_type.to_string()),
        ];
        params.sort_by(|a, b| a.0.cmp(b.0));
        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let path = format!("/{}/{}", self.bucket, uri_encode(key));
        let canonical_request =
            format!("GET\n{path}\n{query}\nhost:{STORAGE_HOST}\n\nhost\nUNSIGNED-PAYLOAD");
        let request_hash = hex_encode(
            ring::digest::digest(&ring::digest::SHA256, canonical_request.as_bytes()).as_ref(),
        );
        let string_to_sign = format!("GOOG4-RSA-SHA256\n{timestamp}\n{scope}\n{request_hash}");

        let signature = sign_rs256(string_to_sign.as_bytes(), &account.private_key)
            .map_err(|e| ObjectStoreError::Backend(e.to_string()))?;

        Ok(SignedUrl {
            url: format!(
                "https://{STORAGE_HOST}{path}?{query}&X-Goog-Signature={}",
                hex_encode(&signature)
            ),
            expires_at: now + Duration::seconds(ttl),
        })
    }
}

fn base64_url_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(data)
}

fn hex_encode(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

/// RFC 3986 percent-encoding: everything but unreserved characters.
fn uri_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn sign_rs256(data: &[u8], private_key_pem: &str) -> Result<Vec<u8>, anyhow::Error> {
    // Strip PEM headers and decode base64
    let der_b64: String = private_key_pem
        .lines()
        .filter(|line| !line.starts_with("-----"))
        .collect();
    let der = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &der_b64)?;

    // Use ring for RSA signing
    let key_pair = ring::signature::RsaKeyPair::from_pkcs8(&der)
        .map_err(|e| anyhow::anyhow!("Failed to parse RSA key: {e}"))?;

    let mut signature = vec![0u8; key_pair.public().modulus_len()];
    key_pair
        .sign(
            &ring::signature::RSA_PKCS1_SHA256,
            &ring::rand::SystemRandom::new(),
            data,
            &mut signature,
        )
        .map_err(|e| anyhow::anyhow!("Failed to sign: {e}"))?;

    Ok(signature)
}

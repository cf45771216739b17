//! Object storage for chat images (Supabase Storage REST API).

use async_trait::async_trait;
use rand::RngCore;
use reqwest::{Client, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// Prefix used for generated objects when no attachment path hints at one.
pub const GENERATED_PREFIX: &str = "generated";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object not found: {bucket}/{path}")]
    NotFound { bucket: String, path: String },

    #[error("Storage API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Unexpected storage response: {0}")]
    InvalidResponse(String),

    #[error("Invalid storage URL: {0}")]
    InvalidUrl(String),
}

/// Where an uploaded object ended up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Path inside the bucket.
    pub path: String,
    /// Bucket-qualified key, `bucket/path`.
    pub full_path: String,
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StorageError>;

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, StorageError>;

    /// Mint a time-limited URL granting read access to one object.
    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in_secs: u64,
    ) -> Result<String, StorageError>;
}

/// `{prefix}/{16 hex chars}.{ext}` with the hex drawn from 8 random bytes.
pub fn generate_object_path(prefix: &str, mime_type: &str) -> String {
    let mut suffix = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut suffix);
    let name = format!("{}.{}", hex::encode(suffix), extension_for(mime_type));

    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        name
    } else {
        format!("{}/{}", prefix, name)
    }
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    }
}

/// Supabase Storage client authenticated with a service key.
pub struct SupabaseStorage {
    base_url: Url,
    key: SecretString,
    client: Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignRequest {
    expires_in: u64,
}

#[derive(Deserialize)]
struct SignResponse {
    #[serde(rename = "signedURL", alias = "signedUrl")]
    signed_url: String,
}

#[derive(Deserialize)]
struct UploadResponse {
    #[serde(rename = "Key", alias = "key", default)]
    key: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl SupabaseStorage {
    pub fn new(
        base_url: &str,
        key: SecretString,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, StorageError> {
        let base_url = Url::parse(base_url.trim())
            .map_err(|e| StorageError::InvalidUrl(format!("{}: {}", base_url, e)))?;

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .map_err(|e| StorageError::NetworkError(e.to_string()))?;

        Ok(Self {
            base_url,
            key,
            client,
        })
    }

    /// `{base}/storage/v1/object/{action..}/{bucket}/{path..}` with each segment escaped.
    fn object_url(&self, action: &[&str], bucket: &str, path: &str) -> Result<Url, StorageError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| StorageError::InvalidUrl(self.base_url.to_string()))?;
            segments
                .pop_if_empty()
                .extend(["storage", "v1", "object"])
                .extend(action)
                .push(bucket)
                .extend(path.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("apikey", self.key.expose_secret())
            .bearer_auth(self.key.expose_secret())
    }

    async fn error_from(response: reqwest::Response, bucket: &str, path: &str) -> StorageError {
        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let body: Option<ApiErrorBody> = serde_json::from_str(&text).ok();
        let message = body
            .and_then(|b| b.message.or(b.error))
            .unwrap_or(text);

        // Storage reports missing objects as 400 with a "not found" message.
        if status == 404 || message.to_ascii_lowercase().contains("not found") {
            return StorageError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            };
        }

        StorageError::ApiError { status, message }
    }
}

#[async_trait]
impl ObjectStorage for SupabaseStorage {
    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StorageError> {
        let url = self.object_url(&[], bucket, path)?;
        tracing::debug!(bucket, path, "Downloading object");

        let response = self
            .authorized(self.client.get(url))
            .send()
            .await
            .map_err(|e| StorageError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, bucket, path).await);
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| StorageError::NetworkError(e.to_string()))?;

        Ok(bytes.to_vec())
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, StorageError> {
        let url = self.object_url(&[], bucket, path)?;
        tracing::debug!(bucket, path, size = data.len(), "Uploading object");

        let response = self
            .authorized(self.client.post(url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header("x-upsert", "false")
            .body(data)
            .send()
            .await
            .map_err(|e| StorageError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, bucket, path).await);
        }

        let body: UploadResponse = response
            .json()
            .await
            .map_err(|e| StorageError::InvalidResponse(e.to_string()))?;

        Ok(StoredObject {
            path: path.to_string(),
            full_path: body.key.unwrap_or_else(|| format!("{}/{}", bucket, path)),
        })
    }

    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in_secs: u64,
    ) -> Result<String, StorageError> {
        let url = self.object_url(&["sign"], bucket, path)?;

        let response = self
            .authorized(self.client.post(url))
            .json(&SignRequest {
                expires_in: expires_in_secs,
            })
            .send()
            .await
            .map_err(|e| StorageError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Self::error_from(response, bucket, path).await);
        }

        let body: SignResponse = response
            .json()
            .await
            .map_err(|e| StorageError::InvalidResponse(e.to_string()))?;

        signed_url_from(&self.base_url, &body.signed_url)
    }
}

/// The API answers with a path relative to `/storage/v1`.
fn signed_url_from(base_url: &Url, signed_path: &str) -> Result<String, StorageError> {
    if signed_path.starts_with("http://") || signed_path.starts_with("https://") {
        return Ok(signed_path.to_string());
    }
    if signed_path.is_empty() {
        return Err(StorageError::InvalidResponse(
            "empty signed URL".to_string(),
        ));
    }

    let base = base_url.as_str().trim_end_matches('/');
    Ok(format!(
        "{}/storage/v1/{}",
        base,
        signed_path.trim_start_matches('/')
    ))
}

/// Process-local object store. Backs tests and development runs without storage
/// credentials; counts calls so callers can assert on them.
#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<(String, String), (Vec<u8>, String)>>,
    fail_downloads: AtomicBool,
    fail_uploads: AtomicBool,
    fail_signing: AtomicBool,
    downloads: AtomicUsize,
    uploads: AtomicUsize,
    signs: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, bucket: &str, path: &str, data: &[u8], content_type: &str) -> Self {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(
                (bucket.to_string(), path.to_string()),
                (data.to_vec(), content_type.to_string()),
            );
        }
        self
    }

    pub fn fail_downloads(&self, fail: bool) {
        self.fail_downloads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_signing(&self, fail: bool) {
        self.fail_signing.store(fail, Ordering::SeqCst);
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn sign_count(&self) -> usize {
        self.signs.load(Ordering::SeqCst)
    }

    /// Stored content type of an object, if present.
    pub fn content_type_of(&self, bucket: &str, path: &str) -> Option<String> {
        self.objects
            .lock()
            .ok()?
            .get(&(bucket.to_string(), path.to_string()))
            .map(|(_, content_type)| content_type.clone())
    }

    fn simulated(&self, bucket: &str, path: &str) -> StorageError {
        StorageError::ApiError {
            status: 500,
            message: format!("simulated failure for {}/{}", bucket, path),
        }
    }

    fn poisoned() -> StorageError {
        StorageError::InvalidResponse("memory storage lock poisoned".to_string())
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn download(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StorageError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.fail_downloads.load(Ordering::SeqCst) {
            return Err(self.simulated(bucket, path));
        }

        let objects = self.objects.lock().map_err(|_| Self::poisoned())?;
        objects
            .get(&(bucket.to_string(), path.to_string()))
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            })
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<StoredObject, StorageError> {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(self.simulated(bucket, path));
        }

        let mut objects = self.objects.lock().map_err(|_| Self::poisoned())?;
        objects.insert(
            (bucket.to_string(), path.to_string()),
            (data, content_type.to_string()),
        );

        Ok(StoredObject {
            path: path.to_string(),
            full_path: format!("{}/{}", bucket, path),
        })
    }

    async fn create_signed_url(
        &self,
        bucket: &str,
        path: &str,
        expires_in_secs: u64,
    ) -> Result<String, StorageError> {
        self.signs.fetch_add(1, Ordering::SeqCst);
        if self.fail_signing.load(Ordering::SeqCst) {
            return Err(self.simulated(bucket, path));
        }

        let objects = self.objects.lock().map_err(|_| Self::poisoned())?;
        if !objects.contains_key(&(bucket.to_string(), path.to_string())) {
            return Err(StorageError::NotFound {
                bucket: bucket.to_string(),
                path: path.to_string(),
            });
        }

        Ok(format!(
            "memory://{}/{}?expiresIn={}",
            bucket, path, expires_in_secs
        ))
    }
}

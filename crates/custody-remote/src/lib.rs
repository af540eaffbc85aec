use std::{fmt, path::Path, time::Duration};

use async_trait::async_trait;
use custody_core::storage::{ObjectStore, StorageError, UploadReceipt};
use reqwest::{
    header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_LENGTH, CONTENT_TYPE, USER_AGENT},
    Body, Response, StatusCode,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::{debug, instrument};

const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Connection settings for a Supabase storage bucket.
#[derive(Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://<project>.supabase.co`.
    pub url: String,
    pub bucket: String,
    pub api_key: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("bucket", &self.bucket)
            .field("api_key", &"<redacted>")
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Object store backed by the Supabase storage REST API.
pub struct SupabaseObjectStore {
    cfg: SupabaseConfig,
    client: reqwest::Client,
}

impl SupabaseObjectStore {
    pub fn new(cfg: SupabaseConfig) -> Result<Self, StorageError> {
        let timeout = Duration::from_secs(cfg.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(transport_err)?;
        Ok(Self { cfg, client })
    }

    fn object_url(&self, name: &str) -> String {
        format!(
            "{}/storage/v1/object/{}/{}",
            self.cfg.url.trim_end_matches('/'),
            self.cfg.bucket,
            name.trim_start_matches('/')
        )
    }

    fn headers(&self) -> Result<HeaderMap, StorageError> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("custody"));
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.cfg.api_key))
            .map_err(|_| StorageError::Unauthorized)?;
        headers.insert(AUTHORIZATION, bearer);
        let apikey =
            HeaderValue::from_str(&self.cfg.api_key).map_err(|_| StorageError::Unauthorized)?;
        headers.insert("apikey", apikey);
        Ok(headers)
    }

    fn upload_headers(&self) -> Result<HeaderMap, StorageError> {
        let mut headers = self.headers()?;
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        );
        // Never overwrite existing evidence.
        headers.insert("x-upsert", HeaderValue::from_static("false"));
        Ok(headers)
    }

    async fn send_upload(
        &self,
        name: &str,
        headers: HeaderMap,
        body: Body,
        size: u64,
    ) -> Result<UploadReceipt, StorageError> {
        let resp = self
            .client
            .post(self.object_url(name))
            .headers(headers)
            .body(body)
            .send()
            .await
            .map_err(transport_err)?;
        let resp = check_status(resp, name).await?;

        let confirmed: UploadResponse = resp.json().await.unwrap_or_default();
        debug!(key = ?confirmed.key, size, "object store confirmed upload");
        Ok(UploadReceipt {
            key: name.to_string(),
            size,
        })
    }
}

#[async_trait]
impl ObjectStore for SupabaseObjectStore {
    fn name(&self) -> &'static str {
        "supabase"
    }

    #[instrument(skip_all, fields(bucket = %self.cfg.bucket, name = %name))]
    async fn upload(&self, name: &str, data: Vec<u8>) -> Result<UploadReceipt, StorageError> {
        let size = data.len() as u64;
        let headers = self.upload_headers()?;
        self.send_upload(name, headers, Body::from(data), size).await
    }

    #[instrument(skip_all, fields(bucket = %self.cfg.bucket, name = %name))]
    async fn upload_file(&self, name: &str, path: &Path) -> Result<UploadReceipt, StorageError> {
        let file = tokio::fs::File::open(path).await.map_err(io_err)?;
        let size = file.metadata().await.map_err(io_err)?.len();

        let mut headers = self.upload_headers()?;
        headers.insert(CONTENT_LENGTH, HeaderValue::from(size));
        let body = Body::wrap_stream(ReaderStream::new(file));
        self.send_upload(name, headers, body, size).await
    }

    #[instrument(skip_all, fields(bucket = %self.cfg.bucket, name = %name))]
    async fn download(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let resp = self
            .client
            .get(self.object_url(name))
            .headers(self.headers()?)
            .send()
            .await
            .map_err(transport_err)?;
        let resp = check_status(resp, name).await?;
        let bytes = resp.bytes().await.map_err(transport_err)?;
        Ok(bytes.to_vec())
    }

    #[instrument(skip_all, fields(bucket = %self.cfg.bucket, name = %name))]
    async fn delete(&self, name: &str) -> Result<(), StorageError> {
        let resp = self
            .client
            .delete(self.object_url(name))
            .headers(self.headers()?)
            .send()
            .await
            .map_err(transport_err)?;
        match check_status(resp, name).await {
            Ok(_) | Err(StorageError::NotFound { .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct UploadResponse {
    #[serde(rename = "Key")]
    key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

async fn check_status(resp: Response, name: &str) -> Result<Response, StorageError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp.text().await.unwrap_or_default();
    Err(match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => StorageError::Unauthorized,
        StatusCode::NOT_FOUND => StorageError::NotFound {
            name: name.to_string(),
        },
        _ => StorageError::Rejected {
            status: status.as_u16(),
            reason: error_reason(&body),
        },
    })
}

fn error_reason(body: &str) -> String {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse {
            message: Some(message),
            ..
        }) => message,
        Ok(ErrorResponse {
            error: Some(error), ..
        }) => error,
        _ => body.chars().take(200).collect(),
    }
}

fn transport_err(err: reqwest::Error) -> StorageError {
    StorageError::Transport {
        reason: err.to_string(),
    }
}

fn io_err(err: std::io::Error) -> StorageError {
    StorageError::Io {
        reason: err.to_string(),
    }
}

//! Object-storage client: bucket provisioning and multipart object upload.
//!
//! The endpoint speaks a small HTTP API rooted at `{endpoint}/api/v1`:
//!
//! - `POST /buckets {"bucket_name": ...}` — 201 created; 400 is accepted as
//!   "already exists", so creation is idempotent
//! - `PUT /buckets/{name}/make-public` — 200, idempotent
//! - `POST /objects/{bucket}/upload?object_name=...[&metadata=...]` —
//!   multipart form with a `file` field; 201 on success
//!
//! Uploaded objects become publicly reachable at
//! `{endpoint}/{bucket}/{object_name}`.

use crate::errors::{PipelineError, Result};
use crate::utils::truncate_for_log;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, instrument, warn};

static BUCKET_NAME_DISALLOWED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^a-z0-9-]").expect("static pattern"));

/// Derive a valid bucket name from a source label: lowercase, underscores
/// and spaces become hyphens, anything outside `[a-z0-9-]` is stripped.
pub fn bucket_name_for(source: &str) -> String {
    let lowered = source.to_lowercase().replace(['_', ' '], "-");
    BUCKET_NAME_DISALLOWED.replace_all(&lowered, "").to_string()
}

/// Client for one object-storage endpoint.
#[derive(Debug, Clone)]
pub struct OssClient {
    http: Client,
    endpoint: String,
    api_base: String,
}

impl OssClient {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self> {
        let endpoint = endpoint.trim_end_matches('/').to_string();
        let http = Client::builder().timeout(request_timeout).build()?;
        let api_base = format!("{endpoint}/api/v1");
        Ok(Self {
            http,
            endpoint,
            api_base,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Public URL an uploaded object is reachable at.
    pub fn public_url(&self, bucket: &str, object_name: &str) -> String {
        format!("{}/{}/{}", self.endpoint, bucket, object_name)
    }

    /// Create a bucket. Both 201 (created) and 400 (already exists) are
    /// success, which makes provisioning idempotent across runs.
    #[instrument(level = "info", skip(self))]
    pub async fn create_bucket(&self, bucket: &str) -> Result<()> {
        let resp = self
            .http
            .post(format!("{}/buckets", self.api_base))
            .json(&json!({ "bucket_name": bucket }))
            .send()
            .await?;
        match resp.status().as_u16() {
            201 => {
                info!(bucket, "Created bucket");
                Ok(())
            }
            400 => {
                // The endpoint signals "already exists" as a bare 400.
                debug!(bucket, body = %resp.text().await.unwrap_or_default(), "Bucket already exists");
                Ok(())
            }
            status => Err(PipelineError::StorageRejection {
                object: format!("bucket {bucket}"),
                status,
                body: resp.text().await.unwrap_or_default(),
            }),
        }
    }

    /// Make a bucket publicly readable. Idempotent on the server side.
    #[instrument(level = "info", skip(self))]
    pub async fn make_public(&self, bucket: &str) -> Result<()> {
        let resp = self
            .http
            .put(format!("{}/buckets/{}/make-public", self.api_base, bucket))
            .send()
            .await?;
        if resp.status().as_u16() == 200 {
            info!(bucket, "Made bucket public");
            Ok(())
        } else {
            Err(PipelineError::StorageRejection {
                object: format!("bucket {bucket} visibility"),
                status: resp.status().as_u16(),
                body: resp.text().await.unwrap_or_default(),
            })
        }
    }

    /// Upload raw bytes as `object_name`, returning the public URL.
    #[instrument(level = "debug", skip(self, data))]
    pub async fn upload_bytes(
        &self,
        bucket: &str,
        object_name: &str,
        data: Vec<u8>,
        file_name: &str,
        metadata: Option<&serde_json::Value>,
    ) -> Result<String> {
        let form = Form::new().part("file", Part::bytes(data).file_name(file_name.to_string()));
        let mut request = self
            .http
            .post(format!("{}/objects/{}/upload", self.api_base, bucket))
            .query(&[("object_name", object_name)]);
        if let Some(metadata) = metadata {
            request = request.query(&[("metadata", metadata.to_string())]);
        }

        let resp = request.multipart(form).send().await?;
        if resp.status().as_u16() == 201 {
            let url = self.public_url(bucket, object_name);
            debug!(object_name, %url, "Uploaded object");
            Ok(url)
        } else {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            warn!(
                object_name,
                status,
                body = %truncate_for_log(&body, 200),
                "Object upload rejected"
            );
            Err(PipelineError::StorageRejection {
                object: object_name.to_string(),
                status,
                body,
            })
        }
    }

    /// Upload a local file as `object_name`, returning the public URL.
    pub async fn upload_file(
        &self,
        bucket: &str,
        object_name: &str,
        file_path: &Path,
        metadata: Option<&serde_json::Value>,
    ) -> Result<String> {
        let data = fs::read(file_path).await?;
        let file_name = file_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(object_name)
            .to_string();
        self.upload_bytes(bucket, object_name, data, &file_name, metadata)
            .await
    }

    /// Serialize a JSON value and upload it as `object_name`.
    pub async fn upload_json(
        &self,
        bucket: &str,
        object_name: &str,
        value: &serde_json::Value,
    ) -> Result<String> {
        let data = serde_json::to_vec_pretty(value)?;
        let file_name = object_name.rsplit('/').next().unwrap_or(object_name);
        self.upload_bytes(bucket, object_name, data, file_name, None)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(uri: &str) -> OssClient {
        OssClient::new(uri, Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_bucket_name_normalization() {
        assert_eq!(bucket_name_for("NLP Newsletter_Source"), "nlp-newsletter-source");
        assert_eq!(bucket_name_for("nlp-newsletter"), "nlp-newsletter");
        assert_eq!(bucket_name_for("Weird!!Chars##2024"), "weirdchars2024");
    }

    #[tokio::test]
    async fn test_create_bucket_accepts_201_and_400() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/buckets"))
            .respond_with(ResponseTemplate::new(201))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/v1/buckets"))
            .respond_with(ResponseTemplate::new(400).set_body_string("exists"))
            .mount(&server)
            .await;

        let oss = client(&server.uri());
        // Both calls succeed: creation is idempotent.
        oss.create_bucket("nlp-newsletter").await.unwrap();
        oss.create_bucket("nlp-newsletter").await.unwrap();
    }

    #[tokio::test]
    async fn test_create_bucket_rejects_other_statuses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/buckets"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .create_bucket("nlp-newsletter")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StorageRejection { status: 500, .. }
        ));
    }

    #[tokio::test]
    async fn test_make_public() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/api/v1/buckets/b/make-public"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        client(&server.uri()).make_public("b").await.unwrap();
    }

    #[tokio::test]
    async fn test_upload_bytes_returns_public_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/objects/b/upload"))
            .and(query_param("object_name", "articles/1/content.md"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"ok": true})))
            .mount(&server)
            .await;

        let oss = client(&server.uri());
        let url = oss
            .upload_bytes("b", "articles/1/content.md", b"# hi".to_vec(), "content.md", None)
            .await
            .unwrap();
        assert_eq!(url, format!("{}/b/articles/1/content.md", server.uri()));
    }

    #[tokio::test]
    async fn test_upload_failure_is_storage_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/objects/b/upload"))
            .respond_with(ResponseTemplate::new(403).set_body_string("denied"))
            .mount(&server)
            .await;

        let err = client(&server.uri())
            .upload_bytes("b", "x.bin", vec![0u8], "x.bin", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::StorageRejection { status: 403, .. }
        ));
    }
}

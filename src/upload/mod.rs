//! Artifact storage: uploading partition documents and function archives.
//!
//! The pipeline only needs two operations from its storage collaborator —
//! "put this JSON document under a key" and "put this packaged archive
//! under a key" — expressed as the [`ArtifactStore`] trait so the split
//! logic can be exercised against a local directory in tests while
//! production runs go to the deployment bucket over HTTP.
//!
//! Both operations are fire-and-forget per object: no retries, and any
//! failure rejects the whole run before the parent template is composed.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::constants::STATE_FILE;
use crate::core::SplitError;

/// Asynchronous artifact storage for a deployment run.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload a JSON template document under `key`.
    async fn put_template(&self, key: &str, body: String) -> Result<(), SplitError>;

    /// Upload a packaged function archive under `key`.
    async fn put_archive(&self, key: &str, path: &Path) -> Result<(), SplitError>;
}

/// Server-side-encryption options of the deployment bucket.
///
/// Field names mirror the deployment backend's bucket configuration keys
/// (including its historical `Algorithim` spelling, with the corrected
/// spelling accepted as an alias).
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct EncryptionOptions {
    /// Maps to the `x-amz-server-side-encryption` header.
    #[serde(rename = "serverSideEncryption", default)]
    pub server_side_encryption: Option<String>,

    /// Maps to the `x-amz-server-side-encryption-customer-algorithm` header.
    #[serde(
        rename = "sseCustomerAlgorithim",
        alias = "sseCustomerAlgorithm",
        default
    )]
    pub sse_customer_algorithm: Option<String>,

    /// Maps to the `x-amz-server-side-encryption-customer-key` header.
    #[serde(rename = "sseCustomerKey", default)]
    pub sse_customer_key: Option<String>,

    /// Maps to the `x-amz-server-side-encryption-customer-key-MD5` header.
    #[serde(rename = "sseCustomerKeyMD5", default)]
    pub sse_customer_key_md5: Option<String>,

    /// Maps to the `x-amz-server-side-encryption-aws-kms-key-id` header.
    #[serde(rename = "sseKMSKeyId", default)]
    pub sse_kms_key_id: Option<String>,
}

impl EncryptionOptions {
    /// The configured options as put-request headers.
    #[must_use]
    pub fn headers(&self) -> Vec<(&'static str, &str)> {
        let fields = [
            ("x-amz-server-side-encryption", &self.server_side_encryption),
            (
                "x-amz-server-side-encryption-customer-algorithm",
                &self.sse_customer_algorithm,
            ),
            (
                "x-amz-server-side-encryption-customer-key",
                &self.sse_customer_key,
            ),
            (
                "x-amz-server-side-encryption-customer-key-MD5",
                &self.sse_customer_key_md5,
            ),
            (
                "x-amz-server-side-encryption-aws-kms-key-id",
                &self.sse_kms_key_id,
            ),
        ];
        fields
            .into_iter()
            .filter_map(|(header, value)| value.as_deref().map(|v| (header, v)))
            .collect()
    }
}

/// Stores objects in the deployment bucket over plain HTTP PUT.
pub struct HttpBucketStore {
    client: reqwest::Client,
    endpoint: String,
    encryption: Option<EncryptionOptions>,
}

impl HttpBucketStore {
    /// A store targeting `https://s3.<region>.amazonaws.com/<bucket>`.
    #[must_use]
    pub fn new(region: &str, bucket: &str, encryption: Option<EncryptionOptions>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("https://s3.{region}.amazonaws.com/{bucket}"),
            encryption,
        }
    }

    async fn put(&self, key: &str, content_type: &str, body: Vec<u8>) -> Result<(), SplitError> {
        let mut request = self
            .client
            .put(format!("{}/{key}", self.endpoint))
            .header("content-type", content_type)
            .body(body);
        if let Some(encryption) = &self.encryption {
            for (header, value) in encryption.headers() {
                request = request.header(header, value);
            }
        }

        let response = request.send().await.map_err(|e| SplitError::Upload {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        response
            .error_for_status()
            .map_err(|e| SplitError::Upload {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for HttpBucketStore {
    async fn put_template(&self, key: &str, body: String) -> Result<(), SplitError> {
        self.put(key, "application/json", body.into_bytes()).await
    }

    async fn put_archive(&self, key: &str, path: &Path) -> Result<(), SplitError> {
        let body = tokio::fs::read(path).await.map_err(|e| SplitError::Upload {
            key: key.to_string(),
            reason: format!("cannot read archive {}: {e}", path.display()),
        })?;
        self.put(key, "application/zip", body).await
    }
}

/// Stores objects under a local directory. Used by `--dry-run` and tests.
pub struct LocalDirStore {
    root: PathBuf,
}

impl LocalDirStore {
    /// A store rooted at `root`; keys become relative paths beneath it.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn destination(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    async fn prepare(&self, key: &str) -> Result<PathBuf, SplitError> {
        let destination = self.destination(key);
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(destination)
    }
}

#[async_trait]
impl ArtifactStore for LocalDirStore {
    async fn put_template(&self, key: &str, body: String) -> Result<(), SplitError> {
        let destination = self.prepare(key).await?;
        tokio::fs::write(&destination, body)
            .await
            .map_err(|e| SplitError::Upload {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }

    async fn put_archive(&self, key: &str, path: &Path) -> Result<(), SplitError> {
        let destination = self.prepare(key).await?;
        tokio::fs::copy(path, &destination)
            .await
            .map(|_| ())
            .map_err(|e| SplitError::Upload {
                key: key.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Resolve the deployment bucket name for this run.
///
/// An explicitly configured name wins; otherwise the deployment state file
/// in the package directory is consulted. Failure here aborts the run
/// before any upload is attempted.
pub fn resolve_deployment_bucket(
    explicit: Option<&str>,
    package_dir: &Path,
) -> Result<String, SplitError> {
    if let Some(bucket) = explicit {
        if bucket.is_empty() {
            return Err(SplitError::ConfigResolution {
                reason: "explicit bucket name is empty".to_string(),
            });
        }
        return Ok(bucket.to_string());
    }

    let state_path = package_dir.join(STATE_FILE);
    let content = std::fs::read_to_string(&state_path).map_err(|e| {
        SplitError::ConfigResolution {
            reason: format!(
                "no bucket given and cannot read {}: {e}",
                state_path.display()
            ),
        }
    })?;
    let state: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| SplitError::ConfigResolution {
            reason: format!("invalid state file {}: {e}", state_path.display()),
        })?;

    state
        .pointer("/service/provider/deploymentBucket")
        .and_then(serde_json::Value::as_str)
        .map(ToString::to_string)
        .ok_or_else(|| SplitError::ConfigResolution {
            reason: format!(
                "{} has no service.provider.deploymentBucket entry",
                state_path.display()
            ),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn encryption_options_map_to_headers() {
        let options: EncryptionOptions = serde_json::from_str(
            r#"{
                "serverSideEncryption": "aws:kms",
                "sseKMSKeyId": "key-123"
            }"#,
        )
        .unwrap();
        assert_eq!(
            options.headers(),
            vec![
                ("x-amz-server-side-encryption", "aws:kms"),
                ("x-amz-server-side-encryption-aws-kms-key-id", "key-123"),
            ]
        );
    }

    #[test]
    fn encryption_options_accept_both_algorithm_spellings() {
        let historical: EncryptionOptions =
            serde_json::from_str(r#"{ "sseCustomerAlgorithim": "AES256" }"#).unwrap();
        let corrected: EncryptionOptions =
            serde_json::from_str(r#"{ "sseCustomerAlgorithm": "AES256" }"#).unwrap();
        assert_eq!(historical, corrected);
    }

    #[tokio::test]
    async fn local_store_writes_templates_under_the_key() {
        let temp = TempDir::new().unwrap();
        let store = LocalDirStore::new(temp.path());

        store
            .put_template("artifacts/123/apiStack.json", "{}".to_string())
            .await
            .unwrap();
        let written = temp.path().join("artifacts/123/apiStack.json");
        assert_eq!(std::fs::read_to_string(written).unwrap(), "{}");
    }

    #[test]
    fn explicit_bucket_wins_over_the_state_file() {
        let temp = TempDir::new().unwrap();
        let bucket = resolve_deployment_bucket(Some("given-bucket"), temp.path()).unwrap();
        assert_eq!(bucket, "given-bucket");
    }

    #[test]
    fn bucket_is_read_from_the_state_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(STATE_FILE),
            r#"{ "service": { "provider": { "deploymentBucket": "state-bucket" } } }"#,
        )
        .unwrap();
        let bucket = resolve_deployment_bucket(None, temp.path()).unwrap();
        assert_eq!(bucket, "state-bucket");
    }

    #[test]
    fn unresolvable_bucket_is_a_config_error() {
        let temp = TempDir::new().unwrap();
        let err = resolve_deployment_bucket(None, temp.path()).unwrap_err();
        assert!(matches!(err, SplitError::ConfigResolution { .. }));
    }
}

//! S3-compatible object storage backend.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;

use super::sigv4::{self, AwsCredentials};
use super::{Storage, StorageError, StorageResult};

pub struct S3Storage {
    client: reqwest::Client,
    region: String,
    bucket: String,
    root_dir: String,
    credentials: AwsCredentials,
}

impl S3Storage {
    pub fn new(
        region: &str,
        bucket: &str,
        root_dir: &str,
        access_key_id: String,
        secret_access_key: String,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            region: region.to_string(),
            bucket: bucket.to_string(),
            root_dir: root_dir.trim_matches('/').to_string(),
            credentials: AwsCredentials {
                access_key_id,
                secret_access_key,
            },
        }
    }

    fn object_url(&self, path: &str) -> StorageResult<reqwest::Url> {
        let key = if self.root_dir.is_empty() {
            path.to_string()
        } else {
            format!("{}/{path}", self.root_dir)
        };
        let raw = format!(
            "https://{}.s3.{}.amazonaws.com/{key}",
            self.bucket, self.region
        );
        raw.parse()
            .map_err(|err| StorageError::Remote(format!("invalid object url {raw}: {err}")))
    }

    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> StorageResult<reqwest::Response> {
        let url = self.object_url(path)?;
        let payload = body.clone().unwrap_or_default();
        let headers = sigv4::sign(
            method.as_str(),
            &url,
            &self.region,
            "s3",
            &payload,
            &self.credentials,
            Utc::now(),
        );
        let mut request = self.client.request(method, url);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }
        Ok(request.send().await?)
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn get(&self, path: &str) -> StorageResult<Vec<u8>> {
        let response = self.send(reqwest::Method::GET, path, None).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(path.to_string())),
            status if status.is_success() => Ok(response.bytes().await?.to_vec()),
            status => Err(StorageError::Remote(format!(
                "s3 get {path} returned {status}"
            ))),
        }
    }

    async fn put(&self, path: &str, content: &[u8]) -> StorageResult<()> {
        let response = self
            .send(reqwest::Method::PUT, path, Some(content.to_vec()))
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(StorageError::Remote(format!(
                "s3 put {path} returned {status}"
            )))
        }
    }

    async fn exists(&self, path: &str) -> bool {
        matches!(
            self.send(reqwest::Method::HEAD, path, None).await,
            Ok(response) if response.status().is_success()
        )
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let response = self.send(reqwest::Method::DELETE, path, None).await?;
        let status = response.status();
        // S3 returns 204 for deletes of missing keys, so idempotency is free.
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(StorageError::Remote(format!(
                "s3 delete {path} returned {status}"
            )))
        }
    }
}

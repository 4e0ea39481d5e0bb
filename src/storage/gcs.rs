//! Google Cloud Storage backend over the JSON API.

use async_trait::async_trait;
use reqwest::StatusCode;

use super::{Storage, StorageError, StorageResult};

const GCS_BASE: &str = "https://storage.googleapis.com";

pub struct GcsStorage {
    client: reqwest::Client,
    bucket: String,
    access_token: String,
}

impl GcsStorage {
    pub fn new(bucket: &str, access_token: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            bucket: bucket.to_string(),
            access_token: access_token.to_string(),
        }
    }

    fn object_url(&self, path: &str) -> String {
        format!(
            "{GCS_BASE}/storage/v1/b/{}/o/{}?alt=media",
            self.bucket,
            urlencode(path)
        )
    }

    fn upload_url(&self, path: &str) -> String {
        format!(
            "{GCS_BASE}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.bucket,
            urlencode(path)
        )
    }
}

fn urlencode(path: &str) -> String {
    path.bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                (b as char).to_string()
            }
            other => format!("%{other:02X}"),
        })
        .collect()
}

#[async_trait]
impl Storage for GcsStorage {
    async fn get(&self, path: &str) -> StorageResult<Vec<u8>> {
        let response = self
            .client
            .get(self.object_url(path))
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(path.to_string())),
            status if status.is_success() => Ok(response.bytes().await?.to_vec()),
            status => Err(StorageError::Remote(format!(
                "gcs get {path} returned {status}"
            ))),
        }
    }

    async fn put(&self, path: &str, content: &[u8]) -> StorageResult<()> {
        let response = self
            .client
            .post(self.upload_url(path))
            .bearer_auth(&self.access_token)
            .body(content.to_vec())
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(StorageError::Remote(format!(
                "gcs put {path} returned {status}"
            )))
        }
    }

    async fn exists(&self, path: &str) -> bool {
        let url = format!(
            "{GCS_BASE}/storage/v1/b/{}/o/{}",
            self.bucket,
            urlencode(path)
        );
        matches!(
            self.client
                .get(url)
                .bearer_auth(&self.access_token)
                .send()
                .await,
            Ok(response) if response.status().is_success()
        )
    }

    async fn delete(&self, path: &str) -> StorageResult<()> {
        let url = format!(
            "{GCS_BASE}/storage/v1/b/{}/o/{}",
            self.bucket,
            urlencode(path)
        );
        let response = self
            .client
            .delete(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(StorageError::Remote(format!(
                "gcs delete {path} returned {status}"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::urlencode;

    #[test]
    fn object_names_are_escaped() {
        assert_eq!(urlencode("content-abc"), "content-abc");
        assert_eq!(urlencode("content-abc/run_7"), "content-abc%2Frun_7");
    }
}

// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use anyhow::anyhow;
use async_trait::async_trait;
use reqwest::Client;
use reqwest_retry::{classify_response, classify_send_error, AttemptError};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::chunk::Chunk;
use crate::register::{FileDigest, FileRegistration, FileState};

/// Receipt for one accepted chunk.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Ack {
    pub index: usize,

    /// Opaque receipt from the collector, e.g. an `ETag`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipt: Option<String>,
}

/// One network attempt against the remote collector. Retries are the
/// caller's concern.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Offer per-file content hashes ahead of the upload. Collectors that
    /// do not keep files between uploads treat every file as new.
    async fn register(&self, files: &[FileDigest]) -> Result<Vec<FileRegistration>, AttemptError> {
        Ok(files
            .iter()
            .map(|file| FileRegistration {
                path: file.path.clone(),
                state: FileState::Created,
            })
            .collect())
    }

    async fn put_chunk(&self, chunk: &Chunk) -> Result<Ack, AttemptError>;

    /// Tell the collector that all `total` chunks were delivered.
    async fn finish(&self, total: usize) -> Result<(), AttemptError>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for &T {
    async fn register(&self, files: &[FileDigest]) -> Result<Vec<FileRegistration>, AttemptError> {
        (**self).register(files).await
    }

    async fn put_chunk(&self, chunk: &Chunk) -> Result<Ack, AttemptError> {
        (**self).put_chunk(chunk).await
    }

    async fn finish(&self, total: usize) -> Result<(), AttemptError> {
        (**self).finish(total).await
    }
}

/// Registers file hashes with `POST {base}/files`, uploads chunks with
/// `PUT {base}/chunks/{index}` and completes with `POST {base}/finish`.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    client: Client,
    base: Url,
}

impl HttpTransport {
    pub fn new(base: Url) -> Self {
        Self::with_client(Client::new(), base)
    }

    pub fn with_client(client: Client, base: Url) -> Self {
        Self { client, base }
    }

    fn endpoint(&self, suffix: &str) -> Url {
        let path = format!("{}/{}", self.base.path().trim_end_matches('/'), suffix);
        let mut url = self.base.clone();
        url.set_path(&path);
        url
    }
}

#[derive(Deserialize, Serialize)]
struct Registrations<T> {
    files: T,
}

#[async_trait]
impl Transport for HttpTransport {
    async fn register(&self, files: &[FileDigest]) -> Result<Vec<FileRegistration>, AttemptError> {
        let response = self
            .client
            .post(self.endpoint("files"))
            .json(&Registrations { files })
            .send()
            .await
            .map_err(classify_send_error)?;

        let response = classify_response(response)?;

        let answer: Registrations<Vec<FileRegistration>> = response.json().await.map_err(|err| {
            AttemptError::Permanent(anyhow!("invalid file registration response: {}", err))
        })?;

        Ok(answer.files)
    }

    async fn put_chunk(&self, chunk: &Chunk) -> Result<Ack, AttemptError> {
        let url = self.endpoint(&format!("chunks/{}", chunk.index));

        let response = self
            .client
            .put(url)
            .header("x-chunk-index", chunk.index)
            .header("x-chunk-count", chunk.total)
            .header("x-content-sha256", &chunk.digest)
            .body(chunk.data.clone())
            .send()
            .await
            .map_err(classify_send_error)?;

        let response = classify_response(response)?;

        let receipt = match response.headers().get(reqwest::header::ETAG) {
            Some(etag) => Some(
                etag.to_str()
                    .map_err(|err| AttemptError::Permanent(anyhow!("invalid ETag: {}", err)))?
                    .to_owned(),
            ),
            None => None,
        };

        Ok(Ack {
            index: chunk.index,
            receipt,
        })
    }

    async fn finish(&self, total: usize) -> Result<(), AttemptError> {
        let response = self
            .client
            .post(self.endpoint("finish"))
            .json(&serde_json::json!({ "chunks": total }))
            .send()
            .await
            .map_err(classify_send_error)?;

        classify_response(response)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint() -> anyhow::Result<()> {
        let transport = HttpTransport::new(Url::parse("https://collector.example/uploads/abc/")?);

        assert_eq!(
            transport.endpoint("chunks/2").as_str(),
            "https://collector.example/uploads/abc/chunks/2"
        );
        assert_eq!(
            transport.endpoint("finish").as_str(),
            "https://collector.example/uploads/abc/finish"
        );

        Ok(())
    }
}

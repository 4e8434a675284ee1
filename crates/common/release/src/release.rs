// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    downloader::Downloader,
    types::{DownloadRequest, DownloadResult},
};

/// A release artifact reference, as named in spec §3/§6: `file://`,
/// `https://`, or an object-store URL (`s3://bucket/key`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseRef {
    File(PathBuf),
    Https(String),
    ObjectStore { bucket: String, key: String },
}

impl ReleaseRef {
    /// Parse a release URL by scheme. Unknown schemes are rejected rather
    /// than silently treated as a local path.
    pub fn parse(url: &str) -> Result<Self, ReleaseError> {
        if let Some(path) = url.strip_prefix("file://") {
            return Ok(Self::File(PathBuf::from(path)));
        }
        if url.starts_with("https://") || url.starts_with("http://") {
            return Ok(Self::Https(url.to_string()));
        }
        if let Some(rest) = url.strip_prefix("s3://") {
            let (bucket, key) = rest.split_once('/').context(MalformedObjectStoreSnafu {
                url: url.to_string(),
            })?;
            return Ok(Self::ObjectStore {
                bucket: bucket.to_string(),
                key:    key.to_string(),
            });
        }
        UnsupportedSchemeSnafu { url: url.to_string() }.fail()
    }
}

/// Pluggable backend for `s3://`-style references. The overseer core never
/// talks to a specific object-store SDK directly; an adapter (e.g.
/// `overseer-adapter-ec2`) supplies one backed by its cloud SDK.
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    async fn get(&self, bucket: &str, key: &str, dest: &Path) -> Result<DownloadResult, ReleaseError>;
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ReleaseError {
    #[snafu(display("unsupported release URL scheme: {url}"))]
    UnsupportedScheme { url: String },

    #[snafu(display("malformed object-store URL: {url}"))]
    MalformedObjectStore { url: String },

    #[snafu(display("object-store backend not configured for s3://{bucket}/{key}"))]
    ObjectStoreNotConfigured { bucket: String, key: String },

    #[snafu(display("failed to copy local release from {}", source_path.display()))]
    LocalCopy {
        source_path: PathBuf,
        #[snafu(source)]
        source:      std::io::Error,
    },

    #[snafu(display("failed to fetch release over HTTPS"))]
    Https {
        #[snafu(source)]
        source: crate::error::DownloadError,
    },
}

/// Fetches a [`ReleaseRef`] to a local path, dispatching on scheme.
pub struct ReleaseFetcher {
    https:        Downloader,
    object_store: Option<Box<dyn ObjectStoreClient>>,
}

impl ReleaseFetcher {
    #[must_use]
    pub fn new(https: Downloader) -> Self {
        Self { https, object_store: None }
    }

    #[must_use]
    pub fn with_object_store(mut self, client: Box<dyn ObjectStoreClient>) -> Self {
        self.object_store = Some(client);
        self
    }

    /// Fetch `release` into `dest`, returning the final path and size.
    pub async fn fetch(&self, release: &ReleaseRef, dest: &Path) -> Result<DownloadResult, ReleaseError> {
        match release {
            ReleaseRef::File(source) => {
                let start = jiff::Timestamp::now();
                let bytes = tokio::fs::copy(source, dest)
                    .await
                    .context(LocalCopySnafu { source_path: source.clone() })?;
                Ok(DownloadResult {
                    path:       dest.to_path_buf(),
                    size:       bytes,
                    sha256:     String::new(),
                    from_cache: false,
                    duration:   start.until(jiff::Timestamp::now()).unwrap_or_default(),
                })
            }
            ReleaseRef::Https(url) => {
                let request = DownloadRequest::builder()
                    .url(url.clone())
                    .output_path(dest.to_path_buf())
                    .build();
                self.https.download(request).await.context(HttpsSnafu)
            }
            ReleaseRef::ObjectStore { bucket, key } => match &self.object_store {
                Some(client) => client.get(bucket, key, dest).await,
                None => ObjectStoreNotConfiguredSnafu {
                    bucket: bucket.clone(),
                    key:    key.clone(),
                }
                .fail(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DownloaderConfig;

    #[test]
    fn parses_file_scheme() {
        assert_eq!(
            ReleaseRef::parse("file:///opt/releases/app.tar.gz").unwrap(),
            ReleaseRef::File(PathBuf::from("/opt/releases/app.tar.gz"))
        );
    }

    #[test]
    fn parses_https_scheme() {
        assert_eq!(
            ReleaseRef::parse("https://cdn.example.com/app.tar.gz").unwrap(),
            ReleaseRef::Https("https://cdn.example.com/app.tar.gz".to_string())
        );
    }

    #[test]
    fn parses_object_store_scheme() {
        assert_eq!(
            ReleaseRef::parse("s3://my-bucket/releases/app.tar.gz").unwrap(),
            ReleaseRef::ObjectStore {
                bucket: "my-bucket".to_string(),
                key:    "releases/app.tar.gz".to_string(),
            }
        );
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(ReleaseRef::parse("ftp://example.com/app.tar.gz").is_err());
    }

    #[tokio::test]
    async fn object_store_without_backend_errors() {
        let fetcher = ReleaseFetcher::new(Downloader::new(DownloaderConfig::default()));
        let result = fetcher
            .fetch(
                &ReleaseRef::ObjectStore { bucket: "b".into(), key: "k".into() },
                Path::new("/tmp/does-not-matter"),
            )
            .await;
        assert!(matches!(result, Err(ReleaseError::ObjectStoreNotConfigured { .. })));
    }
}

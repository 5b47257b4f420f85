//! Backend-agnostic object storage contract.
//!
//! Every backend implements [`Storage`]; callers pick one through
//! [`create_storage`] and a tagged [`StorageConfig`].

use crate::{
    config::StorageConfig,
    models::{
        access::Access,
        options::{GetOptions, PutOptions, ValidationError},
        signed_url::SignedUrl,
    },
    services::{file_storage::FileStorage, s3_storage::S3Storage},
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::{
    io,
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;

/// Owned byte stream used for streaming puts and gets.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("{0}")]
    Validation(#[from] ValidationError),
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("body exceeds the declared {limit} bytes")]
    TooLarge { limit: u64 },
    #[error("{0} is not configured")]
    NotConfigured(&'static str),
    #[error("backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    UrlEncode(#[from] serde_urlencoded::ser::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Options accepted by the direct put operations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PutObjectOptions {
    pub access: Access,
}

impl PutObjectOptions {
    pub fn with_access(access: Access) -> Self {
        Self { access }
    }
}

/// Put/get/delete/list over one backend.
///
/// Keys are slash-delimited; listing prefixes are relative to the backend
/// root and results are relative to the prefix.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Store the contents of a local file under `key`.
    async fn put_file_path(
        &self,
        key: &str,
        source: &Path,
        options: PutObjectOptions,
    ) -> StorageResult<()>;

    async fn put_stream(
        &self,
        key: &str,
        stream: ByteStream,
        options: PutObjectOptions,
    ) -> StorageResult<()>;

    async fn put_buffer(
        &self,
        key: &str,
        bytes: Bytes,
        options: PutObjectOptions,
    ) -> StorageResult<()>;

    /// Local path holding the object's content.
    async fn get_file_path(&self, key: &str) -> StorageResult<PathBuf>;

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream>;

    async fn get_buffer(&self, key: &str) -> StorageResult<Bytes>;

    /// Unsigned, permanent reference. Only useful for publicly readable objects.
    async fn get_url(&self, key: &str) -> StorageResult<String>;

    /// Capability URL for downloading `key`.
    async fn get_signed_url(&self, key: &str, options: GetOptions) -> StorageResult<String>;

    /// Capability URL (plus headers) authorizing one upload matching `options`.
    async fn put_signed_url(&self, key: &str, options: PutOptions) -> StorageResult<SignedUrl>;

    /// Remove `key`. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Unique immediate child names under `prefix`, in order.
    async fn list_dir(&self, prefix: &str, limit: Option<usize>) -> StorageResult<Vec<String>>;

    /// Every descendant key under `prefix`, relative to it, in order.
    async fn list_all(&self, prefix: &str, limit: Option<usize>) -> StorageResult<Vec<String>>;
}

/// Build the backend selected by `config`.
pub fn create_storage(config: StorageConfig) -> StorageResult<Arc<dyn Storage>> {
    match config {
        StorageConfig::Fs { fs } => Ok(Arc::new(FileStorage::new(fs))),
        StorageConfig::S3 { s3 } => Ok(Arc::new(S3Storage::new(s3)?)),
    }
}

/// First path segment of each key, de-duplicated in order of appearance.
pub(crate) fn first_segments<I>(keys: I, limit: Option<usize>) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut names: Vec<String> = Vec::new();
    for key in keys {
        let head = key.split('/').next().unwrap_or_default();
        if !head.is_empty() && !names.iter().any(|name| name == head) {
            names.push(head.to_string());
        }
    }
    names.truncate(limit.unwrap_or(usize::MAX));
    names
}

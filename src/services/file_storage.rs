//! Filesystem backend and signed-URL issuer.
//!
//! Direct puts go through the same stage → rename → sidecar path as the
//! gateway. Signed URLs are minted without touching the disk; the gateway
//! redeems them later.

use crate::{
    config::FileStorageConfig,
    models::{
        key::{ObjectKey, validate_prefix},
        options::{DEFAULT_EXPIRES, GetOptions, PutOptions},
        signed_url::SignedUrl,
    },
    services::{
        hasher::{self, CanonicalFields, HashSecret},
        storage::{ByteStream, PutObjectOptions, Storage, StorageError, StorageResult},
        storage_service::StorageService,
    },
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream};
use std::{
    collections::BTreeMap,
    fmt, io,
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::fs::{self, File};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Maps a key to the gateway URL that serves it (without a query string).
pub type UrlTemplate = Arc<dyn Fn(&str) -> String + Send + Sync>;

#[derive(Clone)]
pub struct FileStorage {
    store: StorageService,
    hash_secret: Option<HashSecret>,
    url_template: Option<UrlTemplate>,
}

impl fmt::Debug for FileStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileStorage")
            .field("store", &self.store)
            .field("hash_secret", &self.hash_secret)
            .field("url_template", &self.url_template.is_some())
            .finish()
    }
}

impl FileStorage {
    /// Build from config. No I/O happens here; directories are created on
    /// first write.
    pub fn new(config: FileStorageConfig) -> Self {
        let url_template = config.public_url.map(|base| {
            let base = base.trim_end_matches('/').to_string();
            Arc::new(move |key: &str| format!("{}/{}", base, key)) as UrlTemplate
        });
        Self {
            store: StorageService::new(config.base_path, config.meta_path, config.tmp_path),
            hash_secret: config.hash_secret.filter(|secret| !secret.is_empty()),
            url_template,
        }
    }

    /// Replace the URL template, e.g. when the gateway's address is only
    /// known after binding.
    pub fn with_url_template<F>(mut self, template: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.url_template = Some(Arc::new(template));
        self
    }

    pub fn store(&self) -> &StorageService {
        &self.store
    }

    fn template(&self) -> StorageResult<&UrlTemplate> {
        self.url_template
            .as_ref()
            .ok_or(StorageError::NotConfigured("url template"))
    }

    fn secret(&self) -> StorageResult<&HashSecret> {
        self.hash_secret
            .as_ref()
            .ok_or(StorageError::NotConfigured("hash secret"))
    }

    /// Sign `fields` for `key` and render the capability URL.
    fn sign_url(
        &self,
        key: &ObjectKey,
        mut fields: CanonicalFields,
        mut pairs: Vec<(&'static str, String)>,
    ) -> StorageResult<String> {
        let secret = self.secret()?;
        let template = self.template()?;

        let salt = hasher::mint_salt();
        fields.insert("key".into(), key.as_str().into());
        fields.insert("salt".into(), salt.as_str().into());
        let hash = hasher::generate_hash(secret, &fields);

        pairs.push(("hash", hash));
        pairs.push(("salt", salt));
        let query = serde_urlencoded::to_string(&pairs)?;
        Ok(format!("{}?{}", template(key.as_str()), query))
    }
}

#[async_trait]
impl Storage for FileStorage {
    async fn put_file_path(
        &self,
        key: &str,
        source: &Path,
        options: PutObjectOptions,
    ) -> StorageResult<()> {
        let file = File::open(source).await?;
        self.put_stream(key, ReaderStream::new(file).boxed(), options)
            .await
    }

    async fn put_stream(
        &self,
        key: &str,
        stream: ByteStream,
        options: PutObjectOptions,
    ) -> StorageResult<()> {
        let key = ObjectKey::parse(key)?;
        let staged = self.store.stage_stream(&key, stream, None).await?;
        let metadata = self.store.publish(staged, &key, options.access).await?;
        debug!("stored {} as {} ({})", key, metadata.access, metadata.sha256);
        Ok(())
    }

    async fn put_buffer(
        &self,
        key: &str,
        bytes: Bytes,
        options: PutObjectOptions,
    ) -> StorageResult<()> {
        self.put_stream(key, stream::once(async move { Ok::<_, io::Error>(bytes) }).boxed(), options)
            .await
    }

    async fn get_file_path(&self, key: &str) -> StorageResult<PathBuf> {
        let key = ObjectKey::parse(key)?;
        let (path, _) = self.store.resolve(&key).await?;
        Ok(path)
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let path = self.get_file_path(key).await?;
        let file = File::open(&path).await?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn get_buffer(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.get_file_path(key).await?;
        Ok(Bytes::from(fs::read(&path).await?))
    }

    async fn get_url(&self, key: &str) -> StorageResult<String> {
        let key = ObjectKey::parse(key)?;
        let template = self.template()?;
        Ok(template(key.as_str()))
    }

    async fn get_signed_url(&self, key: &str, options: GetOptions) -> StorageResult<String> {
        let key = ObjectKey::parse(key)?;
        options.validate()?;
        let options = GetOptions {
            expires: Some(options.expires.unwrap_or(DEFAULT_EXPIRES)),
        };
        self.sign_url(&key, options.canonical_fields(), options.query_pairs())
    }

    async fn put_signed_url(&self, key: &str, options: PutOptions) -> StorageResult<SignedUrl> {
        let key = ObjectKey::parse(key)?;
        options.validate()?;
        let url = self.sign_url(&key, options.canonical_fields(), options.query_pairs())?;
        Ok(SignedUrl {
            url,
            headers: BTreeMap::new(),
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let key = ObjectKey::parse(key)?;
        self.store.delete(&key).await
    }

    async fn list_dir(&self, prefix: &str, limit: Option<usize>) -> StorageResult<Vec<String>> {
        validate_prefix(prefix)?;
        self.store.list_dir(prefix, limit).await
    }

    async fn list_all(&self, prefix: &str, limit: Option<usize>) -> StorageResult<Vec<String>> {
        validate_prefix(prefix)?;
        self.store.list_all(prefix, limit).await
    }
}

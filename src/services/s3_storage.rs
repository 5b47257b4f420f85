//! S3 backend.
//!
//! Signed URLs are real presigned S3 requests; the gateway is not involved.

use crate::{
    models::{
        access::Access,
        key::{ObjectKey, validate_prefix},
        options::{DEFAULT_EXPIRES, GetOptions, PutOptions, ValidationError},
        signed_url::SignedUrl,
    },
    services::storage::{
        ByteStream, PutObjectOptions, Storage, StorageError, StorageResult, first_segments,
    },
};
use async_trait::async_trait;
use aws_sdk_s3::{
    Client,
    config::{BehaviorVersion, Builder as S3ConfigBuilder, Credentials, Region},
    error::DisplayErrorContext,
    presigning::PresigningConfig,
    primitives::ByteStream as S3ByteStream,
    types::{
        BucketLocationConstraint, ChecksumAlgorithm, CreateBucketConfiguration, ObjectCannedAcl,
    },
};
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, TryStreamExt, stream};
use serde::Deserialize;
use std::{
    collections::{BTreeMap, VecDeque},
    io,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::{debug, info};
use uuid::Uuid;

/// S3 caps a single listing page at this many keys.
const PAGE_SIZE: usize = 1000;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct S3StorageConfig {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Custom endpoint for S3-compatible services (MinIO and friends).
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Where `get_file_path` downloads objects to.
    pub tmp_path: PathBuf,
}

impl S3StorageConfig {
    fn validate(&self) -> Result<(), ValidationError> {
        for (path, value) in [
            ("s3.bucket", &self.bucket),
            ("s3.region", &self.region),
            ("s3.access_key_id", &self.access_key_id),
            ("s3.secret_access_key", &self.secret_access_key),
        ] {
            if value.is_empty() {
                return Err(ValidationError::single(path, "Required"));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct S3Storage {
    client: Client,
    bucket: String,
    region: String,
    endpoint: Option<String>,
    tmp_path: PathBuf,
}

impl S3Storage {
    /// Build a client from static credentials. No request is sent.
    pub fn new(config: S3StorageConfig) -> StorageResult<Self> {
        config.validate()?;

        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "static",
        );
        let mut builder = S3ConfigBuilder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .endpoint_url(endpoint.clone())
                .force_path_style(is_local_endpoint(endpoint));
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket,
            region: config.region,
            endpoint: config.endpoint,
            tmp_path: config.tmp_path,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Create the bucket. Succeeds if we already own it.
    pub async fn create_bucket(&self) -> StorageResult<()> {
        let mut request = self.client.create_bucket().bucket(&self.bucket);
        // us-east-1 rejects an explicit location constraint.
        if self.region != "us-east-1" {
            request = request.create_bucket_configuration(
                CreateBucketConfiguration::builder()
                    .location_constraint(BucketLocationConstraint::from(self.region.as_str()))
                    .build(),
            );
        }
        match request.send().await {
            Ok(_) => {
                info!("created bucket {}", self.bucket);
                Ok(())
            }
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|e| e.is_bucket_already_owned_by_you()) =>
            {
                debug!("bucket {} already exists", self.bucket);
                Ok(())
            }
            Err(err) => Err(backend_error(err)),
        }
    }

    /// Delete every object, then the bucket itself.
    pub async fn destroy_bucket(&self) -> StorageResult<()> {
        let keys: Vec<String> = self.list_each("", None).try_collect().await?;
        for key in &keys {
            self.client
                .delete_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
                .map_err(backend_error)?;
        }
        self.client
            .delete_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(backend_error)?;
        info!("destroyed bucket {} ({} objects)", self.bucket, keys.len());
        Ok(())
    }

    /// Lazily page through every key under `prefix`, yielding keys relative
    /// to it. At most `limit` keys are yielded; `None` means all of them.
    pub fn list_each(
        &self,
        prefix: &str,
        limit: Option<usize>,
    ) -> futures::stream::BoxStream<'static, StorageResult<String>> {
        let lister = Lister {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            prefix: prefix.to_string(),
            token: None,
            remaining: limit,
            pending: VecDeque::new(),
            exhausted: false,
        };
        stream::try_unfold(lister, Lister::next_key).boxed()
    }

    async fn put_body(
        &self,
        key: &str,
        body: S3ByteStream,
        options: PutObjectOptions,
    ) -> StorageResult<()> {
        let key = ObjectKey::parse(key)?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .acl(canned_acl(options.access))
            .body(body)
            .send()
            .await
            .map_err(backend_error)?;
        debug!("uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn fetch(&self, key: &str) -> StorageResult<S3ByteStream> {
        let key = ObjectKey::parse(key)?;
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
        {
            Ok(output) => Ok(output.body),
            Err(err) if err.as_service_error().is_some_and(|e| e.is_no_such_key()) => {
                Err(StorageError::ObjectNotFound(key.to_string()))
            }
            Err(err) => Err(backend_error(err)),
        }
    }

    fn presigning(expires: u32) -> StorageResult<PresigningConfig> {
        PresigningConfig::expires_in(Duration::from_secs(u64::from(expires)))
            .map_err(|err| StorageError::Backend(err.to_string()))
    }
}

#[async_trait]
impl Storage for S3Storage {
    async fn put_file_path(
        &self,
        key: &str,
        source: &Path,
        options: PutObjectOptions,
    ) -> StorageResult<()> {
        let body = S3ByteStream::from_path(source)
            .await
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        self.put_body(key, body, options).await
    }

    async fn put_stream(
        &self,
        key: &str,
        mut stream: ByteStream,
        options: PutObjectOptions,
    ) -> StorageResult<()> {
        // PutObject needs a known length, so the stream is buffered.
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.try_next().await? {
            buffer.extend_from_slice(&chunk);
        }
        self.put_body(key, S3ByteStream::from(buffer.freeze()), options)
            .await
    }

    async fn put_buffer(
        &self,
        key: &str,
        bytes: Bytes,
        options: PutObjectOptions,
    ) -> StorageResult<()> {
        self.put_body(key, S3ByteStream::from(bytes), options).await
    }

    async fn get_file_path(&self, key: &str) -> StorageResult<PathBuf> {
        let mut body = self.fetch(key).await?;
        let key = ObjectKey::parse(key)?;

        fs::create_dir_all(&self.tmp_path).await?;
        let path = self
            .tmp_path
            .join(format!("{}-{}", Uuid::new_v4().simple(), key.leaf()));
        let mut file = File::create(&path).await?;
        let copied: StorageResult<()> = async {
            while let Some(chunk) = body.try_next().await.map_err(io::Error::other)? {
                file.write_all(&chunk).await?;
            }
            file.flush().await?;
            Ok(())
        }
        .await;
        if let Err(err) = copied {
            drop(file);
            let _ = fs::remove_file(&path).await;
            return Err(err);
        }
        Ok(path)
    }

    async fn get_stream(&self, key: &str) -> StorageResult<ByteStream> {
        let body = self.fetch(key).await?;
        let stream = stream::try_unfold(body, |mut body| async move {
            let chunk = body.try_next().await.map_err(io::Error::other)?;
            Ok::<_, io::Error>(chunk.map(|chunk| (chunk, body)))
        });
        Ok(stream.boxed())
    }

    async fn get_buffer(&self, key: &str) -> StorageResult<Bytes> {
        let body = self.fetch(key).await?;
        let collected = body
            .collect()
            .await
            .map_err(|err| StorageError::Backend(err.to_string()))?;
        Ok(collected.into_bytes())
    }

    async fn get_url(&self, key: &str) -> StorageResult<String> {
        let key = ObjectKey::parse(key)?;
        let base = match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://s3.{}.amazonaws.com", self.region),
        };
        Ok(format!("{}/{}/{}", base, self.bucket, key))
    }

    async fn get_signed_url(&self, key: &str, options: GetOptions) -> StorageResult<String> {
        let key = ObjectKey::parse(key)?;
        options.validate()?;
        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .presigned(Self::presigning(
                options.expires.unwrap_or(DEFAULT_EXPIRES),
            )?)
            .await
            .map_err(backend_error)?;
        Ok(presigned.uri().to_string())
    }

    async fn put_signed_url(&self, key: &str, options: PutOptions) -> StorageResult<SignedUrl> {
        let key = ObjectKey::parse(key)?;
        options.validate()?;

        let acl = canned_acl(options.access);
        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .content_length(options.size as i64)
            .content_type(&options.mime)
            .acl(acl.clone());
        if let Some(sha256) = &options.sha256 {
            request = request
                .checksum_algorithm(ChecksumAlgorithm::Sha256)
                .checksum_sha256(hex_to_base64(sha256)?);
        }
        let presigned = request
            .presigned(Self::presigning(options.expires)?)
            .await
            .map_err(backend_error)?;

        let mut headers: BTreeMap<String, String> = presigned
            .headers()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.to_string()))
            .collect();
        headers.insert("x-amz-acl".into(), acl.as_str().to_string());
        headers.insert("content-type".into(), options.mime.clone());

        Ok(SignedUrl {
            url: presigned.uri().to_string(),
            headers,
        })
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let key = ObjectKey::parse(key)?;
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    async fn list_dir(&self, prefix: &str, limit: Option<usize>) -> StorageResult<Vec<String>> {
        validate_prefix(prefix)?;
        let keys: Vec<String> = self.list_each(prefix, None).try_collect().await?;
        Ok(first_segments(keys, limit))
    }

    async fn list_all(&self, prefix: &str, limit: Option<usize>) -> StorageResult<Vec<String>> {
        validate_prefix(prefix)?;
        self.list_each(prefix, limit).try_collect().await
    }
}

/// Pagination state for [`S3Storage::list_each`].
struct Lister {
    client: Client,
    bucket: String,
    prefix: String,
    token: Option<String>,
    remaining: Option<usize>,
    pending: VecDeque<String>,
    exhausted: bool,
}

impl Lister {
    async fn next_key(mut self) -> StorageResult<Option<(String, Self)>> {
        loop {
            if self.remaining == Some(0) {
                return Ok(None);
            }
            if let Some(key) = self.pending.pop_front() {
                if let Some(remaining) = self.remaining.as_mut() {
                    *remaining -= 1;
                }
                return Ok(Some((key, self)));
            }
            if self.exhausted {
                return Ok(None);
            }

            let page_size = self.remaining.map_or(PAGE_SIZE, |n| n.min(PAGE_SIZE));
            let output = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&self.prefix)
                .max_keys(page_size as i32)
                .set_continuation_token(self.token.take())
                .send()
                .await
                .map_err(backend_error)?;

            let prefix = self.prefix.clone();
            self.pending.extend(
                output
                    .contents()
                    .iter()
                    .filter_map(|object| object.key())
                    .map(|key| relative_key(&prefix, key).to_string()),
            );
            self.token = output.next_continuation_token().map(str::to_string);
            self.exhausted = !output.is_truncated().unwrap_or(false) || self.token.is_none();
        }
    }
}

fn canned_acl(access: Access) -> ObjectCannedAcl {
    ObjectCannedAcl::from(access.as_str())
}

/// `x-amz-checksum-sha256` carries the digest base64 encoded, not hex.
fn hex_to_base64(sha256: &str) -> StorageResult<String> {
    let raw = hex::decode(sha256).map_err(|_| ValidationError::single("sha256", "Invalid"))?;
    Ok(BASE64.encode(raw))
}

fn relative_key<'a>(prefix: &str, key: &'a str) -> &'a str {
    key.strip_prefix(prefix).unwrap_or(key)
}

/// Local S3-compatible servers rarely resolve virtual-hosted bucket names.
fn is_local_endpoint(endpoint: &str) -> bool {
    endpoint.contains("localhost") || endpoint.contains("127.0.0.1")
}

fn backend_error<E: std::error::Error>(err: E) -> StorageError {
    StorageError::Backend(DisplayErrorContext(err).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABC_SHA256: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    fn config() -> S3StorageConfig {
        S3StorageConfig {
            bucket: "uploads".into(),
            region: "us-east-1".into(),
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
            endpoint: Some("http://localhost:9000".into()),
            tmp_path: std::env::temp_dir(),
        }
    }

    #[test]
    fn checksum_header_is_base64_of_digest() {
        assert_eq!(
            hex_to_base64(ABC_SHA256).unwrap(),
            "ungWv48Bz+pBQUDeXa4iI7ADYaOWF3qctBD/YfIAFa0="
        );
        assert!(hex_to_base64("zz").is_err());
    }

    #[test]
    fn keys_are_made_relative_to_prefix() {
        assert_eq!(relative_key("tmp/test/", "tmp/test/folder/c"), "folder/c");
        assert_eq!(relative_key("", "a/b"), "a/b");
        assert_eq!(relative_key("other/", "a/b"), "a/b");
    }

    #[test]
    fn acl_names_match_canned_acls() {
        assert_eq!(canned_acl(Access::Private), ObjectCannedAcl::Private);
        assert_eq!(canned_acl(Access::PublicRead), ObjectCannedAcl::PublicRead);
        assert_eq!(canned_acl(Access::PublicReadWrite), ObjectCannedAcl::PublicReadWrite);
    }

    #[test]
    fn local_endpoints_use_path_style() {
        assert!(is_local_endpoint("http://localhost:9000"));
        assert!(is_local_endpoint("http://127.0.0.1:9000"));
        assert!(!is_local_endpoint("https://s3.eu-west-1.amazonaws.com"));
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let mut config = config();
        config.access_key_id.clear();
        let err = S3Storage::new(config).unwrap_err();
        assert!(err.to_string().contains("s3.access_key_id"));
    }

    #[tokio::test]
    async fn public_url_uses_endpoint_or_regional_host() {
        let storage = S3Storage::new(config()).unwrap();
        assert_eq!(
            storage.get_url("a/b.txt").await.unwrap(),
            "http://localhost:9000/uploads/a/b.txt"
        );

        let mut aws = config();
        aws.endpoint = None;
        aws.region = "eu-west-1".into();
        let storage = S3Storage::new(aws).unwrap();
        assert_eq!(
            storage.get_url("a/b.txt").await.unwrap(),
            "https://s3.eu-west-1.amazonaws.com/uploads/a/b.txt"
        );
    }

    #[tokio::test]
    async fn presigned_put_carries_acl_and_content_type() {
        let storage = S3Storage::new(config()).unwrap();
        let options = PutOptions::new(3)
            .with_mime("text/plain")
            .with_access(Access::PublicRead)
            .with_sha256(ABC_SHA256);
        let signed = storage.put_signed_url("a/b", options).await.unwrap();

        assert!(signed.url.starts_with("http://localhost:9000/uploads/a/b?"), "{}", signed.url);
        assert!(signed.url.contains("X-Amz-Signature="));
        assert_eq!(signed.headers["x-amz-acl"], "public-read");
        assert_eq!(signed.headers["content-type"], "text/plain");
    }

    #[tokio::test]
    async fn presigning_validates_input() {
        let storage = S3Storage::new(config()).unwrap();
        assert!(matches!(
            storage.put_signed_url("/abs", PutOptions::new(1)).await,
            Err(StorageError::Validation(_))
        ));
        assert!(matches!(
            storage
                .put_signed_url("a/b", PutOptions::new(1).with_expires(604_801))
                .await,
            Err(StorageError::Validation(_))
        ));
    }
}

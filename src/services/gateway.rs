//! Redeems capability URLs issued by [`FileStorage`](super::file_storage::FileStorage).
//!
//! Every request carries its own authorization in the query string; the only
//! state shared between requests is the directory layout in [`StorageService`].

use crate::{
    errors::AppError,
    models::{
        access::Access,
        key::ObjectKey,
        metadata::ObjectMetadata,
        options::{DEFAULT_MIME, GetOptions, PutOptions, ValidationError},
    },
    services::{
        hasher::{self, CanonicalFields, HashSecret},
        storage::StorageError,
        storage_service::StorageService,
    },
};
use bytes::Bytes;
use futures::Stream;
use std::{collections::HashMap, io, path::Path};
use tokio::fs::File;
use tracing::{debug, info, warn};

pub type Query = HashMap<String, String>;

#[derive(Clone, Debug)]
pub struct Gateway {
    store: StorageService,
    secret: HashSecret,
}

/// An opened payload ready to be streamed back.
#[derive(Debug)]
pub struct Download {
    pub file: File,
    pub len: u64,
    pub content_type: String,
}

impl Gateway {
    pub fn new(store: StorageService, secret: HashSecret) -> Self {
        Self { store, secret }
    }

    pub fn store(&self) -> &StorageService {
        &self.store
    }

    /// GET: sidecar lookup, capability check for private objects, then open.
    pub async fn open(&self, raw_key: &str, query: &Query) -> Result<Download, AppError> {
        let key = ObjectKey::parse(raw_key)?;
        let Some(metadata) = self.store.read_metadata(&key).await? else {
            debug!("no metadata for {}", key);
            return Err(AppError::NotFound("Metadata not found"));
        };

        // A GET capability does not sign `mime`, so its override is ignored.
        let mime = match metadata.access {
            Access::Private => match self.authorize_read(&key, query)? {
                Capability::Put => present(query, "mime"),
                Capability::Get => None,
            },
            _ => present(query, "mime"),
        };

        let path = self.store.object_path(&key, metadata.access);
        let (file, len) = match open_file(&path).await {
            Ok(opened) => opened,
            Err(err) => {
                debug!("payload for {} unreadable: {}", key, err);
                return Err(AppError::NotFound("404 Not Found"));
            }
        };

        Ok(Download {
            file,
            len,
            content_type: content_type(&key, mime),
        })
    }

    /// PUT: check the capability, stage the body, verify it, then publish.
    ///
    /// Nothing touches the disk until the capability verifies, and every
    /// integrity failure removes the staged file before returning.
    pub async fn upload<S>(
        &self,
        raw_key: &str,
        query: &Query,
        body: S,
    ) -> Result<ObjectMetadata, AppError>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        let key = ObjectKey::parse(raw_key)?;
        let options = PutOptions::from_query(query);
        let signature = signature_params(query);
        let (options, (hash, salt)) = match (options, signature) {
            (Ok(options), Ok(signature)) => (options, signature),
            (Err(mut err), Err(other)) => {
                err.merge(other);
                return Err(err.into());
            }
            (Err(err), _) | (_, Err(err)) => return Err(err.into()),
        };

        let fields = signed_fields(options.canonical_fields(), &key, salt);
        if !hasher::verify_hash(&self.secret, &fields, hash) {
            debug!("rejected upload to {}: bad hash", key);
            return Err(AppError::Forbidden);
        }

        let staged = match self.store.stage_stream(&key, body, Some(options.size)).await {
            Ok(staged) => staged,
            Err(StorageError::TooLarge { limit }) => {
                warn!("upload to {} exceeded the declared {} bytes", key, limit);
                return Err(AppError::SizeMismatch);
            }
            Err(err) => return Err(err.into()),
        };

        if staged.size != options.size {
            warn!(
                "upload to {} is {} bytes, expected {}",
                key, staged.size, options.size
            );
            staged.discard().await;
            return Err(AppError::SizeMismatch);
        }
        if let Some(expected) = &options.sha256 {
            if !staged.sha256.eq_ignore_ascii_case(expected) {
                warn!("upload to {} failed its sha256 check", key);
                staged.discard().await;
                return Err(AppError::ChecksumMismatch);
            }
        }

        let metadata = self.store.publish(staged, &key, options.access).await?;
        info!("published {} ({}, {} bytes)", key, metadata.access, options.size);
        Ok(metadata)
    }

    /// Private reads need the `hash`/`salt` pair of a PUT or GET capability.
    ///
    /// With no `hash` at all the answer is identical to a missing sidecar, so
    /// anonymous callers cannot probe for private keys.
    fn authorize_read(&self, key: &ObjectKey, query: &Query) -> Result<Capability, AppError> {
        if present(query, "hash").is_none() {
            return Err(AppError::NotFound("Metadata not found"));
        }

        // A PUT capability always carries `size`; anything else is a GET one.
        let (capability, options) = if present(query, "size").is_some() {
            (
                Capability::Put,
                PutOptions::from_query(query).map(|options| options.canonical_fields()),
            )
        } else {
            (
                Capability::Get,
                GetOptions::from_query(query).map(|options| options.canonical_fields()),
            )
        };
        let (options, (hash, salt)) = match (options, signature_params(query)) {
            (Ok(options), Ok(signature)) => (options, signature),
            (Err(mut err), Err(other)) => {
                err.merge(other);
                return Err(err.into());
            }
            (Err(err), _) | (_, Err(err)) => return Err(err.into()),
        };

        let fields = signed_fields(options, key, salt);
        if hasher::verify_hash(&self.secret, &fields, hash) {
            Ok(capability)
        } else {
            debug!("rejected read of {}: bad hash", key);
            Err(AppError::Forbidden)
        }
    }
}

/// Which kind of capability authorized a private read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Capability {
    /// Signs every put option, `mime` included.
    Put,
    /// Signs only `expires`.
    Get,
}

fn present<'a>(query: &'a Query, name: &str) -> Option<&'a str> {
    query
        .get(name)
        .map(String::as_str)
        .filter(|value| !value.is_empty())
}

/// `(hash, salt)` from the query; both are required.
fn signature_params(query: &Query) -> Result<(&str, &str), ValidationError> {
    match (present(query, "hash"), present(query, "salt")) {
        (Some(hash), Some(salt)) => Ok((hash, salt)),
        (None, Some(_)) => Err(ValidationError::single("hash", "Required")),
        (Some(_), None) => Err(ValidationError::single("salt", "Required")),
        (None, None) => {
            let mut err = ValidationError::single("hash", "Required");
            err.merge(ValidationError::single("salt", "Required"));
            Err(err)
        }
    }
}

fn signed_fields(mut fields: CanonicalFields, key: &ObjectKey, salt: &str) -> CanonicalFields {
    fields.insert("key".into(), key.as_str().into());
    fields.insert("salt".into(), salt.into());
    fields
}

async fn open_file(path: &Path) -> io::Result<(File, u64)> {
    let file = File::open(path).await?;
    let meta = file.metadata().await?;
    if !meta.is_file() {
        return Err(io::Error::new(io::ErrorKind::NotFound, "not a regular file"));
    }
    Ok((file, meta.len()))
}

/// Explicit `mime` override, else a small extension table.
fn content_type(key: &ObjectKey, mime: Option<&str>) -> String {
    if let Some(mime) = mime {
        return mime.to_string();
    }
    let extension = key
        .leaf()
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase());
    let mime = match extension.as_deref() {
        Some("txt") => "text/plain",
        Some("html" | "htm") => "text/html",
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        _ => DEFAULT_MIME,
    };
    mime.to_string()
}

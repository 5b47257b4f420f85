//! src/services/storage_service.rs
//!
//! StorageService: the on-disk layout shared by the filesystem backend and
//! the gateway. Payloads live under `base_path/{key}` (private leaves are
//! dot-hidden), metadata sidecars under `meta_path/{key}.json`, and uploads
//! are staged in `tmp_path` until they are verified and renamed into place.

use crate::{
    models::{access::Access, key::ObjectKey, metadata::ObjectMetadata},
    services::storage::{StorageError, StorageResult},
};
use bytes::Bytes;
use futures::{Stream, StreamExt, pin_mut};
use sha2::{Digest, Sha256};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct StorageService {
    /// Root directory for object payloads.
    base_path: PathBuf,

    /// Root directory for metadata sidecars.
    meta_path: PathBuf,

    /// Scratch directory for uploads in flight.
    tmp_path: PathBuf,
}

/// A fully written upload that has not been published yet.
#[derive(Debug)]
pub struct StagedUpload {
    pub path: PathBuf,
    pub size: u64,
    /// Lowercase hex SHA-256 of the staged bytes.
    pub sha256: String,
}

impl StagedUpload {
    /// Remove the staged file. Failures are only logged.
    pub async fn discard(self) {
        if let Err(err) = fs::remove_file(&self.path).await {
            debug!("failed to remove staged file {}: {}", self.path.display(), err);
        }
    }
}

impl StorageService {
    pub fn new(
        base_path: impl Into<PathBuf>,
        meta_path: impl Into<PathBuf>,
        tmp_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            base_path: base_path.into(),
            meta_path: meta_path.into(),
            tmp_path: tmp_path.into(),
        }
    }

    /// The three roots, labelled for readiness reporting.
    pub fn roots(&self) -> [(&'static str, &Path); 3] {
        [
            ("base", self.base_path.as_path()),
            ("meta", self.meta_path.as_path()),
            ("tmp", self.tmp_path.as_path()),
        ]
    }

    pub async fn ensure_roots(&self) -> StorageResult<()> {
        for (_, root) in self.roots() {
            fs::create_dir_all(root).await?;
        }
        Ok(())
    }

    /// Physical payload path for `key` under the given tier.
    ///
    /// Private objects get a `.`-prefixed leaf so a plain path lookup never
    /// finds them; public tiers use the key verbatim.
    pub fn object_path(&self, key: &ObjectKey, access: Access) -> PathBuf {
        let mut path = self.base_path.clone();
        if let Some(parent) = key.parent() {
            path.push(parent);
        }
        if access.is_public() {
            path.push(key.leaf());
        } else {
            path.push(format!(".{}", key.leaf()));
        }
        path
    }

    pub fn metadata_path(&self, key: &ObjectKey) -> PathBuf {
        self.meta_path.join(format!("{}.json", key.as_str()))
    }

    /// `{tmp_path}/{leaf}.{random}.tmp`, unique per attempt.
    fn staging_path(&self, key: &ObjectKey) -> PathBuf {
        self.tmp_path
            .join(format!("{}.{}.tmp", key.leaf(), Uuid::new_v4().simple()))
    }

    /// Stream a body into a fresh staging file.
    ///
    /// Size and SHA-256 are computed while writing. With a `limit`, reading
    /// stops as soon as the body grows past it. The staging file is removed on
    /// every error path.
    pub async fn stage_stream<S>(
        &self,
        key: &ObjectKey,
        stream: S,
        limit: Option<u64>,
    ) -> StorageResult<StagedUpload>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        fs::create_dir_all(&self.tmp_path).await?;
        let tmp_path = self.staging_path(key);
        let mut file = File::create(&tmp_path).await?;

        let written = write_stream(&mut file, stream, limit).await;
        drop(file);

        match written {
            Ok((size, sha256)) => Ok(StagedUpload {
                path: tmp_path,
                size,
                sha256,
            }),
            Err(err) => {
                let _ = fs::remove_file(&tmp_path).await;
                Err(err)
            }
        }
    }

    /// Move a verified upload to its tier path, then record its sidecar.
    ///
    /// The rename is the publish point for the payload. The sidecar is written
    /// strictly afterwards: a failure in between leaves an unreferenced
    /// payload, never a sidecar pointing at nothing.
    pub async fn publish(
        &self,
        staged: StagedUpload,
        key: &ObjectKey,
        access: Access,
    ) -> StorageResult<ObjectMetadata> {
        let target = self.object_path(key, access);
        if let Some(parent) = target.parent() {
            if let Err(err) = fs::create_dir_all(parent).await {
                staged.discard().await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = rename_replacing(&staged.path, &target).await {
            staged.discard().await;
            return Err(StorageError::Io(err));
        }

        // A tier change would otherwise leave the previous leaf behind.
        remove_if_exists(&self.object_path(key, other_tier(access))).await?;

        let metadata = ObjectMetadata {
            access,
            sha256: staged.sha256,
        };
        self.write_metadata(key, &metadata).await?;
        Ok(metadata)
    }

    /// Load the sidecar for `key`; `None` when it does not exist.
    pub async fn read_metadata(&self, key: &ObjectKey) -> StorageResult<Option<ObjectMetadata>> {
        match fs::read(self.metadata_path(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::Io(err)),
        }
    }

    /// Write-then-rename so readers never observe a partial sidecar.
    pub async fn write_metadata(
        &self,
        key: &ObjectKey,
        metadata: &ObjectMetadata,
    ) -> StorageResult<()> {
        let path = self.metadata_path(key);
        let parent = path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "metadata path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(
            ".{}.json.{}.tmp",
            key.leaf(),
            Uuid::new_v4().simple()
        ));
        let body = serde_json::to_vec_pretty(metadata)?;
        if let Err(err) = fs::write(&tmp_path, body).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = rename_replacing(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        Ok(())
    }

    /// Locate the payload for `key`.
    ///
    /// The sidecar decides the tier when present. Without one, both leaf names
    /// are probed so payloads written by other tools are still reachable.
    pub async fn resolve(&self, key: &ObjectKey) -> StorageResult<(PathBuf, Access)> {
        let candidates = match self.read_metadata(key).await? {
            Some(metadata) => vec![metadata.access],
            None => vec![Access::PublicRead, Access::Private],
        };
        for access in candidates {
            let path = self.object_path(key, access);
            match fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => return Ok((path, access)),
                Ok(_) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(StorageError::Io(err)),
            }
        }
        Err(StorageError::ObjectNotFound(key.to_string()))
    }

    /// Remove both leaf variants and the sidecar, then prune empty parents.
    ///
    /// Idempotent: missing files are not an error.
    pub async fn delete(&self, key: &ObjectKey) -> StorageResult<()> {
        let hidden = self.object_path(key, Access::Private);
        let plain = self.object_path(key, Access::PublicRead);
        let sidecar = self.metadata_path(key);

        for path in [&plain, &hidden, &sidecar] {
            if remove_if_exists(path).await? {
                debug!("removed {}", path.display());
            }
        }

        if let Some(parent) = plain.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }
        if let Some(parent) = sidecar.parent() {
            self.prune_empty_dirs(parent, &self.meta_path).await;
        }
        Ok(())
    }

    /// Unique immediate children of `prefix`, sorted, private leaves shown
    /// under their key name.
    pub async fn list_dir(&self, prefix: &str, limit: Option<usize>) -> StorageResult<Vec<String>> {
        let mut names = Vec::new();
        let Some(mut entries) = open_dir(&self.base_path.join(prefix)).await? else {
            return Ok(names);
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().await?.is_dir() {
                names.push(name);
            } else {
                names.push(visible_name(&name).to_string());
            }
        }
        Ok(finish_listing(names, limit))
    }

    /// Every payload below `prefix`, as keys relative to it.
    ///
    /// Walks with an explicit stack so deep trees do not grow the call stack.
    pub async fn list_all(&self, prefix: &str, limit: Option<usize>) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut pending = vec![(self.base_path.join(prefix), String::new())];

        while let Some((dir, relative)) = pending.pop() {
            let Some(mut entries) = open_dir(&dir).await? else {
                continue;
            };
            while let Some(entry) = entries.next_entry().await? {
                let name = entry.file_name().to_string_lossy().into_owned();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    pending.push((entry.path(), format!("{relative}{name}/")));
                } else if file_type.is_file() {
                    keys.push(format!("{relative}{}", visible_name(&name)));
                }
            }
        }
        Ok(finish_listing(keys, limit))
    }

    /// Recursively remove empty directories up to `stop`.
    ///
    /// Stops when:
    /// - directory not empty
    /// - directory not found
    /// - reached root
    /// - encountered unexpected I/O errors
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

async fn write_stream<S>(file: &mut File, stream: S, limit: Option<u64>) -> StorageResult<(u64, String)>
where
    S: Stream<Item = io::Result<Bytes>> + Send,
{
    let mut size: u64 = 0;
    let mut digest = Sha256::new();
    pin_mut!(stream);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        size += chunk.len() as u64;
        if let Some(limit) = limit {
            if size > limit {
                return Err(StorageError::TooLarge { limit });
            }
        }
        digest.update(&chunk);
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok((size, hex::encode(digest.finalize())))
}

/// Rename, replacing `to` on platforms where rename refuses to overwrite.
async fn rename_replacing(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to).await {
        Err(err) if err.kind() == ErrorKind::AlreadyExists => {
            fs::remove_file(to).await?;
            fs::rename(from, to).await
        }
        other => other,
    }
}

/// Returns whether a file was removed.
async fn remove_if_exists(path: &Path) -> StorageResult<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(StorageError::Io(err)),
    }
}

async fn open_dir(path: &Path) -> StorageResult<Option<fs::ReadDir>> {
    match fs::read_dir(path).await {
        Ok(entries) => Ok(Some(entries)),
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => Ok(None),
        Err(err) => Err(StorageError::Io(err)),
    }
}

fn other_tier(access: Access) -> Access {
    if access.is_public() {
        Access::Private
    } else {
        Access::PublicRead
    }
}

/// Key name for a payload file: the private `.` prefix is dropped.
fn visible_name(file_name: &str) -> &str {
    file_name.strip_prefix('.').unwrap_or(file_name)
}

fn finish_listing(mut names: Vec<String>, limit: Option<usize>) -> Vec<String> {
    names.sort();
    names.dedup();
    names.truncate(limit.unwrap_or(usize::MAX));
    names
}

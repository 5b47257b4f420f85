use crate::services::{hasher::HashSecret, s3_storage::S3StorageConfig};
use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::Deserialize;
use std::{env, path::PathBuf};

/// Directory layout and signing settings for the filesystem backend.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct FileStorageConfig {
    pub base_path: PathBuf,
    pub meta_path: PathBuf,
    pub tmp_path: PathBuf,
    /// Required to issue or redeem capability URLs.
    #[serde(default)]
    pub hash_secret: Option<HashSecret>,
    /// Gateway base URL; signed URLs are `{public_url}/{key}?...`.
    #[serde(default)]
    pub public_url: Option<String>,
}

impl FileStorageConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|name| env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let or = |name: &str, default: &str| var(name).unwrap_or_else(|| default.into());
        Self {
            base_path: or("FS_BASE_PATH", "./data/objects").into(),
            meta_path: or("FS_META_PATH", "./data/meta").into(),
            tmp_path: or("FS_TMP_PATH", "./data/tmp").into(),
            hash_secret: var("FS_HASH_SECRET")
                .filter(|secret| !secret.is_empty())
                .map(HashSecret::new),
            public_url: var("FS_PUBLIC_URL").filter(|url| !url.is_empty()),
        }
    }
}

/// Backend selection, tagged by `type` (`"fs"` or `"s3"`).
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    Fs { fs: FileStorageConfig },
    S3 { s3: S3StorageConfig },
}

impl StorageConfig {
    /// Read `STORAGE_TYPE` (default `fs`) and the matching `FS_*` or
    /// `STORAGE_S3_*` variables.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|name| env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let kind = var("STORAGE_TYPE").unwrap_or_else(|| "fs".into());
        match kind.as_str() {
            "fs" => Ok(StorageConfig::Fs {
                fs: FileStorageConfig::from_vars(var),
            }),
            "s3" => {
                let required = |name: &str| {
                    var(name)
                        .filter(|value| !value.is_empty())
                        .with_context(|| format!("{} must be set when STORAGE_TYPE=s3", name))
                };
                Ok(StorageConfig::S3 {
                    s3: S3StorageConfig {
                        bucket: required("STORAGE_S3_BUCKET")?,
                        region: required("STORAGE_S3_REGION")?,
                        access_key_id: required("STORAGE_S3_KEY_ID")?,
                        secret_access_key: required("STORAGE_S3_KEY_SECRET")?,
                        endpoint: var("STORAGE_S3_ENDPOINT").filter(|url| !url.is_empty()),
                        tmp_path: var("STORAGE_S3_TMP_PATH")
                            .unwrap_or_else(|| "./data/tmp".into())
                            .into(),
                    },
                })
            }
            other => bail!("unknown STORAGE_TYPE `{}` (expected `fs` or `s3`)", other),
        }
    }
}

/// Centralized gateway configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage: FileStorageConfig,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Signed-URL object storage gateway")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_STORE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_STORE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where objects are stored (overrides FS_BASE_PATH)
    #[arg(long)]
    pub base_path: Option<PathBuf>,

    /// Directory for metadata sidecars (overrides FS_META_PATH)
    #[arg(long)]
    pub meta_path: Option<PathBuf>,

    /// Scratch directory for uploads in flight (overrides FS_TMP_PATH)
    #[arg(long)]
    pub tmp_path: Option<PathBuf>,

    /// Shared HMAC secret (overrides FS_HASH_SECRET)
    #[arg(long)]
    pub hash_secret: Option<String>,

    /// Public base URL of this gateway (overrides FS_PUBLIC_URL)
    #[arg(long)]
    pub public_url: Option<String>,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::merge(args, |name| env::var(name).ok())
    }

    fn merge(args: Args, var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = var("OBJECT_STORE_HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = match var("OBJECT_STORE_PORT") {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing OBJECT_STORE_PORT value `{}`", value))?,
            None => 3000,
        };
        let env_storage = FileStorageConfig::from_vars(&var);

        // --- Merge ---
        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage: FileStorageConfig {
                base_path: args.base_path.unwrap_or(env_storage.base_path),
                meta_path: args.meta_path.unwrap_or(env_storage.meta_path),
                tmp_path: args.tmp_path.unwrap_or(env_storage.tmp_path),
                hash_secret: args
                    .hash_secret
                    .filter(|secret| !secret.is_empty())
                    .map(HashSecret::new)
                    .or(env_storage.hash_secret),
                public_url: args.public_url.or(env_storage.public_url),
            },
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

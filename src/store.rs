use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::info;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::local::LocalFileSystem;
use object_store::path::Path as ObjectPath;
use object_store::{ObjectStore, PutPayload};
use thiserror::Error;
use uuid::Uuid;

use crate::config::{Credentials, StoreConfig, StoreKind};
use crate::supabase::{content_type_for, SupabaseStorage};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage is not configured: {0}")]
    Unconfigured(String),
    #[error("upload failed: {0}")]
    TransportFailure(String),
    #[error("storage rejected the upload ({status}): {body}")]
    RemoteRejected { status: u16, body: String },
    #[error("could not read or write {path:?}: {source}")]
    LocalIoFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
}

/// The one capability every storage backend offers: persist a local file under
/// `key` and hand back a URL it can be retrieved from.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    /// Destination key for an extracted frame of `job_id`.
    fn frame_key(&self, job_id: Uuid, filename: &str) -> String {
        timestamped_frame_key(job_id, filename)
    }

    async fn put(&self, local_path: &Path, key: &str) -> Result<String, StoreError>;
}

pub enum Store {
    /// Copies into a publicly served directory; URLs are `url_prefix/key`.
    Local {
        store: LocalFileSystem,
        root: PathBuf,
        url_prefix: String,
    },
    /// Amazon S3 or any S3-compatible endpoint such as Yandex Object Storage.
    S3 {
        store: AmazonS3,
        kind: StoreKind,
        public_base: String,
    },
    Supabase(SupabaseStorage),
}

/// `frames/<job>/<YYYYmmdd_HHMMSS>_<filename>`, the layout used by remote buckets.
pub fn timestamped_frame_key(job_id: Uuid, filename: &str) -> String {
    format!(
        "frames/{}/{}_{}",
        job_id,
        chrono::Local::now().format("%Y%m%d_%H%M%S"),
        filename
    )
}

pub fn s3_public_base(bucket: &str, region: &str) -> String {
    format!("https://{}.s3.{}.amazonaws.com", bucket, region)
}

pub fn endpoint_public_base(endpoint: &str, bucket: &str) -> String {
    format!("{}/{}", endpoint.trim_end_matches('/'), bucket)
}

fn require<'a>(value: &'a Option<String>, what: &str) -> Result<&'a str, StoreError> {
    value
        .as_deref()
        .ok_or_else(|| StoreError::Unconfigured(format!("{} is not set", what)))
}

fn require_credentials(credentials: &Option<Credentials>) -> Result<&Credentials, StoreError> {
    credentials.as_ref().ok_or_else(|| {
        StoreError::Unconfigured(
            "AWS_ACCESS_KEY_ID and AWS_SECRET_ACCESS_KEY must be set".to_string(),
        )
    })
}

pub fn create_store(config: &StoreConfig) -> Result<Store, StoreError> {
    let store = match config {
        StoreConfig::Local { root, url_prefix } => {
            std::fs::create_dir_all(root).map_err(|source| StoreError::LocalIoFailure {
                path: root.clone(),
                source,
            })?;
            let store = LocalFileSystem::new_with_prefix(root)
                .map_err(|e| StoreError::Unconfigured(e.to_string()))?;
            Store::Local {
                store,
                root: root.clone(),
                url_prefix: url_prefix.trim_end_matches('/').to_string(),
            }
        }
        StoreConfig::S3 {
            bucket,
            region,
            credentials,
        } => {
            let bucket = require(bucket, "BUCKET_NAME")?;
            let credentials = require_credentials(credentials)?;
            let store = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .with_region(region)
                .with_access_key_id(&credentials.access_key_id)
                .with_secret_access_key(&credentials.secret_access_key)
                .build()
                .map_err(|e| StoreError::Unconfigured(e.to_string()))?;
            Store::S3 {
                store,
                kind: StoreKind::S3,
                public_base: s3_public_base(bucket, region),
            }
        }
        StoreConfig::Yandex {
            bucket,
            endpoint,
            region,
            credentials,
        } => {
            let bucket = require(bucket, "BUCKET_NAME")?;
            let credentials = require_credentials(credentials)?;
            if endpoint.is_empty() {
                return Err(StoreError::Unconfigured("YANDEX_ENDPOINT is not set".to_string()));
            }
            let store = AmazonS3Builder::from_env()
                .with_bucket_name(bucket)
                .with_region(region)
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"))
                .with_access_key_id(&credentials.access_key_id)
                .with_secret_access_key(&credentials.secret_access_key)
                .build()
                .map_err(|e| StoreError::Unconfigured(e.to_string()))?;
            Store::S3 {
                store,
                kind: StoreKind::Yandex,
                public_base: endpoint_public_base(endpoint, bucket),
            }
        }
        StoreConfig::Supabase { url, key, bucket } => Store::Supabase(SupabaseStorage::new(
            require(url, "SUPABASE_URL")?,
            require(key, "SUPABASE_KEY")?,
            bucket,
        )?),
    };
    info!("Artifact store ready: {}", store.kind().as_str());
    Ok(store)
}

impl Store {
    /// Where a locally stored key lives on disk.
    pub fn local_path(&self, key: &str) -> Option<PathBuf> {
        match self {
            Store::Local { root, .. } => Some(root.join(key)),
            _ => None,
        }
    }
}

async fn read_artifact(local_path: &Path) -> Result<Vec<u8>, StoreError> {
    tokio::fs::read(local_path)
        .await
        .map_err(|source| StoreError::LocalIoFailure {
            path: local_path.to_path_buf(),
            source,
        })
}

#[async_trait]
impl ArtifactStore for Store {
    fn kind(&self) -> StoreKind {
        match self {
            Store::Local { .. } => StoreKind::Local,
            Store::S3 { kind, .. } => *kind,
            Store::Supabase(_) => StoreKind::Supabase,
        }
    }

    fn frame_key(&self, job_id: Uuid, filename: &str) -> String {
        match self {
            Store::Local { .. } => format!("{}/{}", job_id, filename),
            _ => timestamped_frame_key(job_id, filename),
        }
    }

    async fn put(&self, local_path: &Path, key: &str) -> Result<String, StoreError> {
        let data = read_artifact(local_path).await?;
        let size = data.len();
        match self {
            Store::Local {
                store, url_prefix, ..
            } => {
                let location =
                    ObjectPath::parse(key).map_err(|_| StoreError::InvalidKey(key.to_string()))?;
                store
                    .put(&location, PutPayload::from(data))
                    .await
                    .map_err(|e| StoreError::LocalIoFailure {
                        path: local_path.to_path_buf(),
                        source: std::io::Error::other(e.to_string()),
                    })?;
                info!("Local store: copied {:?} ({} bytes) to {}", local_path, size, key);
                Ok(format!("{}/{}", url_prefix, key))
            }
            Store::S3 {
                store,
                kind,
                public_base,
            } => {
                let location =
                    ObjectPath::parse(key).map_err(|_| StoreError::InvalidKey(key.to_string()))?;
                store
                    .put(&location, PutPayload::from(data))
                    .await
                    .map_err(|e| StoreError::TransportFailure(e.to_string()))?;
                info!(
                    "{} store: uploaded {:?} ({} bytes) to {}",
                    kind.as_str(),
                    local_path,
                    size,
                    key
                );
                Ok(format!("{}/{}", public_base, key))
            }
            Store::Supabase(storage) => {
                storage
                    .upload(data, key, content_type_for(local_path))
                    .await
            }
        }
    }
}

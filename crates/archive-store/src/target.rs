//! Where partitions live: a local directory tree or an object store bucket.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use archive_common::{ArchiveError, ArchiveResult};
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::partition::Partition;

/// S3 bucket settings. Credentials come from the standard AWS environment
/// variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Settings {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible stores (MinIO etc.)
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Key prefix under the bucket
    #[serde(default)]
    pub prefix: String,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Resolved storage location of one partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveLocation {
    Local(PathBuf),
    Object(ObjectPath),
}

impl fmt::Display for ArchiveLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveLocation::Local(path) => write!(f, "{}", path.display()),
            ArchiveLocation::Object(path) => write!(f, "object://{}", path),
        }
    }
}

/// Partition storage backend.
#[derive(Clone)]
pub enum ArchiveStore {
    Local {
        root: PathBuf,
    },
    Object {
        store: Arc<dyn ObjectStore>,
        prefix: String,
    },
}

impl fmt::Debug for ArchiveStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveStore::Local { root } => f.debug_struct("Local").field("root", root).finish(),
            ArchiveStore::Object { store, prefix } => f
                .debug_struct("Object")
                .field("store", &store.to_string())
                .field("prefix", prefix)
                .finish(),
        }
    }
}

impl ArchiveStore {
    pub fn local(root: impl Into<PathBuf>) -> Self {
        ArchiveStore::Local { root: root.into() }
    }

    pub fn object(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        ArchiveStore::Object {
            store,
            prefix: prefix.into(),
        }
    }

    /// Build an S3 backed store.
    pub fn s3(settings: &S3Settings) -> ArchiveResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&settings.bucket)
            .with_region(&settings.region);

        if let Some(endpoint) = &settings.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        let store = builder.build().map_err(|e| {
            ArchiveError::Configuration(format!("failed to create S3 client: {}", e))
        })?;
        Ok(Self::object(Arc::new(store), settings.prefix.clone()))
    }

    pub fn location(&self, partition: &Partition) -> ArchiveLocation {
        match self {
            ArchiveStore::Local { root } => ArchiveLocation::Local(partition.local_path(root)),
            ArchiveStore::Object { prefix, .. } => {
                ArchiveLocation::Object(ObjectPath::from(partition.object_key(prefix)))
            }
        }
    }

    /// Current content of a partition, `None` when it does not exist yet.
    #[instrument(skip(self), fields(location = %location))]
    pub async fn read(&self, location: &ArchiveLocation) -> ArchiveResult<Option<Bytes>> {
        match (self, location) {
            (ArchiveStore::Local { .. }, ArchiveLocation::Local(path)) => {
                match tokio::fs::read(path).await {
                    Ok(data) => Ok(Some(Bytes::from(data))),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
            (ArchiveStore::Object { store, .. }, ArchiveLocation::Object(path)) => {
                let result = match store.get(path).await {
                    Ok(result) => result,
                    Err(object_store::Error::NotFound { .. }) => return Ok(None),
                    Err(e) => {
                        return Err(ArchiveError::Storage(format!(
                            "failed to read {}: {}",
                            path, e
                        )))
                    }
                };
                let data = result
                    .bytes()
                    .await
                    .map_err(|e| ArchiveError::Storage(format!("failed to read bytes: {}", e)))?;
                debug!(size = data.len(), "Read partition");
                Ok(Some(data))
            }
            _ => Err(mismatch(location)),
        }
    }

    /// Replace a partition's content.
    ///
    /// Local writes go to a unique temporary file in the target directory that
    /// is renamed over the partition once complete, so readers see either
    /// the old or the new file. Object puts are atomic per key.
    #[instrument(skip(self, data), fields(location = %location, size = data.len()))]
    pub async fn write(&self, location: &ArchiveLocation, data: Bytes) -> ArchiveResult<()> {
        match (self, location) {
            (ArchiveStore::Local { .. }, ArchiveLocation::Local(path)) => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                let temp = path.with_extension(format!("{}.partial", uuid::Uuid::new_v4()));
                if let Err(e) = write_then_rename(&temp, path, &data).await {
                    if let Err(remove_err) = tokio::fs::remove_file(&temp).await {
                        if remove_err.kind() != std::io::ErrorKind::NotFound {
                            warn!(path = %temp.display(), error = %remove_err, "Failed to remove partial archive");
                        }
                    }
                    return Err(e);
                }
                Ok(())
            }
            (ArchiveStore::Object { store, .. }, ArchiveLocation::Object(path)) => {
                store
                    .put(path, data.into())
                    .await
                    .map_err(|e| ArchiveError::Storage(format!("failed to write {}: {}", path, e)))?;
                Ok(())
            }
            _ => Err(mismatch(location)),
        }
    }
}

async fn write_then_rename(
    temp: &std::path::Path,
    path: &std::path::Path,
    data: &[u8],
) -> ArchiveResult<()> {
    tokio::fs::write(temp, data).await?;
    tokio::fs::rename(temp, path).await?;
    Ok(())
}

fn mismatch(location: &ArchiveLocation) -> ArchiveError {
    ArchiveError::Configuration(format!("location {} does not belong to this store", location))
}

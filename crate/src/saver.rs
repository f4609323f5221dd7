use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info};

use crate::config::{Backend, SaverConfig};
use crate::error::{Error, Result};
use crate::record::TargetRecord;
use crate::storage::{
    self, local, ObjectListing, ObjectStore, ObjectStoreConnector, RemoteObject, S3Connector,
};

/// What [`Saver::delete`] should remove: a logical filename, or an object
/// handle previously returned by [`Saver::find_by_path`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectRef {
    Name(String),
    Remote(RemoteObject),
}

impl From<&str> for ObjectRef {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for ObjectRef {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<RemoteObject> for ObjectRef {
    fn from(object: RemoteObject) -> Self {
        Self::Remote(object)
    }
}

impl From<&RemoteObject> for ObjectRef {
    fn from(object: &RemoteObject) -> Self {
        Self::Remote(object.clone())
    }
}

/// Result of [`Saver::find_by_path`].
pub enum Matches {
    /// Local entries, already collected.
    Local(Vec<PathBuf>),
    /// Remote objects, fetched page by page as the stream is polled.
    Remote(ObjectListing),
}

impl fmt::Debug for Matches {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(paths) => f.debug_tuple("Local").field(paths).finish(),
            Self::Remote(_) => f.debug_tuple("Remote").finish_non_exhaustive(),
        }
    }
}

/// Saves uploads to the local filesystem or to a remote bucket.
pub struct Saver {
    config: SaverConfig,
    connector: Arc<dyn ObjectStoreConnector>,
}

impl Saver {
    /// Builds a saver that talks to S3 for remote storage.
    pub fn new(config: SaverConfig) -> Self {
        Self::with_connector(config, Arc::new(S3Connector::default()))
    }

    pub fn with_connector(config: SaverConfig, connector: Arc<dyn ObjectStoreConnector>) -> Self {
        Self { config, connector }
    }

    /// Joins the base path with `filename`.
    pub fn resolve_local_path(&self, filename: impl AsRef<Path>) -> Result<PathBuf> {
        let base = self
            .config
            .base_path
            .as_ref()
            .ok_or_else(|| Error::invalid_configuration("base_path must be set"))?;
        Ok(base.resolve().join(filename))
    }

    /// Maps `filename` to a key inside the bucket.
    ///
    /// The local path is computed first, every occurrence of the static root
    /// parent is removed from it, then a single leading `/`.
    pub fn resolve_remote_key(&self, filename: impl AsRef<Path>) -> Result<String> {
        let root = self
            .config
            .root_prefix
            .as_deref()
            .ok_or_else(|| Error::invalid_configuration("static_root_parent must be set"))?;
        let path = self.resolve_local_path(filename)?;
        let path = path.to_string_lossy();
        let stripped = path.replace(root, "");
        let key = stripped.strip_prefix('/').unwrap_or(&stripped).to_string();
        debug!("Resolved remote key {} from {}", key, path);
        Ok(key)
    }

    /// Persists `source` under `filename` and stamps the configured fields on
    /// `record`. Returns the stored identifier, which is `filename` itself.
    #[cfg_attr(
        feature = "instrumentation",
        tracing::instrument(skip(self, source, record))
    )]
    pub async fn store<R, T>(&self, source: &mut R, filename: &str, record: &mut T) -> Result<String>
    where
        R: AsyncRead + Unpin + ?Sized,
        T: TargetRecord,
    {
        let backend = &self.config.backend;
        let size = match backend {
            Backend::Local => self.store_local(source, filename).await?,
            Backend::Remote { container, .. } => {
                self.store_remote(source, filename, container).await?
            }
        };

        self.config.fields.set_size(&mut *record, size);
        self.config.fields.set_location(&mut *record, filename, backend);
        info!(backend = backend.name(), size, "Stored {}", filename);
        Ok(filename.to_string())
    }

    async fn store_local<R>(&self, source: &mut R, filename: &str) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let path = self.resolve_local_path(filename)?;
        local::ensure_parent_dir(&path, self.config.permission).await?;
        Ok(local::write_chunked(source, &path).await?)
    }

    async fn store_remote<R>(&self, source: &mut R, filename: &str, container: &str) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let key = self.resolve_remote_key(filename)?;
        let mut payload = Vec::new();
        source.read_to_end(&mut payload).await?;

        let store = self.open(container).await?;
        let size = store.put_object(&key, payload).await?;
        store
            .set_access_policy(&key, &self.config.access_policy)
            .await?;
        Ok(size)
    }

    /// Removes a stored object.
    ///
    /// Without a storage type and bucket the local file is removed if present.
    /// Otherwise the object is removed from that bucket; an object that is
    /// already gone is not an error.
    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self, target)))]
    pub async fn delete(
        &self,
        target: impl Into<ObjectRef>,
        storage_type: Option<&str>,
        bucket_name: Option<&str>,
    ) -> Result<()> {
        let target = target.into();
        match Backend::select(storage_type, bucket_name)? {
            Backend::Local => {
                let filename = match &target {
                    ObjectRef::Name(name) => name.as_str(),
                    ObjectRef::Remote(object) => object.key.as_str(),
                };
                let path = self.resolve_local_path(filename)?;
                if !local::remove_if_exists(&path).await? {
                    debug!("Nothing to delete at {}", path.display());
                }
                Ok(())
            }
            Backend::Remote { container, .. } => {
                let key = match &target {
                    ObjectRef::Name(name) => self.resolve_remote_key(name)?,
                    // the handle's key is absolute in the bucket, so the base path drops out
                    ObjectRef::Remote(object) => {
                        self.resolve_remote_key(format!("/{}", object.key))?
                    }
                };
                let store = self.open(&container).await?;
                match store.delete_object(&key).await {
                    Ok(()) => Ok(()),
                    Err(Error::RemoteNotFound { .. }) => {
                        debug!("Remote object {} already absent from {}", key, container);
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            }
        }
    }

    /// Finds stored objects whose path starts with `path`.
    ///
    /// Locally this is the glob `{path}*`. Remotely `path` goes through the
    /// same key mapping as a filename and the bucket is listed lazily; calling
    /// again restarts the listing.
    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self)))]
    pub async fn find_by_path(
        &self,
        path: &str,
        storage_type: Option<&str>,
        bucket_name: Option<&str>,
    ) -> Result<Matches> {
        match Backend::select(storage_type, bucket_name)? {
            Backend::Local => Ok(Matches::Local(
                local::find_with_prefix(path).await?,
            )),
            Backend::Remote { container, .. } => {
                let prefix = self.resolve_remote_key(path)?;
                let store = self.open(&container).await?;
                Ok(Matches::Remote(storage::list_objects(store, prefix)))
            }
        }
    }

    async fn open(&self, container: &str) -> Result<Arc<dyn ObjectStore>> {
        debug!(
            "Connecting to {} container {}",
            self.connector.name(),
            container
        );
        self.connector
            .connect(&self.config.credentials, container)
            .await
    }
}

impl fmt::Debug for Saver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Saver")
            .field("config", &self.config)
            .field("connector", &self.connector.name())
            .finish()
    }
}

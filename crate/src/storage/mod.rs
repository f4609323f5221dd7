use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};

use crate::config::RemoteCredentials;
use crate::error::{Error, Result};

pub mod local;
mod memory;
mod s3;

pub use memory::MemoryConnector;
pub use s3::{S3Connector, S3Store};

/// Handle to an object living in a remote container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub container: String,
    pub key: String,
    pub size: u64,
}

/// One page of a prefix listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    pub objects: Vec<RemoteObject>,
    pub next_token: Option<String>,
}

/// Lazily fetched listing; dropping it stops the paging.
pub type ObjectListing = BoxStream<'static, Result<RemoteObject>>;

/// Opens connections to a remote object store.
///
/// Each call produces a new connection; nothing is cached between calls.
#[async_trait]
pub trait ObjectStoreConnector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Connects with `credentials` and opens `container`.
    ///
    /// Fails with [`Error::ContainerNotFound`] when the container does not
    /// exist.
    async fn connect(
        &self,
        credentials: &RemoteCredentials,
        container: &str,
    ) -> Result<Arc<dyn ObjectStore>>;
}

/// A single opened container.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Creates or overwrites `key` and returns the size the store reports.
    async fn put_object(&self, key: &str, data: Vec<u8>) -> Result<u64>;

    async fn set_access_policy(&self, key: &str, policy: &str) -> Result<()>;

    async fn list_page(&self, prefix: &str, continuation: Option<String>) -> Result<ObjectPage>;

    /// Deletes `key`, returning [`Error::RemoteNotFound`] if it is missing.
    async fn delete_object(&self, key: &str) -> Result<()>;
}

enum PageCursor {
    Start,
    Next(String),
    Done,
}

/// Streams every object under `prefix`, one page request at a time.
pub fn list_objects(store: Arc<dyn ObjectStore>, prefix: String) -> ObjectListing {
    stream::try_unfold(
        (store, prefix, PageCursor::Start),
        |(store, prefix, cursor)| async move {
            let continuation = match cursor {
                PageCursor::Start => None,
                PageCursor::Next(token) => Some(token),
                PageCursor::Done => return Ok::<_, Error>(None),
            };
            let page = store.list_page(&prefix, continuation).await?;
            let cursor = match page.next_token {
                Some(token) if !token.is_empty() => PageCursor::Next(token),
                _ => PageCursor::Done,
            };
            let objects = stream::iter(page.objects.into_iter().map(Ok::<_, Error>));
            Ok::<_, Error>(Some((objects, (store, prefix, cursor))))
        },
    )
    .try_flatten()
    .boxed()
}

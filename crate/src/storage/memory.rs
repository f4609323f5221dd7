use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::{ObjectPage, ObjectStore, ObjectStoreConnector, RemoteObject};
use crate::config::RemoteCredentials;
use crate::error::{Error, Result};

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
struct MemoryObject {
    data: Vec<u8>,
    policy: Option<String>,
}

#[derive(Debug, Default)]
struct MemoryState {
    containers: BTreeMap<String, BTreeMap<String, MemoryObject>>,
    connections: usize,
    list_requests: usize,
}

/// In-process object store.
///
/// Containers must be created up front, like buckets. Clones share the same
/// state, so a test can keep one handle for inspection and give another to a
/// [`Saver`](crate::Saver).
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    state: Arc<Mutex<MemoryState>>,
    page_size: usize,
    credentials: Option<RemoteCredentials>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            page_size: DEFAULT_PAGE_SIZE,
            credentials: None,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Rejects connections that do not present exactly these credentials.
    pub fn with_credentials(mut self, credentials: RemoteCredentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn create_container(&self, name: &str) {
        self.lock().containers.entry(name.to_string()).or_default();
    }

    pub fn object(&self, container: &str, key: &str) -> Option<Vec<u8>> {
        self.lock()
            .containers
            .get(container)?
            .get(key)
            .map(|object| object.data.clone())
    }

    pub fn access_policy(&self, container: &str, key: &str) -> Option<String> {
        self.lock()
            .containers
            .get(container)?
            .get(key)?
            .policy
            .clone()
    }

    pub fn keys(&self, container: &str) -> Vec<String> {
        self.lock()
            .containers
            .get(container)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of connections opened so far.
    pub fn connections(&self) -> usize {
        self.lock().connections
    }

    /// Number of listing pages requested so far.
    pub fn list_requests(&self) -> usize {
        self.lock().list_requests
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ObjectStoreConnector for MemoryConnector {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn connect(
        &self,
        credentials: &RemoteCredentials,
        container: &str,
    ) -> Result<Arc<dyn ObjectStore>> {
        if let Some(expected) = &self.credentials {
            if expected != credentials {
                return Err(Error::remote("access denied: invalid credentials"));
            }
        }
        let mut state = self.lock();
        state.connections += 1;
        if !state.containers.contains_key(container) {
            return Err(Error::ContainerNotFound(container.to_string()));
        }
        debug!(container, "Opened in-memory container");
        Ok(Arc::new(MemoryStore {
            state: self.state.clone(),
            container: container.to_string(),
            page_size: self.page_size,
        }))
    }
}

struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    container: String,
    page_size: usize,
}

impl MemoryStore {
    fn with_objects<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, MemoryObject>) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let objects = state
            .containers
            .get_mut(&self.container)
            .ok_or_else(|| Error::ContainerNotFound(self.container.clone()))?;
        f(objects)
    }

    fn not_found(&self, key: &str) -> Error {
        Error::RemoteNotFound {
            container: self.container.clone(),
            key: key.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put_object(&self, key: &str, data: Vec<u8>) -> Result<u64> {
        let size = data.len() as u64;
        self.with_objects(|objects| {
            objects.insert(key.to_string(), MemoryObject { data, policy: None });
            Ok(size)
        })
    }

    async fn set_access_policy(&self, key: &str, policy: &str) -> Result<()> {
        self.with_objects(|objects| match objects.get_mut(key) {
            Some(object) => {
                object.policy = Some(policy.to_string());
                Ok(())
            }
            None => Err(self.not_found(key)),
        })
    }

    async fn list_page(&self, prefix: &str, continuation: Option<String>) -> Result<ObjectPage> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .list_requests += 1;
        self.with_objects(|objects| {
            let start = match &continuation {
                Some(token) => Bound::Excluded(token.clone()),
                None => Bound::Included(prefix.to_string()),
            };
            let mut matching = objects
                .range((start, Bound::Unbounded))
                .take_while(|(key, _)| key.starts_with(prefix));
            let page: Vec<RemoteObject> = matching
                .by_ref()
                .take(self.page_size)
                .map(|(key, object)| RemoteObject {
                    container: self.container.clone(),
                    key: key.clone(),
                    size: object.data.len() as u64,
                })
                .collect();
            let next_token = match matching.next() {
                Some(_) => page.last().map(|object| object.key.clone()),
                None => None,
            };
            Ok(ObjectPage {
                objects: page,
                next_token,
            })
        })
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        self.with_objects(|objects| match objects.remove(key) {
            Some(_) => Ok(()),
            None => Err(self.not_found(key)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_container_is_reported() {
        let connector = MemoryConnector::new();
        let err = connector
            .connect(&RemoteCredentials::default(), "nope")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::ContainerNotFound(name) if name == "nope"));
        assert_eq!(connector.connections(), 1);
    }

    #[tokio::test]
    async fn wrong_credentials_are_rejected() {
        let connector =
            MemoryConnector::new().with_credentials(RemoteCredentials::new("id", "secret"));
        connector.create_container("media");

        let err = connector
            .connect(&RemoteCredentials::new("id", "wrong"), "media")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Remote(_)));
        assert!(connector
            .connect(&RemoteCredentials::new("id", "secret"), "media")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn delete_of_missing_key_is_not_found() {
        let connector = MemoryConnector::new();
        connector.create_container("media");
        let store = connector
            .connect(&RemoteCredentials::default(), "media")
            .await
            .unwrap();

        let err = store.delete_object("ghost").await.unwrap_err();
        assert!(matches!(err, Error::RemoteNotFound { ref key, .. } if key == "ghost"));
    }

    #[tokio::test]
    async fn put_overwrites_and_resets_policy() {
        let connector = MemoryConnector::new();
        connector.create_container("media");
        let store = connector
            .connect(&RemoteCredentials::default(), "media")
            .await
            .unwrap();

        store.put_object("k", b"one".to_vec()).await.unwrap();
        store.set_access_policy("k", "public-read").await.unwrap();
        assert_eq!(store.put_object("k", b"three".to_vec()).await.unwrap(), 5);

        assert_eq!(connector.object("media", "k").unwrap(), b"three");
        assert_eq!(connector.access_policy("media", "k"), None);
    }
}

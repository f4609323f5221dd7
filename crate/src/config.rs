use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::record::{FieldValue, TargetRecord};

/// Storage type token selecting the S3 backend.
pub const S3_STORAGE_TYPE: &str = "s3";

pub const DEFAULT_ACCESS_POLICY: &str = "public-read";

pub const DEFAULT_PERMISSION: u32 = 0o666;

/// The remote storage kinds this crate knows how to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    S3,
}

impl StorageKind {
    /// Validates a storage type as given by a caller.
    ///
    /// An absent or empty value means local storage and yields `None`.
    pub fn parse(value: Option<&str>) -> Result<Option<Self>> {
        match value {
            None | Some("") => Ok(None),
            Some(S3_STORAGE_TYPE) => Ok(Some(Self::S3)),
            Some(other) => Err(Error::invalid_configuration(format!(
                "storage type \"{other}\" is invalid, the only supported storage type \
                 (apart from default local storage) is {S3_STORAGE_TYPE}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S3 => S3_STORAGE_TYPE,
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a single call reads or writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Local,
    Remote { kind: StorageKind, container: String },
}

impl Backend {
    /// Picks the backend for a storage type and container pair.
    ///
    /// The storage type is validated first, so an unsupported type is rejected
    /// even when no container is given. Remote storage is only selected when
    /// both values are non-empty.
    pub fn select(kind: Option<&str>, container: Option<&str>) -> Result<Self> {
        let kind = StorageKind::parse(kind)?;
        match (kind, container) {
            (Some(kind), Some(container)) if !container.is_empty() => Ok(Self::Remote {
                kind,
                container: container.to_string(),
            }),
            _ => Ok(Self::Local),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote { kind, .. } => kind.as_str(),
        }
    }
}

/// Produces the directory uploads are stored under.
///
/// The provider is invoked on every resolution, so it may depend on state that
/// changes between calls (the current tenant, an app setting, ...).
#[derive(Clone)]
pub struct BasePath(Arc<dyn Fn() -> PathBuf + Send + Sync>);

impl BasePath {
    pub fn fixed(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self(Arc::new(move || path.clone()))
    }

    pub fn from_fn<F>(provider: F) -> Self
    where
        F: Fn() -> PathBuf + Send + Sync + 'static,
    {
        Self(Arc::new(provider))
    }

    pub fn resolve(&self) -> PathBuf {
        (self.0)()
    }
}

impl fmt::Debug for BasePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BasePath").field(&self.resolve()).finish()
    }
}

#[derive(Clone, Default, PartialEq, Eq)]
pub struct RemoteCredentials {
    pub access_key_id: Option<String>,
    pub access_key_secret: Option<String>,
}

impl RemoteCredentials {
    pub fn new(access_key_id: impl Into<String>, access_key_secret: impl Into<String>) -> Self {
        Self {
            access_key_id: Some(access_key_id.into()),
            access_key_secret: Some(access_key_secret.into()),
        }
    }
}

impl fmt::Debug for RemoteCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteCredentials")
            .field("access_key_id", &self.access_key_id)
            .field(
                "access_key_secret",
                &self.access_key_secret.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Names of the record fields stamped after a store. Unset names are never
/// touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFields {
    pub stored_name: Option<String>,
    pub storage_kind: Option<String>,
    pub container: Option<String>,
    pub size: Option<String>,
}

impl RecordFields {
    pub(crate) fn set_size(&self, record: &mut dyn TargetRecord, size: u64) {
        set_if_named(record, self.size.as_deref(), FieldValue::Size(size));
    }

    pub(crate) fn set_location(
        &self,
        record: &mut dyn TargetRecord,
        stored_name: &str,
        backend: &Backend,
    ) {
        set_if_named(record, self.stored_name.as_deref(), stored_name.into());
        let (kind, container) = match backend {
            Backend::Remote { kind, container } => (
                FieldValue::from(kind.as_str()),
                FieldValue::from(container.as_str()),
            ),
            // clears metadata left by an earlier remote save
            Backend::Local => (FieldValue::empty(), FieldValue::empty()),
        };
        set_if_named(record, self.storage_kind.as_deref(), kind);
        set_if_named(record, self.container.as_deref(), container);
    }
}

fn set_if_named(record: &mut dyn TargetRecord, name: Option<&str>, value: FieldValue) {
    if let Some(name) = name.filter(|name| !name.is_empty()) {
        record.set_field(name, value);
    }
}

/// Immutable configuration of a [`Saver`](crate::Saver).
#[derive(Debug, Clone)]
pub struct SaverConfig {
    pub backend: Backend,
    pub credentials: RemoteCredentials,
    pub access_policy: String,
    pub fields: RecordFields,
    pub base_path: Option<BasePath>,
    pub permission: u32,
    pub root_prefix: Option<String>,
}

impl SaverConfig {
    pub fn builder() -> SaverConfigBuilder {
        SaverConfigBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SaverConfigBuilder {
    storage_type: Option<String>,
    bucket_name: Option<String>,
    credentials: RemoteCredentials,
    access_policy: Option<String>,
    fields: RecordFields,
    base_path: Option<BasePath>,
    permission: Option<u32>,
    root_prefix: Option<String>,
}

impl SaverConfigBuilder {
    pub fn storage_type(mut self, storage_type: impl Into<String>) -> Self {
        self.storage_type = Some(storage_type.into());
        self
    }

    pub fn bucket_name(mut self, bucket_name: impl Into<String>) -> Self {
        self.bucket_name = Some(bucket_name.into());
        self
    }

    pub fn credentials(
        mut self,
        access_key_id: impl Into<String>,
        access_key_secret: impl Into<String>,
    ) -> Self {
        self.credentials = RemoteCredentials::new(access_key_id, access_key_secret);
        self
    }

    pub fn access_policy(mut self, policy: impl Into<String>) -> Self {
        self.access_policy = Some(policy.into());
        self
    }

    pub fn field_name(mut self, name: impl Into<String>) -> Self {
        self.fields.stored_name = Some(name.into());
        self
    }

    pub fn storage_type_field(mut self, name: impl Into<String>) -> Self {
        self.fields.storage_kind = Some(name.into());
        self
    }

    pub fn bucket_name_field(mut self, name: impl Into<String>) -> Self {
        self.fields.container = Some(name.into());
        self
    }

    pub fn filesize_field(mut self, name: impl Into<String>) -> Self {
        self.fields.size = Some(name.into());
        self
    }

    pub fn base_path(mut self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.base_path = (!path.as_os_str().is_empty()).then(|| BasePath::fixed(path));
        self
    }

    pub fn base_path_fn<F>(mut self, provider: F) -> Self
    where
        F: Fn() -> PathBuf + Send + Sync + 'static,
    {
        self.base_path = Some(BasePath::from_fn(provider));
        self
    }

    pub fn permission(mut self, mode: u32) -> Self {
        self.permission = Some(mode);
        self
    }

    pub fn static_root_parent(mut self, root: impl Into<String>) -> Self {
        let root = root.into();
        self.root_prefix = (!root.is_empty()).then_some(root);
        self
    }

    pub fn build(self) -> Result<SaverConfig> {
        let backend = Backend::select(self.storage_type.as_deref(), self.bucket_name.as_deref())?;
        Ok(SaverConfig {
            backend,
            credentials: self.credentials,
            access_policy: self
                .access_policy
                .unwrap_or_else(|| DEFAULT_ACCESS_POLICY.to_string()),
            fields: self.fields,
            base_path: self.base_path,
            permission: self.permission.unwrap_or(DEFAULT_PERMISSION),
            root_prefix: self.root_prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MapRecord;

    #[test]
    fn rejects_unknown_storage_type() {
        let err = SaverConfig::builder()
            .storage_type("azure")
            .bucket_name("uploads")
            .build()
            .unwrap_err();
        assert!(err.is_invalid_configuration());

        // no container does not make an invalid type acceptable
        let err = Backend::select(Some("azure"), None).unwrap_err();
        assert!(err.is_invalid_configuration());
    }

    #[test]
    fn remote_needs_type_and_container() {
        assert_eq!(Backend::select(None, None).unwrap(), Backend::Local);
        assert_eq!(Backend::select(Some(""), Some("b")).unwrap(), Backend::Local);
        assert_eq!(Backend::select(Some("s3"), None).unwrap(), Backend::Local);
        assert_eq!(Backend::select(Some("s3"), Some("")).unwrap(), Backend::Local);
        assert_eq!(
            Backend::select(Some("s3"), Some("b")).unwrap(),
            Backend::Remote {
                kind: StorageKind::S3,
                container: "b".into()
            }
        );
    }

    #[test]
    fn defaults() {
        let config = SaverConfig::builder().build().unwrap();
        assert_eq!(config.backend, Backend::Local);
        assert_eq!(config.access_policy, "public-read");
        assert_eq!(config.permission, 0o666);
        assert!(config.base_path.is_none());
        assert!(config.root_prefix.is_none());
    }

    #[test]
    fn empty_paths_count_as_unset() {
        let config = SaverConfig::builder()
            .base_path("")
            .static_root_parent("")
            .build()
            .unwrap();
        assert!(config.base_path.is_none());
        assert!(config.root_prefix.is_none());
    }

    #[test]
    fn base_path_provider_runs_each_time() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let base = BasePath::from_fn(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            PathBuf::from(format!("/srv/{n}"))
        });
        assert_eq!(base.resolve(), PathBuf::from("/srv/0"));
        assert_eq!(base.resolve(), PathBuf::from("/srv/1"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn credentials_debug_hides_secret() {
        let debug = format!("{:?}", RemoteCredentials::new("id", "hunter2"));
        assert!(debug.contains("id"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn location_fields_only_touch_configured_names() {
        let fields = RecordFields {
            storage_kind: Some("kind".into()),
            ..Default::default()
        };
        let mut record = MapRecord::new();
        fields.set_location(&mut record, "a.txt", &Backend::Local);
        assert_eq!(record.len(), 1);
        assert_eq!(record.text("kind"), Some(""));
    }
}

//! Upload saver
//!
//! Saves uploaded files either on the local filesystem or in an S3 bucket,
//! behind a single interface, and stamps where the file went onto a
//! caller-provided record.

pub mod conf;
pub mod config;
pub mod error;
pub mod record;
mod saver;
pub mod storage;

pub use config::{
    Backend, BasePath, RecordFields, RemoteCredentials, SaverConfig, SaverConfigBuilder,
    StorageKind, S3_STORAGE_TYPE,
};
pub use error::{Error, Result};
pub use record::{FieldValue, MapRecord, NoRecord, TargetRecord};
pub use saver::{Matches, ObjectRef, Saver};
pub use storage::{MemoryConnector, ObjectStore, ObjectStoreConnector, RemoteObject, S3Connector};

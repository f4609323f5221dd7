use std::sync::Arc;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use aws_sdk_s3::Client;
use tracing::{debug, info};

use super::{ObjectPage, ObjectStore, ObjectStoreConnector, RemoteObject};
use crate::config::RemoteCredentials;
use crate::error::{Error, Result};

const CREDENTIALS_PROVIDER: &str = "upload-saver";

/// Connects to S3 or an S3-compatible service.
///
/// With no region or endpoint set, the usual AWS environment and profile
/// configuration is used for them. Credentials always come from the saver.
#[derive(Debug, Clone, Default)]
pub struct S3Connector {
    region: Option<String>,
    endpoint: Option<String>,
    force_path_style: bool,
}

impl S3Connector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Targets an S3-compatible service (MinIO, R2, ...). Path-style
    /// addressing is enabled along with it.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self.force_path_style = true;
        self
    }

    async fn client(&self, credentials: &RemoteCredentials) -> Client {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let (Some(id), Some(secret)) = (
            credentials.access_key_id.as_deref(),
            credentials.access_key_secret.as_deref(),
        ) {
            loader = loader.credentials_provider(Credentials::new(
                id,
                secret,
                None,
                None,
                CREDENTIALS_PROVIDER,
            ));
        }
        if let Some(region) = &self.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &self.endpoint {
            loader = loader.endpoint_url(endpoint);
        }
        let shared = loader.load().await;
        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(self.force_path_style)
            .build();
        Client::from_conf(config)
    }
}

#[async_trait]
impl ObjectStoreConnector for S3Connector {
    fn name(&self) -> &'static str {
        "s3"
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self, credentials)))]
    async fn connect(
        &self,
        credentials: &RemoteCredentials,
        container: &str,
    ) -> Result<Arc<dyn ObjectStore>> {
        let client = self.client(credentials).await;
        debug!("Checking S3 bucket {}", container);
        match client.head_bucket().bucket(container).send().await {
            Ok(_) => {}
            Err(err) if status_code(&err) == Some(404) => {
                return Err(Error::ContainerNotFound(container.to_string()))
            }
            Err(err) => return Err(Error::remote(err)),
        }
        Ok(Arc::new(S3Store {
            client,
            bucket: container.to_string(),
        }))
    }
}

/// One S3 bucket.
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    fn not_found(&self, key: &str) -> Error {
        Error::RemoteNotFound {
            container: self.bucket.clone(),
            key: key.to_string(),
        }
    }
}

fn status_code<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|response| response.status().as_u16())
}

fn error_code<E: ProvideErrorMetadata>(err: &SdkError<E, HttpResponse>) -> Option<&str> {
    err.as_service_error().and_then(ProvideErrorMetadata::code)
}

/// A missing key, as opposed to a missing bucket.
fn is_missing_key<E: ProvideErrorMetadata>(err: &SdkError<E, HttpResponse>) -> bool {
    match error_code(err) {
        Some("NoSuchKey") | Some("NotFound") => true,
        Some("NoSuchBucket") => false,
        _ => status_code(err) == Some(404),
    }
}

fn is_missing_bucket<E: ProvideErrorMetadata>(err: &SdkError<E, HttpResponse>) -> bool {
    error_code(err) == Some("NoSuchBucket")
}

#[async_trait]
impl ObjectStore for S3Store {
    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self, data)))]
    async fn put_object(&self, key: &str, data: Vec<u8>) -> Result<u64> {
        let size = data.len() as u64;
        info!("Writing object to S3 bucket {} at key: {}", self.bucket, key);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_length(size as i64)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|err| {
                if is_missing_bucket(&err) {
                    Error::ContainerNotFound(self.bucket.clone())
                } else {
                    Error::remote(err)
                }
            })?;
        Ok(size)
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self)))]
    async fn set_access_policy(&self, key: &str, policy: &str) -> Result<()> {
        debug!("Setting ACL {} on S3 key: {}", policy, key);
        match self
            .client
            .put_object_acl()
            .bucket(&self.bucket)
            .key(key)
            .acl(ObjectCannedAcl::from(policy))
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_missing_key(&err) => Err(self.not_found(key)),
            Err(err) => Err(Error::remote(err)),
        }
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self)))]
    async fn list_page(&self, prefix: &str, continuation: Option<String>) -> Result<ObjectPage> {
        info!("Listing S3 bucket {} with prefix: {}", self.bucket, prefix);
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|err| {
                if is_missing_bucket(&err) {
                    Error::ContainerNotFound(self.bucket.clone())
                } else {
                    Error::remote(err)
                }
            })?;

        let objects = response
            .contents()
            .iter()
            .filter_map(|object| {
                let key = object.key()?;
                Some(RemoteObject {
                    container: self.bucket.clone(),
                    key: key.to_string(),
                    size: object.size().unwrap_or_default().max(0) as u64,
                })
            })
            .collect();
        let next_token = match response.is_truncated() {
            Some(true) => response.next_continuation_token().map(str::to_string),
            _ => None,
        };
        Ok(ObjectPage {
            objects,
            next_token,
        })
    }

    #[cfg_attr(feature = "instrumentation", tracing::instrument(skip(self)))]
    async fn delete_object(&self, key: &str) -> Result<()> {
        info!("Deleting object from S3 bucket {} at key: {}", self.bucket, key);
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_missing_key(&err) => Err(self.not_found(key)),
            Err(err) if is_missing_bucket(&err) => {
                Err(Error::ContainerNotFound(self.bucket.clone()))
            }
            Err(err) => Err(Error::remote(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_enables_path_style() {
        let connector = S3Connector::new()
            .with_region("eu-west-1")
            .with_endpoint("http://127.0.0.1:9000");
        assert!(connector.force_path_style);
        assert_eq!(connector.region.as_deref(), Some("eu-west-1"));
    }
}

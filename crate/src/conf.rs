use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::config::SaverConfig;
use crate::error::Result;
use crate::storage::S3Connector;

/// Settings read by the `upload-saver` binary.
///
/// Sources are layered: built-in defaults, then each config file in order,
/// then `UPLOAD_SAVER__*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct Conf {
    /// "full" or "json"
    pub log_format: String,

    pub storage_type: Option<String>,
    pub bucket_name: Option<String>,
    pub access_key_id: Option<String>,
    pub access_key_secret: Option<String>,
    pub acl: String,

    pub field_name: Option<String>,
    pub storage_type_field: Option<String>,
    pub bucket_name_field: Option<String>,
    pub filesize_field: Option<String>,

    pub base_path: Option<String>,
    pub permission: u32,
    pub static_root_parent: Option<String>,

    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
}

impl Conf {
    pub fn new(config_files: Vec<String>) -> Result<Self, config::ConfigError> {
        let mut s = Config::builder().add_source(File::from_str(
            include_str!("conf_defaults.toml"),
            FileFormat::Toml,
        ));
        for config_file in config_files {
            s = s.add_source(File::with_name(&config_file).required(false));
        }
        s.add_source(
            Environment::with_prefix("UPLOAD_SAVER")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
    }

    /// Validates the storage settings into a saver configuration.
    pub fn saver_config(&self) -> Result<SaverConfig> {
        let mut builder = SaverConfig::builder()
            .access_policy(self.acl.clone())
            .permission(self.permission);
        if let Some(storage_type) = &self.storage_type {
            builder = builder.storage_type(storage_type.clone());
        }
        if let Some(bucket_name) = &self.bucket_name {
            builder = builder.bucket_name(bucket_name.clone());
        }
        if let (Some(id), Some(secret)) = (&self.access_key_id, &self.access_key_secret) {
            builder = builder.credentials(id.clone(), secret.clone());
        }
        if let Some(name) = &self.field_name {
            builder = builder.field_name(name.clone());
        }
        if let Some(name) = &self.storage_type_field {
            builder = builder.storage_type_field(name.clone());
        }
        if let Some(name) = &self.bucket_name_field {
            builder = builder.bucket_name_field(name.clone());
        }
        if let Some(name) = &self.filesize_field {
            builder = builder.filesize_field(name.clone());
        }
        if let Some(base_path) = &self.base_path {
            builder = builder.base_path(base_path.clone());
        }
        if let Some(root) = &self.static_root_parent {
            builder = builder.static_root_parent(root.clone());
        }
        builder.build()
    }

    pub fn s3_connector(&self) -> S3Connector {
        let mut connector = S3Connector::new();
        if let Some(region) = &self.s3_region {
            connector = connector.with_region(region.clone());
        }
        if let Some(endpoint) = &self.s3_endpoint {
            connector = connector.with_endpoint(endpoint.clone());
        }
        connector
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::config::Backend;

    #[test]
    fn defaults_load_without_files() {
        let conf = Conf::new(vec!["does-not-exist.toml".into()]).unwrap();
        assert_eq!(conf.log_format, "full");
        assert_eq!(conf.acl, "public-read");
        assert_eq!(conf.permission, 0o666);
        assert!(conf.storage_type.is_none());
    }

    #[test]
    fn file_values_reach_the_saver_config() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
storage_type = "s3"
bucket_name = "media"
access_key_id = "id"
access_key_secret = "secret"
storage_type_field = "kind"
base_path = "/var/www/static/uploads"
static_root_parent = "/var/www/static"
permission = 0o644
"#
        )
        .unwrap();

        let conf = Conf::new(vec![file.path().to_string_lossy().into_owned()]).unwrap();
        let config = conf.saver_config().unwrap();
        assert!(matches!(config.backend, Backend::Remote { ref container, .. } if container == "media"));
        assert_eq!(config.permission, 0o644);
        assert_eq!(config.fields.storage_kind.as_deref(), Some("kind"));
        assert_eq!(config.credentials.access_key_id.as_deref(), Some("id"));
    }

    #[test]
    fn environment_overrides_files() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "filesize_field = \"size\"\nbucket_name_field = \"bucket\"").unwrap();

        std::env::set_var("UPLOAD_SAVER__FILESIZE_FIELD", "bytes");
        let conf = Conf::new(vec![file.path().to_string_lossy().into_owned()]);
        std::env::remove_var("UPLOAD_SAVER__FILESIZE_FIELD");
        let conf = conf.unwrap();

        assert_eq!(conf.filesize_field.as_deref(), Some("bytes"));
        assert_eq!(conf.bucket_name_field.as_deref(), Some("bucket"));
        let config = conf.saver_config().unwrap();
        assert_eq!(config.fields.size.as_deref(), Some("bytes"));
    }

    #[test]
    fn invalid_storage_type_fails_validation() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "storage_type = \"azure\"").unwrap();

        let conf = Conf::new(vec![file.path().to_string_lossy().into_owned()]).unwrap();
        assert!(conf.saver_config().unwrap_err().is_invalid_configuration());
    }
}

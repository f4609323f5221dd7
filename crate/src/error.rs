use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad or missing setup, reported before any storage is touched.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("object `{key}` does not exist in container `{container}`")]
    RemoteNotFound { container: String, key: String },

    #[error("container `{0}` does not exist")]
    ContainerNotFound(String),

    #[error("remote storage error: {0}")]
    Remote(#[source] BoxError),
}

impl Error {
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    pub fn remote(err: impl Into<BoxError>) -> Self {
        Self::Remote(err.into())
    }

    pub fn is_invalid_configuration(&self) -> bool {
        matches!(self, Self::InvalidConfiguration(_))
    }
}

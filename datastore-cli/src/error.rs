use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Datastore error: {0}")]
    Datastore(#[from] datastore_engine::DatastoreError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("{0} dataset(s) failed validation")]
    ValidationFailed(usize),
}

impl From<confy::ConfyError> for AppError {
    fn from(error: confy::ConfyError) -> Self {
        AppError::Config(error.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(error: toml::de::Error) -> Self {
        AppError::Config(error.to_string())
    }
}

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

const APP_NAME: &str = "datastore";

/// Persistent settings, overridden by command line flags
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Datastore root directory
    pub data_dir: Option<PathBuf>,

    /// Access token for the production archive
    pub access_token: Option<String>,

    /// Access token for the sandbox archive
    pub sandbox_access_token: Option<String>,

    /// Request timeout in seconds
    pub timeout: Option<u64>,
}

impl Settings {
    /// Load settings from `config_path`, or from the platform default location.
    ///
    /// A missing explicit file yields the defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self, AppError> {
        match config_path {
            Some(path) => {
                if path.exists() {
                    let content = std::fs::read_to_string(path)?;
                    Ok(toml::from_str(&content)?)
                } else {
                    Ok(Self::default())
                }
            }
            None => Ok(confy::load(APP_NAME, None)?),
        }
    }

    /// Token for the selected archive environment
    pub fn token_for(&self, sandbox: bool) -> Option<&str> {
        if sandbox {
            self.sandbox_access_token.as_deref()
        } else {
            self.access_token.as_deref()
        }
    }
}

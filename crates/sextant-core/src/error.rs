//! Error types for Sextant

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to read config {path}: {source}")]
    ConfigRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid setting [{setting}]: {reason}")]
    InvalidSetting { setting: String, reason: String },

    #[error("Duplicate realm name: {0}")]
    DuplicateRealm(String),
}

impl Error {
    pub fn invalid_setting(setting: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidSetting {
            setting: setting.into(),
            reason: reason.into(),
        }
    }
}

use thiserror::Error;

use crate::storage::models::{MediaType, DEFAULT_ALLOWED_MIME_TYPES};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub uploads: UploadConfig,
    /// Enables dangerous operations like purge. Must never be true in production.
    pub test_mode: bool,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    /// Directory holding the redb metadata database
    pub data_dir: String,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory for uploaded file content
    pub uploads_dir: String,
}

#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
    pub allowed_mime_types: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3333".to_string(),
            data_dir: "./data".to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            uploads_dir: "./uploads".to_string(),
        }
    }
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_upload_size: 100 * 1024 * 1024, // 100MB
            allowed_mime_types: DEFAULT_ALLOWED_MIME_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl UploadConfig {
    pub fn is_allowed(&self, mime_type: &str) -> bool {
        self.allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime_type))
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_defaults = ServerConfig::default();
        let upload_defaults = UploadConfig::default();

        let bind_address = lookup("BIND_ADDRESS").unwrap_or(server_defaults.bind_address);
        let data_dir = lookup("DATA_DIR").unwrap_or(server_defaults.data_dir);
        let uploads_dir =
            lookup("UPLOADS_DIR").unwrap_or_else(|| StorageConfig::default().uploads_dir);

        let test_mode = lookup("TEST_MODE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let max_upload_size = match lookup("MAX_UPLOAD_SIZE") {
            Some(raw) => raw.trim().parse().map_err(|_| {
                ConfigError::ValidationError(format!(
                    "MAX_UPLOAD_SIZE must be a number of bytes, got '{raw}'"
                ))
            })?,
            None => upload_defaults.max_upload_size,
        };

        let allowed_mime_types = lookup("ALLOWED_MIME_TYPES")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_ascii_lowercase())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(upload_defaults.allowed_mime_types);

        let config = Config {
            server: ServerConfig {
                bind_address,
                data_dir,
            },
            storage: StorageConfig { uploads_dir },
            uploads: UploadConfig {
                max_upload_size,
                allowed_mime_types,
            },
            test_mode,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.bind_address.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "BIND_ADDRESS cannot be empty".to_string(),
            ));
        }

        if self.uploads.max_upload_size == 0 {
            return Err(ConfigError::ValidationError(
                "MAX_UPLOAD_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.uploads.allowed_mime_types.is_empty() {
            return Err(ConfigError::ValidationError(
                "ALLOWED_MIME_TYPES must list at least one type".to_string(),
            ));
        }

        if let Some(unsupported) = self
            .uploads
            .allowed_mime_types
            .iter()
            .find(|m| MediaType::from_mime(m).is_none())
        {
            return Err(ConfigError::ValidationError(format!(
                "ALLOWED_MIME_TYPES may only contain image or video types, got '{unsupported}'"
            )));
        }

        Ok(())
    }
}

//! Configuration manager for shoreline.

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Server name bound to the `SERVER_SECRET` environment variable.
pub const DEFAULT_SERVER_NAME: &str = "default";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing `{0}`, set it on `config.yaml` or as environment variable")]
    MissingSecret(&'static str),
    #[error("invalid `{key}` environment variable: {value}")]
    InvalidVariable { key: &'static str, value: String },
    #[error("`{0}` must be greater than zero")]
    NotPositive(&'static str),
    #[error("`{0}` is too large")]
    TooLarge(&'static str),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Configuration {
    /// Instance name.
    pub name: String,
    /// Listening port.
    pub port: u16,
    #[serde(skip_deserializing)]
    version: String,
    #[serde(skip)]
    path: PathBuf,
    /// Related to accounts and session tokens.
    pub user: UserConfig,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_owned(),
            port: 9107,
            version: VERSION.to_owned(),
            path: PathBuf::new(),
            user: UserConfig::default(),
        }
    }
}

/// Accounts and session tokens configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Secret signing session tokens.
    #[serde(skip_serializing)]
    pub api_secret: String,
    /// Process-wide salt of password hashes.
    #[serde(skip_serializing)]
    pub salt: String,
    /// Accounts whose username or email contains it skip email
    /// verification. Empty disables the bypass.
    #[serde(skip_serializing)]
    pub verification_secret: String,
    /// Shared secrets of known servers, by server name.
    #[serde(skip_serializing)]
    pub server_secrets: HashMap<String, String>,
    /// Default lifetime of user tokens, in seconds.
    pub token_duration_secs: i64,
    /// Consecutive failures before an account is locked.
    pub max_failed_login: u32,
    /// Lock duration, in minutes.
    pub delay_before_next_login_attempt: i64,
    pub max_concurrent_login: usize,
    /// Refuse a second login of a user while one is in progress.
    pub block_parallel_login: bool,
    /// Upper bound of a single store call, in seconds.
    pub store_timeout_secs: u64,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            api_secret: String::default(),
            salt: String::default(),
            verification_secret: String::default(),
            server_secrets: HashMap::new(),
            token_duration_secs: 60 * 60, // 1 hour.
            max_failed_login: 5,
            delay_before_next_login_attempt: 10, // 10 minutes.
            max_concurrent_login: 100,
            block_parallel_login: true,
            store_timeout_secs: 5,
        }
    }
}

impl Configuration {
    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Application version.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Reads the `config.yaml` file from the specified path or the default
    /// location.
    pub fn read(self) -> Self {
        let file_path = if self.path.is_file() {
            self.path.clone()
        } else {
            Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        };

        match File::open(&file_path) {
            Ok(file) => match serde_yaml::from_reader::<_, Configuration>(file) {
                Ok(mut config) => {
                    config.version = VERSION.to_owned();
                    config.path = file_path;
                    config
                },
                Err(err) => self.error(err),
            },
            Err(err) => self.error(err),
        }
    }

    /// Return a default configuration as fallback.
    fn error(&self, err: impl std::error::Error) -> Self {
        tracing::error!(error = %err, "cannot read `config.yaml` file, using defaults");
        Self::default()
    }

    /// Override values using environment variables.
    pub fn from_env(self) -> Result<Self, ConfigError> {
        self.apply_env(|key| std::env::var(key).ok())
    }

    /// Override values using `lookup`.
    pub fn apply_env<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("SERVER_SECRET") {
            self.user
                .server_secrets
                .insert(DEFAULT_SERVER_NAME.to_owned(), secret);
        }
        if let Some(secret) = lookup("API_SECRET") {
            self.user.api_secret = secret;
        }
        if let Some(secret) = lookup("VERIFICATION_SECRET") {
            self.user.verification_secret = secret;
        }
        if let Some(salt) = lookup("SALT") {
            self.user.salt = salt;
        }
        if let Some(port) = lookup("PORT") {
            self.port = port
                .parse()
                .map_err(|_| ConfigError::InvalidVariable { key: "PORT", value: port })?;
        }

        Ok(self)
    }

    /// Check the configuration can run a server.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let user = &self.user;

        if user.api_secret.is_empty() {
            return Err(ConfigError::MissingSecret("API_SECRET"));
        }
        if user.salt.is_empty() {
            return Err(ConfigError::MissingSecret("SALT"));
        }
        if user.token_duration_secs <= 0 {
            return Err(ConfigError::NotPositive("token_duration_secs"));
        }
        if user.delay_before_next_login_attempt < 0 {
            return Err(ConfigError::NotPositive("delay_before_next_login_attempt"));
        }
        if chrono::Duration::try_minutes(user.delay_before_next_login_attempt).is_none() {
            return Err(ConfigError::TooLarge("delay_before_next_login_attempt"));
        }
        if user.store_timeout_secs == 0 {
            return Err(ConfigError::NotPositive("store_timeout_secs"));
        }

        Ok(())
    }
}

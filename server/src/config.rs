//! Configuration management for the server.

use std::env;
use tether_engine::SchemaVersion;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Accepted bearer tokens. `None` accepts any token, or none at all
    pub auth_tokens: Option<Vec<String>>,
    /// Highest client schema version served
    pub schema_version: SchemaVersion,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            auth_tokens: None,
            schema_version: 1,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let auth_tokens = env::var("AUTH_TOKENS").ok().and_then(|raw| parse_tokens(&raw));

        let schema_version = env::var("SCHEMA_VERSION")
            .unwrap_or_else(|_| "1".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidSchemaVersion)?;

        Ok(Self {
            host,
            port,
            auth_tokens,
            schema_version,
        })
    }

    /// Restrict access to the given bearer tokens.
    pub fn with_auth_tokens<I, S>(mut self, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auth_tokens = Some(tokens.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_schema_version(mut self, version: SchemaVersion) -> Self {
        self.schema_version = version;
        self
    }

    /// Whether `token` may use the sync endpoints.
    pub fn accepts_token(&self, token: &str) -> bool {
        match &self.auth_tokens {
            Some(tokens) => tokens.iter().any(|t| t == token),
            None => !token.is_empty(),
        }
    }
}

/// Split a comma-separated token list. Blank lists mean no restriction.
fn parse_tokens(raw: &str) -> Option<Vec<String>> {
    let tokens: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    (!tokens.is_empty()).then_some(tokens)
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid SCHEMA_VERSION value")]
    InvalidSchemaVersion,
}

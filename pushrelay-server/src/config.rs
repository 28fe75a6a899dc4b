//! Startup configuration.
//!
//! Every option can be given on the command line or through the environment
//! (a `.env` file is loaded by `main` before parsing).

use clap::Parser;

use crate::error::ConfigError;

/// Relay configuration.
#[derive(Parser, Debug, Clone)]
#[command(name = "pushrelay-server", version, about)]
pub struct RelayConfig {
    /// Port for HTTP and WebSocket traffic.
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Address to bind the listener to.
    #[arg(long = "bind", env = "BIND_ADDR", default_value = "0.0.0.0")]
    pub bind_addr: String,

    /// Shared HMAC secret used to verify client bearer tokens.
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: Option<String>,

    /// Address prefixes allowed to call `POST /push` (comma separated).
    /// Empty disables the filter.
    #[arg(long, env = "ALLOWED_SUBNETS", value_delimiter = ',')]
    pub allowed_subnets: Vec<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            bind_addr: "0.0.0.0".to_string(),
            jwt_secret: None,
            allowed_subnets: Vec::new(),
        }
    }
}

impl RelayConfig {
    /// `host:port` string for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }

    /// The signing secret, refusing to continue without one.
    pub fn secret(&self) -> Result<&str, ConfigError> {
        match self.jwt_secret.as_deref() {
            Some(s) if !s.is_empty() => Ok(s),
            _ => Err(ConfigError::MissingSecret),
        }
    }

    /// Allow-list prefixes with whitespace trimmed and blanks dropped. A blank
    /// entry would match every address, so it is never kept.
    pub fn subnet_prefixes(&self) -> Vec<String> {
        self.allowed_subnets
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Check everything the server needs before it binds.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.secret().map(|_| ())
    }
}

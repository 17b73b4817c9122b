//! HTTP Server Configuration
//!
//! Host, port, and CORS settings for the document API.

use serde::{Deserialize, Serialize};

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpServerConfig {
    /// Host to bind to (default: "0.0.0.0")
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind to (default: 8420)
    #[serde(default = "default_port")]
    pub port: u16,

    /// CORS allowed origins; empty (the default) allows any origin
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8420
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

impl HttpServerConfig {
    /// Get the socket address string
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HttpServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8420);
        assert!(config.cors_origins.is_empty());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: HttpServerConfig = serde_json::from_str(r#"{"port": 9000}"#).unwrap();
        assert_eq!(config.socket_addr(), "0.0.0.0:9000");
        assert!(config.cors_origins.is_empty());
    }

    #[test]
    fn test_explicit_origins_kept() {
        let config: HttpServerConfig =
            serde_json::from_str(r#"{"cors_origins": ["https://docs.example.com"]}"#).unwrap();
        assert_eq!(config.cors_origins, vec!["https://docs.example.com".to_string()]);
        assert_eq!(config.port, 8420);
    }
}

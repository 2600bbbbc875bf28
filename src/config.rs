// src/config.rs

//! Node configuration: a TOML file plus CLI flag overrides, following the
//! teacher's pattern of a single `Config` struct with `serde` defaults and
//! direct `toml::from_str` parsing (no builder crate in between).

use std::path::Path;

use serde::Deserialize;

use crate::core::error::NodeError;

fn default_client_port() -> u16 {
    5000
}

fn default_cluster_port() -> u16 {
    15000
}

fn default_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub name: String,
    #[serde(default = "default_ip")]
    pub ip: String,
    #[serde(default = "default_client_port")]
    pub client_port: u16,
    #[serde(default = "default_cluster_port")]
    pub cluster_port: u16,
    #[serde(default)]
    pub serve_all_slots: bool,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, NodeError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| NodeError::InvalidArgument(format!("reading config file: {e}")))?;
        toml::from_str(&text).map_err(|e| NodeError::InvalidArgument(format!("parsing config file: {e}")))
    }

    pub fn client_addr(&self) -> String {
        format!("{}:{}", self.ip, self.client_port)
    }

    pub fn cluster_addr(&self) -> String {
        format!("{}:{}", self.ip, self.cluster_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_fills_in_defaults() {
        let cfg: Config = toml::from_str("name = \"a\"").unwrap();
        assert_eq!(cfg.client_port, 5000);
        assert_eq!(cfg.cluster_port, 15000);
        assert_eq!(cfg.ip, "127.0.0.1");
        assert!(!cfg.serve_all_slots);
    }

    #[test]
    fn explicit_fields_override_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            name = "b"
            ip = "10.0.0.5"
            client_port = 6000
            cluster_port = 16000
            serve_all_slots = true
            log_level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.ip, "10.0.0.5");
        assert_eq!(cfg.client_port, 6000);
        assert!(cfg.serve_all_slots);
        assert_eq!(cfg.log_level, "debug");
    }
}

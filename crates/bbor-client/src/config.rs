use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;

pub const MB: u64 = 1024 * 1024;

pub const MAX_STUDY_NAME_LENGTH: usize = 500;
pub const MIN_STUDY_NAME_LENGTH: usize = 1;
/// Room kept free in a base name for the `_sNNNN` seed suffix.
pub const STUDY_NAME_SUFFIX_RESERVE: usize = 6;
pub const DEFAULT_N_TRIALS_TOTAL: u32 = 200;
pub const MAX_N_TRIALS_TOTAL: u32 = 10000;
pub const DEFAULT_N_STARTUP_TRIALS: u32 = 10;
pub const MAX_RANDOM_SEED: u32 = 10000;
pub const MAX_FILE_NAME_LENGTH: usize = 256;
pub const MAX_FILE_SIZE: u64 = MB;
pub const MAX_MEAS_FILE_SIZE: u64 = 10 * MB;

/// Sequence name the server resolves to its most recent sequence.
pub const LATEST_SEQUENCE: &str = "latest";

pub const GPX_SUFFIXES: &[&str] = &["gpx"];
pub const MEASUREMENT_SUFFIXES: &[&str] = &["csv", "2ta", "xrdml"];
pub const PRM_SUFFIXES: &[&str] = &["prm", "instprm"];
pub const CIF_SUFFIXES: &[&str] = &["cif"];

pub const API_URL_MDX: &str = "https://api.bborietveld.quantumbeam.org";
pub const API_URL_LOCAL: &str = "http://localhost:8000";
pub const API_URL_DOCKER: &str = "http://bborapi:8000";

pub const ENV_SERVER: &str = "BBOR_SERVER";
pub const ENV_USERNAME: &str = "BBOR_USERNAME";
pub const ENV_PASSWORD: &str = "BBOR_PASSWORD";
pub const ENV_VERIFY_CERT: &str = "BBOR_VERIFY_CERT";

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Server {
    #[default]
    Mdx,
    Local,
    Docker,
    Custom(String),
}

impl Server {
    pub fn base_url(&self) -> &str {
        match self {
            Server::Mdx => API_URL_MDX,
            Server::Local => API_URL_LOCAL,
            Server::Docker => API_URL_DOCKER,
            Server::Custom(url) => url.trim_end_matches('/'),
        }
    }
}

impl FromStr for Server {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "mdx" => Ok(Server::Mdx),
            "local" => Ok(Server::Local),
            "docker" => Ok(Server::Docker),
            other if other.starts_with("http://") || other.starts_with("https://") => {
                Ok(Server::Custom(other.trim_end_matches('/').to_string()))
            }
            other => Err(ConfigError::UnknownServer(other.to_string())),
        }
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Server::Mdx => write!(f, "mdx"),
            Server::Local => write!(f, "local"),
            Server::Docker => write!(f, "docker"),
            Server::Custom(url) => write!(f, "{}", url),
        }
    }
}

/// Connection settings for a [`crate::BborClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub server: Server,
    pub verify_cert: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: Server::Mdx,
            verify_cert: true,
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    #[serde(default)]
    server: Option<String>,
    #[serde(default)]
    verify_cert: Option<bool>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl ClientConfig {
    pub fn for_server(server: Server) -> Self {
        Self {
            server,
            ..Self::default()
        }
    }

    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = Some(username.to_string());
        self.password = Some(password.to_string());
        self
    }

    /// Reads a YAML config file. Missing keys keep their defaults.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = if raw.trim().is_empty() {
            ConfigFile::default()
        } else {
            serde_yaml::from_str(raw)?
        };
        let mut config = Self::default();
        if let Some(server) = file.server {
            config.server = server.parse()?;
        }
        if let Some(verify) = file.verify_cert {
            config.verify_cert = verify;
        }
        config.username = file.username;
        config.password = file.password;
        Ok(config)
    }

    /// Applies `BBOR_*` environment overrides on top of `self`.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(server) = lookup(ENV_SERVER).filter(|v| !v.trim().is_empty()) {
            self.server = server.parse()?;
        }
        if let Some(username) = lookup(ENV_USERNAME).filter(|v| !v.is_empty()) {
            self.username = Some(username);
        }
        if let Some(password) = lookup(ENV_PASSWORD).filter(|v| !v.is_empty()) {
            self.password = Some(password);
        }
        if let Some(raw) = lookup(ENV_VERIFY_CERT) {
            self.verify_cert = parse_bool(ENV_VERIFY_CERT, &raw)?;
        }
        Ok(self)
    }

    pub fn has_credentials(&self) -> bool {
        self.username.is_some() && self.password.is_some()
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn server_parses_named_and_custom_targets() {
        assert_eq!("mdx".parse::<Server>().expect("mdx"), Server::Mdx);
        assert_eq!("docker".parse::<Server>().expect("docker"), Server::Docker);
        let custom: Server = "http://127.0.0.1:9000/".parse().expect("custom");
        assert_eq!(custom.base_url(), "http://127.0.0.1:9000");
        assert!("dev".parse::<Server>().is_err());
    }

    #[test]
    fn yaml_config_keeps_defaults_for_missing_keys() {
        let config = ClientConfig::from_yaml_str("server: local\nusername: alice\n").expect("yaml");
        assert_eq!(config.server, Server::Local);
        assert!(config.verify_cert);
        assert_eq!(config.username.as_deref(), Some("alice"));
        assert!(config.password.is_none());
        assert!(!config.has_credentials());
    }

    #[test]
    fn yaml_config_rejects_unknown_keys() {
        assert!(ClientConfig::from_yaml_str("servr: local\n").is_err());
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let env: BTreeMap<&str, &str> = [
            (ENV_SERVER, "docker"),
            (ENV_PASSWORD, "secret"),
            (ENV_VERIFY_CERT, "false"),
        ]
        .into_iter()
        .collect();
        let config = ClientConfig::default()
            .with_credentials("bob", "old")
            .with_overrides_from(|key| env.get(key).map(|v| v.to_string()))
            .expect("overrides");
        assert_eq!(config.server, Server::Docker);
        assert_eq!(config.username.as_deref(), Some("bob"));
        assert_eq!(config.password.as_deref(), Some("secret"));
        assert!(!config.verify_cert);
    }

    #[test]
    fn env_override_rejects_garbage_bool() {
        let err = ClientConfig::default()
            .with_overrides_from(|key| (key == ENV_VERIFY_CERT).then(|| "maybe".to_string()))
            .expect_err("should fail");
        assert!(err.to_string().contains(ENV_VERIFY_CERT), "{}", err);
    }
}

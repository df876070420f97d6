use std::path::PathBuf;

use thiserror::Error;

use crate::registry::FileKind;

/// Local, pre-network rejection of a request parameter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: {detail}")]
    Bounds { field: &'static str, detail: String },
    #[error("{field}: {value:?} may only contain word characters, '-', '.', ' ' or CJK characters")]
    Pattern { field: &'static str, value: String },
    #[error("{field}: {name} should be suffixed by {expected}")]
    Suffix {
        field: &'static str,
        name: String,
        expected: String,
    },
    #[error("{field}: the file {name} is {size} bytes and should not exceed {limit} bytes")]
    FileTooLarge {
        field: &'static str,
        name: String,
        size: u64,
        limit: u64,
    },
    #[error("{field}: {} is not a readable file", path.display())]
    FileNotFound { field: &'static str, path: PathBuf },
    #[error("exclusive parameters are specified: choose only one of {}", fields.join(", "))]
    MutualExclusivity { fields: Vec<&'static str> },
    #[error("required parameter is missing: {message}")]
    MissingRequired { message: String },
    #[error("n_startup_trials ({startup}) should be smaller than or equal to n_trials_total ({total})")]
    StartupExceedsTotal { startup: u32, total: u32 },
    #[error("{field}: {name} does not exist on the server; upload it first")]
    NotUploaded { field: &'static str, name: String },
    #[error("sequence {0} is not a valid sequence; choose from the sequences listed on the server")]
    UnknownSequence(String),
}

impl ValidationError {
    pub(crate) fn exclusive(fields: &[&'static str]) -> Self {
        ValidationError::MutualExclusivity {
            fields: fields.to_vec(),
        }
    }

    pub(crate) fn missing(message: impl Into<String>) -> Self {
        ValidationError::MissingRequired {
            message: message.into(),
        }
    }
}

/// Failure of the client-side parameter model.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParamsError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(
        "{kind} file {name} is already on the server; reference it by name or set the overwrite flag"
    )]
    NameCollision { kind: FileKind, name: String },
}

/// Measurement file parsing failure.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no measurement parser for extension {0:?}")]
    UnsupportedExtension(String),
    #[error("cannot parse {name}: {reason}")]
    Malformed { name: String, reason: String },
    #[error("{name} is not valid utf-8")]
    Encoding { name: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("the server should be either \"mdx\", \"local\", \"docker\" or an http(s) url, got {0:?}")]
    UnknownServer(String),
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Every failure a [`crate::BborClient`] call can report.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error(
        "{kind} file {name} is already on the server; reference it by name or set the overwrite flag"
    )]
    NameCollision { kind: FileKind, name: String },
    #[error("token is empty: authenticate first")]
    NotAuthenticated,
    #[error("authentication rejected ({status}): {body}")]
    AuthenticationRejected { status: u16, body: String },
    #[error("request to {endpoint} failed ({status}): {body}")]
    Transport {
        endpoint: String,
        status: u16,
        body: String,
    },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("invalid json from server: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<ParamsError> for ClientError {
    fn from(err: ParamsError) -> Self {
        match err {
            ParamsError::Validation(e) => ClientError::Validation(e),
            ParamsError::NameCollision { kind, name } => ClientError::NameCollision { kind, name },
        }
    }
}

impl ClientError {
    /// HTTP status and raw body of a server rejection, if this error carries one.
    pub fn http_status(&self) -> Option<(u16, &str)> {
        match self {
            ClientError::AuthenticationRejected { status, body }
            | ClientError::Transport { status, body, .. } => Some((*status, body.as_str())),
            _ => None,
        }
    }

    /// True for errors raised before any network I/O.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ClientError::Validation(_)
                | ClientError::NameCollision { .. }
                | ClientError::NotAuthenticated
                | ClientError::Parse(_)
                | ClientError::Config(_)
        )
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::harvester::HarvestSummary;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("landmark `{selector}` did not appear within {timeout:?} on {url}")]
    ContentTimeout {
        url: String,
        selector: String,
        timeout: Duration,
    },

    #[error("webdriver command failed: {0}")]
    Driver(#[from] WebDriverError),

    #[error("browser session lost: {0}")]
    SessionLost(String),
}

impl RenderError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, RenderError::SessionLost(_))
    }
}

#[derive(Debug, Error)]
pub enum WebDriverError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// W3C error envelope, e.g. `no such element`.
    #[error("{error} ({status}): {message}")]
    Protocol {
        status: u16,
        error: String,
        message: String,
    },

    #[error("unexpected response: {0}")]
    Parse(String),
}

impl WebDriverError {
    pub fn is_no_such_element(&self) -> bool {
        matches!(self, WebDriverError::Protocol { error, .. } if error == "no such element")
    }

    pub fn is_invalid_session(&self) -> bool {
        matches!(self, WebDriverError::Protocol { error, .. } if error == "invalid session id")
    }
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store rejected append ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("authorization failed: {0}")]
    Auth(#[from] AuthError),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("token not found at {0}, generate an OAuth token first")]
    TokenMissing(PathBuf),

    #[error("token file {path} is unreadable: {reason}")]
    TokenUnreadable { path: PathBuf, reason: String },

    #[error("credentials file {path} is unreadable: {reason}")]
    CredentialsUnreadable { path: PathBuf, reason: String },

    #[error("token refresh failed: {0}")]
    Refresh(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid selector `{selector}` for {field}")]
    Selector { field: &'static str, selector: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum HarvestError {
    /// The browser session died mid-run; completed units stay persisted.
    #[error("run aborted: {source}")]
    Aborted {
        source: RenderError,
        summary: HarvestSummary,
    },
}

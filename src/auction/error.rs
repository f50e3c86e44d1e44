//! Error taxonomy.
//!
//! Data-quality conditions are never errors; they are absorbed into stats.
//! What remains is configuration rejection at startup, hard invariant aborts
//! during replay, and plain I/O or parse failures at the edges.

use crate::auction::config::ConfigError;
use crate::auction::invariants::InvariantAbort;
use std::fmt;

#[derive(Debug)]
pub enum TraderError {
    /// Configuration rejected before any event was processed.
    Config(ConfigError),
    /// Structural invariant violated during processing; the run is void.
    Invariant(Box<InvariantAbort>),
    /// Malformed input data.
    Data(String),
    Io(std::io::Error),
    Json(serde_json::Error),
    Toml(toml::de::Error),
}

pub type TraderResult<T> = Result<T, TraderError>;

impl fmt::Display for TraderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {}", e),
            Self::Invariant(e) => write!(f, "{}", e),
            Self::Data(msg) => write!(f, "data error: {}", msg),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Json(e) => write!(f, "JSON error: {}", e),
            Self::Toml(e) => write!(f, "TOML error: {}", e),
        }
    }
}

impl std::error::Error for TraderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(e) => Some(e),
            Self::Invariant(e) => Some(e.as_ref()),
            Self::Data(_) => None,
            Self::Io(e) => Some(e),
            Self::Json(e) => Some(e),
            Self::Toml(e) => Some(e),
        }
    }
}

impl From<ConfigError> for TraderError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<InvariantAbort> for TraderError {
    fn from(e: InvariantAbort) -> Self {
        Self::Invariant(Box::new(e))
    }
}

impl From<std::io::Error> for TraderError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for TraderError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

impl From<toml::de::Error> for TraderError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml(e)
    }
}

impl TraderError {
    /// Process exit code used by the binaries.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Invariant(_) => 4,
            Self::Data(_) | Self::Io(_) | Self::Json(_) | Self::Toml(_) => 3,
        }
    }
}

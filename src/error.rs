use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read config file {path}: {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Invalid TOML in {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    ConfigJson {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Certificate error in {path}: {message}")]
    Certificate { path: PathBuf, message: String },

    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("Client certificate verifier: {0}")]
    ClientVerifier(#[from] rustls::server::VerifierBuilderError),
}

impl Error {
    pub(crate) fn certificate(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Error::Certificate {
            path: path.into(),
            message: message.into(),
        }
    }
}

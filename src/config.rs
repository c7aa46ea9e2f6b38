//! Server configuration.
//!
//! Loaded from TOML, or from JSON when the file ends in `.json`. Every field
//! has a default, so a config file only needs what differs.

use crate::error::{Error, Result};
use crate::streaming::{
    CompressionPolicy, Encoding, ReadSettings, DEFAULT_BLOCK_SIZE, DEFAULT_COMPRESSION_BUFFER,
    DEFAULT_LEVEL, DEFAULT_QUEUE_DEPTH,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub file: FileConfig,
    pub compression: CompressionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Shown as the listing title
    #[serde(alias = "hostName")]
    pub host_name: String,
    #[serde(alias = "bindAddr")]
    pub bind_addr: String,
    pub port: u16,
    /// PEM certificate chain
    pub cert: PathBuf,
    /// PEM private key
    pub key: PathBuf,
    /// HTTP/2 initial stream and connection window
    #[serde(alias = "windowSize")]
    pub window_size: u32,
    #[serde(alias = "keepAliveSecs")]
    pub keep_alive_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host_name: "localhost".to_string(),
            bind_addr: "0.0.0.0".to_string(),
            port: 8443,
            cert: PathBuf::from("server.crt"),
            key: PathBuf::from("server.key"),
            window_size: 1024 * 1024,
            keep_alive_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// PEM files with the CAs trusted to sign client certificates
    #[serde(alias = "certPool")]
    pub cert_pool: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    #[serde(alias = "docRoot")]
    pub doc_root: PathBuf,
    /// Raw read size
    #[serde(alias = "bufferedRead")]
    pub block_size: usize,
    /// Capacity of every queue in a pipeline
    #[serde(alias = "queueDepth")]
    pub queue_depth: usize,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            doc_root: PathBuf::from("."),
            block_size: DEFAULT_BLOCK_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    #[serde(alias = "enableGzip")]
    pub enabled: bool,
    /// Minimum file size to compress
    #[serde(alias = "compressionTreshold", alias = "compressionThreshold")]
    pub threshold: u64,
    /// Size of compressed chunks
    #[serde(alias = "gzipBuffer")]
    pub buffer_size: usize,
    pub encoding: Encoding,
    /// Encoder level; the encoding's fastest level when unset
    pub level: Option<i32>,
    /// Extensions never compressed (no leading dot)
    #[serde(alias = "omitExtensions")]
    pub omit_extensions: Vec<String>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: 1024,
            buffer_size: DEFAULT_COMPRESSION_BUFFER,
            encoding: Encoding::Gzip,
            level: None,
            omit_extensions: ["jpg", "jpeg", "png", "gif", "zip", "gz", "zst", "mp4", "webm"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl CompressionConfig {
    pub fn policy(&self) -> CompressionPolicy {
        CompressionPolicy {
            enabled: self.enabled,
            threshold: self.threshold,
            excluded_extensions: self
                .omit_extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_string())
                .collect(),
            buffer_size: self.buffer_size,
            encoding: self.encoding,
            level: self.level.unwrap_or(DEFAULT_LEVEL),
        }
    }
}

impl Config {
    /// Read and parse `path`, expand `~` in paths, and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::parse(path, &text)?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Ok(Self::default())
        }
    }

    fn parse(path: &Path, text: &str) -> Result<Self> {
        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

        if is_json {
            serde_json::from_str(text).map_err(|source| Error::ConfigJson {
                path: path.to_path_buf(),
                source,
            })
        } else {
            toml::from_str(text).map_err(|source| Error::ConfigParse {
                path: path.to_path_buf(),
                source,
            })
        }
    }

    fn expand_paths(&mut self) {
        self.server.cert = expand_tilde(&self.server.cert);
        self.server.key = expand_tilde(&self.server.key);
        self.file.doc_root = expand_tilde(&self.file.doc_root);
        for ca in &mut self.client.cert_pool {
            *ca = expand_tilde(ca);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.file.block_size == 0 {
            return Err(Error::InvalidConfig("file.block_size must be > 0".into()));
        }
        if self.file.queue_depth == 0 {
            return Err(Error::InvalidConfig("file.queue_depth must be > 0".into()));
        }
        if self.compression.buffer_size == 0 {
            return Err(Error::InvalidConfig(
                "compression.buffer_size must be > 0".into(),
            ));
        }
        if self.server.window_size == 0 {
            return Err(Error::InvalidConfig("server.window_size must be > 0".into()));
        }
        if !self.file.doc_root.is_dir() {
            return Err(Error::InvalidConfig(format!(
                "file.doc_root {} is not a directory",
                self.file.doc_root.display()
            )));
        }
        Ok(())
    }

    pub fn read_settings(&self) -> ReadSettings {
        ReadSettings {
            block_size: self.file.block_size,
            queue_depth: self.file.queue_depth,
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind_addr, self.server.port)
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let path_str = path.to_string_lossy();

    if path_str == "~" {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
    } else if let Some(rest) = path_str.strip_prefix("~/") {
        match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        }
    } else {
        path.to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.file.block_size, 64 * 1024);
        assert!(!config.compression.enabled);
    }

    #[test]
    fn test_load_toml() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        fs::write(
            &path,
            format!(
                r#"
[server]
host_name = "files.example"
port = 9443

[file]
doc_root = "{}"
block_size = 4096

[compression]
enabled = true
threshold = 0
encoding = "zstd"
omit_extensions = [".jpg", "png"]
"#,
                tmp.path().display()
            ),
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.host_name, "files.example");
        assert_eq!(config.server.port, 9443);
        assert_eq!(config.file.block_size, 4096);
        assert_eq!(config.file.queue_depth, DEFAULT_QUEUE_DEPTH);

        let policy = config.compression.policy();
        assert_eq!(policy.encoding, Encoding::Zstd);
        assert!(policy.excluded_extensions.contains("jpg"));
        assert!(policy.excluded_extensions.contains("png"));
        assert!(policy.should_compress(0, "a.txt"));
        assert!(!policy.should_compress(0, "a.jpg"));
    }

    #[test]
    fn test_load_json_with_camel_case_keys() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.json");
        let json = serde_json::json!({
            "server": { "hostName": "h", "bindAddr": "127.0.0.1", "port": 4443, "windowSize": 65535 },
            "client": { "certPool": ["ca.pem"] },
            "file": { "docRoot": tmp.path(), "bufferedRead": 8192 },
            "compression": {
                "enableGzip": true,
                "compressionTreshold": 512,
                "gzipBuffer": 16384,
                "omitExtensions": ["zip"]
            }
        });
        fs::write(&path, json.to_string()).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1");
        assert_eq!(config.server.window_size, 65535);
        assert_eq!(config.client.cert_pool, vec![PathBuf::from("ca.pem")]);
        assert_eq!(config.file.block_size, 8192);
        assert!(config.compression.enabled);
        assert_eq!(config.compression.threshold, 512);
        assert_eq!(config.compression.buffer_size, 16384);
        assert_eq!(config.compression.encoding, Encoding::Gzip);
    }

    #[test]
    fn test_rejects_zero_block_size() {
        let mut config = Config::default();
        config.file.block_size = 0;
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_missing_doc_root() {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::default();
        config.file.doc_root = tmp.path().join("missing");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_toml_reports_path() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.toml");
        fs::write(&path, "[server\nport = ").unwrap();

        match Config::load(&path) {
            Err(Error::ConfigParse { path: p, .. }) => assert_eq!(p, path),
            other => panic!("Expected ConfigParse, got {other:?}"),
        }
    }

    #[test]
    fn test_expand_tilde_passthrough() {
        assert_eq!(expand_tilde(Path::new("/srv/files")), PathBuf::from("/srv/files"));
        assert_eq!(expand_tilde(Path::new("rel/path")), PathBuf::from("rel/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_tilde(Path::new("~/certs")), home.join("certs"));
        }
    }
}

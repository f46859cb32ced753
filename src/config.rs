use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Default config file name, looked up in the working directory
pub const CONFIG_PATH: &str = "gesture_server.toml";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Bind address, overridden by `HOST`
    #[serde(default = "default_host")]
    pub host: String,
    /// Overridden by `PORT`
    #[serde(default = "default_port")]
    pub port: u16,
    /// Log every prediction
    #[serde(default)]
    pub verbose: bool,
    /// Also accept browser clients over WebSocket
    #[serde(default = "default_websocket")]
    pub websocket: bool,
    /// WebSocket port on the same host, overridden by `WS_PORT`
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,
}

fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 5000 }
fn default_websocket() -> bool { true }
fn default_ws_port() -> u16 { 5001 }

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            verbose: false,
            websocket: default_websocket(),
            ws_port: default_ws_port(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModelBackend {
    /// ONNX artifact run through ONNX Runtime
    #[default]
    Onnx,
    /// JSON weight export evaluated natively
    Mlp,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModelConfig {
    #[serde(default)]
    pub backend: ModelBackend,
    /// Model artifact
    #[serde(default = "default_model_path")]
    pub path: PathBuf,
    /// Class map (label -> id JSON)
    #[serde(default = "default_classes_path")]
    pub classes: PathBuf,
    /// ONNX Runtime sessions run side by side; sized from the hardware when unset
    #[serde(default)]
    pub sessions: Option<usize>,
    /// ONNX Runtime intra-op threads per session; spare hardware threads split
    /// across sessions when unset
    #[serde(default)]
    pub intra_threads: Option<usize>,
}

fn default_model_path() -> PathBuf { PathBuf::from("model/model.onnx") }
fn default_classes_path() -> PathBuf { PathBuf::from("classes.json") }

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            backend: ModelBackend::default(),
            path: default_model_path(),
            classes: default_classes_path(),
            sessions: None,
            intra_threads: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    /// Directory of `*.jsonl` recordings
    #[serde(default = "default_raw_dir")]
    pub raw_dir: PathBuf,
    /// Where `X.npy` / `y.npy` are written
    #[serde(default = "default_out_dir")]
    pub out_dir: PathBuf,
    #[serde(default = "default_classes_path")]
    pub classes: PathBuf,
}

fn default_raw_dir() -> PathBuf { PathBuf::from("data_raw") }
fn default_out_dir() -> PathBuf { PathBuf::from("data_processed") }

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            raw_dir: default_raw_dir(),
            out_dir: default_out_dir(),
            classes: default_classes_path(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: PathBuf,
}

fn default_log_dir() -> PathBuf { PathBuf::from("logs") }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { dir: default_log_dir() }
    }
}

impl Config {
    /// Read and parse `path`. Relative paths inside are resolved against the
    /// directory that holds the config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&content, base_dir(path))
    }

    /// Like `load`, but a missing file yields the defaults. A file that exists
    /// and does not parse is still an error.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            let mut config = Config::default();
            config.resolve_paths(base_dir(path));
            Ok(config)
        }
    }

    pub fn from_toml_str(content: &str, base: &Path) -> Result<Self> {
        let mut config: Config = toml::from_str(content).context("invalid config")?;
        config.resolve_paths(base);
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for p in [
            &mut self.model.path,
            &mut self.model.classes,
            &mut self.dataset.raw_dir,
            &mut self.dataset.out_dir,
            &mut self.dataset.classes,
            &mut self.logging.dir,
        ] {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        }
    }

    /// Apply `HOST` / `PORT` / `WS_PORT` from the environment.
    pub fn apply_env(&mut self) -> Result<()> {
        let host = std::env::var("HOST").ok();
        let port = std::env::var("PORT").ok();
        let ws_port = std::env::var("WS_PORT").ok();
        self.apply_overrides(host, port, ws_port)
    }

    pub fn apply_overrides(
        &mut self,
        host: Option<String>,
        port: Option<String>,
        ws_port: Option<String>,
    ) -> Result<()> {
        if let Some(host) = host.filter(|h| !h.trim().is_empty()) {
            self.server.host = host.trim().to_string();
        }
        if let Some(port) = parse_port("PORT", port)? {
            self.server.port = port;
        }
        if let Some(port) = parse_port("WS_PORT", ws_port)? {
            self.server.ws_port = port;
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn ws_listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.ws_port)
    }
}

fn parse_port(name: &str, value: Option<String>) -> Result<Option<u16>> {
    match value.filter(|v| !v.trim().is_empty()) {
        Some(v) => {
            let port = v.trim().parse().with_context(|| format!("invalid {}: {:?}", name, v))?;
            Ok(Some(port))
        }
        None => Ok(None),
    }
}

fn base_dir(config_path: &Path) -> &Path {
    match config_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    }
}

//! Server configuration: CLI flags over config file over defaults.

use clap::Parser;
use recordroute_engines::InferenceConfig;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;

/// RecordRoute orchestration server.
#[derive(Debug, Parser)]
#[command(name = "recordroute-server", about = "Transcription and summarization job server")]
pub struct Cli {
    /// Data root holding uploads, outputs, vectors, history, and logs.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// Listen address.
    #[arg(long)]
    pub host: Option<String>,

    /// Listen port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Optional TOML config file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Shape of the optional TOML config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub data_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub max_upload_mb: Option<u64>,
    #[serde(default)]
    pub inference: Option<InferenceConfig>,
    #[serde(default)]
    pub stt: Option<SttConfig>,
}

/// External transcription command configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SttConfig {
    /// Command template; `{input}`, `{model}`, and `{language}` are
    /// substituted per run.
    pub command: Vec<String>,
    #[serde(default = "default_stt_model")]
    pub model: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_stt_model() -> String {
    "base".to_string()
}

fn default_language() -> String {
    "auto".to_string()
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            command: vec![
                "whisper-cli".to_string(),
                "--model".to_string(),
                "{model}".to_string(),
                "--language".to_string(),
                "{language}".to_string(),
                "--no-prints".to_string(),
                "--output-txt".to_string(),
                "{input}".to_string(),
            ],
            model: default_stt_model(),
            language: default_language(),
        }
    }
}

/// Fully resolved configuration the server runs with.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: u64,
    pub inference: InferenceConfig,
    pub stt: SttConfig,
}

impl ServerConfig {
    pub fn resolve(cli: Cli) -> anyhow::Result<Self> {
        let file: FileConfig = match &cli.config {
            Some(path) => {
                let contents = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
                toml::from_str(&contents)
                    .map_err(|e| anyhow::anyhow!("invalid config {}: {e}", path.display()))?
            }
            None => FileConfig::default(),
        };

        let data_dir = cli
            .data_dir
            .or(file.data_dir)
            .or_else(|| dirs::data_dir().map(|d| d.join("recordroute")))
            .unwrap_or_else(|| PathBuf::from("./recordroute-data"));

        Ok(Self {
            data_dir,
            host: cli.host.or(file.host).unwrap_or_else(|| "127.0.0.1".to_string()),
            port: cli.port.or(file.port).unwrap_or(8080),
            max_upload_bytes: file.max_upload_mb.unwrap_or(512) * 1024 * 1024,
            inference: file.inference.unwrap_or_default(),
            stt: file.stt.unwrap_or_default(),
        })
    }

    pub fn listen_addr(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid listen address: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve() {
        let cli = Cli {
            data_dir: Some(PathBuf::from("/tmp/rr")),
            host: None,
            port: None,
            config: None,
        };
        let config = ServerConfig::resolve(cli).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.max_upload_bytes, 512 * 1024 * 1024);
    }

    #[test]
    fn test_file_config_parses() {
        let file: FileConfig = toml::from_str(
            r#"
            port = 9000
            max_upload_mb = 64

            [inference]
            base_url = "http://10.0.0.5:11434"
            embed_model = "nomic-embed-text"
            summary_model = "llama3.1"
            timeout_secs = 120

            [stt]
            command = ["whisper-cli", "{input}"]
            "#,
        )
        .unwrap();
        assert_eq!(file.port, Some(9000));
        assert_eq!(file.inference.unwrap().timeout_secs, 120);
        assert_eq!(file.stt.unwrap().model, "base");
    }

    #[test]
    fn test_cli_wins_over_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(&config_path, "port = 9000\nhost = \"0.0.0.0\"\n").unwrap();

        let cli = Cli {
            data_dir: Some(PathBuf::from("/tmp/rr")),
            host: None,
            port: Some(7000),
            config: Some(config_path),
        };
        let config = ServerConfig::resolve(cli).unwrap();
        assert_eq!(config.port, 7000, "cli flag must win");
        assert_eq!(config.host, "0.0.0.0", "file fills the gaps");
    }
}

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backend_url: String,
    pub anon_key: Option<String>,
    pub default_org: Option<String>,
    pub backend: BackendConfig,
    /// Upper bound for background session validation at startup.
    pub bootstrap_timeout_ms: u64,
    /// Generation status polling cadence and deadline.
    pub poll_interval_ms: u64,
    pub poll_deadline_ms: u64,
    pub session_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend_url: "https://mivna.example.co".to_string(),
            anon_key: None,
            default_org: None,
            backend: BackendConfig::default(),
            bootstrap_timeout_ms: DEFAULT_BOOTSTRAP_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            poll_deadline_ms: DEFAULT_POLL_DEADLINE_MS,
            session_dir: None,
        }
    }
}

/// Timeout and retry tuning for calls into the hosted backend.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_base_ms: u64,
    pub retry_jitter_ms: u64,
    pub respect_retry_after: bool,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            max_retries: 3,
            retry_base_ms: 500,
            retry_jitter_ms: 400,
            respect_retry_after: true,
        }
    }
}

pub const DEFAULT_BOOTSTRAP_TIMEOUT_MS: u64 = 4_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_POLL_DEADLINE_MS: u64 = 180_000;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct FileConfig {
    pub backend_url: Option<String>,
    pub anon_key: Option<String>,
    pub default_org: Option<String>,
    pub backend: Option<PartialBackendConfig>,
    pub bootstrap_timeout_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub poll_deadline_ms: Option<u64>,
    pub session_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct PartialBackendConfig {
    pub connect_timeout_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub max_retries: Option<usize>,
    pub retry_base_ms: Option<u64>,
    pub retry_jitter_ms: Option<u64>,
    pub respect_retry_after: Option<bool>,
}

impl AppConfig {
    pub fn from_cli(cli: crate::Cli) -> Result<Self> {
        let cwd = std::env::current_dir().context("resolve current dir")?;

        // Project-local config wins over the global one.
        let project_cfg = load_project_config(&cwd).unwrap_or_default();
        let file_cfg = load_file_config().unwrap_or_default();

        let backend_url = if cli.backend_url.is_empty() {
            std::env::var("MIVNA_BACKEND_URL")
                .ok()
                .or(project_cfg.backend_url)
                .or(file_cfg.backend_url)
                .unwrap_or_else(|| "https://mivna.example.co".to_string())
        } else {
            cli.backend_url
        };
        let anon_key = cli
            .anon_key
            .or_else(|| std::env::var("MIVNA_ANON_KEY").ok())
            .or(project_cfg.anon_key)
            .or(file_cfg.anon_key);
        let default_org = cli
            .org
            .or(project_cfg.default_org)
            .or(file_cfg.default_org);

        let backend_defaults = BackendConfig::default();
        let backend = {
            let merged = match (&project_cfg.backend, &file_cfg.backend) {
                (Some(p), Some(f)) => Some(PartialBackendConfig {
                    connect_timeout_ms: p.connect_timeout_ms.or(f.connect_timeout_ms),
                    request_timeout_ms: p.request_timeout_ms.or(f.request_timeout_ms),
                    max_retries: p.max_retries.or(f.max_retries),
                    retry_base_ms: p.retry_base_ms.or(f.retry_base_ms),
                    retry_jitter_ms: p.retry_jitter_ms.or(f.retry_jitter_ms),
                    respect_retry_after: p.respect_retry_after.or(f.respect_retry_after),
                }),
                (Some(p), None) => Some(p.clone()),
                (None, Some(f)) => Some(f.clone()),
                (None, None) => None,
            };
            if let Some(p) = merged {
                BackendConfig {
                    connect_timeout_ms: p
                        .connect_timeout_ms
                        .unwrap_or(backend_defaults.connect_timeout_ms),
                    request_timeout_ms: p
                        .request_timeout_ms
                        .unwrap_or(backend_defaults.request_timeout_ms),
                    max_retries: p.max_retries.unwrap_or(backend_defaults.max_retries),
                    retry_base_ms: p.retry_base_ms.unwrap_or(backend_defaults.retry_base_ms),
                    retry_jitter_ms: p
                        .retry_jitter_ms
                        .unwrap_or(backend_defaults.retry_jitter_ms),
                    respect_retry_after: p
                        .respect_retry_after
                        .unwrap_or(backend_defaults.respect_retry_after),
                }
            } else {
                backend_defaults
            }
        };

        let bootstrap_timeout_ms = std::env::var("MIVNA_BOOTSTRAP_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .or(project_cfg.bootstrap_timeout_ms)
            .or(file_cfg.bootstrap_timeout_ms)
            .unwrap_or(DEFAULT_BOOTSTRAP_TIMEOUT_MS);
        let poll_interval_ms = project_cfg
            .poll_interval_ms
            .or(file_cfg.poll_interval_ms)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);
        let poll_deadline_ms = project_cfg
            .poll_deadline_ms
            .or(file_cfg.poll_deadline_ms)
            .unwrap_or(DEFAULT_POLL_DEADLINE_MS);

        let session_dir = project_cfg.session_dir.or(file_cfg.session_dir);

        Ok(Self {
            backend_url,
            anon_key,
            default_org,
            backend,
            bootstrap_timeout_ms,
            poll_interval_ms,
            poll_deadline_ms,
            session_dir,
        })
    }
}

pub fn load_file_config() -> Result<FileConfig> {
    use std::env;

    fn candidate_paths() -> Vec<PathBuf> {
        let mut v = Vec::new();
        if let Ok(p) = env::var("MIVNA_CONFIG") {
            v.push(PathBuf::from(p));
        }
        if let Ok(xdg_home) = env::var("XDG_CONFIG_HOME") {
            v.push(Path::new(&xdg_home).join("mivna/config.toml"));
        } else if let Ok(home) = env::var("HOME") {
            v.push(Path::new(&home).join(".config/mivna/config.toml"));
        }
        if let Ok(dirs) = env::var("XDG_CONFIG_DIRS") {
            for d in dirs.split(':') {
                if !d.is_empty() {
                    v.push(Path::new(d).join("mivna/config.toml"));
                }
            }
        }
        v
    }

    for p in candidate_paths() {
        if p.exists() {
            let s = fs::read_to_string(&p)
                .with_context(|| format!("read config file: {}", p.display()))?;
            match toml::from_str::<FileConfig>(&s) {
                Ok(cfg) => {
                    info!(path=%p.display(), "loaded config file");
                    return Ok(cfg);
                }
                Err(e) => {
                    warn!(path=%p.display(), error=%e.to_string(), "parse config failed");
                    continue;
                }
            }
        }
    }
    Ok(FileConfig::default())
}

/// Load project-specific configuration from .mivna/config.toml
pub fn load_project_config(project_root: &Path) -> Result<FileConfig> {
    let project_config_path = project_root.join(".mivna").join("config.toml");

    if project_config_path.exists() {
        let s = fs::read_to_string(&project_config_path).with_context(|| {
            format!(
                "read project config file: {}",
                project_config_path.display()
            )
        })?;
        match toml::from_str::<FileConfig>(&s) {
            Ok(cfg) => {
                info!(path=%project_config_path.display(), "loaded project config file");
                Ok(cfg)
            }
            Err(e) => {
                warn!(path=%project_config_path.display(), error=%e.to_string(), "parse project config failed");
                Ok(FileConfig::default())
            }
        }
    } else {
        Ok(FileConfig::default())
    }
}

#[cfg(test)]
mod tests;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use modelops::{BackendMode, FallbackChain, DEFAULT_FALLBACKS};

pub const DEFAULT_LOCAL_ENDPOINT: &str = "http://localhost:11434";
pub const DEFAULT_REMOTE_ENDPOINT: &str = "http://192.168.1.37:11434";
pub const DEFAULT_MODEL: &str = "qwen2.5-coder:1.5b";
pub const DEFAULT_BLACKLIST: [&str; 2] = ["qwen2.5-coder:0.5b", "llama3.2:1b"];

/// Per-operation bounds. Acquisition is deliberately far longer than probes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub model_download: Duration,
    pub connection_check: Duration,
    pub api_calls: Duration,
    pub inference_first_token: Duration,
    /// Bounds short CLI invocations such as `--version` and `list`.
    pub system_commands: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            model_download: Duration::from_secs(1200),
            connection_check: Duration::from_secs(10),
            api_calls: Duration::from_secs(30),
            inference_first_token: Duration::from_secs(60),
            system_commands: Duration::from_secs(10),
        }
    }
}

impl Timeouts {
    /// `OLLAMA_TIMEOUT_<OP>` in whole seconds; malformed values keep the default.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let d = Self::default();
        let secs = |key: &str, default: Duration| {
            lookup(&format!("OLLAMA_TIMEOUT_{key}"))
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        };
        Self {
            model_download: secs("MODEL_DOWNLOAD", d.model_download),
            connection_check: secs("CONNECTION_CHECK", d.connection_check),
            api_calls: secs("API_CALLS", d.api_calls),
            inference_first_token: secs("INFERENCE_FIRST_TOKEN", d.inference_first_token),
            system_commands: secs("SYSTEM_COMMANDS", d.system_commands),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeStrategy {
    Api,
    Cli,
}

#[derive(Clone, Debug)]
pub struct ManagerConfig {
    pub local_endpoint: String,
    pub remote_endpoint: String,
    pub default_model: String,
    pub fallbacks: FallbackChain,
    pub blacklist: Vec<String>,
    pub timeouts: Timeouts,
    pub restore_state: bool,
    pub require_backend: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            local_endpoint: DEFAULT_LOCAL_ENDPOINT.to_string(),
            remote_endpoint: DEFAULT_REMOTE_ENDPOINT.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            fallbacks: FallbackChain::default(),
            blacklist: DEFAULT_BLACKLIST.iter().map(|s| s.to_string()).collect(),
            timeouts: Timeouts::default(),
            restore_state: true,
            require_backend: false,
        }
    }
}

impl ManagerConfig {
    pub fn endpoint_for(&self, mode: BackendMode) -> &str {
        match mode {
            BackendMode::Local => &self.local_endpoint,
            BackendMode::Remote => &self.remote_endpoint,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ReporterConfig {
    pub status_file: PathBuf,
    pub interval: Duration,
    /// Added to the interval after a failed tick.
    pub error_backoff: Duration,
    pub stop_timeout: Duration,
}

impl Default for ReporterConfig {
    fn default() -> Self {
        Self {
            status_file: PathBuf::from("SESSION_STATUS.md"),
            interval: Duration::from_secs(60),
            error_backoff: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(3),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub manager: ManagerConfig,
    pub reporter: ReporterConfig,
    pub state_file: PathBuf,
    pub save_debounce: Duration,
    pub probe: ProbeStrategy,
    pub ollama_bin: String,
    pub bind_addr: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Result<Self> {
        let or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let local_endpoint = or("LOCAL_ENDPOINT", DEFAULT_LOCAL_ENDPOINT);
        let remote_endpoint = or("OLLAMA_HOST", DEFAULT_REMOTE_ENDPOINT);
        for (key, url) in [("LOCAL_ENDPOINT", &local_endpoint), ("OLLAMA_HOST", &remote_endpoint)] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                bail!("{key} must start with http:// or https://");
            }
        }

        let fallbacks = match lookup("MODEL_FALLBACKS") {
            Some(v) => FallbackChain::new(split_list(&v)),
            None => FallbackChain::new(DEFAULT_FALLBACKS),
        };
        let blacklist = match lookup("MODEL_BLACKLIST") {
            Some(v) => split_list(&v),
            None => DEFAULT_BLACKLIST.iter().map(|s| s.to_string()).collect(),
        };

        let probe = match or("PROBE_STRATEGY", "api").to_ascii_lowercase().as_str() {
            "api" => ProbeStrategy::Api,
            "cli" => ProbeStrategy::Cli,
            other => bail!("PROBE_STRATEGY must be \"api\" or \"cli\", got {other:?}"),
        };

        let manager = ManagerConfig {
            local_endpoint: local_endpoint.trim_end_matches('/').to_string(),
            remote_endpoint: remote_endpoint.trim_end_matches('/').to_string(),
            default_model: or("DEFAULT_MODEL", DEFAULT_MODEL),
            fallbacks,
            blacklist,
            timeouts: Timeouts::from_lookup(&lookup),
            restore_state: flag(lookup("RESTORE_STATE"), true),
            require_backend: flag(lookup("REQUIRE_BACKEND"), false),
        };

        let reporter = ReporterConfig {
            status_file: PathBuf::from(or("STATUS_FILE", "SESSION_STATUS.md")),
            interval: Duration::from_secs(secs(&lookup, "STATUS_INTERVAL_SECS", 60)?),
            ..ReporterConfig::default()
        };
        if reporter.interval.is_zero() {
            bail!("STATUS_INTERVAL_SECS must be greater than zero");
        }

        Ok(Self {
            manager,
            reporter,
            state_file: PathBuf::from(or("STATE_FILE", "app/data/session_state.json")),
            save_debounce: Duration::from_secs(secs(&lookup, "SAVE_DEBOUNCE_SECS", 60)?),
            probe,
            ollama_bin: or("OLLAMA_BIN", "ollama"),
            bind_addr: or("ORCH_BIND_ADDR", "127.0.0.1:8046"),
        })
    }
}

fn secs<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u64) -> Result<u64> {
    match lookup(key) {
        Some(v) => v
            .trim()
            .parse::<u64>()
            .with_context(|| format!("{key} must be a whole number of seconds, got {v:?}")),
        None => Ok(default),
    }
}

fn flag(value: Option<String>, default: bool) -> bool {
    value
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(default)
}

fn split_list(v: &str) -> Vec<String> {
    v.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn cfg(pairs: &[(&str, &str)]) -> Result<AppConfig> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|k| env.get(k).cloned())
    }

    #[test]
    fn test_defaults() {
        let c = cfg(&[]).unwrap();
        assert_eq!(c.manager.local_endpoint, DEFAULT_LOCAL_ENDPOINT);
        assert_eq!(c.manager.remote_endpoint, DEFAULT_REMOTE_ENDPOINT);
        assert_eq!(c.manager.default_model, DEFAULT_MODEL);
        assert_eq!(c.manager.fallbacks.models().len(), DEFAULT_FALLBACKS.len());
        assert_eq!(c.manager.blacklist, vec!["qwen2.5-coder:0.5b", "llama3.2:1b"]);
        assert_eq!(c.probe, ProbeStrategy::Api);
        assert_eq!(c.reporter.interval, Duration::from_secs(60));
        assert!(c.manager.restore_state);
        assert!(!c.manager.require_backend);
    }

    #[test]
    fn test_overrides() {
        let c = cfg(&[
            ("OLLAMA_HOST", "https://gpu.lan:11434/"),
            ("MODEL_FALLBACKS", "b, a ,,c"),
            ("MODEL_BLACKLIST", ""),
            ("PROBE_STRATEGY", "CLI"),
            ("STATUS_INTERVAL_SECS", "5"),
            ("REQUIRE_BACKEND", "yes"),
            ("OLLAMA_TIMEOUT_MODEL_DOWNLOAD", "30"),
            ("OLLAMA_TIMEOUT_API_CALLS", "soon"),
        ])
        .unwrap();
        assert_eq!(c.manager.remote_endpoint, "https://gpu.lan:11434");
        assert_eq!(c.manager.fallbacks.models(), &["b".to_string(), "a".into(), "c".into()]);
        assert!(c.manager.blacklist.is_empty());
        assert_eq!(c.probe, ProbeStrategy::Cli);
        assert_eq!(c.reporter.interval, Duration::from_secs(5));
        assert!(c.manager.require_backend);
        assert_eq!(c.manager.timeouts.model_download, Duration::from_secs(30));
        assert_eq!(c.manager.timeouts.api_calls, Duration::from_secs(30));
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(cfg(&[("OLLAMA_HOST", "gpu:11434")]).is_err());
        assert!(cfg(&[("PROBE_STRATEGY", "grpc")]).is_err());
        assert!(cfg(&[("STATUS_INTERVAL_SECS", "0")]).is_err());
        assert!(cfg(&[("SAVE_DEBOUNCE_SECS", "-1")]).is_err());
    }
}

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use modelops::{BackendMode, ModelDescriptor};
use tokio::process::Command;
use tracing::debug;

use crate::probe::bounded;
use crate::provider::{BackendError, LLMProvider, ProviderConnector, ProviderInfo};

/// True when `bin` is an existing file path, or a name found on `PATH`.
pub fn binary_on_path(bin: &str) -> bool {
    if bin.contains(std::path::MAIN_SEPARATOR) {
        return Path::new(bin).is_file();
    }
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(bin).is_file()))
        .unwrap_or(false)
}

/// Parses `ollama list`. Handles both the `NAME ID SIZE MODIFIED` layout and
/// the older one without an ID column.
pub fn parse_list_output(output: &str) -> Vec<ModelDescriptor> {
    let mut lines = output.lines().filter(|l| !l.trim().is_empty());
    let Some(header) = lines.next() else {
        return Vec::new();
    };
    let has_id = header.split_whitespace().any(|c| c.eq_ignore_ascii_case("ID"));
    let min = if has_id { 5 } else { 4 };

    let mut out = Vec::new();
    for line in lines {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < min {
            continue;
        }
        let (digest, rest) = if has_id {
            (parts[1], &parts[2..])
        } else {
            ("", &parts[1..])
        };
        let mut d = ModelDescriptor::new(parts[0], None)
            .with_digest(digest)
            .with_modified(rest[2..].join(" "));
        d.size = format!("{} {}", rest[0], rest[1]);
        out.push(d);
    }
    out
}

/// Drives the `ollama` binary, pointed at an endpoint through `OLLAMA_HOST`.
pub struct OllamaCliBackend {
    mode: BackendMode,
    endpoint: String,
    bin: String,
    command_timeout: Duration,
}

impl OllamaCliBackend {
    pub fn new(
        mode: BackendMode,
        endpoint: impl Into<String>,
        bin: impl Into<String>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            mode,
            endpoint: endpoint.into(),
            bin: bin.into(),
            command_timeout,
        }
    }

    /// For commands that only query the runner; the child is killed on expiry.
    async fn run_short(&self, op: &'static str, args: &[&str]) -> Result<String, BackendError> {
        bounded(op, self.command_timeout, self.run(args)).await
    }

    async fn run(&self, args: &[&str]) -> Result<String, BackendError> {
        debug!(bin = %self.bin, ?args, endpoint = %self.endpoint, "ollama cli");
        let out = Command::new(&self.bin)
            .args(args)
            .env("OLLAMA_HOST", &self.endpoint)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| BackendError::Process(format!("failed to run {}: {e}", self.bin)))?;

        let stderr = String::from_utf8_lossy(&out.stderr).trim().to_string();
        let lower = stderr.to_ascii_lowercase();
        let refused = lower.contains("could not connect") || lower.contains("connection refused");
        if out.status.success() && !refused {
            return Ok(String::from_utf8_lossy(&out.stdout).trim().to_string());
        }

        if refused {
            Err(BackendError::Unreachable {
                endpoint: self.endpoint.clone(),
                reason: stderr,
            })
        } else if modelops::is_incompatibility(&stderr) {
            Err(BackendError::Incompatible(stderr))
        } else if lower.contains("not found") {
            Err(BackendError::NotFound(args.get(1).copied().unwrap_or_default().to_string()))
        } else {
            Err(BackendError::Process(format!("{} exited with {}: {stderr}", self.bin, out.status)))
        }
    }
}

#[async_trait]
impl LLMProvider for OllamaCliBackend {
    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "ollama-cli".to_string(),
            mode: self.mode,
            base_url: self.endpoint.clone(),
        }
    }

    async fn version(&self) -> Result<String, BackendError> {
        // prints a client-only warning on stderr when the server does not answer
        let out = self.run_short("ollama --version", &["--version"]).await?;
        Ok(out.rsplit(' ').next().unwrap_or_default().to_string())
    }

    async fn list_models(&self) -> Result<Vec<ModelDescriptor>, BackendError> {
        let out = self.run_short("ollama list", &["list"]).await?;
        Ok(parse_list_output(&out))
    }

    async fn show_model(&self, name: &str) -> Result<ModelDescriptor, BackendError> {
        let out = self.run_short("ollama show", &["show", name]).await?;
        Ok(ModelDescriptor::new(name, None).with_details(serde_json::json!({ "info": out })))
    }

    async fn generate(&self, model: &str, prompt: &str) -> Result<String, BackendError> {
        self.run(&["run", model, prompt, "--nowordwrap"]).await
    }

    async fn pull(&self, model: &str) -> Result<(), BackendError> {
        match self.run(&["pull", model]).await {
            Ok(_) => Ok(()),
            Err(e @ BackendError::Unreachable { .. }) => Err(e),
            Err(e) => Err(BackendError::Acquisition(e.to_string())),
        }
    }

    async fn load(&self, model: &str) -> Result<(), BackendError> {
        self.run_short("ollama show", &["show", model]).await.map(|_| ())
    }
}

pub struct CliConnector {
    bin: String,
    command_timeout: Duration,
}

impl CliConnector {
    pub fn new(bin: impl Into<String>, command_timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            command_timeout,
        }
    }
}

#[async_trait]
impl ProviderConnector for CliConnector {
    async fn local_installed(&self) -> bool {
        binary_on_path(&self.bin)
    }

    fn connect(&self, mode: BackendMode, endpoint: &str) -> Result<Arc<dyn LLMProvider>, BackendError> {
        if !binary_on_path(&self.bin) {
            return Err(BackendError::Process(format!("{} not found on PATH", self.bin)));
        }
        Ok(Arc::new(OllamaCliBackend::new(
            mode,
            endpoint,
            self.bin.clone(),
            self.command_timeout,
        )))
    }
}

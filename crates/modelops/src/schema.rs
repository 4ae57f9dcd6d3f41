use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    Local,
    Remote,
}

impl BackendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendMode::Local => "local",
            BackendMode::Remote => "remote",
        }
    }
}

impl std::fmt::Display for BackendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown backend mode: {0} (expected \"local\" or \"remote\")")]
pub struct ParseModeError(pub String);

impl std::str::FromStr for BackendMode {
    type Err = ParseModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(BackendMode::Local),
            "remote" => Ok(BackendMode::Remote),
            other => Err(ParseModeError(other.to_string())),
        }
    }
}

/// One model as reported by a backend. Replaced wholesale on re-discovery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,
    /// Raw byte count, when the discovery path reports one.
    #[serde(default)]
    pub size_bytes: Option<u64>,
    pub size: String,
    #[serde(default)]
    pub modified: String,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub details: Option<serde_json::Value>,
}

impl ModelDescriptor {
    pub fn new(name: impl Into<String>, size_bytes: Option<u64>) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            size: size_bytes.map(format_size).unwrap_or_else(|| "Unknown".to_string()),
            modified: String::new(),
            digest: String::new(),
            details: None,
        }
    }

    pub fn with_modified(mut self, modified: impl Into<String>) -> Self {
        self.modified = modified.into();
        self
    }

    pub fn with_digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = digest.into();
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

const SIZE_UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

/// Binary (1024-based) scaling, one decimal place, capped at TB.
pub fn format_size(bytes: u64) -> String {
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", SIZE_UNITS[unit])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size_scales_by_1024() {
        assert_eq!(format_size(0), "0.0 B");
        assert_eq!(format_size(512), "512.0 B");
        assert_eq!(format_size(1024), "1.0 KB");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(986 * 1024 * 1024), "986.0 MB");
        assert_eq!(format_size(5_798_205_440), "5.4 GB");
    }

    #[test]
    fn test_format_size_tops_out_at_tb() {
        let five_pb = 5 * 1024u64.pow(5);
        assert_eq!(format_size(five_pb), "5120.0 TB");
    }

    #[test]
    fn test_descriptor_without_size_is_unknown() {
        let d = ModelDescriptor::new("phi:latest", None);
        assert_eq!(d.size, "Unknown");
        assert!(d.details.is_none());
    }

    #[test]
    fn test_mode_parse_and_display() {
        assert_eq!("REMOTE".parse::<BackendMode>().unwrap(), BackendMode::Remote);
        assert_eq!(" local ".parse::<BackendMode>().unwrap(), BackendMode::Local);
        assert!("cloud".parse::<BackendMode>().is_err());
        assert_eq!(BackendMode::Local.to_string(), "local");
        assert_eq!(serde_json::to_string(&BackendMode::Remote).unwrap(), "\"remote\"");
    }
}

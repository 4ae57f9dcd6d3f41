use serde::{Deserialize, Serialize};

use crate::Blacklist;

/// Default chain, smallest working coder models first. The last two are
/// known to be incompatible on some runners and are normally blacklisted.
pub const DEFAULT_FALLBACKS: [&str; 6] = [
    "qwen2.5-coder:1.5b",
    "deepseek-r1:1.5b",
    "phi:latest",
    "gemma2:latest",
    "qwen2.5-coder:0.5b",
    "llama3.2:1b",
];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackChain {
    models: Vec<String>,
}

impl Default for FallbackChain {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACKS)
    }
}

impl FallbackChain {
    /// Duplicates keep their first position.
    pub fn new<I, S>(models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for m in models {
            let m = m.into();
            if !m.is_empty() && !out.contains(&m) {
                out.push(m);
            }
        }
        Self { models: out }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    /// Candidates in order, each paired with whether the blacklist rules it out.
    pub fn candidates<'a>(
        &'a self,
        blacklist: &'a Blacklist,
    ) -> impl Iterator<Item = (&'a str, bool)> + 'a {
        self.models
            .iter()
            .map(move |m| (m.as_str(), blacklist.contains(m)))
    }
}

/// Coarse classification of a backend failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unreachable or timed out.
    Unavailable,
    Incompatible,
    Acquisition,
    NotFound,
    Protocol,
}

/// Why a candidate was or was not picked.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Selected,
    Blacklisted,
    /// Not in the catalog and the mode cannot acquire it.
    Missing,
    AcquisitionFailed { kind: ErrorKind, detail: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub model: String,
    pub outcome: AttemptOutcome,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub model: String,
    pub was_fallback: bool,
    /// False when the chain was exhausted and `model` is the unresolved request.
    pub resolved: bool,
    pub attempts: Vec<Attempt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chain_dedupes_and_drops_empty() {
        let c = FallbackChain::new(["a", "", "b", "a"]);
        assert_eq!(c.models(), &["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_candidates_flag_blacklisted() {
        let c = FallbackChain::default();
        let b = Blacklist::new(["qwen2.5-coder:0.5b", "llama3.2:1b"]);
        let flagged: Vec<_> = c.candidates(&b).filter(|(_, bl)| *bl).map(|(m, _)| m).collect();
        assert_eq!(flagged, vec!["qwen2.5-coder:0.5b", "llama3.2:1b"]);
        assert_eq!(c.candidates(&b).next(), Some(("qwen2.5-coder:1.5b", false)));
    }
}

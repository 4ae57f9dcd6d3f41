use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Models that failed to initialize. Entries live for the rest of the process.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blacklist {
    models: BTreeSet<String>,
}

impl Blacklist {
    pub fn new<I, S>(seed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            models: seed.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, model: &str) -> bool {
        self.models.contains(model)
    }

    /// Returns true if the model was not already listed.
    pub fn insert(&mut self, model: impl Into<String>) -> bool {
        self.models.insert(model.into())
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.models.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

/// Matches the "required tensor not found" family of load failures, e.g.
/// `llama runner: error loading model: tensor 'output.weight' not found`.
pub fn is_incompatibility(error_text: &str) -> bool {
    let lower = error_text.to_ascii_lowercase();
    lower.contains("tensor") && lower.contains("not found")
}

use serde::{Deserialize, Serialize};

use crate::BackendMode;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveSelection {
    pub mode: BackendMode,
    pub endpoint: String,
    pub model: String,
}

impl ActiveSelection {
    pub fn new(mode: BackendMode, endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            mode,
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }

    pub fn with_model(&self, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..self.clone()
        }
    }
}

impl std::fmt::Display for ActiveSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {} ({})", self.model, self.endpoint, self.mode)
    }
}

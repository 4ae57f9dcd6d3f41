use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BackendMode, ModelDescriptor};

/// Models served by one backend endpoint. Never merged across modes:
/// a new endpoint gets a new catalog.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub mode: BackendMode,
    pub endpoint: String,
    pub models: BTreeMap<String, ModelDescriptor>,
    pub refreshed_at: DateTime<Utc>,
}

impl Catalog {
    pub fn empty(mode: BackendMode, endpoint: impl Into<String>) -> Self {
        Self {
            mode,
            endpoint: endpoint.into(),
            models: BTreeMap::new(),
            refreshed_at: Utc::now(),
        }
    }

    /// Later duplicates replace earlier ones.
    pub fn from_models<I>(mode: BackendMode, endpoint: impl Into<String>, models: I) -> Self
    where
        I: IntoIterator<Item = ModelDescriptor>,
    {
        let mut c = Self::empty(mode, endpoint);
        for m in models {
            c.models.insert(m.name.clone(), m);
        }
        c
    }

    pub fn contains(&self, name: &str) -> bool {
        self.models.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&ModelDescriptor> {
        self.models.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.models.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// True when this catalog was produced by the given mode and endpoint.
    pub fn belongs_to(&self, mode: BackendMode, endpoint: &str) -> bool {
        self.mode == mode && self.endpoint == endpoint
    }
}

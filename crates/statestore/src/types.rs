use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use modelops::{ActiveSelection, Catalog};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const STATE_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub question: String,
    pub query: Option<String>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedState {
    pub version: u32,
    pub last_updated: DateTime<Utc>,
    pub catalog: Option<Catalog>,
    pub active: Option<ActiveSelection>,
    pub config: BTreeMap<String, JsonValue>,
    pub last_query: Option<QueryRecord>,
    pub databases: BTreeMap<String, JsonValue>,
    pub current_db: Option<String>,
}

impl Default for PersistedState {
    fn default() -> Self {
        let mut config = BTreeMap::new();
        config.insert("ollama_host".to_string(), JsonValue::from("http://localhost:11434"));
        config.insert("ui_port".to_string(), JsonValue::from(8046));

        Self {
            version: STATE_VERSION,
            last_updated: Utc::now(),
            catalog: None,
            active: None,
            config,
            last_query: None,
            databases: BTreeMap::new(),
            current_db: None,
        }
    }
}

impl PersistedState {
    /// Loaded values win; anything the document omits keeps the default.
    /// `config` is merged key by key rather than replaced.
    pub fn merged_over(defaults: &PersistedState, loaded: JsonValue) -> serde_json::Result<Self> {
        let mut base = serde_json::to_value(defaults)?;
        if let (JsonValue::Object(base_map), JsonValue::Object(loaded_map)) = (&mut base, loaded) {
            for (key, value) in loaded_map {
                let value = match (key.as_str(), value) {
                    ("config", JsonValue::Object(src)) => match base_map.get_mut("config") {
                        Some(JsonValue::Object(dst)) => {
                            dst.extend(src);
                            continue;
                        }
                        _ => JsonValue::Object(src),
                    },
                    (_, value) => value,
                };
                base_map.insert(key, value);
            }
        }
        serde_json::from_value(base)
    }
}

use crate::PersistedState;

fn config_text(state: &PersistedState, key: &str) -> String {
    match state.config.get(key) {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(v) => v.to_string(),
        None => "Unknown".to_string(),
    }
}

/// Human-readable rendering of the persisted state.
pub fn summary(state: &PersistedState) -> String {
    let mut out = vec![
        "# Session State".to_string(),
        format!("Last Updated: {}", state.last_updated.format("%Y-%m-%d %H:%M:%S UTC")),
        String::new(),
        "## Configuration".to_string(),
        format!("- Ollama Host: {}", config_text(state, "ollama_host")),
        format!("- UI Port: {}", config_text(state, "ui_port")),
    ];
    for key in state.config.keys() {
        if key != "ollama_host" && key != "ui_port" {
            out.push(format!("- {key}: {}", config_text(state, key)));
        }
    }

    out.push(String::new());
    out.push("## Database Information".to_string());
    out.push(format!(
        "- Current Database: {}",
        state.current_db.as_deref().unwrap_or("None")
    ));
    out.push("- Available Databases:".to_string());
    for name in state.databases.keys() {
        out.push(format!("  - {name}"));
    }

    out.push(String::new());
    out.push("## Model Information".to_string());
    match &state.active {
        Some(a) => {
            out.push(format!("- Backend Mode: {}", a.mode));
            out.push(format!("- Endpoint: {}", a.endpoint));
            out.push(format!("- Current Model: {}", a.model));
        }
        None => out.push("- Current Model: None".to_string()),
    }
    out.push("- Available Models:".to_string());
    if let Some(catalog) = &state.catalog {
        for m in catalog.models.values() {
            if m.size.is_empty() {
                out.push(format!("  - {}", m.name));
            } else {
                out.push(format!("  - {} ({})", m.name, m.size));
            }
        }
    }

    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelops::{ActiveSelection, BackendMode, Catalog, ModelDescriptor};

    #[test]
    fn test_summary_lists_models_with_sizes() {
        let mut state = PersistedState::default();
        state.active = Some(ActiveSelection::new(BackendMode::Local, "http://localhost:11434", "phi:latest"));
        state.catalog = Some(Catalog::from_models(
            BackendMode::Local,
            "http://localhost:11434",
            vec![ModelDescriptor::new("phi:latest", Some(1_717_986_918))],
        ));
        state.databases.insert("shop".into(), serde_json::json!({"path": "app/data/shop.db"}));
        state.current_db = Some("shop".into());

        let text = summary(&state);
        assert!(text.contains("- Ollama Host: http://localhost:11434"));
        assert!(text.contains("- UI Port: 8046"));
        assert!(text.contains("- Backend Mode: local"));
        assert!(text.contains("- Current Model: phi:latest"));
        assert!(text.contains("  - phi:latest (1.6 GB)"));
        assert!(text.contains("- Current Database: shop"));
        assert!(text.contains("  - shop"));
    }
}

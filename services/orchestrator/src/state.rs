use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::reporter::{StatusCallback, StatusReporter};
use crate::runtime::ModelManager;

pub type SharedState = Arc<AppState>;

#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<ModelManager>,
    pub reporter: Arc<StatusReporter>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(manager: Arc<ModelManager>, reporter: Arc<StatusReporter>, started_at: Instant) -> Self {
        Self {
            manager,
            reporter,
            started_at,
        }
    }
}

pub fn format_uptime(d: Duration) -> String {
    let secs = d.as_secs();
    format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Live sections for the status report: uptime, backend, blacklist and last query.
pub fn live_status(manager: Arc<ModelManager>, started_at: Instant) -> StatusCallback {
    Arc::new(move || {
        let snap = manager.snapshot();
        let listed = manager.blacklist();
        let blacklist: Vec<&str> = listed.iter().collect();

        let mut sections = vec![
            ("Uptime".to_string(), format_uptime(started_at.elapsed())),
            (
                "Backend".to_string(),
                format!("{} ({} @ {})", snap.phase, snap.selection.mode, snap.selection.endpoint),
            ),
            ("Active Model".to_string(), snap.selection.model.clone()),
            (
                "Blacklisted Models".to_string(),
                if blacklist.is_empty() {
                    "None".to_string()
                } else {
                    blacklist.join(", ")
                },
            ),
        ];

        if let Some(q) = manager.store().snapshot().last_query {
            let mut lines = vec![format!("- Question: {}", q.question)];
            if let Some(sql) = &q.query {
                lines.push(format!("- Query: {sql}"));
            }
            if let Some(ms) = q.duration_ms {
                lines.push(format!("- Duration: {:.2}s", ms as f64 / 1000.0));
            }
            if let Some(e) = &q.error {
                lines.push(format!("- Error: {e}"));
            }
            lines.push(format!("- At: {}", q.recorded_at.format("%Y-%m-%d %H:%M:%S UTC")));
            sections.push(("Last Query".to_string(), lines.join("\n")));
        }
        Ok(sections)
    })
}

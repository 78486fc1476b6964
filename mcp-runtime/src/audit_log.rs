use std::path::{Path, PathBuf};

use pulse_core::audit::AuditEvent;
use tokio::io::AsyncWriteExt;

/// Audit sink: every event goes to `tracing`, and optionally to a JSON Lines file.
///
/// Events carry only hashes and outcome codes, never health values.
#[derive(Debug, Clone, Default)]
pub struct AuditLog {
    path: Option<PathBuf>,
}

impl AuditLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn storage_enabled(&self) -> bool {
        self.path.is_some()
    }

    pub async fn record(&self, event: &AuditEvent) {
        tracing::info!(
            target: "pulse::audit",
            event_id = %event.id,
            tool = event.tool_name.as_str(),
            outcome = event.outcome.as_str(),
            privacy_mode = event.privacy_mode.as_str(),
            llm_disclosed = event.llm_disclosed,
            input_hash = event.input_hash.as_str(),
            duration_ms = event.duration_ms,
            scaffold = event.scaffold_used.map(|id| id.as_str()),
            provenance = event.detection_provenance.map(|p| p.as_str()),
            "audit event"
        );

        let Some(path) = &self.path else {
            return;
        };
        if let Err(err) = append_line(path, event).await {
            tracing::warn!(
                path = %path.display(),
                error = %err,
                "failed to persist audit event"
            );
        }
    }
}

async fn append_line(path: &Path, event: &AuditEvent) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut line = serde_json::to_vec(event)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    line.push(b'\n');

    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(&line).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use pulse_core::audit::AuditOutcome;
    use pulse_core::privacy::PrivacyMode;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn appends_one_line_per_event() {
        let path = std::env::temp_dir()
            .join(format!("pulse-audit-{}", std::process::id()))
            .join("audit.jsonl");
        let log = AuditLog::new(Some(path.clone()));
        assert!(log.storage_enabled());

        let mut first = AuditEvent::new("health_check", PrivacyMode::Strict, &json!({}));
        first.outcome = AuditOutcome::Completed;
        let second = AuditEvent::new("personal_health_signal", PrivacyMode::Standard, &json!({"a": 1}));
        log.record(&first).await;
        log.record(&second).await;

        let raw = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<AuditEvent> = raw
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].id, first.id);
        assert_eq!(lines[1].input_hash, second.input_hash);
        assert!(!raw.contains("\"a\""));

        tokio::fs::remove_dir_all(path.parent().unwrap()).await.ok();
    }

    #[tokio::test]
    async fn without_path_nothing_is_written() {
        let log = AuditLog::default();
        assert!(!log.storage_enabled());
        log.record(&AuditEvent::new("health_check", PrivacyMode::Strict, &json!({})))
            .await;
    }
}

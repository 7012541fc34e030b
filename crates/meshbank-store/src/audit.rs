//! Plain-text audit log

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::StoreResult;

/// One audited action
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub at: DateTime<Utc>,
    pub actor: String,
    pub action: String,
    pub target: String,
    pub detail: String,
}

impl AuditEntry {
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        target: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            at: Utc::now(),
            actor: actor.into(),
            action: action.into(),
            target: target.into(),
            detail: detail.into(),
        }
    }

    /// Single-line rendering
    pub fn to_line(&self) -> String {
        format!(
            "{} actor={} action={} target={} {}",
            self.at.to_rfc3339(),
            self.actor,
            self.action,
            self.target,
            self.detail.replace('\n', " ")
        )
    }
}

/// Append-only audit sink
pub trait AuditLog: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> StoreResult<()>;
}

/// Audit log appended to a text file
pub struct FileAuditLog {
    path: PathBuf,
    guard: Mutex<()>,
}

impl FileAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Mutex::new(()),
        }
    }
}

impl AuditLog for FileAuditLog {
    fn append(&self, entry: &AuditEntry) -> StoreResult<()> {
        let _guard = self.guard.lock();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", entry.to_line())?;
        Ok(())
    }
}

/// Audit log kept in memory
#[derive(Default)]
pub struct MemoryAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    /// Entries recorded for one action name
    pub fn actions(&self, action: &str) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.action == action)
            .cloned()
            .collect()
    }
}

impl AuditLog for MemoryAuditLog {
    fn append(&self, entry: &AuditEntry) -> StoreResult<()> {
        self.entries.lock().push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_audit_log_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/audit.log");
        let log = FileAuditLog::new(&path);

        log.append(&AuditEntry::new("admin", "lock", "bob", "reason=fraud"))
            .unwrap();
        log.append(&AuditEntry::new("admin", "unlock", "bob", "multi\nline"))
            .unwrap();

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("action=lock target=bob reason=fraud"));
        assert!(lines[1].ends_with("multi line"));
    }

    #[test]
    fn test_memory_audit_log_filters_by_action() {
        let log = MemoryAuditLog::new();
        log.append(&AuditEntry::new("a", "transfer", "b", "")).unwrap();
        log.append(&AuditEntry::new("a", "lock", "b", "")).unwrap();
        assert_eq!(log.entries().len(), 2);
        assert_eq!(log.actions("lock").len(), 1);
    }
}

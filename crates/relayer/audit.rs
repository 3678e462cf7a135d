use std::fs::{File, OpenOptions};
use std::io::Write;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

/// Append-only JSONL trail of lifecycle activity. With no path configured,
/// entries still land on the structured log.
#[derive(Debug, Default)]
pub struct AuditLog {
    file: Mutex<Option<File>>,
}

#[derive(Serialize)]
struct AuditRecord<'a> {
    at: DateTime<Utc>,
    chain: &'a str,
    kind: &'a str,
    subject: &'a str,
    detail: &'a str,
}

impl AuditLog {
    pub fn new(path: Option<&str>) -> std::io::Result<Self> {
        let file = match path {
            Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
            None => None,
        };
        Ok(AuditLog {
            file: Mutex::new(file),
        })
    }

    pub fn record(&self, chain: &str, kind: &str, subject: &str, detail: &str) {
        info!(target: "audit", chain, kind, subject, detail);

        let record = AuditRecord {
            at: Utc::now(),
            chain,
            kind,
            subject,
            detail,
        };
        let Ok(mut guard) = self.file.lock() else {
            warn!("audit sink lock poisoned, dropping entry");
            return;
        };
        if let Some(file) = guard.as_mut() {
            match serde_json::to_string(&record) {
                Ok(line) => {
                    if let Err(e) = writeln!(file, "{line}") {
                        warn!(error = %e, "failed to append audit entry");
                    }
                }
                Err(e) => warn!(error = %e, "failed to serialize audit entry"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_are_appended_as_jsonl() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("tbtc-audit-test-{}.jsonl", std::process::id()));
        let path_str = path.to_string_lossy().to_string();

        let audit = AuditLog::new(Some(&path_str)).unwrap();
        audit.record("Base", "pass", "initialize", "picked up 2 deposits");
        audit.record("Sui", "deposit", "abc123", "bridged");

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["chain"], "Base");
        assert_eq!(first["kind"], "pass");

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn no_path_still_works() {
        let audit = AuditLog::new(None).unwrap();
        audit.record("Base", "pass", "finalize", "nothing due");
    }
}

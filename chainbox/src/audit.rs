//! Audit (spec component 14, §3 AuditEntry): append-only, size-bounded
//! in-memory ring with an optional durable NDJSON tail.

use crate::config::{AuditConfig, AuditLevel};
use crate::types::{AuditEntry, FrameStatus};
use std::collections::VecDeque;
use std::io::Write;
use std::sync::Mutex;

pub struct Audit {
    config: AuditConfig,
    ring: Mutex<VecDeque<AuditEntry>>,
    file: Mutex<Option<std::fs::File>>,
}

impl Audit {
    pub fn new(config: AuditConfig) -> Self {
        let file = config
            .durable_path
            .as_ref()
            .and_then(|path| std::fs::OpenOptions::new().create(true).append(true).open(path).ok());
        Self {
            config,
            ring: Mutex::new(VecDeque::new()),
            file: Mutex::new(file),
        }
    }

    fn should_record(&self, entry: &AuditEntry) -> bool {
        if !self.config.enabled {
            return false;
        }
        match self.config.level {
            AuditLevel::All => true,
            AuditLevel::Errors => matches!(entry.status, FrameStatus::Error),
            AuditLevel::None => false,
        }
    }

    /// Appends an entry. Cache hits still emit an entry (spec §9 "the
    /// stricter variant" — observability of every accepted call).
    pub fn record(&self, entry: AuditEntry) {
        if !self.should_record(&entry) {
            return;
        }

        if let Some(file) = self.file.lock().unwrap().as_mut() {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(file, "{line}");
            }
        }

        let mut ring = self.ring.lock().unwrap();
        ring.push_back(entry);
        while ring.len() > self.config.ring_capacity {
            ring.pop_front();
        }
    }

    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let ring = self.ring.lock().unwrap();
        ring.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Outcome;
    use crate::types::{Target, TraceFrame};
    use serde_json::json;

    fn entry(status: FrameStatus) -> AuditEntry {
        AuditEntry {
            timestamp: 0,
            fn_name: "Math.Add".to_string(),
            identity: None,
            tenant_id: None,
            status,
            duration_ms: 1,
            error: None,
            outcome: Outcome::Success,
            trace_id: "t1".to_string(),
            trace: TraceFrame::new("Math.Add", None, Target::Local),
        }
    }

    #[test]
    fn records_within_level_all() {
        let audit = Audit::new(AuditConfig {
            enabled: true,
            level: AuditLevel::All,
            ring_capacity: 10,
            durable_path: None,
        });
        audit.record(entry(FrameStatus::Success));
        assert_eq!(audit.len(), 1);
    }

    #[test]
    fn errors_level_skips_success() {
        let audit = Audit::new(AuditConfig {
            enabled: true,
            level: AuditLevel::Errors,
            ring_capacity: 10,
            durable_path: None,
        });
        audit.record(entry(FrameStatus::Success));
        audit.record(entry(FrameStatus::Error));
        assert_eq!(audit.len(), 1);
    }

    #[test]
    fn ring_bounded() {
        let audit = Audit::new(AuditConfig {
            enabled: true,
            level: AuditLevel::All,
            ring_capacity: 2,
            durable_path: None,
        });
        for _ in 0..5 {
            audit.record(entry(FrameStatus::Success));
        }
        assert_eq!(audit.len(), 2);
    }

    #[test]
    fn durable_tail_appends_ndjson() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.ndjson");
        let audit = Audit::new(AuditConfig {
            enabled: true,
            level: AuditLevel::All,
            ring_capacity: 10,
            durable_path: Some(path.to_string_lossy().into_owned()),
        });
        audit.record(entry(FrameStatus::Success));
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("Math.Add"));
        let _ = json!({});
    }
}

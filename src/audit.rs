//! Audit log of text leaving the device
//!
//! One line per outbound send and per consent change. Entries carry the
//! provider and the text length, never the text itself or any credential.

use anyhow::Result;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tracing::warn;

/// Append-only audit log file
#[derive(Debug)]
pub struct AuditLog {
    path: Option<PathBuf>,
    // Opened on first write, then kept; the lock serializes appends
    file: Mutex<Option<File>>,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path: Some(path),
            file: Mutex::new(None),
        }
    }

    /// Audit log that records nothing
    pub fn disabled() -> Self {
        Self {
            path: None,
            file: Mutex::new(None),
        }
    }

    /// Log from config, or the default data dir location when unset
    pub fn from_config(config: &crate::config::Config) -> Self {
        if config.audit_log_path.is_empty() {
            Self::new(default_path())
        } else {
            Self::new(PathBuf::from(&config.audit_log_path))
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write an entry to the audit log
    pub fn log(&self, entry: &str) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if file.is_none() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            *file = Some(OpenOptions::new().create(true).append(true).open(path)?);
        }

        if let Some(handle) = file.as_mut() {
            let written = writeln!(
                handle,
                "[{}] {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                entry
            );
            if let Err(e) = written {
                // Reopen on the next entry
                *file = None;
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Record that selected text was sent to a provider
    pub fn log_outbound(&self, provider: &str, text_chars: usize) {
        let entry = format!("SENT provider={} chars={}", provider, text_chars);
        if let Err(e) = self.log(&entry) {
            warn!("Failed to write audit log: {}", e);
        }
    }

    /// Record a consent decision
    pub fn log_consent(&self, granted: bool, services: &[String]) {
        let entry = format!(
            "CONSENT granted={} services=[{}]",
            granted,
            services.join(",")
        );
        if let Err(e) = self.log(&entry) {
            warn!("Failed to write audit log: {}", e);
        }
    }
}

pub fn default_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("lucid")
        .join("audit.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outbound_entry_has_no_text() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path().join("logs/audit.log"));
        audit.log_outbound("groq", 42);
        audit.log_consent(true, &["groq".to_string(), "gemini".to_string()]);

        let content = std::fs::read_to_string(dir.path().join("logs/audit.log")).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("SENT provider=groq chars=42"));
        assert!(lines[1].ends_with("CONSENT granted=true services=[groq,gemini]"));
    }

    #[test]
    fn test_file_stays_open_between_entries() {
        let dir = tempfile::tempdir().unwrap();
        let audit = AuditLog::new(dir.path().join("audit.log"));
        assert!(audit.file.lock().unwrap().is_none());

        std::thread::scope(|scope| {
            for i in 0..8 {
                let audit = &audit;
                scope.spawn(move || audit.log_outbound("groq", i));
            }
        });

        assert!(audit.file.lock().unwrap().is_some());
        let content = std::fs::read_to_string(dir.path().join("audit.log")).unwrap();
        assert_eq!(content.lines().count(), 8);
        assert!(content.lines().all(|l| l.contains("SENT provider=groq")));
    }

    #[test]
    fn test_disabled_log_writes_nothing() {
        let audit = AuditLog::disabled();
        assert!(audit.log("anything").is_ok());
        assert!(audit.path().is_none());
    }
}

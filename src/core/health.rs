//! Archive health reports
//!
//! Conditions the format allows but a well-behaved writer never produces
//! (duplicate sibling names, unreachable entries, leaked space) and content
//! that fails verification.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Entry the diagnostic is about, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry: Option<u64>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entry {
            Some(id) => write!(f, "{} (entry {}): {}", self.severity, id, self.message),
            None => write!(f, "{}: {}", self.severity, self.message),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub diagnostics: Vec<Diagnostic>,
}

impl HealthReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, severity: Severity, entry: Option<u64>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            entry,
            message: message.into(),
        });
    }

    /// No warnings and no errors
    pub fn is_healthy(&self) -> bool {
        self.worst().map_or(true, |s| s < Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.worst() == Some(Severity::Error)
    }

    /// Highest severity reported
    pub fn worst(&self) -> Option<Severity> {
        self.diagnostics.iter().map(|d| d.severity).max()
    }

    pub fn with_severity(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(move |d| d.severity == severity)
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_report_is_healthy() {
        let report = HealthReport::new();
        assert!(report.is_healthy());
        assert!(!report.has_errors());
        assert_eq!(report.worst(), None);
    }

    #[test]
    fn test_severity_ordering() {
        let mut report = HealthReport::new();
        report.push(Severity::Info, None, "128 bytes free");
        assert!(report.is_healthy());

        report.push(Severity::Warning, Some(4), "duplicate name");
        assert!(!report.is_healthy());
        assert!(!report.has_errors());

        report.push(Severity::Error, Some(5), "checksum mismatch");
        assert!(report.has_errors());
        assert_eq!(report.with_severity(Severity::Warning).count(), 1);
        assert_eq!(report.len(), 3);
    }

    #[test]
    fn test_display() {
        let mut report = HealthReport::new();
        report.push(Severity::Error, Some(5), "checksum mismatch");
        report.push(Severity::Info, None, "ok");

        assert_eq!(
            report.diagnostics[0].to_string(),
            "error (entry 5): checksum mismatch"
        );
        assert_eq!(report.diagnostics[1].to_string(), "info: ok");
    }

    #[test]
    fn test_report_serializes() {
        let mut report = HealthReport::new();
        report.push(Severity::Warning, Some(2), "orphan");

        let json = serde_json::to_string(&report).unwrap();
        assert_eq!(
            json,
            r#"{"diagnostics":[{"severity":"warning","entry":2,"message":"orphan"}]}"#
        );
    }
}

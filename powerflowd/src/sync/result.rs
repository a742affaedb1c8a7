use std::fmt;

use serde::{Deserialize, Serialize};

/// Outcome of one engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    pub created: usize,
    /// Already present in the destination.
    pub skipped: usize,
    /// Not ready upstream yet; picked up by a later cycle.
    pub pending: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl SyncResult {
    pub(crate) fn aborted(message: String) -> Self {
        Self {
            errors: vec![message],
            ..Self::default()
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.skipped + self.pending + self.failed
    }

    /// The run stopped before looking at any record.
    pub fn is_aborted(&self) -> bool {
        self.total() == 0 && !self.errors.is_empty()
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.is_aborted()
    }

    /// At most `limit` errors plus how many were left out.
    pub fn errors_for_display(&self, limit: usize) -> (&[String], usize) {
        let shown = self.errors.len().min(limit);
        (&self.errors[..shown], self.errors.len() - shown)
    }
}

impl fmt::Display for SyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Created: {}, Skipped: {}", self.created, self.skipped)?;
        if self.pending > 0 {
            write!(f, ", Pending: {}", self.pending)?;
        }
        if self.failed > 0 {
            write!(f, ", Failed: {}", self.failed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_omits_zero_pending_and_failed() {
        let mut result = SyncResult {
            created: 2,
            skipped: 1,
            ..SyncResult::default()
        };
        assert_eq!(result.to_string(), "Created: 2, Skipped: 1");
        result.pending = 3;
        result.failed = 1;
        assert_eq!(
            result.to_string(),
            "Created: 2, Skipped: 1, Pending: 3, Failed: 1"
        );
        assert_eq!(result.total(), 7);
    }

    #[test]
    fn aborted_runs_have_errors_and_no_counts() {
        let result = SyncResult::aborted("boom".into());
        assert!(result.is_aborted());
        assert!(!result.is_clean());

        let partial = SyncResult {
            created: 1,
            failed: 1,
            errors: vec!["one".into()],
            ..SyncResult::default()
        };
        assert!(!partial.is_aborted());
        assert!(!partial.is_clean());
        assert!(SyncResult::default().is_clean());
    }

    #[test]
    fn error_display_is_capped() {
        let result = SyncResult {
            failed: 7,
            errors: (0..7).map(|i| format!("e{i}")).collect(),
            ..SyncResult::default()
        };
        let (shown, hidden) = result.errors_for_display(5);
        assert_eq!(shown.len(), 5);
        assert_eq!(hidden, 2);
        assert_eq!(result.errors.len(), 7);
    }
}

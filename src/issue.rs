//! Processing issue records
//!
//! Every recoverable oddity the pipeline encounters (a malformed tag, a
//! dropped subtitle, an unrepairable overlap) becomes an [`Issue`]. Stages
//! collect issues into a plain `Vec<Issue>` passed by reference; the
//! orchestrator appends those batches to the shared [`IssueLog`], which is
//! the only mutable structure shared between workers.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Maximum length of a context snippet attached to an issue.
const MAX_CONTEXT_LEN: usize = 150;

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// Sub-kinds of parse failures in the translation response parser
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseErrorKind {
    MissingTag,
    MalformedTag,
    NumberNotFound,
    TextNotFound,
    InvalidTimingFormat,
    InvalidTimingValue,
    DuplicateId,
    AmbiguousStructure,
    ExtractionFailed,
    MarkdownBlockEmptyOrInvalid,
}

/// Issue taxonomy, one variant per pipeline stage family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IssueKind {
    Split,
    Transcription,
    Translation,
    Parse(ParseErrorKind),
    Validation,
    Merge,
    Format,
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IssueKind::Split => write!(f, "split"),
            IssueKind::Transcription => write!(f, "transcription"),
            IssueKind::Translation => write!(f, "translation"),
            IssueKind::Parse(kind) => write!(f, "parse/{:?}", kind),
            IssueKind::Validation => write!(f, "validation"),
            IssueKind::Merge => write!(f, "merge"),
            IssueKind::Format => write!(f, "format"),
        }
    }
}

/// A single structured log record. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub kind: IssueKind,
    pub severity: Severity,
    pub message: String,
    /// Segment part number, when the issue is segment-local
    pub segment_part: Option<u32>,
    /// Reference subtitle id, when the issue concerns one entry
    pub subtitle_id: Option<String>,
    /// Approximate 1-based line number in the source document
    pub line_number: Option<usize>,
    /// Snippet of the offending input, truncated to 150 chars
    pub context: Option<String>,
}

impl Issue {
    pub fn new(kind: IssueKind, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity,
            message: message.into(),
            segment_part: None,
            subtitle_id: None,
            line_number: None,
            context: None,
        }
    }

    pub fn error(kind: IssueKind, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Error, message)
    }

    pub fn warning(kind: IssueKind, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Warning, message)
    }

    pub fn info(kind: IssueKind, message: impl Into<String>) -> Self {
        Self::new(kind, Severity::Info, message)
    }

    pub fn with_part(mut self, part: u32) -> Self {
        self.segment_part = Some(part);
        self
    }

    pub fn with_subtitle_id(mut self, id: impl Into<String>) -> Self {
        self.subtitle_id = Some(id.into());
        self
    }

    pub fn with_line(mut self, line: usize) -> Self {
        self.line_number = Some(line);
        self
    }

    /// Attach a context snippet, truncated to 150 chars at a char boundary.
    pub fn with_context(mut self, context: &str) -> Self {
        let snippet: String = context.chars().take(MAX_CONTEXT_LEN).collect();
        self.context = Some(snippet);
        self
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.severity, self.kind, self.message)?;
        if let Some(part) = self.segment_part {
            write!(f, " (part {})", part)?;
        }
        if let Some(id) = &self.subtitle_id {
            write!(f, " (subtitle {})", id)?;
        }
        if let Some(line) = self.line_number {
            write!(f, " (line {})", line)?;
        }
        Ok(())
    }
}

/// Shared append-only issue collector.
///
/// Cloning is cheap; all clones refer to the same underlying list.
#[derive(Debug, Clone, Default)]
pub struct IssueLog {
    inner: Arc<Mutex<Vec<Issue>>>,
}

impl IssueLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, issue: Issue) {
        self.inner.lock().push(issue);
    }

    pub fn extend(&self, issues: Vec<Issue>) {
        if issues.is_empty() {
            return;
        }
        self.inner.lock().extend(issues);
    }

    /// Copy of the current issue list.
    pub fn snapshot(&self) -> Vec<Issue> {
        self.inner.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    pub fn count_with_severity(&self, severity: Severity) -> usize {
        self.inner
            .lock()
            .iter()
            .filter(|i| i.severity == severity)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_truncation() {
        let long = "x".repeat(400);
        let issue = Issue::warning(IssueKind::Merge, "test").with_context(&long);
        assert_eq!(issue.context.unwrap().len(), 150);
    }

    #[test]
    fn test_issue_log_append_and_count() {
        let log = IssueLog::new();
        log.push(Issue::error(IssueKind::Split, "a"));
        log.extend(vec![
            Issue::warning(IssueKind::Merge, "b"),
            Issue::warning(IssueKind::Validation, "c"),
        ]);
        assert_eq!(log.len(), 3);
        assert_eq!(log.count_with_severity(Severity::Warning), 2);
        assert_eq!(log.count_with_severity(Severity::Error), 1);
    }

    #[test]
    fn test_shared_across_clones() {
        let log = IssueLog::new();
        let clone = log.clone();
        clone.push(Issue::info(IssueKind::Format, "hello"));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_display_includes_location() {
        let issue = Issue::warning(IssueKind::Parse(ParseErrorKind::DuplicateId), "dup")
            .with_part(3)
            .with_subtitle_id("42")
            .with_line(17);
        let s = issue.to_string();
        assert!(s.contains("part 3"));
        assert!(s.contains("subtitle 42"));
        assert!(s.contains("line 17"));
    }
}

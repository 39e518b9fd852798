use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::generator::{RejectedCase, TestCase};
use crate::runner::ExecutionReport;

#[derive(Debug, Error, PartialEq)]
pub enum HistoryError {
    #[error("attempt history already holds the maximum of {0} attempts")]
    Full(u32),
}

/// Where in an attempt something happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Generating,
    Translating,
    Executing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    GenerationUnavailable,
    NoStructuredOutputFound,
    EmptyTestCaseSet,
    NoCodeFound,
    TestFailure,
    RunnerUnavailable,
}

impl DiagnosticKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiagnosticKind::GenerationUnavailable => "generation_unavailable",
            DiagnosticKind::NoStructuredOutputFound => "no_structured_output_found",
            DiagnosticKind::EmptyTestCaseSet => "empty_test_case_set",
            DiagnosticKind::NoCodeFound => "no_code_found",
            DiagnosticKind::TestFailure => "test_failure",
            DiagnosticKind::RunnerUnavailable => "runner_unavailable",
        }
    }

    /// Failures of the environment rather than of the generated tests.
    /// They stop the cycle and teach the model nothing.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DiagnosticKind::RunnerUnavailable)
    }
}

/// Why an attempt did not pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub stage: Stage,
    pub message: String,
}

impl Diagnostic {
    pub fn new<S: Into<String>>(kind: DiagnosticKind, stage: Stage, message: S) -> Self {
        Diagnostic {
            kind,
            stage,
            message: message.into(),
        }
    }
}

/// One generate -> translate -> execute pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_number: u32,
    pub started_at: DateTime<Utc>,
    pub test_cases: Vec<TestCase>,
    pub rejected: Vec<RejectedCase>,
    /// `None` when the attempt failed before execution
    pub report: Option<ExecutionReport>,
    pub diagnostic: Option<Diagnostic>,
}

impl AttemptRecord {
    pub fn succeeded(&self) -> bool {
        self.report.as_ref().map_or(false, |report| report.succeeded)
    }
}

/// Append-only log of the attempts of one repair cycle, capped at the
/// cycle's attempt budget.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptHistory {
    max_attempts: u32,
    attempts: Vec<AttemptRecord>,
}

impl AttemptHistory {
    pub fn new(max_attempts: u32) -> Self {
        AttemptHistory {
            max_attempts,
            attempts: Vec::with_capacity(max_attempts as usize),
        }
    }

    pub fn push(&mut self, record: AttemptRecord) -> Result<(), HistoryError> {
        if self.attempts.len() >= self.max_attempts as usize {
            return Err(HistoryError::Full(self.max_attempts));
        }
        self.attempts.push(record);
        Ok(())
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn len(&self) -> usize {
        self.attempts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub fn last(&self) -> Option<&AttemptRecord> {
        self.attempts.last()
    }

    /// Number of attempts that reached the runner
    pub fn executions(&self) -> usize {
        self.attempts.iter().filter(|a| a.report.is_some()).count()
    }

    pub fn diagnostics(&self) -> impl Iterator<Item = (u32, &Diagnostic)> {
        self.attempts
            .iter()
            .filter_map(|a| a.diagnostic.as_ref().map(|d| (a.attempt_number, d)))
    }
}

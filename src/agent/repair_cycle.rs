// The repair cycle: generate test cases, translate them into source, run
// the source, and on failure try again within a fixed attempt budget.
//
//   Initializing -> Generating -> Translating -> Executing -> Succeeded
//                       ^             |              |
//                       |             v              v
//                       +--------- Retrying <--------+ --> Exhausted
//
// Stage failures (service down, unusable model output, failing tests) are
// recorded on the attempt and consume one unit of the budget. Only a broken
// description or a missing test runner stop the cycle outright.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::history::{AttemptHistory, AttemptRecord, Diagnostic, DiagnosticKind, Stage};
use super::knowledge::{KnowledgeEntry, KnowledgeLog};
use crate::config::RepairConfig;
use crate::generator::{
    build_code_prompt, build_test_case_prompt, extract_test_cases, synthesize_source,
    ExtractedCases, ExtractionError, RejectedCase, TestCase, TextGenerator,
};
use crate::parser::{extract_endpoints, EndpointDescriptor};
use crate::runner::{ExecutionReport, TestRunner};
use crate::utils::{tail_chars, truncate_chars};

/// Lessons quoted back to the model when feedback is on
const FEEDBACK_LESSONS: usize = 3;

/// Output kept from each stream of a failed run
const OUTPUT_TAIL_CHARS: usize = 4000;

/// Raw model output quoted in diagnostics
const RESPONSE_PREVIEW_CHARS: usize = 500;

/// Shared abort switch, checked before every state transition
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        CancellationFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleState {
    Initializing,
    Generating,
    Translating,
    Executing,
    Retrying,
    Succeeded,
    Exhausted,
}

impl CycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CycleState::Succeeded | CycleState::Exhausted)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    Passed,
    AttemptsExhausted,
    SchemaParse(String),
    RunnerUnavailable(String),
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Passed => f.write_str("all tests passed"),
            StopReason::AttemptsExhausted => f.write_str("attempt budget exhausted"),
            StopReason::SchemaParse(message) => f.write_str(message),
            StopReason::RunnerUnavailable(message) => f.write_str(message),
            StopReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Final result of one repair cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    /// Always `Succeeded` or `Exhausted`
    pub state: CycleState,
    pub stop_reason: StopReason,
    pub endpoints: Vec<EndpointDescriptor>,
    pub history: AttemptHistory,
}

impl CycleReport {
    pub fn succeeded(&self) -> bool {
        self.state == CycleState::Succeeded
    }

    /// Every attempt with its test cases, run result and diagnostic
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Repair cycle {}: {:?} ({}) after {} of {} attempt(s), {} endpoint(s)\n",
            self.cycle_id,
            self.state,
            self.stop_reason,
            self.history.len(),
            self.history.max_attempts(),
            self.endpoints.len()
        );

        for attempt in self.history.attempts() {
            out.push_str(&format!(
                "  attempt {} ({}): {} test case(s), {} rejected\n",
                attempt.attempt_number,
                attempt.started_at.to_rfc3339(),
                attempt.test_cases.len(),
                attempt.rejected.len()
            ));
            for rejected in &attempt.rejected {
                out.push_str(&format!("    rejected #{}: {}\n", rejected.index, rejected.reason));
            }
            if let Some(report) = &attempt.report {
                out.push_str(&format!(
                    "    run {} with exit code {} in {} ms\n",
                    if report.succeeded { "passed" } else { "failed" },
                    report.exit_code,
                    report.duration_ms
                ));
            }
            if let Some(diagnostic) = &attempt.diagnostic {
                out.push_str(&format!(
                    "    {} during {:?}:\n      {}\n",
                    diagnostic.kind.as_str(),
                    diagnostic.stage,
                    diagnostic.message.trim().replace('\n', "\n      ")
                ));
            }
        }

        out
    }
}

/// Attempt under construction
struct AttemptDraft {
    number: u32,
    started_at: DateTime<Utc>,
    test_cases: Vec<TestCase>,
    rejected: Vec<RejectedCase>,
}

impl AttemptDraft {
    fn new(number: u32) -> Self {
        AttemptDraft {
            number,
            started_at: Utc::now(),
            test_cases: Vec::new(),
            rejected: Vec::new(),
        }
    }

    fn finish(self, report: Option<ExecutionReport>, diagnostic: Option<Diagnostic>) -> AttemptRecord {
        AttemptRecord {
            attempt_number: self.number,
            started_at: self.started_at,
            test_cases: self.test_cases,
            rejected: self.rejected,
            report,
            diagnostic,
        }
    }
}

/// A stage that failed, with whatever rejections it produced on the way
struct StageFailure {
    diagnostic: Diagnostic,
    rejected: Vec<RejectedCase>,
}

impl From<Diagnostic> for StageFailure {
    fn from(diagnostic: Diagnostic) -> Self {
        StageFailure {
            diagnostic,
            rejected: Vec::new(),
        }
    }
}

/// Controller state plus the data that state needs
enum Step {
    Initializing,
    Generating,
    Translating(AttemptDraft),
    Executing(AttemptDraft, String),
    Retrying,
    Finished(CycleState, StopReason),
}

impl Step {
    fn state(&self) -> CycleState {
        match self {
            Step::Initializing => CycleState::Initializing,
            Step::Generating => CycleState::Generating,
            Step::Translating(_) => CycleState::Translating,
            Step::Executing(..) => CycleState::Executing,
            Step::Retrying => CycleState::Retrying,
            Step::Finished(state, _) => *state,
        }
    }
}

pub struct RepairCycle {
    config: RepairConfig,
    generator: Arc<dyn TextGenerator>,
    runner: Arc<dyn TestRunner>,
}

impl RepairCycle {
    pub fn new(
        config: RepairConfig,
        generator: Arc<dyn TextGenerator>,
        runner: Arc<dyn TestRunner>,
    ) -> Self {
        RepairCycle {
            config,
            generator,
            runner,
        }
    }

    pub fn config(&self) -> &RepairConfig {
        &self.config
    }

    /// Run one cycle against `description` until it succeeds, runs out of
    /// attempts, hits a fatal error, or `cancel` is tripped.
    ///
    /// Every failed attempt's diagnostic is appended to `knowledge`.
    pub async fn run(
        &self,
        description: &Value,
        knowledge: &mut KnowledgeLog,
        cancel: &CancellationFlag,
    ) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let span = info_span!("repair_cycle", %cycle_id);
        self.drive(cycle_id, description, knowledge, cancel)
            .instrument(span)
            .await
    }

    async fn drive(
        &self,
        cycle_id: Uuid,
        description: &Value,
        knowledge: &mut KnowledgeLog,
        cancel: &CancellationFlag,
    ) -> CycleReport {
        let mut history = AttemptHistory::new(self.config.max_attempts);
        let mut endpoints = Vec::new();
        let mut attempts_used: u32 = 0;
        let mut step = Step::Initializing;

        loop {
            if cancel.is_cancelled() && !step.state().is_terminal() {
                warn!(state = ?step.state(), "repair cycle cancelled");
                step = Step::Finished(CycleState::Exhausted, StopReason::Cancelled);
            }
            debug!(state = ?step.state(), attempt = attempts_used, "state transition");

            step = match step {
                Step::Finished(state, stop_reason) => {
                    info!(
                        state = ?state,
                        reason = %stop_reason,
                        attempts = history.len(),
                        "repair cycle finished"
                    );
                    return CycleReport {
                        cycle_id,
                        state,
                        stop_reason,
                        endpoints,
                        history,
                    };
                }

                Step::Initializing => match extract_endpoints(description) {
                    Ok(found) => {
                        info!(endpoints = found.len(), "extracted endpoints from description");
                        endpoints = found;
                        Step::Generating
                    }
                    Err(e) => Step::Finished(CycleState::Exhausted, StopReason::SchemaParse(e.to_string())),
                },

                Step::Generating => {
                    attempts_used += 1;
                    info!(attempt = attempts_used, max_attempts = self.config.max_attempts, "starting attempt");
                    let mut draft = AttemptDraft::new(attempts_used);

                    match self.generate_cases(&endpoints, knowledge).await {
                        Ok(extracted) => {
                            draft.test_cases = extracted.cases;
                            draft.rejected = extracted.rejected;
                            Step::Translating(draft)
                        }
                        Err(failure) => {
                            draft.rejected = failure.rejected;
                            self.fail_attempt(cycle_id, draft, None, failure.diagnostic, &mut history, knowledge)
                        }
                    }
                }

                Step::Translating(draft) => match self.translate(&draft.test_cases, knowledge).await {
                    Ok(source) => Step::Executing(draft, source),
                    Err(diagnostic) => {
                        self.fail_attempt(cycle_id, draft, None, diagnostic, &mut history, knowledge)
                    }
                },

                Step::Executing(draft, source) => {
                    match self.runner.execute(&source, &self.config.target_file).await {
                        Ok(report) if report.succeeded => {
                            match history.push(draft.finish(Some(report), None)) {
                                Ok(()) => Step::Finished(CycleState::Succeeded, StopReason::Passed),
                                Err(e) => {
                                    warn!(error = %e, "could not archive attempt");
                                    Step::Finished(CycleState::Exhausted, StopReason::AttemptsExhausted)
                                }
                            }
                        }
                        Ok(report) => {
                            let diagnostic = Diagnostic::new(
                                DiagnosticKind::TestFailure,
                                Stage::Executing,
                                describe_failure(&report),
                            );
                            self.fail_attempt(cycle_id, draft, Some(report), diagnostic, &mut history, knowledge)
                        }
                        Err(e) => {
                            let message = e.to_string();
                            warn!(error = %message, "test runner unavailable, stopping");
                            let diagnostic = Diagnostic::new(
                                DiagnosticKind::RunnerUnavailable,
                                Stage::Executing,
                                message.clone(),
                            );
                            self.fail_attempt(cycle_id, draft, None, diagnostic, &mut history, knowledge);
                            Step::Finished(CycleState::Exhausted, StopReason::RunnerUnavailable(message))
                        }
                    }
                }

                Step::Retrying => {
                    if attempts_used >= self.config.max_attempts {
                        Step::Finished(CycleState::Exhausted, StopReason::AttemptsExhausted)
                    } else {
                        if !self.config.backoff.is_zero() {
                            debug!(backoff = ?self.config.backoff, "waiting before next attempt");
                            tokio::time::sleep(self.config.backoff).await;
                        }
                        Step::Generating
                    }
                }
            };
        }
    }

    fn feedback(&self, knowledge: &KnowledgeLog) -> Vec<String> {
        if self.config.feedback {
            knowledge.recent_lessons(FEEDBACK_LESSONS)
        } else {
            Vec::new()
        }
    }

    async fn generate_cases(
        &self,
        endpoints: &[EndpointDescriptor],
        knowledge: &KnowledgeLog,
    ) -> Result<ExtractedCases, StageFailure> {
        let prompt = build_test_case_prompt(endpoints, &self.feedback(knowledge));

        let raw = self
            .generator
            .generate(&prompt, &self.config.model)
            .await
            .map_err(|e| {
                Diagnostic::new(DiagnosticKind::GenerationUnavailable, Stage::Generating, e.to_string())
            })?;

        extract_test_cases(&raw, endpoints).map_err(|e| {
            let kind = match &e {
                ExtractionError::EmptyTestCaseSet { .. } => DiagnosticKind::EmptyTestCaseSet,
                ExtractionError::NoCodeFound => DiagnosticKind::NoCodeFound,
                ExtractionError::NoStructuredOutputFound(_) => DiagnosticKind::NoStructuredOutputFound,
            };
            let message = e.to_string();
            let rejected = match e {
                ExtractionError::EmptyTestCaseSet { rejected } => rejected,
                _ => Vec::new(),
            };
            StageFailure {
                diagnostic: Diagnostic::new(kind, Stage::Generating, message),
                rejected,
            }
        })
    }

    async fn translate(&self, cases: &[TestCase], knowledge: &KnowledgeLog) -> Result<String, Diagnostic> {
        let prompt = build_code_prompt(
            cases,
            &self.config.target_base_url,
            self.config.framework,
            &self.feedback(knowledge),
        );

        let raw = self
            .generator
            .generate(&prompt, &self.config.model)
            .await
            .map_err(|e| {
                Diagnostic::new(DiagnosticKind::GenerationUnavailable, Stage::Translating, e.to_string())
            })?;

        let source = synthesize_source(&raw, self.config.framework).map_err(|e| {
            Diagnostic::new(
                DiagnosticKind::NoCodeFound,
                Stage::Translating,
                format!("{}: {}", e, truncate_chars(raw.trim(), RESPONSE_PREVIEW_CHARS)),
            )
        })?;

        if source.dropped_lines > 0 {
            debug!(dropped_lines = source.dropped_lines, "dropped prose around test source");
        }
        Ok(source.text)
    }

    /// Archive a failed attempt and move on to `Retrying`
    fn fail_attempt(
        &self,
        cycle_id: Uuid,
        draft: AttemptDraft,
        report: Option<ExecutionReport>,
        diagnostic: Diagnostic,
        history: &mut AttemptHistory,
        knowledge: &mut KnowledgeLog,
    ) -> Step {
        warn!(
            attempt = draft.number,
            kind = diagnostic.kind.as_str(),
            stage = ?diagnostic.stage,
            "attempt failed"
        );

        if !diagnostic.kind.is_fatal() {
            knowledge.append(KnowledgeEntry {
                recorded_at: Utc::now(),
                cycle_id,
                attempt_number: draft.number,
                kind: diagnostic.kind,
                lesson: diagnostic.message.clone(),
            });
        }

        match history.push(draft.finish(report, Some(diagnostic))) {
            Ok(()) => Step::Retrying,
            Err(e) => {
                warn!(error = %e, "could not archive attempt");
                Step::Finished(CycleState::Exhausted, StopReason::AttemptsExhausted)
            }
        }
    }
}

fn describe_failure(report: &ExecutionReport) -> String {
    let mut message = if report.timed_out {
        "test run timed out".to_string()
    } else {
        format!("tests failed with exit code {}", report.exit_code)
    };

    for (label, stream) in [("stdout", &report.stdout), ("stderr", &report.stderr)] {
        let stream = stream.trim();
        if !stream.is_empty() {
            message.push_str(&format!("\n--- {} ---\n{}", label, tail_chars(stream, OUTPUT_TAIL_CHARS)));
        }
    }

    message
}

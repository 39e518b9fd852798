// Repair cycle tests with scripted stand-ins for the generation service and the test runner.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Mutex};
    use swagger_test_agent::{
        agent::{suggest_fixes, DiagnosticKind, Stage},
        generator::{GenerationError, TextGenerator},
        parser::{parse_description_file, EndpointIssue},
        runner::{ExecutionReport, RunnerError, TestRunner},
        CancellationFlag, CycleState, KnowledgeLog, RepairCycle, StopReason,
    };
    use swagger_test_agent::config::RepairConfig;

    const CASES: &str = r#"[{"test_name": "test_list_users", "method": "GET", "path": "/users", "payload": null, "expected_status": 200}]"#;
    const CODE: &str = "import requests\n\ndef test_list_users():\n    assert requests.get(\"http://localhost:8000/users\").status_code == 200\n";

    type Reply = Result<String, GenerationError>;
    type Outcome = Result<ExecutionReport, RunnerError>;

    /// Answers prompts from a fixed script and remembers what it was asked
    struct ScriptedGenerator {
        replies: Mutex<VecDeque<Reply>>,
        prompts: Mutex<Vec<String>>,
    }

    impl ScriptedGenerator {
        fn new(replies: Vec<Reply>) -> Arc<Self> {
            Arc::new(ScriptedGenerator {
                replies: Mutex::new(replies.into()),
                prompts: Mutex::new(Vec::new()),
            })
        }

        fn prompts(&self) -> Vec<String> {
            self.prompts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TextGenerator for ScriptedGenerator {
        async fn generate(&self, prompt: &str, _model: &str) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(GenerationError::Unavailable("script exhausted".into())))
        }
    }

    /// Returns scripted run outcomes; can trip a cancellation flag while "running"
    struct ScriptedRunner {
        outcomes: Mutex<VecDeque<Outcome>>,
        sources: Mutex<Vec<String>>,
        cancel_on_run: Option<CancellationFlag>,
    }

    impl ScriptedRunner {
        fn new(outcomes: Vec<Outcome>) -> Arc<Self> {
            Arc::new(ScriptedRunner {
                outcomes: Mutex::new(outcomes.into()),
                sources: Mutex::new(Vec::new()),
                cancel_on_run: None,
            })
        }

        fn cancelling(outcomes: Vec<Outcome>, cancel: CancellationFlag) -> Arc<Self> {
            Arc::new(ScriptedRunner {
                outcomes: Mutex::new(outcomes.into()),
                sources: Mutex::new(Vec::new()),
                cancel_on_run: Some(cancel),
            })
        }

        fn runs(&self) -> usize {
            self.sources.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl TestRunner for ScriptedRunner {
        async fn execute(&self, source: &str, _target_file: &Path) -> Result<ExecutionReport, RunnerError> {
            self.sources.lock().unwrap().push(source.to_string());
            if let Some(cancel) = &self.cancel_on_run {
                cancel.cancel();
            }
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(RunnerError::Unavailable("script exhausted".into())))
        }
    }

    fn report(succeeded: bool, stderr: &str) -> Outcome {
        Ok(ExecutionReport {
            succeeded,
            stdout: String::new(),
            stderr: stderr.to_string(),
            exit_code: if succeeded { 0 } else { 1 },
            timed_out: false,
            duration_ms: 5,
        })
    }

    fn ok(text: &str) -> Reply {
        Ok(text.to_string())
    }

    fn description() -> Value {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("samples")
            .join("users_openapi.json");
        parse_description_file(path).unwrap()
    }

    fn config(max_attempts: u32, feedback: bool) -> RepairConfig {
        RepairConfig {
            max_attempts,
            feedback,
            target_file: PathBuf::from("unused_test_api.py"),
            ..RepairConfig::default()
        }
    }

    fn cycle(config: RepairConfig, generator: &Arc<ScriptedGenerator>, runner: &Arc<ScriptedRunner>) -> RepairCycle {
        RepairCycle::new(config, generator.clone(), runner.clone())
    }

    #[tokio::test]
    async fn test_stops_on_first_passing_run() {
        let generator = ScriptedGenerator::new(vec![ok(CASES), ok(CODE), ok(CASES), ok(CODE)]);
        let runner = ScriptedRunner::new(vec![report(true, ""), report(true, "")]);
        let mut knowledge = KnowledgeLog::default();

        let result = cycle(config(3, false), &generator, &runner)
            .run(&description(), &mut knowledge, &CancellationFlag::new())
            .await;

        assert_eq!(result.state, CycleState::Succeeded);
        assert_eq!(result.stop_reason, StopReason::Passed);
        assert_eq!(result.endpoints.len(), 4);
        assert_eq!(result.history.len(), 1);
        assert!(result.history.attempts()[0].succeeded());
        assert_eq!(result.history.attempts()[0].test_cases.len(), 1);
        assert_eq!(generator.prompts().len(), 2);
        assert_eq!(runner.runs(), 1);
        assert_eq!(runner.sources.lock().unwrap()[0], CODE);
        assert!(knowledge.is_empty());
    }

    #[tokio::test]
    async fn test_never_exceeds_attempt_budget() {
        let replies = (0..5).flat_map(|_| vec![ok(CASES), ok(CODE)]).collect();
        let generator = ScriptedGenerator::new(replies);
        let runner = ScriptedRunner::new((0..5).map(|_| report(false, "AssertionError")).collect());
        let mut knowledge = KnowledgeLog::default();

        let result = cycle(config(3, false), &generator, &runner)
            .run(&description(), &mut knowledge, &CancellationFlag::new())
            .await;

        assert_eq!(result.state, CycleState::Exhausted);
        assert_eq!(result.stop_reason, StopReason::AttemptsExhausted);
        assert_eq!(result.history.len(), 3);
        assert_eq!(result.history.executions(), 3);
        assert_eq!(runner.runs(), 3);
        assert_eq!(knowledge.len(), 3);

        let numbers: Vec<u32> = result.history.attempts().iter().map(|a| a.attempt_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(result
            .history
            .diagnostics()
            .all(|(_, d)| d.kind == DiagnosticKind::TestFailure && d.message.contains("AssertionError")));
    }

    #[tokio::test]
    async fn test_unreachable_service_consumes_one_attempt() {
        let generator = ScriptedGenerator::new(vec![
            Err(GenerationError::Unavailable("connection refused".into())),
            ok(CASES),
            ok(CODE),
        ]);
        let runner = ScriptedRunner::new(vec![report(true, "")]);
        let mut knowledge = KnowledgeLog::default();

        let result = cycle(config(3, false), &generator, &runner)
            .run(&description(), &mut knowledge, &CancellationFlag::new())
            .await;

        assert_eq!(result.state, CycleState::Succeeded);
        assert_eq!(result.history.len(), 2);

        let first = &result.history.attempts()[0];
        let diagnostic = first.diagnostic.as_ref().unwrap();
        assert_eq!(diagnostic.kind, DiagnosticKind::GenerationUnavailable);
        assert_eq!(diagnostic.stage, Stage::Generating);
        assert!(diagnostic.message.contains("connection refused"));
        assert!(first.report.is_none());
        assert!(result.history.attempts()[1].succeeded());
    }

    #[tokio::test]
    async fn test_unparseable_description_uses_no_attempts() {
        let generator = ScriptedGenerator::new(vec![ok(CASES), ok(CODE)]);
        let runner = ScriptedRunner::new(vec![report(true, "")]);
        let mut knowledge = KnowledgeLog::default();

        let result = cycle(config(3, false), &generator, &runner)
            .run(&json!({"openapi": "3.0.0"}), &mut knowledge, &CancellationFlag::new())
            .await;

        assert_eq!(result.state, CycleState::Exhausted);
        assert!(matches!(result.stop_reason, StopReason::SchemaParse(ref m) if m.contains("paths")));
        assert!(result.history.is_empty());
        assert!(generator.prompts().is_empty());
        assert_eq!(runner.runs(), 0);
    }

    #[tokio::test]
    async fn test_missing_runner_stops_the_cycle() {
        let replies = (0..3).flat_map(|_| vec![ok(CASES), ok(CODE)]).collect();
        let generator = ScriptedGenerator::new(replies);
        let runner = ScriptedRunner::new(vec![Err(RunnerError::Unavailable("cannot start `python`".into()))]);
        let mut knowledge = KnowledgeLog::default();

        let result = cycle(config(3, false), &generator, &runner)
            .run(&description(), &mut knowledge, &CancellationFlag::new())
            .await;

        assert_eq!(result.state, CycleState::Exhausted);
        assert!(matches!(result.stop_reason, StopReason::RunnerUnavailable(ref m) if m.contains("python")));
        assert_eq!(result.history.len(), 1);
        assert_eq!(
            result.history.last().unwrap().diagnostic.as_ref().unwrap().kind,
            DiagnosticKind::RunnerUnavailable
        );
        assert_eq!(generator.prompts().len(), 2);
        assert!(knowledge.is_empty());
    }

    #[tokio::test]
    async fn test_missing_runner_is_not_a_lesson() {
        let replies = (0..3).flat_map(|_| vec![ok(CASES), ok(CODE)]).collect();
        let generator = ScriptedGenerator::new(replies);
        let runner = ScriptedRunner::new(vec![
            report(false, "E   assert 404 == 200"),
            Err(RunnerError::Unavailable("cannot start `python`".into())),
        ]);
        let mut knowledge = KnowledgeLog::default();

        let result = cycle(config(3, true), &generator, &runner)
            .run(&description(), &mut knowledge, &CancellationFlag::new())
            .await;

        assert!(matches!(result.stop_reason, StopReason::RunnerUnavailable(_)));
        assert_eq!(result.history.len(), 2);
        assert_eq!(knowledge.len(), 1);
        assert_eq!(knowledge.entries().next().unwrap().kind, DiagnosticKind::TestFailure);
    }

    #[tokio::test]
    async fn test_unusable_model_output_is_retried() {
        let generator = ScriptedGenerator::new(vec![
            ok("I'm sorry, I can't help with that."),
            ok(r#"[{"test_name": "test_bad", "method": "GET", "path": "/users", "expected_status": 42}]"#),
            ok(CASES),
            ok("Here is some prose and nothing else."),
            ok(CASES),
            ok(CODE),
        ]);
        let runner = ScriptedRunner::new(vec![report(true, "")]);
        let mut knowledge = KnowledgeLog::default();

        let result = cycle(config(4, false), &generator, &runner)
            .run(&description(), &mut knowledge, &CancellationFlag::new())
            .await;

        assert_eq!(result.state, CycleState::Succeeded);
        let kinds: Vec<DiagnosticKind> = result.history.diagnostics().map(|(_, d)| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DiagnosticKind::NoStructuredOutputFound,
                DiagnosticKind::EmptyTestCaseSet,
                DiagnosticKind::NoCodeFound,
            ]
        );

        let attempts = result.history.attempts();
        assert_eq!(attempts[1].rejected.len(), 1);
        assert_eq!(attempts[2].diagnostic.as_ref().unwrap().stage, Stage::Translating);
        assert_eq!(attempts[2].test_cases.len(), 1);
        assert_eq!(runner.runs(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let generator = ScriptedGenerator::new(vec![ok(CASES), ok(CODE)]);
        let runner = ScriptedRunner::new(vec![report(true, "")]);
        let cancel = CancellationFlag::new();
        cancel.cancel();

        let result = cycle(config(3, false), &generator, &runner)
            .run(&description(), &mut KnowledgeLog::default(), &cancel)
            .await;

        assert_eq!(result.state, CycleState::Exhausted);
        assert_eq!(result.stop_reason, StopReason::Cancelled);
        assert!(result.history.is_empty());
        assert!(generator.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_between_attempts() {
        let replies = (0..3).flat_map(|_| vec![ok(CASES), ok(CODE)]).collect();
        let generator = ScriptedGenerator::new(replies);
        let cancel = CancellationFlag::new();
        let runner = ScriptedRunner::cancelling(vec![report(false, "boom"), report(true, "")], cancel.clone());

        let result = cycle(config(3, false), &generator, &runner)
            .run(&description(), &mut KnowledgeLog::default(), &cancel)
            .await;

        assert_eq!(result.stop_reason, StopReason::Cancelled);
        assert_eq!(result.history.len(), 1);
        assert_eq!(runner.runs(), 1);
    }

    #[tokio::test]
    async fn test_feedback_reaches_next_prompts() {
        let replies = (0..2).flat_map(|_| vec![ok(CASES), ok(CODE)]).collect();
        let generator = ScriptedGenerator::new(replies);
        let runner = ScriptedRunner::new(vec![
            report(false, "AssertionError: expected 200 got 422"),
            report(true, ""),
        ]);
        let mut knowledge = KnowledgeLog::default();

        let result = cycle(config(3, true), &generator, &runner)
            .run(&description(), &mut knowledge, &CancellationFlag::new())
            .await;

        assert!(result.succeeded());
        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 4);
        assert!(!prompts[0].contains("Previous attempts failed"));
        assert!(prompts[2].contains("Previous attempts failed"));
        assert!(prompts[2].contains("expected 200 got 422"));
        assert!(prompts[3].contains("[test_failure]"));
        assert_eq!(knowledge.len(), 1);
    }

    #[tokio::test]
    async fn test_feedback_off_keeps_prompts_stable() {
        let replies = (0..2).flat_map(|_| vec![ok(CASES), ok(CODE)]).collect();
        let generator = ScriptedGenerator::new(replies);
        let runner = ScriptedRunner::new(vec![report(false, "AssertionError"), report(true, "")]);
        let mut knowledge = KnowledgeLog::default();

        cycle(config(3, false), &generator, &runner)
            .run(&description(), &mut knowledge, &CancellationFlag::new())
            .await;

        let prompts = generator.prompts();
        assert_eq!(prompts[0], prompts[2]);
        assert_eq!(prompts[1], prompts[3]);
        // Diagnostics are still recorded
        assert_eq!(knowledge.len(), 1);
    }

    #[tokio::test]
    async fn test_knowledge_log_spans_cycles() {
        let mut knowledge = KnowledgeLog::new(2);

        for _ in 0..2 {
            let replies = (0..2).flat_map(|_| vec![ok(CASES), ok(CODE)]).collect();
            let generator = ScriptedGenerator::new(replies);
            let runner = ScriptedRunner::new(vec![report(false, "first"), report(false, "second")]);

            let result = cycle(config(2, false), &generator, &runner)
                .run(&description(), &mut knowledge, &CancellationFlag::new())
                .await;
            assert_eq!(result.state, CycleState::Exhausted);
        }

        // Four failures went in, the two newest remain
        assert_eq!(knowledge.len(), 2);
        let attempts: Vec<u32> = knowledge.entries().map(|e| e.attempt_number).collect();
        assert_eq!(attempts, vec![1, 2]);
        let lessons = knowledge.recent_lessons(5);
        assert_eq!(lessons.len(), 2);
        assert!(lessons[0].contains("second"));
    }

    #[tokio::test]
    async fn test_report_summary_and_serialization() {
        let generator = ScriptedGenerator::new(vec![
            Err(GenerationError::Unavailable("connection refused".into())),
            ok(CASES),
            ok(CODE),
        ]);
        let runner = ScriptedRunner::new(vec![report(true, "")]);

        let result = cycle(config(3, false), &generator, &runner)
            .run(&description(), &mut KnowledgeLog::default(), &CancellationFlag::new())
            .await;

        let summary = result.summary();
        assert!(summary.contains("Succeeded"));
        assert!(summary.contains("after 2 of 3 attempt(s)"));
        assert!(summary.contains("generation_unavailable"));
        assert!(summary.contains("run passed with exit code 0"));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["state"], "succeeded");
        assert_eq!(json["stop_reason"]["reason"], "passed");
        assert_eq!(json["history"]["attempts"].as_array().unwrap().len(), 2);
        assert_eq!(json["history"]["attempts"][1]["test_cases"][0]["method"], "GET");
    }

    #[tokio::test]
    async fn test_suggest_fixes_asks_once_per_issue() {
        let issues = vec![
            EndpointIssue {
                endpoint: "POST /users".into(),
                status: Some(500),
                detail: "rejected an empty request: Internal Server Error".into(),
            },
            EndpointIssue {
                endpoint: "GET /health".into(),
                status: None,
                detail: "connection refused".into(),
            },
        ];
        let long_fix = format!("Validate the body before saving it. {}", "x".repeat(300));
        let generator = ScriptedGenerator::new(vec![ok(&long_fix)]);

        let fixes = suggest_fixes(generator.as_ref(), "llama3", &issues).await;

        let prompts = generator.prompts();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].starts_with("Fix this API issue: {"));
        assert!(prompts[0].contains("\"endpoint\":\"POST /users\""));
        assert!(prompts[1].contains("connection refused"));

        assert_eq!(fixes.len(), 2);
        assert_eq!(fixes[0].issue, issues[0]);
        assert_eq!(fixes[0].suggestion.as_deref(), Some(long_fix.as_str()));
        let summary = fixes[0].summary();
        assert!(summary.starts_with("Issue: POST /users - rejected an empty request"));
        assert!(summary.contains("\nSuggested fix: Validate the body"));
        assert!(summary.ends_with("..."));

        // The script has run dry: the second call fails without stopping the batch
        assert!(fixes[1].suggestion.is_none());
        assert!(fixes[1].error.as_deref().unwrap().contains("script exhausted"));
        assert!(fixes[1].summary().contains("Suggested fix: unavailable"));
    }
}

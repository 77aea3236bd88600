mod common;

use chrono::Utc;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use common::{ScriptedGenerator, Step, server_with, wait_terminal};
use vortex_observer::clients::GenerationError;
use vortex_observer::context::{AnalysisContext, AnalysisMode};
use vortex_observer::result::{LlmStatus, Severity};
use vortex_observer::tasks::{PollOutcome, TASK_ABORTED};

const LIMIT: Duration = Duration::from_secs(2);

fn clinical(text: &str) -> AnalysisContext {
    AnalysisContext::new(
        AnalysisMode::Clinical,
        [
            ("clinical_text", json!(text)),
            ("age", json!(71)),
            ("sex", json!("M")),
        ],
    )
}

#[tokio::test]
async fn test_missing_narrative_completes_waiting() {
    let generator = Arc::new(ScriptedGenerator::replying("{}"));
    let server = server_with(generator.clone());

    let receipt = server
        .orchestrator
        .submit(clinical(""), false)
        .await
        .unwrap();
    let PollOutcome::Done(analysis) = wait_terminal(&server, &receipt.task_id, LIMIT).await else {
        panic!("expected done");
    };
    assert_eq!(analysis.llm_status, LlmStatus::Waiting);
    assert_eq!(analysis.severity, Severity::Gray);
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_timeout_surfaces_as_error_task() {
    let generator = Arc::new(ScriptedGenerator::new([Step::Fail(
        GenerationError::TimedOut { timeout_ms: 45_000 },
    )]));
    let server = server_with(generator);

    let receipt = server
        .orchestrator
        .submit(clinical("dolor abdominal difuso"), false)
        .await
        .unwrap();
    match wait_terminal(&server, &receipt.task_id, LIMIT).await {
        PollOutcome::Failed { error, analysis } => {
            assert!(error.contains("timed out"));
            assert_eq!(analysis.llm_status, LlmStatus::Error);
            assert_eq!(analysis.severity, Severity::Gray);
            assert_eq!(analysis.total_items(), 0);
        }
        other => panic!("expected failed, got {:?}", other),
    }
    let stats = server.orchestrator.stats().await.unwrap();
    assert_eq!(stats.completed_failed, 1);
}

#[tokio::test]
async fn test_pivot_high_impact_is_red() {
    let generator = Arc::new(ScriptedGenerator::replying(
        r#"{"high_impact": [{"scenario":"X","rationale":"Y"}], "pivot_triggers": []}"#,
    ));
    let server = server_with(generator);
    let context = AnalysisContext::new(
        AnalysisMode::Pivot,
        [
            ("clinical_text", json!("cefalea intensa de inicio súbito")),
            ("working_diagnosis", json!("migraña")),
        ],
    );

    let receipt = server.orchestrator.submit(context, false).await.unwrap();
    let PollOutcome::Done(analysis) = wait_terminal(&server, &receipt.task_id, LIMIT).await else {
        panic!("expected done");
    };
    let high_impact = analysis.list("high_impact");
    assert_eq!(high_impact.len(), 1);
    assert_eq!(high_impact[0].label, "X");
    assert_eq!(high_impact[0].rationale.as_deref(), Some("Y"));
    assert!(analysis.list("pivot_triggers").is_empty());
    assert!(analysis.list("blind_spots").is_empty());
    assert_eq!(analysis.severity, Severity::Red);
    assert!(analysis.cognitive_signals.is_some());
    assert_eq!(analysis.metrics.as_ref().unwrap().token_count, Some(64));
}

#[tokio::test]
async fn test_restated_case_discarded_despite_valid_json() {
    let generator = Arc::new(ScriptedGenerator::replying(
        "El paciente presenta fiebre y tos.\n{\"scenarios\": {\"critical\": [{\"condition\": \"sepsis\"}]}}",
    ));
    let server = server_with(generator);

    let receipt = server
        .orchestrator
        .submit(clinical("fiebre y tos"), false)
        .await
        .unwrap();
    let PollOutcome::Done(analysis) = wait_terminal(&server, &receipt.task_id, LIMIT).await else {
        panic!("expected done");
    };
    assert_eq!(analysis.severity, Severity::Yellow);
    assert_eq!(analysis.total_items(), 0);
    assert!(analysis.validation_error.is_some());
}

#[tokio::test]
async fn test_poll_right_after_submit_finds_task() {
    let generator = Arc::new(ScriptedGenerator::new([Step::Hang]));
    let server = server_with(generator);

    let receipt = server
        .orchestrator
        .submit(clinical("síncope al esfuerzo"), false)
        .await
        .unwrap();
    let outcome = server.orchestrator.poll(&receipt.task_id).await.unwrap();
    assert_eq!(outcome, PollOutcome::Processing);
    assert_eq!(
        server.orchestrator.poll("no-such-task").await.unwrap(),
        PollOutcome::NotFound
    );
}

#[tokio::test]
async fn test_identical_inflight_submit_is_coalesced() {
    let generator = Arc::new(ScriptedGenerator::new([Step::Hang]));
    let server = server_with(generator.clone());

    let first = server
        .orchestrator
        .submit(clinical("hemoptisis"), false)
        .await
        .unwrap();
    let second = server
        .orchestrator
        .submit(clinical("hemoptisis"), false)
        .await
        .unwrap();
    assert!(!first.coalesced);
    assert!(second.coalesced);
    assert_eq!(first.task_id, second.task_id);

    let forced = server
        .orchestrator
        .submit(clinical("hemoptisis"), true)
        .await
        .unwrap();
    assert!(!forced.coalesced);
    assert_ne!(forced.task_id, first.task_id);

    let stats = server.orchestrator.stats().await.unwrap();
    assert_eq!(stats.submitted, 3);
    assert_eq!(stats.coalesced, 1);
    assert_eq!(stats.processing, 2);
}

#[tokio::test]
async fn test_resubmit_unchanged_context_serves_cached_result() {
    let generator = Arc::new(ScriptedGenerator::replying(
        r#"{"scenarios": {"manageable": [{"condition": "gastroenteritis viral"}]}}"#,
    ));
    let server = server_with(generator.clone());

    let first = server
        .orchestrator
        .submit(clinical("diarrea acuosa"), false)
        .await
        .unwrap();
    let PollOutcome::Done(a) = wait_terminal(&server, &first.task_id, LIMIT).await else {
        panic!("expected done");
    };
    let second = server
        .orchestrator
        .submit(clinical("diarrea acuosa"), false)
        .await
        .unwrap();
    let PollOutcome::Done(b) = wait_terminal(&server, &second.task_id, LIMIT).await else {
        panic!("expected done");
    };

    assert_ne!(first.task_id, second.task_id);
    assert_eq!(a, b);
    assert_eq!(a.severity, Severity::Green);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn test_supervisor_timeout_wins_over_late_result() {
    let generator = Arc::new(ScriptedGenerator::new([Step::Delay(
        Duration::from_millis(150),
        r#"{"scenarios": {"critical": [{"condition": "disección aórtica"}]}}"#.to_string(),
    )]));
    let server = server_with(generator.clone());

    let receipt = server
        .orchestrator
        .submit(clinical("dolor torácico transfixiante"), false)
        .await
        .unwrap();

    let report = server
        .supervisor
        .sweep(Utc::now() + chrono::Duration::seconds(61))
        .await
        .unwrap();
    assert_eq!(report.failed, 1);

    // Let the slow generation finish and attempt its own write
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(generator.calls(), 1);

    match server.orchestrator.poll(&receipt.task_id).await.unwrap() {
        PollOutcome::Failed { error, analysis } => {
            assert_eq!(error, "supervisor timeout: task exceeded 60000ms");
            assert_eq!(analysis.llm_status, LlmStatus::Error);
            assert_eq!(analysis.severity, Severity::Gray);
            assert_eq!(analysis.total_items(), 0);
        }
        other => panic!("expected failed, got {:?}", other),
    }

    let stats = server.orchestrator.stats().await.unwrap();
    assert_eq!(stats.supervisor_failed, 1);
    assert_eq!(stats.completed_done, 0);

    let again = server
        .supervisor
        .sweep(Utc::now() + chrono::Duration::seconds(62))
        .await
        .unwrap();
    assert_eq!(again.failed, 0);
}

#[tokio::test]
async fn test_panicking_analysis_fails_task() {
    let generator = Arc::new(ScriptedGenerator::new([Step::Panic]));
    let server = server_with(generator);

    let receipt = server
        .orchestrator
        .submit(clinical("convulsión"), false)
        .await
        .unwrap();
    match wait_terminal(&server, &receipt.task_id, LIMIT).await {
        PollOutcome::Failed { error, analysis } => {
            assert_eq!(error, TASK_ABORTED);
            assert_eq!(analysis.llm_status, LlmStatus::Error);
        }
        other => panic!("expected failed, got {:?}", other),
    }
}

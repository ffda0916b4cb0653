use std::sync::Arc;
use std::time::Duration;

use assessment_orchestrator::clients::GenerationError;
use assessment_orchestrator::config::Config;
use assessment_orchestrator::error::AppError;
use assessment_orchestrator::models::{
    AssessmentPrefs, DerivedFormat, DerivedPrefs, GenerationContext, GenerationRequest,
    Preferences, SamplePrefs, StageKind, Unit,
};
use assessment_orchestrator::orchestrator::{
    GenerationService, ProgressStream, RunKey, RunRegistry, StageOrchestrator,
};
use assessment_orchestrator::progress::{pump_frames, ProgressEvent};
use assessment_orchestrator::services::{FileResultStore, MemoryResultStore, ResultStore};
use assessment_orchestrator::testing::{generic_items_json, Reply, ScriptedClient};

fn config() -> Config {
    Config {
        inter_call_delay_ms: 1_000,
        max_attempts: 3,
        backoff_base_ms: 1_000,
        backoff_max_ms: 8_000,
        ..Config::default()
    }
}

fn request(units: usize, per_unit: u8) -> GenerationRequest {
    GenerationRequest {
        subject_id: "CS101".to_string(),
        stage_id: 3,
        context: GenerationContext {
            subject_description: Some("计算机科学导论，面向一年级本科生".to_string()),
            ..Default::default()
        },
        units: (1..=units)
            .map(|i| Unit::new(format!("unit-{}", i), format!("第{}单元", i)))
            .collect(),
        preferences: Preferences {
            formative: Some(AssessmentPrefs {
                per_unit,
                formats: vec!["quiz".to_string()],
                weight: Some(40.0),
            }),
            ..Default::default()
        },
    }
}

fn full_request() -> GenerationRequest {
    let mut req = request(2, 1);
    req.preferences.summative = Some(AssessmentPrefs {
        per_unit: 1,
        formats: vec!["exam".to_string()],
        weight: Some(60.0),
    });
    req.preferences.samples = Some(SamplePrefs { per_category: 2 });
    req.preferences.derived = Some(DerivedPrefs {
        formats: vec![DerivedFormat::AssessmentBlueprint, DerivedFormat::LmsPackage],
    });
    req
}

fn service_with(
    client: Arc<ScriptedClient>,
    store: Arc<dyn ResultStore>,
    config: Config,
) -> GenerationService {
    let registry = RunRegistry::from_config(&config);
    let orchestrator = StageOrchestrator::from_config(client, store, config);
    GenerationService::new(orchestrator, registry)
}

async fn drain(mut stream: ProgressStream) -> Vec<ProgressEvent> {
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}

fn terminal_count(events: &[ProgressEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

#[tokio::test(start_paused = true)]
async fn test_all_units_produce_k_artifacts_in_order() {
    let client = Arc::new(ScriptedClient::generous());
    let store = Arc::new(MemoryResultStore::new());
    let service = service_with(client.clone(), store.clone(), config());

    let response = tokio_test::assert_ok!(service.generate(request(3, 2)).await);

    let sources: Vec<&str> = response.artifacts().map(|a| a.source_id()).collect();
    assert_eq!(
        sources,
        vec!["unit-1", "unit-1", "unit-2", "unit-2", "unit-3", "unit-3"]
    );
    assert_eq!(client.calls(), 3);
    assert_eq!(store.save_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_single_failing_unit_still_completes_with_manifest() {
    let client = Arc::new(ScriptedClient::with_responder(|prompt| {
        if prompt.user.contains("unit-2") {
            Reply::Fail(GenerationError::service("上游 500"))
        } else {
            Reply::Text(generic_items_json(2))
        }
    }));
    let service = service_with(client.clone(), Arc::new(MemoryResultStore::new()), config());

    let events = drain(service.start_streaming(request(3, 2)).unwrap()).await;

    assert_eq!(terminal_count(&events), 1);
    match events.last() {
        Some(ProgressEvent::Complete { response, summary }) => {
            assert_eq!(response.artifacts().count(), 4);
            assert_eq!(summary.formative, 4);
            assert_eq!(summary.failed_items.len(), 1);
            assert_eq!(summary.failed_items[0].item_id, "unit-2");
            assert_eq!(summary.failed_items[0].stage, StageKind::Formative);
        }
        other => panic!("意外的终止事件: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_stream_shape_for_full_run() {
    let client = Arc::new(ScriptedClient::generous());
    let service = service_with(client.clone(), Arc::new(MemoryResultStore::new()), config());

    let events = drain(service.start_streaming(full_request()).unwrap()).await;

    assert_eq!(events.first(), Some(&ProgressEvent::Connected));
    assert_eq!(events.last().map(|e| e.type_name()), Some("complete"));
    assert_eq!(terminal_count(&events), 1);

    let data_stages: Vec<StageKind> = events
        .iter()
        .filter_map(|e| match e {
            ProgressEvent::Data { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect();
    assert_eq!(data_stages, StageKind::ORDER.to_vec());

    // 2 + 2 + 5 + 2 次调用
    assert_eq!(client.calls(), 11);
}

#[tokio::test(start_paused = true)]
async fn test_data_events_carry_only_their_stage() {
    let service = service_with(
        Arc::new(ScriptedClient::generous()),
        Arc::new(MemoryResultStore::new()),
        config(),
    );

    let events = drain(service.start_streaming(full_request()).unwrap()).await;
    for event in &events {
        if let ProgressEvent::Data {
            stage,
            partial_artifacts,
        } = event
        {
            assert!(!partial_artifacts.is_empty());
            assert!(partial_artifacts.iter().all(|a| a.stage() == *stage));
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_mismatched_weights_rejected_without_calls() {
    let client = Arc::new(ScriptedClient::generous());
    let store = Arc::new(MemoryResultStore::new());
    let service = service_with(client.clone(), store.clone(), config());

    let mut req = full_request();
    if let Some(summative) = req.preferences.summative.as_mut() {
        summative.weight = Some(50.0);
    }

    let err = tokio_test::assert_err!(service.generate(req.clone()).await);
    assert!(matches!(err, AppError::Validation(_)));

    let events = drain(service.start_streaming(req).unwrap()).await;
    let types: Vec<&str> = events.iter().map(|e| e.type_name()).collect();
    assert_eq!(types, vec!["connected", "error"]);

    assert_eq!(client.calls(), 0);
    assert_eq!(store.save_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_second_request_attaches_instead_of_restarting() {
    let client = Arc::new(ScriptedClient::generous());
    let store = Arc::new(MemoryResultStore::new());
    let service = service_with(client.clone(), store.clone(), config());

    let first = service.start_streaming(request(4, 1)).unwrap();
    let second = service.start_streaming(request(4, 1)).unwrap();

    let (first_events, second_events) = tokio::join!(drain(first), drain(second));

    assert_eq!(client.calls(), 4);
    assert_eq!(store.save_count(), 1);
    assert_eq!(first_events.last().map(|e| e.type_name()), Some("complete"));
    assert_eq!(second_events.first(), Some(&ProgressEvent::Connected));
    assert_eq!(second_events.last().map(|e| e.type_name()), Some("complete"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_ceiling_is_exact() {
    let client = Arc::new(ScriptedClient::always(Err(GenerationError::timeout("超时"))));
    let config = Config {
        max_attempts: 4,
        ..config()
    };
    let service = service_with(client.clone(), Arc::new(MemoryResultStore::new()), config);

    let err = service.generate(request(2, 1)).await.unwrap_err();

    assert_eq!(client.calls(), 2 * 4);
    assert!(matches!(
        err,
        AppError::Generation(GenerationError::Timeout { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_disconnect_does_not_cancel_run() {
    let client = Arc::new(ScriptedClient::generous());
    let store = Arc::new(MemoryResultStore::new());
    let service = service_with(client.clone(), store.clone(), config());
    let key = RunKey::new("CS101", 3);

    let mut stream = service.start_streaming(request(3, 1)).unwrap();
    assert_eq!(stream.next().await, Some(ProgressEvent::Connected));
    drop(stream);

    while service.registry().is_running(&key) {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    assert_eq!(client.calls(), 3);
    assert_eq!(store.save_count(), 1);
    assert!(store.get("CS101", 3).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_stale_run_is_swept_and_observers_notified() {
    let client = Arc::new(ScriptedClient::hanging());
    let config = Config {
        formative_timeout_secs: 600,
        stale_run_timeout_secs: 30,
        ..config()
    };
    let service = service_with(client, Arc::new(MemoryResultStore::new()), config);
    let sweeper = service.registry().spawn_sweeper(Duration::from_secs(5));

    let events = drain(service.start_streaming(request(1, 1)).unwrap()).await;

    let types: Vec<&str> = events.iter().map(|e| e.type_name()).collect();
    assert_eq!(types, vec!["connected", "error"]);
    assert!(service.registry().active_runs().is_empty());
    sweeper.abort();
}

#[tokio::test(start_paused = true)]
async fn test_sse_frames_for_a_run() {
    let service = service_with(
        Arc::new(ScriptedClient::generous()),
        Arc::new(MemoryResultStore::new()),
        config(),
    );

    let stream = service.start_streaming(request(2, 1)).unwrap();
    let mut out = Vec::new();
    let report = pump_frames(stream.into_stream(), &mut out).await.unwrap();

    assert!(report.completed);
    let text = String::from_utf8(out).unwrap();
    let frames: Vec<&str> = text.split("\n\n").filter(|f| !f.is_empty()).collect();
    assert_eq!(frames.len(), report.frames);
    assert_eq!(frames[0], "data: {\"type\":\"connected\"}");
    assert!(frames.last().is_some_and(|f| f.contains("\"type\":\"complete\"")));
}

#[tokio::test]
async fn test_file_store_receives_final_response() {
    let dir = std::env::temp_dir().join(format!("assessment_it_{}", std::process::id()));
    let store = Arc::new(FileResultStore::new(&dir));
    let config = Config {
        inter_call_delay_ms: 0,
        ..config()
    };
    let service = service_with(Arc::new(ScriptedClient::generous()), store.clone(), config);

    service.generate(request(1, 1)).await.unwrap();

    let text = tokio::fs::read_to_string(store.path_for("CS101", 3))
        .await
        .unwrap();
    let saved: serde_json::Value = serde_json::from_str(&text).unwrap();
    assert_eq!(saved["subject_id"], "CS101");
    assert_eq!(saved["stages"][0]["stage"], "formative");

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

fn failing_on_last_unit(registry: RunRegistry) -> ScriptedClient {
    ScriptedClient::with_responder(move |prompt| {
        if prompt.user.contains("unit-2") {
            let _ = registry.fail(&RunKey::new("CS101", 3), "管理员终止");
        }
        Reply::Text(generic_items_json(1))
    })
}

#[tokio::test(start_paused = true)]
async fn test_run_failed_during_last_item_is_not_persisted() {
    let config = config();
    let registry = RunRegistry::from_config(&config);
    let client = Arc::new(failing_on_last_unit(registry.clone()));
    let store = Arc::new(MemoryResultStore::new());
    let orchestrator = StageOrchestrator::from_config(client.clone(), store.clone(), config);
    let service = GenerationService::new(orchestrator, registry);

    let events = drain(service.start_streaming(request(2, 1)).unwrap()).await;
    let types: Vec<&str> = events.iter().map(|e| e.type_name()).collect();
    assert_eq!(types, vec!["connected", "progress", "error"]);

    // 等后台运行收尾
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(client.calls(), 2);
    assert_eq!(store.save_count(), 0);

    let err = service.generate(request(2, 1)).await.unwrap_err();
    assert!(matches!(err, AppError::Cancelled { .. }));
    assert_eq!(store.save_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_late_observer_receives_every_event() {
    let client = Arc::new(ScriptedClient::generous());
    let service = service_with(client, Arc::new(MemoryResultStore::new()), config());
    let key = RunKey::new("CS101", 3);

    let stream = service.start_streaming(request(4, 1)).unwrap();
    // 运行全部结束后才开始读
    while service.registry().is_running(&key) {
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    let events = drain(stream).await;
    let types: Vec<&str> = events.iter().map(|e| e.type_name()).collect();
    assert_eq!(
        types,
        vec!["connected", "progress", "progress", "progress", "progress", "data", "complete"]
    );
}

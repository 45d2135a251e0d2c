use std::{sync::Arc, time::Duration};

use axum::{extract::Multipart, extract::State, routing::post, Json, Router};
use serde_json::{json, Value};
use shared::domain::Emotion;
use tokio::sync::Mutex;

use super::*;
use crate::{
    error::TransportError,
    test_support::{photo, spawn_backend, CountingTransport, ScriptedTransport},
    transport::{HttpTransport, Method, RequestBody},
};

#[derive(Clone, Default)]
struct UploadServerState {
    received: Arc<Mutex<Vec<(String, String, String)>>>,
    emotions: Arc<Mutex<Vec<&'static str>>>,
}

async fn analyze_upload(
    State(state): State<UploadServerState>,
    mut multipart: Multipart,
) -> Json<Value> {
    let emotions = state.emotions.lock().await.clone();
    let mut results = Vec::new();
    while let Some(field) = multipart.next_field().await.expect("field") {
        let name = field.name().unwrap_or_default().to_string();
        let filename = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().unwrap_or_default().to_string();
        let _ = field.bytes().await.expect("bytes");
        let emotion = emotions[results.len() % emotions.len()];
        results.push(json!({
            "filename": filename,
            "emotion": emotion,
            "confidence": 0.9,
            "intensity": 0.4,
            "all_scores": { "happy": 0.9 }
        }));
        state
            .received
            .lock()
            .await
            .push((name, filename, content_type));
    }
    Json(json!({ "message": format!("uploaded {}", results.len()), "results": results }))
}

async fn spawn_upload_backend(emotions: Vec<&'static str>) -> (String, UploadServerState) {
    let state = UploadServerState::default();
    *state.emotions.lock().await = emotions;
    let app = Router::new()
        .route("/api/images/upload", post(analyze_upload))
        .with_state(state.clone());
    (spawn_backend(app).await, state)
}

fn analysis(filename: &str, emotion: &str) -> Value {
    json!({ "filename": filename, "emotion": emotion, "confidence": 0.5, "intensity": 0.5 })
}

#[tokio::test]
async fn batch_results_match_files_one_to_one_in_order() {
    let (base_url, server) = spawn_upload_backend(vec!["happy", "sad", "neutral"]).await;
    let transport =
        CountingTransport::new(HttpTransport::new(base_url, Duration::from_secs(5)).expect("transport"));
    let coordinator = UploadCoordinator::new(transport.clone());

    let batch = UploadBatch::new(vec![photo("a.jpg"), photo("b.png"), photo("c.webp")]);
    let results = coordinator.submit_batch(batch).await.expect("upload");

    assert_eq!(transport.calls(), 1);
    let names: Vec<_> = results.iter().map(|r| r.filename.as_str()).collect();
    assert_eq!(names, vec!["a.jpg", "b.png", "c.webp"]);
    let emotions: Vec<_> = results.iter().map(|r| r.emotion).collect();
    assert_eq!(emotions, vec![Emotion::Happy, Emotion::Sad, Emotion::Neutral]);
    assert_eq!(results[0].scores.get("happy"), Some(&0.9));

    let received = server.received.lock().await.clone();
    assert_eq!(
        received,
        vec![
            ("files".to_string(), "a.jpg".to_string(), "image/jpeg".to_string()),
            ("files".to_string(), "b.png".to_string(), "image/png".to_string()),
            ("files".to_string(), "c.webp".to_string(), "image/webp".to_string()),
        ]
    );
}

#[tokio::test]
async fn empty_batch_and_empty_file_fail_before_any_request() {
    let transport = ScriptedTransport::new();
    let coordinator = UploadCoordinator::new(transport.clone());

    let err = coordinator
        .submit_batch(UploadBatch::default())
        .await
        .expect_err("empty batch");
    assert_eq!(err, JobError::Validation(ValidationError::EmptyBatch));

    let batch = UploadBatch::new(vec![photo("ok.jpg"), UploadFile::new("blank.jpg", Vec::new())]);
    let err = coordinator.submit_batch(batch).await.expect_err("empty file");
    assert_eq!(
        err,
        JobError::Validation(ValidationError::EmptyFile {
            filename: "blank.jpg".into()
        })
    );

    assert_eq!(transport.call_count().await, 0);
}

#[tokio::test]
async fn restores_submission_order_when_backend_reorders() {
    let transport = ScriptedTransport::new();
    transport
        .script(
            Method::Post,
            "/images/upload",
            Ok(json!({ "results": [analysis("b.jpg", "sad"), analysis("a.jpg", "happy")] })),
        )
        .await;
    let coordinator = UploadCoordinator::new(transport.clone());

    let results = coordinator
        .submit_batch(UploadBatch::new(vec![photo("a.jpg"), photo("b.jpg")]))
        .await
        .expect("upload");
    assert_eq!(results[0].filename, "a.jpg");
    assert_eq!(results[0].emotion, Emotion::Happy);
    assert_eq!(results[1].filename, "b.jpg");
}

#[tokio::test]
async fn missing_or_extra_results_are_reported_not_dropped() {
    let transport = ScriptedTransport::new();
    transport
        .script(
            Method::Post,
            "/images/upload",
            Ok(json!({ "results": [analysis("a.jpg", "happy")] })),
        )
        .await;
    transport
        .script(
            Method::Post,
            "/images/upload",
            Ok(json!({ "results": [analysis("a.jpg", "happy"), analysis("zzz.jpg", "sad")] })),
        )
        .await;
    let coordinator = UploadCoordinator::new(transport.clone());

    let short = coordinator
        .submit_batch(UploadBatch::new(vec![photo("a.jpg"), photo("b.jpg")]))
        .await
        .expect_err("short");
    assert!(matches!(short, JobError::ResponseMismatch(_)), "unexpected: {short:?}");

    let renamed = coordinator
        .submit_batch(UploadBatch::new(vec![photo("a.jpg"), photo("b.jpg")]))
        .await
        .expect_err("renamed");
    match renamed {
        JobError::ResponseMismatch(detail) => assert!(detail.contains("b.jpg"), "{detail}"),
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn duplicate_filenames_pair_by_position() {
    let transport = ScriptedTransport::new();
    transport
        .script(
            Method::Post,
            "/images/upload",
            Ok(json!({ "results": [
                analysis("IMG.jpg", "happy"),
                analysis("other.jpg", "angry"),
                analysis("IMG.jpg", "sad"),
            ] })),
        )
        .await;
    let coordinator = UploadCoordinator::new(transport);
    let results = coordinator
        .submit_batch(UploadBatch::new(vec![
            photo("other.jpg"),
            photo("IMG.jpg"),
            photo("IMG.jpg"),
        ]))
        .await
        .expect("upload");
    let emotions: Vec<_> = results.iter().map(|r| r.emotion).collect();
    assert_eq!(emotions, vec![Emotion::Angry, Emotion::Happy, Emotion::Sad]);
}

#[tokio::test]
async fn failed_upload_surfaces_backend_error() {
    let transport = ScriptedTransport::new();
    transport
        .script(
            Method::Post,
            "/images/upload",
            Err(TransportError::Status {
                status: 400,
                message: "File notes.txt is not an image".into(),
            }),
        )
        .await;
    let coordinator = UploadCoordinator::new(transport);
    let err = coordinator
        .submit_batch(UploadBatch::new(vec![photo("notes.txt")]))
        .await
        .expect_err("must fail");
    assert_eq!(
        err,
        JobError::Backend {
            status: 400,
            message: "File notes.txt is not an image".into()
        }
    );
}

#[tokio::test]
async fn curate_relays_top_n_and_rejects_oversized_selection() {
    let transport = ScriptedTransport::new();
    transport
        .script(
            Method::Post,
            "/images/curate",
            Ok(json!({ "curated_images": [
                { "path": "/vault/1.jpg", "importance_score": 0.9, "tags": ["beach"] },
                { "path": "/vault/2.jpg", "importance_score": 0.7, "tags": null },
            ] })),
        )
        .await;
    transport
        .script(
            Method::Post,
            "/images/curate",
            Ok(json!({ "selected": [
                { "path": "/vault/1.jpg" }, { "path": "/vault/2.jpg" }, { "path": "/vault/3.jpg" },
            ] })),
        )
        .await;
    let coordinator = UploadCoordinator::new(transport.clone());

    let selected = coordinator.curate(2).await.expect("curate");
    assert_eq!(selected.len(), 2);
    assert_eq!(selected[0].tags, vec!["beach".to_string()]);

    let requests = transport.requests().await;
    assert_eq!(requests[0].query, vec![("top_n".to_string(), "2".to_string())]);
    assert_eq!(requests[0].body, RequestBody::Empty);

    let err = coordinator.curate(2).await.expect_err("oversized");
    assert!(matches!(err, JobError::ResponseMismatch(_)), "unexpected: {err:?}");

    let err = coordinator.curate(0).await.expect_err("zero");
    assert_eq!(err, JobError::Validation(ValidationError::NonPositive("top_n")));
    assert_eq!(transport.call_count().await, 2);
}

#[tokio::test]
async fn stats_reads_emotion_counts() {
    let transport = ScriptedTransport::new();
    transport
        .script(
            Method::Get,
            "/images/stats",
            Ok(json!({ "total": 3, "emotions": { "happy": 2, "sad": 1 } })),
        )
        .await;
    let stats = UploadCoordinator::new(transport).stats().await.expect("stats");
    assert_eq!(stats.total, 3);
    assert_eq!(stats.emotions.get("happy"), Some(&2));
}

#[tokio::test]
async fn reads_upload_file_from_disk() {
    let dir = std::env::temp_dir().join(format!(
        "vault_upload_from_path_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    tokio::fs::create_dir_all(&dir).await.expect("dir");
    let path = dir.join("portrait.jpg");
    tokio::fs::write(&path, b"\xFF\xD8payload").await.expect("write");

    let file = UploadFile::from_path(&path).await.expect("read");
    assert_eq!(file.name, "portrait.jpg");
    assert_eq!(file.size(), 9);
    assert_eq!(file.to_part(UPLOAD_FIELD).mime_type, "image/jpeg");

    tokio::fs::remove_dir_all(dir).await.expect("cleanup");
}

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::domain::{Emotion, ImageId, JobId, JobStatus, ModelId};

/// Per-file analysis produced by `POST /images/upload`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub filename: String,
    pub emotion: Emotion,
    pub confidence: f64,
    pub intensity: f64,
    #[serde(default, alias = "all_scores", skip_serializing_if = "BTreeMap::is_empty")]
    pub scores: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub results: Vec<AnalysisResult>,
}

/// A previously analyzed image as the backend knows it.
///
/// The timeline, highlight, curate and by-emotion endpoints each return a
/// different subset of these fields; only `path` is always present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ImageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion: Option<Emotion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion_intensity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, alias = "importance", skip_serializing_if = "Option::is_none")]
    pub importance_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emotion_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aesthetic_score: Option<f64>,
    #[serde(default, deserialize_with = "nullable_vec")]
    pub tags: Vec<String>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurateResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(alias = "curated_images")]
    pub selected: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    pub timeline: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HighlightsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    pub highlights: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ByEmotionResponse {
    pub emotion: Emotion,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    pub images: Vec<TimelineEntry>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsResponse {
    pub total: u64,
    #[serde(default)]
    pub emotions: BTreeMap<String, u64>,
}

/// Body of both `POST /life-reel/create` and `GET /life-reel/status/{jobId}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifeReelJobResponse {
    #[serde(rename = "jobId", alias = "job_id")]
    pub job_id: JobId,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainStyleResponse {
    #[serde(rename = "modelId", alias = "model_id")]
    pub model_id: ModelId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub model_id: ModelId,
    pub prompt: String,
    pub num_images: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub images: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleModelSummary {
    pub id: ModelId,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub training_images: Option<u32>,
    #[serde(
        default,
        deserialize_with = "lenient_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StyleModelsResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    pub models: Vec<StyleModelSummary>,
}

fn nullable_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts RFC 3339 timestamps as well as naive ISO timestamps (read as UTC).
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    parse_timestamp(&raw)
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp '{raw}'")))
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_backend_job_payload_with_snake_case_id_and_processing_status() {
        let job: LifeReelJobResponse = serde_json::from_str(
            r#"{"job_id": 42, "status": "processing", "message": "working"}"#,
        )
        .expect("decode");
        assert_eq!(job.job_id, JobId(42));
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn reads_highlight_entry_with_short_importance_key_and_null_tags() {
        let entry: TimelineEntry = serde_json::from_str(
            r#"{"id": 3, "filename": "a.jpg", "path": "/p/a.jpg", "importance": 0.8,
                "emotion": "happy", "tags": null}"#,
        )
        .expect("decode");
        assert_eq!(entry.importance_score, Some(0.8));
        assert!(entry.tags.is_empty());
        assert_eq!(entry.emotion, Some(Emotion::Happy));
    }

    #[test]
    fn curate_accepts_backend_curated_images_key() {
        let response: CurateResponse = serde_json::from_str(
            r#"{"message": "ok", "curated_images": [{"path": "/p/x.jpg", "importance_score": 0.5}]}"#,
        )
        .expect("decode");
        assert_eq!(response.selected.len(), 1);
        assert_eq!(response.selected[0].path, "/p/x.jpg");
    }

    #[test]
    fn parses_naive_and_offset_timestamps() {
        let naive = parse_timestamp("2024-05-01T10:20:30.123456").expect("naive");
        let offset = parse_timestamp("2024-05-01T10:20:30.123456+00:00").expect("offset");
        assert_eq!(naive, offset);
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn generate_request_omits_missing_seed() {
        let body = serde_json::to_value(GenerateRequest {
            model_id: ModelId(9),
            prompt: "a lighthouse".into(),
            num_images: 2,
            seed: None,
        })
        .expect("encode");
        assert_eq!(
            body,
            serde_json::json!({"model_id": 9, "prompt": "a lighthouse", "num_images": 2})
        );
    }
}

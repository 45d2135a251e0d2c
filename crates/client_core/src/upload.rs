//! Batch image upload, curation and collection stats.

use std::{path::Path, sync::Arc};

use shared::protocol::{AnalysisResult, CurateResponse, StatsResponse, TimelineEntry, UploadResponse};
use tracing::{info, warn};

use crate::{
    error::{JobError, ValidationError},
    transport::{decode, ApiRequest, FilePart, MultipartBody, Transport},
};

pub const UPLOAD_FIELD: &str = "files";
pub const DEFAULT_CURATE_TOP_N: u32 = 50;

pub use shared::protocol::StatsResponse as CollectionStats;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            mime_type: None,
            bytes: bytes.into(),
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub async fn from_path(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await?;
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(name, bytes))
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn to_part(&self, field: &str) -> FilePart {
        let mime_type = self.mime_type.clone().unwrap_or_else(|| {
            mime_guess::from_path(&self.name)
                .first_or_octet_stream()
                .essence_str()
                .to_string()
        });
        FilePart {
            field: field.to_string(),
            filename: self.name.clone(),
            mime_type,
            bytes: self.bytes.clone(),
        }
    }
}

/// Files submitted together in one all-or-nothing request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadBatch {
    files: Vec<UploadFile>,
}

impl UploadBatch {
    pub fn new(files: Vec<UploadFile>) -> Self {
        Self { files }
    }

    pub fn push(&mut self, file: UploadFile) {
        self.files.push(file);
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn files(&self) -> &[UploadFile] {
        &self.files
    }

    pub fn filenames(&self) -> Vec<String> {
        self.files.iter().map(|file| file.name.clone()).collect()
    }

    pub(crate) fn validate(&self) -> Result<(), ValidationError> {
        if self.files.is_empty() {
            return Err(ValidationError::EmptyBatch);
        }
        if let Some(empty) = self.files.iter().find(|file| file.size() == 0) {
            return Err(ValidationError::EmptyFile {
                filename: empty.name.clone(),
            });
        }
        Ok(())
    }

    pub(crate) fn append_parts(&self, mut body: MultipartBody, field: &str) -> MultipartBody {
        for file in &self.files {
            body = body.file(file.to_part(field));
        }
        body
    }
}

impl FromIterator<UploadFile> for UploadBatch {
    fn from_iter<I: IntoIterator<Item = UploadFile>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

pub struct UploadCoordinator {
    transport: Arc<dyn Transport>,
}

impl UploadCoordinator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Uploads the whole batch in one multipart request.
    ///
    /// Results come back in the batch's order. A response whose results do
    /// not pair one-to-one with the submitted filenames is an error; nothing
    /// is dropped or reordered silently.
    pub async fn submit_batch(&self, batch: UploadBatch) -> Result<Vec<AnalysisResult>, JobError> {
        batch.validate()?;
        let filenames = batch.filenames();
        let body = batch.append_parts(MultipartBody::default(), UPLOAD_FIELD);
        drop(batch);

        info!(files = filenames.len(), "upload: submitting batch");
        let value = self
            .transport
            .send(ApiRequest::post("/images/upload").multipart(body))
            .await?;
        let response: UploadResponse = decode(value)?;
        let results = correlate_results(&filenames, response.results)?;
        info!(files = results.len(), "upload: batch analyzed");
        Ok(results)
    }

    /// Asks the backend for its `top_n` most important images. Ranking is
    /// entirely backend-owned.
    pub async fn curate(&self, top_n: u32) -> Result<Vec<TimelineEntry>, JobError> {
        if top_n == 0 {
            return Err(ValidationError::NonPositive("top_n").into());
        }
        let value = self
            .transport
            .send(ApiRequest::post("/images/curate").query("top_n", top_n))
            .await?;
        let response: CurateResponse = decode(value)?;
        if response.selected.len() > top_n as usize {
            return Err(JobError::ResponseMismatch(format!(
                "curate asked for at most {top_n} images, backend selected {}",
                response.selected.len()
            )));
        }
        info!(top_n, selected = response.selected.len(), "upload: curated collection");
        Ok(response.selected)
    }

    pub async fn stats(&self) -> Result<CollectionStats, JobError> {
        let value = self.transport.send(ApiRequest::get("/images/stats")).await?;
        let stats: StatsResponse = decode(value)?;
        Ok(stats)
    }
}

/// Pairs backend results with the submitted filenames, in submission order.
fn correlate_results(
    filenames: &[String],
    results: Vec<AnalysisResult>,
) -> Result<Vec<AnalysisResult>, JobError> {
    if results.len() != filenames.len() {
        return Err(JobError::ResponseMismatch(format!(
            "submitted {} files, backend returned {} results",
            filenames.len(),
            results.len()
        )));
    }

    if results
        .iter()
        .zip(filenames)
        .all(|(result, name)| &result.filename == name)
    {
        return Ok(results);
    }

    let mut pending: Vec<Option<AnalysisResult>> = results.into_iter().map(Some).collect();
    let mut ordered = Vec::with_capacity(filenames.len());
    let mut missing = Vec::new();
    for name in filenames {
        let slot = pending
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|result| &result.filename == name));
        match slot.and_then(Option::take) {
            Some(result) => ordered.push(result),
            None => missing.push(name.clone()),
        }
    }

    if !missing.is_empty() {
        return Err(JobError::ResponseMismatch(format!(
            "no analysis result for: {}",
            missing.join(", ")
        )));
    }

    warn!("upload: backend returned results out of order; restored submission order");
    Ok(ordered)
}

#[cfg(test)]
#[path = "tests/upload_tests.rs"]
mod tests;

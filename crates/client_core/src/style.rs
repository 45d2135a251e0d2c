//! Personal style models: train from samples, then generate with the result.
//!
//! Generation takes a [`TrainedModelHandle`], which only a successful
//! [`StyleCoordinator::train`] call can produce.

use std::{collections::HashMap, fmt, sync::Arc};

use shared::{
    domain::ModelId,
    protocol::{
        GenerateRequest, GenerateResponse, StyleModelSummary, StyleModelsResponse,
        TrainStyleResponse,
    },
};
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    error::{JobError, ValidationError},
    transport::{decode, ApiRequest, MultipartBody, Transport},
    upload::{UploadBatch, UPLOAD_FIELD},
};

pub const MIN_TRAINING_SAMPLES: usize = 5;
pub const DEFAULT_EPOCHS: u32 = 100;
pub const DEFAULT_DESCRIPTION: &str = "Personal style";

/// Proof that the backend finished training a model in this session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrainedModelHandle {
    model_id: ModelId,
    name: String,
}

impl TrainedModelHandle {
    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone)]
pub struct TrainRequest {
    pub name: String,
    pub description: String,
    pub style_prompt: String,
    pub samples: UploadBatch,
    pub epochs: u32,
}

impl TrainRequest {
    pub fn new(name: impl Into<String>, style_prompt: impl Into<String>, samples: UploadBatch) -> Self {
        Self {
            name: name.into(),
            description: DEFAULT_DESCRIPTION.to_string(),
            style_prompt: style_prompt.into(),
            samples,
            epochs: DEFAULT_EPOCHS,
        }
    }

    pub fn with_epochs(mut self, epochs: u32) -> Self {
        self.epochs = epochs;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.samples.len() < MIN_TRAINING_SAMPLES {
            return Err(ValidationError::TooFewSamples {
                required: MIN_TRAINING_SAMPLES,
                actual: self.samples.len(),
            });
        }
        if self.name.trim().is_empty() {
            return Err(ValidationError::EmptyField("name"));
        }
        if self.style_prompt.trim().is_empty() {
            return Err(ValidationError::EmptyField("style_prompt"));
        }
        if self.epochs == 0 {
            return Err(ValidationError::NonPositive("epochs"));
        }
        self.samples.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleModel {
    pub name: String,
    pub style_prompt: String,
    pub training_sample_count: usize,
    pub model_path: Option<String>,
    handle: TrainedModelHandle,
}

impl StyleModel {
    pub fn handle(&self) -> &TrainedModelHandle {
        &self.handle
    }

    pub fn model_id(&self) -> ModelId {
        self.handle.model_id
    }
}

/// Path or URL of an image produced by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef(pub String);

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub struct StyleCoordinator {
    transport: Arc<dyn Transport>,
    trained: Mutex<HashMap<ModelId, StyleModel>>,
}

impl StyleCoordinator {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            trained: Mutex::new(HashMap::new()),
        }
    }

    /// Trains a model in one long request. There is no backend cancel; a
    /// caller cancels by dropping the future and ignoring the outcome.
    pub async fn train(&self, request: TrainRequest) -> Result<StyleModel, JobError> {
        request.validate()?;
        let TrainRequest {
            name,
            description,
            style_prompt,
            samples,
            epochs,
        } = request;
        let training_sample_count = samples.len();

        let body = MultipartBody::default()
            .text("name", name.clone())
            .text("description", description)
            .text("style_prompt", style_prompt.clone())
            .text("num_epochs", epochs.to_string());
        let body = samples.append_parts(body, UPLOAD_FIELD);

        info!(
            name = %name,
            samples = training_sample_count,
            epochs,
            "style: training started"
        );
        let value = self
            .transport
            .send(ApiRequest::post("/style/train").multipart(body))
            .await?;
        let response: TrainStyleResponse = decode(value)?;

        let model = StyleModel {
            handle: TrainedModelHandle {
                model_id: response.model_id,
                name: name.clone(),
            },
            name,
            style_prompt,
            training_sample_count,
            model_path: response.model_path,
        };
        self.trained
            .lock()
            .await
            .insert(model.model_id(), model.clone());
        info!(model_id = model.model_id().0, name = %model.name, "style: training finished");
        Ok(model)
    }

    pub async fn generate(
        &self,
        model: &TrainedModelHandle,
        prompt: &str,
        num_images: u32,
        seed: Option<i64>,
    ) -> Result<Vec<ImageRef>, JobError> {
        if prompt.trim().is_empty() {
            return Err(ValidationError::EmptyField("prompt").into());
        }
        if num_images == 0 {
            return Err(ValidationError::NonPositive("num_images").into());
        }

        let request = ApiRequest::post("/style/generate").json(&GenerateRequest {
            model_id: model.model_id,
            prompt: prompt.to_string(),
            num_images,
            seed,
        })?;
        let value = self.transport.send(request).await?;
        let response: GenerateResponse = decode(value)?;
        if response.images.len() != num_images as usize {
            return Err(JobError::ResponseMismatch(format!(
                "requested {num_images} images, backend produced {}",
                response.images.len()
            )));
        }
        info!(
            model_id = model.model_id.0,
            images = response.images.len(),
            "style: generation finished"
        );
        Ok(response.images.into_iter().map(ImageRef).collect())
    }

    /// Models the backend knows about. Informational only; listing never
    /// yields a handle.
    pub async fn list_models(&self) -> Result<Vec<StyleModelSummary>, JobError> {
        let value = self.transport.send(ApiRequest::get("/style/models")).await?;
        let response: StyleModelsResponse = decode(value)?;
        Ok(response.models)
    }

    /// Models trained through this coordinator, oldest id first.
    pub async fn trained_models(&self) -> Vec<StyleModel> {
        let guard = self.trained.lock().await;
        let mut models: Vec<_> = guard.values().cloned().collect();
        models.sort_by_key(StyleModel::model_id);
        models
    }
}

#[cfg(test)]
#[path = "tests/style_tests.rs"]
mod tests;

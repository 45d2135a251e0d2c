use shared::domain::JobId;
use thiserror::Error;

/// Failure of a single request at the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("backend unreachable: {0}")]
    Unreachable(String),
    #[error("request timed out")]
    Timeout,
    #[error("malformed backend response: {0}")]
    Malformed(String),
    #[error("backend returned {status}: {message}")]
    Status { status: u16, message: String },
    #[error("request could not be built: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_decode() {
            TransportError::Malformed(err.to_string())
        } else if err.is_builder() {
            TransportError::InvalidRequest(err.to_string())
        } else {
            TransportError::Unreachable(err.to_string())
        }
    }
}

/// A precondition violated before any request was issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("upload batch is empty")]
    EmptyBatch,
    #[error("file '{filename}' is empty")]
    EmptyFile { filename: String },
    #[error("style training needs at least {required} samples, got {actual}")]
    TooFewSamples { required: usize, actual: usize },
    #[error("{0} must not be empty")]
    EmptyField(&'static str),
    #[error("{0} must be a positive integer")]
    NonPositive(&'static str),
    #[error("life reel job {0} already reached a terminal status")]
    JobTerminal(JobId),
    #[error("life reel job {0} was not started by this client")]
    UnknownJob(JobId),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum JobError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),
    #[error("transport failure: {0}")]
    Transport(TransportError),
    #[error("backend rejected request ({status}): {message}")]
    Backend { status: u16, message: String },
    #[error("polling life reel job {job_id} gave up after {attempts} consecutive failures: {last_error}")]
    PollExhausted {
        job_id: JobId,
        attempts: u32,
        last_error: TransportError,
    },
    #[error("a poll loop for life reel job {0} is already running")]
    PollAlreadyActive(JobId),
    #[error("poll loop for life reel job {0} was abandoned")]
    PollAbandoned(JobId),
    #[error("backend response does not match request: {0}")]
    ResponseMismatch(String),
}

impl From<TransportError> for JobError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Status { status, message } => JobError::Backend { status, message },
            other => JobError::Transport(other),
        }
    }
}

impl JobError {
    pub fn is_validation(&self) -> bool {
        matches!(self, JobError::Validation(_))
    }
}

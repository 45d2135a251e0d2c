//! Job-lifecycle coordination for the photo vault backend.
//!
//! [`Orchestrator`] owns the view state and routes user intent to the
//! coordinators, which share one [`transport::Transport`].

pub mod config;
pub mod error;
pub mod gallery;
pub mod life_reel;
pub mod orchestrator;
pub mod style;
pub mod transport;
pub mod upload;

pub use config::{load_settings, ClientSettings};
pub use error::{JobError, TransportError, ValidationError};
pub use gallery::GalleryLoader;
pub use life_reel::{LifeReelCoordinator, LifeReelJob, PollPolicy, ReelOptions};
pub use orchestrator::{
    OperationKind, OperationState, Orchestrator, OrchestratorEvent, ReelTracking, ViewSnapshot,
    Workflow,
};
pub use style::{ImageRef, StyleCoordinator, StyleModel, TrainRequest, TrainedModelHandle};
pub use transport::{HttpTransport, Transport};
pub use upload::{CollectionStats, UploadBatch, UploadCoordinator, UploadFile};

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;

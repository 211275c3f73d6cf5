//! Churn model lifecycle and serving core
//!
//! Provides the model pipeline from raw records to served predictions:
//! - Deterministic feature encoding
//! - Tree ensemble classifiers and held-out evaluation
//! - Artifact stores with local fallback
//! - Version registry with active/canary/deprecated lifecycle
//! - Swappable model snapshots and canary traffic routing
//! - Training pipeline and synthetic data

pub mod artifact;
pub mod dataset;
pub mod evaluation;
pub mod features;
pub mod manager;
pub mod model;
pub mod registry;
pub mod router;
pub mod synthetic;
pub mod training;

pub use artifact::{
    tracking_store_from_uri, ArtifactLoader, ArtifactStore, FileTrackingStore, HttpTrackingStore,
    LocalModelStore, ModelArtifact,
};
pub use evaluation::EvaluationMetrics;
pub use features::{FeatureTransformer, FeatureVector, FEATURE_WIDTH};
pub use manager::{LoadedModel, ModelHandle, ModelInfo, ModelManager};
pub use model::{Classifier, ClassifierParams};
pub use registry::ModelRegistry;
pub use router::{CanaryRouter, Route};
pub use synthetic::SyntheticGenerator;
pub use training::{TrainingOutcome, TrainingPipeline};

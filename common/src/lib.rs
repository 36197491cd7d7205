pub mod bootstrap;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod features;
pub mod http;
pub mod model;
pub mod preprocess;
pub mod profile;
pub mod schema;
pub mod server;
pub mod stats;

pub use bootstrap::{load_service, LoadedService, ModelSpec};
pub use config::{ArchitectureConfig, BenchmarkConfig, ScenarioConfig, ServiceConfig};
pub use dispatch::{round4, ServiceContext};
pub use error::{DispatchError, InferenceError, SchemaValidationError, TransformError};
pub use http::{HealthResponse, InfoResponse, ResponsePayload};
pub use model::ModelArtifact;
pub use profile::{Operation, Profile};
pub use stats::Statistics;

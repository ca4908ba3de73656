pub mod config;
pub mod error;
pub mod ingest;
pub mod jobs;
pub mod models;
pub mod probe;
pub mod scheduler;
pub mod score;
pub mod service;
pub mod source;
pub mod traits;

#[cfg(test)]
pub(crate) mod testutil;

pub use config::SchedulerConfig;
pub use error::AppError;
pub use ingest::{IngestReport, IngestService};
pub use jobs::{EvictionJob, StalenessScanner};
pub use models::{
    CandidateProxy, EvictionFilter, ProxyKey, ProxyRecord, ProxyStatus, ProxyType, StatusUpdate,
};
pub use probe::{ProbeEvent, ProbePool, ProbeQueue, ProbeReporter, ProbeStats, TracingProbeReporter};
pub use scheduler::{Scheduler, SchedulerState, SchedulerStats};
pub use score::{ScorePolicy, SuccessRatio};
pub use service::{ProxyPoolService, ShutdownReport, SweepReport};
pub use source::{
    Capability, CapabilityKind, DynamicPageCapability, JsonPayloadCapability, SourceSpec,
    StaticHtmlCapability, scan_document,
};
pub use traits::{FetchOptions, LivenessCheck, NoBrowser, PageDriver, PageLoader, PageOpener, ProxyStore};

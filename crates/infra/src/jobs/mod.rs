//! Media processing jobs: model, storage, retry, and execution.
//!
//! ## Design
//!
//! - A job owns ordered units; each unit ends with exactly one result
//! - Unit failures become error envelopes and never fail the job
//! - Transient remote failures are retried with a fixed delay
//! - Runs are detached; progress is observed by polling the store
//!
//! ## Components
//!
//! - `MediaStore`: persistence for jobs, units, and results
//! - `UnitFeed`: stored units, PDF pages, or sampled video frames
//! - `JobRunner`: drives one job through its units
//! - `JobService`: creation, launch, and polling queries

pub mod envelope;
pub mod feed;
pub mod launcher;
pub mod retry;
pub mod runner;
pub mod service;
pub mod store;
pub mod summary;
pub mod types;

pub use envelope::{EnvelopeStatus, ErrorEnvelope};
pub use feed::{
    DEFAULT_SAMPLE_EVERY, FeedError, FeedItem, FrameFeed, FrameSource, PageFeed, StoredUnits,
    UnitFeed, VideoDecoder,
};
pub use launcher::{TaskFuture, TaskLauncher, TokioLauncher};
pub use retry::{Decision, FinalError, RetryPolicy};
pub use runner::{JobRunner, RunnerError};
pub use service::{
    ClientFactory, JobRequest, JobService, NewUnit, OcrFactory, Pipeline, PipelineFactory,
    PipelineRegistry, ServiceError,
};
pub use store::{InMemoryMediaStore, MediaStore, StoreError};
pub use summary::{DetectionSummary, JobStats, JobSummary, OcrSummary};
pub use types::{Job, JobKind, JobStatus, ResultPayload, Unit, UnitResult, UnitStatus};

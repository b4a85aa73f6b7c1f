//! Earbox Core - batch orchestration and grouped-asset validation
//!
//! Two halves:
//! - The operator side: the [`InstanceOrchestrator`] launches a compute
//!   instance or reuses a running one, and can replay its bootstrap script or
//!   dispatch a one-shot job command to it.
//! - The job side: [`BatchJob`] groups the input images with the
//!   [`AssetGrouper`], certifies group completeness with the
//!   [`GroupValidator`], decodes images through the [`ImageIngestPipeline`]
//!   and writes a result document. Diagnostics go to an ordered [`LogStream`].
//!
//! Every remote system sits behind a trait in [`api`].
//!
//! # Example
//!
//! ```rust,ignore
//! use earbox_core::prelude::*;
//!
//! let mut log = LogStream::open(sink, "/aws/ec2/earbox-processing", "run-1");
//! let grouping = AssetGrouper::new().group(&keys);
//! let report = GroupValidator::new().validate(&grouping, &mut log);
//! println!("{} complete groups", report.valid.len());
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod grouping;
pub mod ingest;
pub mod job;
pub mod log_stream;
pub mod orchestrator;
pub mod script;
pub mod state_machine;
pub mod types;
pub mod validation;

pub use api::{
    CommandChannel, ComputeProvider, CredentialSource, Decoder, InstanceDescription, LaunchRequest,
    ListPage, LogSink, ObjectSummary, Session, Storage,
};
pub use config::{DeployConfig, DeploymentMode, JobConfig, JobParameters, LaunchSpec};
pub use error::{
    ChannelError, ConfigError, CredentialError, OrchestratorError, ProviderError, SinkError,
    StateMachineError, StorageError,
};
pub use grouping::{AssetGroup, AssetGrouper, Grouping, MemberTag};
pub use ingest::{FailureKind, ImageIngestPipeline, IngestReport, IngestResult};
pub use job::{BatchJob, JobSummary, ResultDocument};
pub use log_stream::{LogStream, StreamStats};
pub use orchestrator::{acquire_session, Deployment, InstanceOrchestrator, Intent};
pub use types::{
    CommandId, DeliveryToken, GroupKey, InstanceHandle, InstanceId, InstanceState, LifecycleState,
    LogEvent, LogLevel, ObjectKey, PixelGrid,
};
pub use validation::{CompletenessSummary, GroupValidator, ValidationReport, ValidationVerdict};

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        AssetGrouper, BatchJob, DeployConfig, DeploymentMode, GroupValidator, ImageIngestPipeline,
        InstanceOrchestrator, Intent, JobConfig, JobParameters, LogStream, ObjectKey,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

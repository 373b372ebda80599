pub mod config;
pub mod core;
pub mod deferred;
pub mod media;
pub mod transport;
pub mod utils;
pub mod validation;

// 重新导出核心类型
pub use crate::core::{
    ArtifactRole,
    ArtifactType,
    BatchOutcome,
    CandidateFile,
    ParentId,
    RecordId,
    Result,
    SessionView,
    UploadError,
    UploadEvent,
    UploadManager,
    UploadManagerHandle,
    UploadState,
};
pub use config::{Config, SessionConfig};
pub use deferred::{DeferredError, DeferredReport, DeferredUploadCoordinator, ReconciliationWarning};
pub use media::LocalMediaProbe;
pub use transport::{HttpParentService, HttpTransport};
pub use validation::{ValidationConfig, ValidationGate};

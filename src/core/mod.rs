mod manager;
mod manager_worker;
mod record;
mod scheduler;
mod store;
mod worker;
pub mod errors;
pub mod progress;
pub mod traits;
pub mod types;

pub use manager::{FilteredEventReceiver, UploadManager, UploadManagerBuilder, UploadManagerHandle};
pub use record::UploadRecord;
pub use scheduler::UploadQueueScheduler;
pub use store::RecordStore;
pub use worker::WorkerOutcome;
pub use progress::{ProgressAggregator, ProgressReporter, SessionStats, SpeedCalculator};
pub use traits::{BatchTransferEvent, BatchTransferResult, MediaProbe, ParentService, Transport, TransferContext};
pub use errors::{ParentServiceError, Result, TransferError, UploadError, ValidationError};
pub use types::*;

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use super::errors::TransferError;
use super::progress::ProgressReporter;
use super::traits::{Transport, TransferContext};
use super::types::{MediaMetadata, RecordId, Thumbnail, TransferProgress, TransferReceipt, TransferRequest};

/// worker 与探测任务发回会话的消息
#[derive(Debug)]
pub(crate) enum WorkerMessage {
    Progress {
        id: RecordId,
        attempt: u64,
        progress: TransferProgress,
    },
    Finished {
        id: RecordId,
        attempt: u64,
        outcome: WorkerOutcome,
    },
    Probed {
        id: RecordId,
        metadata: MediaMetadata,
        thumbnail: Option<Thumbnail>,
    },
}

/// 一次执行的唯一结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerOutcome {
    Completed { url: String },
    Failed { reason: String },
    Cancelled,
}

impl From<Result<TransferReceipt, TransferError>> for WorkerOutcome {
    fn from(result: Result<TransferReceipt, TransferError>) -> Self {
        match result {
            Ok(receipt) => WorkerOutcome::Completed { url: receipt.url },
            Err(err) if err.is_cancelled() => WorkerOutcome::Cancelled,
            Err(err) => WorkerOutcome::Failed { reason: err.to_string() },
        }
    }
}

/// 执行单个记录的一次传输
pub(crate) struct UploadWorker {
    pub(crate) id: RecordId,
    pub(crate) attempt: u64,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) cancellation_token: CancellationToken,
    pub(crate) message_tx: mpsc::UnboundedSender<WorkerMessage>,
}

impl UploadWorker {
    pub async fn run(self, request: TransferRequest) {
        let (id, attempt) = (self.id, self.attempt);

        let reporter = ProgressReporter::new({
            let message_tx = self.message_tx.clone();
            Arc::new(move |progress| {
                let _ = message_tx.send(WorkerMessage::Progress { id, attempt, progress });
            })
        });
        let context = TransferContext::new(self.cancellation_token.clone(), Arc::new(reporter));

        // 执行
        let outcome = tokio::select! {
            biased;
            _ = self.cancellation_token.cancelled() => WorkerOutcome::Cancelled,
            result = self.transport.transfer(request, context) => WorkerOutcome::from(result),
        };

        debug!(record_id = %id, attempt, ?outcome, "transfer finished");
        let _ = self.message_tx.send(WorkerMessage::Finished { id, attempt, outcome });
    }
}

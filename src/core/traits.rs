use std::sync::Arc;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use super::errors::{ParentServiceError, TransferError};
use super::progress::ProgressReporter;
use super::types::{
    ArtifactType,
    MediaMetadata,
    ParentId,
    RecordId,
    SourceBlob,
    Thumbnail,
    TransferProgress,
    TransferReceipt,
    TransferRequest,
};
use crate::media::ProbeError;

/// 每次传输的上下文
#[derive(Clone)]
pub struct TransferContext {
    pub cancellation_token: CancellationToken,
    pub progress: Arc<ProgressReporter>,
}

impl TransferContext {
    pub fn new(cancellation_token: CancellationToken, progress: Arc<ProgressReporter>) -> Self {
        Self { cancellation_token, progress }
    }
}

/// 批量传输中单个文件的事件
#[derive(Debug, Clone)]
pub enum BatchTransferEvent {
    Progress {
        id: RecordId,
        progress: TransferProgress,
    },
    Completed {
        id: RecordId,
        url: String,
    },
    Failed {
        id: RecordId,
        reason: String,
    },
}

/// 批量传输结果，按请求顺序划分
#[derive(Debug, Default)]
pub struct BatchTransferResult {
    pub successful: Vec<(RecordId, TransferReceipt)>,
    pub failed: Vec<(RecordId, TransferError)>,
}

/// 传输服务 - 所有上传实现都必须实现此接口
#[async_trait]
pub trait Transport: Send + Sync {
    /// 传输单个文件
    ///
    /// Must return `TransferError::Cancelled` (or stop being polled) once the
    /// context's token fires.
    async fn transfer(&self, request: TransferRequest, context: TransferContext) -> Result<TransferReceipt, TransferError>;

    /// 按给定并发传输一组文件，结果按请求顺序划分为成功/失败
    async fn transfer_batch(
        &self,
        requests: Vec<TransferRequest>,
        concurrency: usize,
        events: Option<mpsc::UnboundedSender<BatchTransferEvent>>,
    ) -> BatchTransferResult {
        let outcomes: Vec<(RecordId, Result<TransferReceipt, TransferError>)> = futures::stream::iter(requests)
            .map(|request| {
                let events = events.clone();
                async move {
                    let id = request.record_id;
                    let progress_events = events.clone();
                    let reporter = ProgressReporter::new(Arc::new(move |progress| {
                        if let Some(tx) = &progress_events {
                            let _ = tx.send(BatchTransferEvent::Progress { id, progress });
                        }
                    }));
                    let context = TransferContext::new(CancellationToken::new(), Arc::new(reporter));

                    let result = self.transfer(request, context).await;
                    if let Some(tx) = &events {
                        let event = match &result {
                            Ok(receipt) => BatchTransferEvent::Completed { id, url: receipt.url.clone() },
                            Err(err) => BatchTransferEvent::Failed { id, reason: err.to_string() },
                        };
                        let _ = tx.send(event);
                    }

                    (id, result)
                }
            })
            .buffered(concurrency.max(1))
            .collect()
            .await;

        let mut result = BatchTransferResult::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(receipt) => result.successful.push((id, receipt)),
                Err(err) => result.failed.push((id, err)),
            }
        }
        result
    }
}

/// 父实体服务（pitch 的创建与更新）
#[async_trait]
pub trait ParentService: Send + Sync {
    async fn create(&self, data: Value) -> Result<ParentId, ParentServiceError>;

    async fn patch(&self, id: &ParentId, fields: Map<String, Value>) -> Result<(), ParentServiceError>;
}

/// 元数据与预览图提取
#[async_trait]
pub trait MediaProbe: Send + Sync {
    async fn extract_metadata(&self, source: &SourceBlob, artifact_type: ArtifactType) -> Result<MediaMetadata, ProbeError>;

    /// `Ok(None)` when the type has no preview.
    async fn generate_thumbnail(&self, source: &SourceBlob, artifact_type: ArtifactType) -> Result<Option<Thumbnail>, ProbeError>;
}

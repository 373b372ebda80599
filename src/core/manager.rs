use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::debug;
use crate::config::SessionConfig;
use super::errors::{Result, UploadError};
use super::manager_worker::UploadManagerWorker;
use super::traits::{MediaProbe, Transport};
use super::types::{
    BatchOutcome,
    CandidateFile,
    ManagerCommand,
    ParentId,
    RecordId,
    SelectionReport,
    SessionView,
    UploadEvent,
};

/// 上传会话的句柄，可以随意 clone
#[derive(Clone)]
pub struct UploadManager {
    command_tx: mpsc::Sender<ManagerCommand>,
    event_tx: broadcast::Sender<UploadEvent>,
    view_rx: watch::Receiver<SessionView>,
}

/// 上传管理器句柄 - 包含管理器和工作线程
pub struct UploadManagerHandle {
    pub manager: UploadManager,
    pub worker_handle: JoinHandle<()>,
}

impl UploadManagerHandle {
    /// Cancels every transfer, drops every record and waits for the session to exit.
    pub async fn shutdown(self) -> Result<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .manager
            .command_tx
            .send(ManagerCommand::Shutdown { reply: reply_tx })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }

        drop(self.manager);
        self.worker_handle
            .await
            .map_err(|err| UploadError::Internal(format!("Worker panic: {}", err)))
    }
}

pub struct UploadManagerBuilder {
    transport: Arc<dyn Transport>,
    probe: Option<Arc<dyn MediaProbe>>,
    config: SessionConfig,
    parent_id: Option<ParentId>,
}

impl UploadManagerBuilder {
    pub fn probe(mut self, probe: Arc<dyn MediaProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// 已有父实体时直接附加，不进入暂存模式
    pub fn parent(mut self, parent_id: ParentId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    /// Spawns the session worker. Must be called inside a tokio runtime.
    pub fn build(self) -> UploadManagerHandle {
        let (command_tx, command_rx) = mpsc::channel(100);
        // 最大缓存 256 个事件
        let (event_tx, _) = broadcast::channel(256);
        // 首次发布之前读到的视图也要反映父实体和闸门
        let initial_view = SessionView {
            parent_id: self.parent_id.clone(),
            gate_open: self.parent_id.is_some() || !self.config.require_parent,
            ..Default::default()
        };
        let (view_tx, view_rx) = watch::channel(initial_view);

        let worker = UploadManagerWorker::new(
            self.transport,
            self.probe,
            self.config,
            self.parent_id,
            event_tx.clone(),
            view_tx,
        );
        let worker_handle = tokio::spawn(worker.run(command_rx));

        UploadManagerHandle {
            manager: UploadManager {
                command_tx,
                event_tx,
                view_rx,
            },
            worker_handle,
        }
    }
}

impl UploadManager {
    pub fn builder(transport: Arc<dyn Transport>) -> UploadManagerBuilder {
        UploadManagerBuilder {
            transport,
            probe: None,
            config: SessionConfig::default(),
            parent_id: None,
        }
    }

    async fn send<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> ManagerCommand) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(command(reply_tx))
            .await
            .map_err(|_| UploadError::ManagerShutdown)?;

        // 等待响应
        reply_rx.await.map_err(|_| UploadError::ManagerShutdown)
    }

    /// 选择文件：校验后加入记录表
    ///
    /// Rejected files are listed in the report and never become records. A
    /// selection that would exceed the file-count limit is refused as a whole.
    pub async fn select(&self, files: Vec<CandidateFile>) -> Result<SelectionReport> {
        self.send(|reply| ManagerCommand::Select { files, reply }).await?
    }

    /// Queues every idle record, in selection order.
    pub async fn start_batch(&self) -> Result<Vec<RecordId>> {
        self.send(|reply| ManagerCommand::StartBatch { reply }).await?
    }

    /// 设置父实体，返回被释放的记录
    pub async fn attach_parent(&self, parent_id: ParentId) -> Result<Vec<RecordId>> {
        self.send(|reply| ManagerCommand::AttachParent { parent_id, reply }).await?
    }

    pub async fn cancel(&self, id: RecordId) -> Result<()> {
        self.send(|reply| ManagerCommand::Cancel { id, reply }).await?
    }

    pub async fn pause(&self, id: RecordId) -> Result<()> {
        self.send(|reply| ManagerCommand::Pause { id, reply }).await?
    }

    pub async fn resume(&self, id: RecordId) -> Result<()> {
        self.send(|reply| ManagerCommand::Resume { id, reply }).await?
    }

    /// Returns once the record is gone and its transfer has stopped.
    pub async fn remove(&self, id: RecordId) -> Result<()> {
        self.send(|reply| ManagerCommand::Remove { id, reply }).await?
    }

    /// 手动重试，返回新的重试次数
    pub async fn retry(&self, id: RecordId) -> Result<u32> {
        self.send(|reply| ManagerCommand::Retry { id, reply }).await?
    }

    pub async fn retry_all_failed(&self) -> Result<Vec<RecordId>> {
        self.send(|reply| ManagerCommand::RetryAllFailed { reply }).await
    }

    pub async fn update_details(&self, id: RecordId, title: Option<String>, description: Option<String>) -> Result<()> {
        self.send(|reply| ManagerCommand::UpdateDetails {
            id,
            title,
            description,
            reply,
        })
        .await?
    }

    /// 等待一组记录全部结束（completed / error / idle / 已移除）
    pub async fn wait_settled(&self, ids: Vec<RecordId>) -> Result<BatchOutcome> {
        self.send(|reply| ManagerCommand::WaitSettled { ids, reply }).await
    }

    /// 取消所有传输并清空记录表
    pub async fn discard(&self) -> Result<()> {
        self.send(|reply| ManagerCommand::Discard { reply }).await
    }

    /// 当前会话视图的快照
    pub fn view(&self) -> SessionView {
        self.view_rx.borrow().clone()
    }

    pub fn watch_view(&self) -> watch::Receiver<SessionView> {
        self.view_rx.clone()
    }

    /// 订阅事件
    ///
    /// 注意：
    /// - 如果接收速度跟不上发送速度，可能会丢失事件（lagged error）
    /// - 每个订阅者都会收到完整的事件副本
    pub fn subscribe_events(&self) -> broadcast::Receiver<UploadEvent> {
        self.event_tx.subscribe()
    }

    /// Events for which `filter` returns true, e.g. only terminal outcomes.
    pub fn subscribe_filtered<F>(&self, filter: F) -> FilteredEventReceiver<F>
    where
        F: Fn(&UploadEvent) -> bool,
    {
        FilteredEventReceiver {
            receiver: self.event_tx.subscribe(),
            filter,
        }
    }
}

/// 只收满足条件的事件，跟不上时跳过丢失的部分
pub struct FilteredEventReceiver<F> {
    receiver: broadcast::Receiver<UploadEvent>,
    filter: F,
}

impl<F> FilteredEventReceiver<F>
where
    F: Fn(&UploadEvent) -> bool,
{
    /// `None` once every session handle is gone.
    pub async fn recv(&mut self) -> Option<UploadEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if (self.filter)(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "filtered event receiver lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

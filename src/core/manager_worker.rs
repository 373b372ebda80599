use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use crate::config::SessionConfig;
use crate::media;
use crate::validation::ValidationGate;
use super::errors::{Result, UploadError};
use super::progress::ProgressAggregator;
use super::scheduler::{RunningTransfer, UploadQueueScheduler};
use super::store::RecordStore;
use super::traits::{MediaProbe, Transport};
use super::types::{
    BatchOutcome,
    CandidateFile,
    FailedUpload,
    ManagerCommand,
    ParentId,
    RecordId,
    SelectionReport,
    SessionView,
    SettledUpload,
    UploadEvent,
    UploadState,
};
use super::worker::{UploadWorker, WorkerMessage, WorkerOutcome};

struct RunningProbe {
    cancellation_token: CancellationToken,
    join_handle: JoinHandle<()>,
}

struct SettleWaiter {
    ids: Vec<RecordId>,
    reply: oneshot::Sender<BatchOutcome>,
}

/// 会话 worker：唯一持有记录表的任务
///
/// Every command and every worker message is applied here one at a time, and
/// the session view is republished after each, so readers never observe a
/// half-applied change.
pub(crate) struct UploadManagerWorker {
    transport: Arc<dyn Transport>,
    probe: Option<Arc<dyn MediaProbe>>,
    config: SessionConfig,
    gate: ValidationGate,
    store: RecordStore,
    scheduler: UploadQueueScheduler,
    parent_id: Option<ParentId>,
    probes: HashMap<RecordId, RunningProbe>,
    waiters: Vec<SettleWaiter>,

    event_tx: broadcast::Sender<UploadEvent>,
    view_tx: watch::Sender<SessionView>,
    message_tx: mpsc::UnboundedSender<WorkerMessage>,
    message_rx: mpsc::UnboundedReceiver<WorkerMessage>,
}

impl UploadManagerWorker {
    pub(crate) fn new(
        transport: Arc<dyn Transport>,
        probe: Option<Arc<dyn MediaProbe>>,
        config: SessionConfig,
        parent_id: Option<ParentId>,
        event_tx: broadcast::Sender<UploadEvent>,
        view_tx: watch::Sender<SessionView>,
    ) -> Self {
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            probe,
            gate: ValidationGate::new(config.validation.clone()),
            scheduler: UploadQueueScheduler::new(config.max_concurrent),
            config,
            store: RecordStore::new(),
            parent_id,
            probes: HashMap::new(),
            waiters: Vec::new(),
            event_tx,
            view_tx,
            message_tx,
            message_rx,
        }
    }

    pub(crate) async fn run(mut self, mut command_rx: mpsc::Receiver<ManagerCommand>) {
        info!(
            max_concurrent = self.scheduler.max_concurrent(),
            deferred = self.parent_id.is_none() && self.config.require_parent,
            "upload session started"
        );
        self.publish();

        // 主事件循环
        loop {
            tokio::select! {
                command = command_rx.recv() => {
                    match command {
                        Some(ManagerCommand::Shutdown { reply }) => {
                            self.discard().await;
                            self.publish();
                            let _ = reply.send(());
                            break;
                        }
                        Some(command) => self.handle_command(command).await,
                        None => {
                            self.discard().await;
                            break;
                        }
                    }
                }
                Some(message) = self.message_rx.recv() => {
                    self.handle_message(message);
                }
            }

            self.process_queue();
            self.resolve_waiters();
            self.publish();
        }

        info!("upload session closed");
    }

    async fn handle_command(&mut self, command: ManagerCommand) {
        match command {
            ManagerCommand::Select { files, reply } => {
                let result = self.select(files);
                let _ = reply.send(result);
            }
            ManagerCommand::StartBatch { reply } => {
                let result = self.start_batch();
                let _ = reply.send(result);
            }
            ManagerCommand::AttachParent { parent_id, reply } => {
                let result = self.attach_parent(parent_id);
                let _ = reply.send(result);
            }
            ManagerCommand::Cancel { id, reply } => {
                let result = self.cancel(id).await;
                let _ = reply.send(result);
            }
            ManagerCommand::Pause { id, reply } => {
                let result = self.pause(id).await;
                let _ = reply.send(result);
            }
            ManagerCommand::Resume { id, reply } => {
                let result = self.resume(id);
                let _ = reply.send(result);
            }
            ManagerCommand::Remove { id, reply } => {
                let result = self.remove(id).await;
                let _ = reply.send(result);
            }
            ManagerCommand::Retry { id, reply } => {
                let result = self.retry(id);
                let _ = reply.send(result);
            }
            ManagerCommand::RetryAllFailed { reply } => {
                let retried = self.retry_all_failed();
                let _ = reply.send(retried);
            }
            ManagerCommand::UpdateDetails { id, title, description, reply } => {
                let result = self
                    .store
                    .record_mut(id)
                    .map(|record| record.set_details(title, description));
                let _ = reply.send(result);
            }
            ManagerCommand::WaitSettled { ids, reply } => {
                self.waiters.push(SettleWaiter { ids, reply });
            }
            ManagerCommand::Discard { reply } => {
                self.discard().await;
                let _ = reply.send(());
            }
            ManagerCommand::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    fn handle_message(&mut self, message: WorkerMessage) {
        match message {
            WorkerMessage::Progress { id, attempt, progress } => {
                if !self.scheduler.is_current(&id, attempt) {
                    return;
                }
                if let Some(record) = self.store.get_mut(&id) {
                    if record.apply_progress(attempt, progress.clone()) {
                        let _ = self.event_tx.send(UploadEvent::Progress { id, progress });
                    }
                }
            }
            WorkerMessage::Finished { id, attempt, outcome } => {
                self.handle_finished(id, attempt, outcome);
            }
            WorkerMessage::Probed { id, metadata, thumbnail } => {
                self.probes.remove(&id);
                if let Some(record) = self.store.get_mut(&id) {
                    record.set_media(metadata, thumbnail);
                    let _ = self.event_tx.send(UploadEvent::MediaReady { id });
                }
            }
        }
    }

    fn handle_finished(&mut self, id: RecordId, attempt: u64, outcome: WorkerOutcome) {
        // 取消/暂停之后到达的旧结果
        if !self.scheduler.is_current(&id, attempt) {
            debug!(record_id = %id, attempt, "ignoring stale transfer outcome");
            return;
        }
        self.scheduler.finish(&id);

        let Some(record) = self.store.get_mut(&id) else {
            return;
        };

        let name = record.name().to_string();

        match outcome {
            WorkerOutcome::Completed { url } => match record.complete(url.clone()) {
                Ok(old_state) => {
                    info!(record_id = %id, %name, %url, "upload completed");
                    self.emit_state_change(id, old_state, UploadState::Completed);
                    let _ = self.event_tx.send(UploadEvent::Completed { id, url });
                }
                Err(err) => warn!(record_id = %id, error = %err, "could not apply transfer outcome"),
            },
            WorkerOutcome::Failed { reason } => match record.fail(reason.clone()) {
                Ok(old_state) => {
                    warn!(record_id = %id, %name, %reason, "upload failed");
                    self.emit_state_change(id, old_state, UploadState::Error);
                    let _ = self.event_tx.send(UploadEvent::Failed { id, error: reason });
                }
                Err(err) => warn!(record_id = %id, error = %err, "could not apply transfer outcome"),
            },
            WorkerOutcome::Cancelled => match record.cancel() {
                Ok(Some(old_state)) => {
                    info!(record_id = %id, %name, "upload cancelled by transport");
                    self.emit_state_change(id, old_state, UploadState::Idle);
                }
                Ok(None) => {}
                Err(err) => warn!(record_id = %id, error = %err, "could not apply transfer outcome"),
            },
        }
    }

    fn select(&mut self, files: Vec<CandidateFile>) -> Result<SelectionReport> {
        let existing = self.store.fingerprints();
        let validation = self.gate.check_batch(files, &existing).inspect_err(|err| {
            warn!(error = %err, "selection rejected");
        })?;

        let mut report = SelectionReport {
            added: Vec::with_capacity(validation.accepted.len()),
            rejected: validation.rejected,
        };

        for rejection in &report.rejected {
            info!(name = %rejection.name, reason = %rejection.error, "file rejected");
        }

        for accepted in validation.accepted {
            let id = self.store.insert(accepted.candidate, accepted.artifact_type, accepted.mime);
            let _ = self.event_tx.send(UploadEvent::Added { id });
            self.spawn_probe(id);
            report.added.push(id);
        }

        if self.config.auto_start {
            for id in &report.added {
                self.queue_record(*id)?;
            }
        }

        info!(added = report.added.len(), rejected = report.rejected.len(), "files selected");
        Ok(report)
    }

    fn queue_record(&mut self, id: RecordId) -> Result<()> {
        let old_state = self.store.record_mut(id)?.queue()?;
        self.scheduler.enqueue(id);
        self.emit_state_change(id, old_state, UploadState::Queued);
        Ok(())
    }

    /// 将所有 idle 记录按顺序入队
    fn start_batch(&mut self) -> Result<Vec<RecordId>> {
        let ids = self.store.ids_in_state(UploadState::Idle);
        for id in &ids {
            self.queue_record(*id)?;
        }

        if !self.gate_open() && !ids.is_empty() {
            info!(parked = ids.len(), "no parent yet, uploads are parked");
        }
        Ok(ids)
    }

    /// 设置父实体并释放所有暂存记录
    ///
    /// Returns every record that has not settled yet, in selection order,
    /// including ones the scheduler already admitted.
    fn attach_parent(&mut self, parent_id: ParentId) -> Result<Vec<RecordId>> {
        match &self.parent_id {
            Some(current) if *current != parent_id => {
                return Err(UploadError::ParentAlreadyAttached(current.clone()));
            }
            Some(_) => {}
            None => {
                info!(%parent_id, "parent attached");
                self.parent_id = Some(parent_id.clone());
                let _ = self.event_tx.send(UploadEvent::ParentAttached { parent_id });
            }
        }

        self.start_batch()?;
        Ok(self.store.in_flight_ids())
    }

    fn gate_open(&self) -> bool {
        self.parent_id.is_some() || !self.config.require_parent
    }

    fn process_queue(&mut self) {
        while self.gate_open() {
            let Some(id) = self.scheduler.next_ready() else {
                break;
            };

            if let Err(err) = self.start_upload(id) {
                warn!(record_id = %id, error = %err, "could not start upload");
            }
        }
    }

    fn start_upload(&mut self, id: RecordId) -> Result<()> {
        let record = self.store.record_mut(id)?;
        let old_state = record.state();
        let attempt = record.begin_upload()?;
        let request = record.transfer_request(self.parent_id.clone());

        let cancellation_token = CancellationToken::new();
        let worker = UploadWorker {
            id,
            attempt,
            transport: self.transport.clone(),
            cancellation_token: cancellation_token.clone(),
            message_tx: self.message_tx.clone(),
        };
        let join_handle = tokio::spawn(worker.run(request));

        self.scheduler.start(id, RunningTransfer {
            attempt,
            cancellation_token,
            join_handle,
        });

        debug!(record_id = %id, attempt, active = self.scheduler.active_count(), "upload started");
        self.emit_state_change(id, old_state, UploadState::Uploading);
        Ok(())
    }

    /// 取消：传输中的先停止 worker；已是 idle 或终态时什么都不做
    async fn cancel(&mut self, id: RecordId) -> Result<()> {
        match self.store.record(id)?.state() {
            UploadState::Uploading => {
                self.scheduler.stop(&id).await;
            }
            UploadState::Queued | UploadState::Retrying => {
                self.scheduler.remove_queued(&id);
            }
            _ => {}
        }

        if let Some(old_state) = self.store.record_mut(id)?.cancel()? {
            info!(record_id = %id, "upload cancelled");
            self.emit_state_change(id, old_state, UploadState::Idle);
        }
        Ok(())
    }

    async fn pause(&mut self, id: RecordId) -> Result<()> {
        let state = self.store.record(id)?.state();
        if !state.can_transition_to(UploadState::Paused) {
            return Err(UploadError::InvalidTransition {
                id,
                from: state,
                to: UploadState::Paused,
            });
        }

        self.scheduler.stop(&id).await;
        let old_state = self.store.record_mut(id)?.pause()?;
        self.emit_state_change(id, old_state, UploadState::Paused);
        Ok(())
    }

    fn resume(&mut self, id: RecordId) -> Result<()> {
        let old_state = self.store.record_mut(id)?.resume()?;
        self.scheduler.enqueue(id);
        self.emit_state_change(id, old_state, UploadState::Queued);
        Ok(())
    }

    /// 移除记录：先停止传输与探测，再释放文件内容
    async fn remove(&mut self, id: RecordId) -> Result<()> {
        self.store.record(id)?;

        self.scheduler.stop(&id).await;
        self.scheduler.remove_queued(&id);
        if let Some(probe) = self.probes.remove(&id) {
            probe.cancellation_token.cancel();
            let _ = probe.join_handle.await;
        }

        if let Some(record) = self.store.remove(&id) {
            info!(record_id = %id, name = record.name(), "record removed");
        }
        let _ = self.event_tx.send(UploadEvent::Removed { id });
        Ok(())
    }

    fn retry(&mut self, id: RecordId) -> Result<u32> {
        let record = self.store.record_mut(id)?;
        let retry_count = record.retry()?;
        info!(record_id = %id, name = record.name(), retry_count, "retrying upload");

        self.scheduler.enqueue(id);
        self.emit_state_change(id, UploadState::Error, UploadState::Retrying);
        Ok(retry_count)
    }

    fn retry_all_failed(&mut self) -> Vec<RecordId> {
        self.store
            .ids_in_state(UploadState::Error)
            .into_iter()
            .filter(|id| match self.retry(*id) {
                Ok(_) => true,
                Err(err) => {
                    warn!(record_id = %id, error = %err, "retry failed");
                    false
                }
            })
            .collect()
    }

    /// 丢弃会话中的所有记录
    async fn discard(&mut self) {
        self.scheduler.stop_all().await;

        let probes: Vec<_> = self.probes.drain().map(|(_, probe)| probe).collect();
        for probe in probes {
            probe.cancellation_token.cancel();
            let _ = probe.join_handle.await;
        }

        for id in self.store.ids() {
            self.store.remove(&id);
            let _ = self.event_tx.send(UploadEvent::Removed { id });
        }
        self.resolve_waiters();
    }

    fn spawn_probe(&mut self, id: RecordId) {
        let Some(probe) = self.probe.clone() else {
            return;
        };
        let Some(record) = self.store.get(&id) else {
            return;
        };
        if !record.artifact_type().has_media_metadata() {
            return;
        }

        let source = record.source().clone();
        let artifact_type = record.artifact_type();
        let size = record.size();
        let message_tx = self.message_tx.clone();
        let cancellation_token = CancellationToken::new();

        let join_handle = tokio::spawn({
            let cancellation_token = cancellation_token.clone();
            async move {
                let probed = media::probe_artifact(probe.as_ref(), &source, artifact_type, size, &cancellation_token).await;
                if let Some(probed) = probed {
                    let _ = message_tx.send(WorkerMessage::Probed {
                        id,
                        metadata: probed.metadata,
                        thumbnail: probed.thumbnail,
                    });
                }
            }
        });

        self.probes.insert(id, RunningProbe {
            cancellation_token,
            join_handle,
        });
    }

    fn is_settled(&self, id: &RecordId) -> bool {
        match self.store.get(id) {
            Some(record) => matches!(
                record.state(),
                UploadState::Completed | UploadState::Error | UploadState::Idle
            ),
            None => true,
        }
    }

    fn collect_outcome(&self, ids: &[RecordId]) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for id in ids {
            let Some(record) = self.store.get(id) else {
                outcome.cancelled.push(*id);
                continue;
            };

            match (record.state(), record.result_url(), record.error_reason()) {
                (UploadState::Completed, Some(url), _) => outcome.successful.push(SettledUpload {
                    id: *id,
                    name: record.name().to_string(),
                    role: record.role(),
                    artifact_type: record.artifact_type(),
                    title: record.title().map(str::to_string),
                    url: url.to_string(),
                }),
                (UploadState::Error, _, reason) => outcome.failed.push(FailedUpload {
                    id: *id,
                    name: record.name().to_string(),
                    reason: reason.unwrap_or("unknown error").to_string(),
                }),
                _ => outcome.cancelled.push(*id),
            }
        }
        outcome
    }

    fn resolve_waiters(&mut self) {
        let waiters = std::mem::take(&mut self.waiters);
        for waiter in waiters {
            if waiter.reply.is_closed() {
                continue;
            }

            if waiter.ids.iter().all(|id| self.is_settled(id)) {
                let outcome = self.collect_outcome(&waiter.ids);
                let _ = waiter.reply.send(outcome);
            } else {
                self.waiters.push(waiter);
            }
        }
    }

    fn publish(&self) {
        let records = self.store.views();
        let stats = ProgressAggregator::aggregate(&records);
        self.view_tx.send_replace(SessionView {
            parent_id: self.parent_id.clone(),
            gate_open: self.gate_open(),
            records,
            stats,
        });
    }

    fn emit_state_change(&self, id: RecordId, old_state: UploadState, new_state: UploadState) {
        let _ = self.event_tx.send(UploadEvent::StateChanged {
            id,
            old_state,
            new_state,
        });
    }
}

use std::collections::{HashMap, VecDeque};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use super::types::RecordId;

/// 正在执行的传输
pub(crate) struct RunningTransfer {
    pub attempt: u64,
    pub cancellation_token: CancellationToken,
    pub join_handle: JoinHandle<()>,
}

/// 并发上限为 K 的 FIFO 调度器
///
/// Only admission is decided here. Starting the worker and the state
/// transition belong to the session worker.
pub struct UploadQueueScheduler {
    max_concurrent: usize,
    queue: VecDeque<RecordId>,
    running: HashMap<RecordId, RunningTransfer>,
}

impl UploadQueueScheduler {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            queue: VecDeque::new(),
            running: HashMap::new(),
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn active_count(&self) -> usize {
        self.running.len()
    }

    pub fn queued_count(&self) -> usize {
        self.queue.len()
    }

    pub fn has_slot(&self) -> bool {
        self.running.len() < self.max_concurrent
    }

    pub fn is_running(&self, id: &RecordId) -> bool {
        self.running.contains_key(id)
    }

    pub fn enqueue(&mut self, id: RecordId) {
        if !self.queue.contains(&id) && !self.running.contains_key(&id) {
            self.queue.push_back(id);
        }
    }

    pub fn remove_queued(&mut self, id: &RecordId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|queued| queued != id);
        before != self.queue.len()
    }

    /// 有空闲槽位时弹出队头
    pub fn next_ready(&mut self) -> Option<RecordId> {
        if !self.has_slot() {
            return None;
        }
        self.queue.pop_front()
    }

    pub(crate) fn start(&mut self, id: RecordId, transfer: RunningTransfer) {
        self.running.insert(id, transfer);
    }

    /// Whether `attempt` is the transfer currently running for `id`.
    pub fn is_current(&self, id: &RecordId, attempt: u64) -> bool {
        self.running
            .get(id)
            .map(|transfer| transfer.attempt == attempt)
            .unwrap_or(false)
    }

    pub(crate) fn finish(&mut self, id: &RecordId) -> Option<RunningTransfer> {
        self.running.remove(id)
    }

    /// 取消并等待 worker 退出，之后不会再读取文件内容
    pub async fn stop(&mut self, id: &RecordId) -> bool {
        match self.running.remove(id) {
            Some(transfer) => {
                transfer.cancellation_token.cancel();
                let _ = transfer.join_handle.await;
                true
            }
            None => false,
        }
    }

    pub async fn stop_all(&mut self) {
        self.queue.clear();
        let running: Vec<_> = self.running.drain().map(|(_, transfer)| transfer).collect();
        for transfer in &running {
            transfer.cancellation_token.cancel();
        }
        for transfer in running {
            let _ = transfer.join_handle.await;
        }
    }
}

use std::sync::Arc;
use std::time::Instant;
use parking_lot::Mutex;
use serde::Serialize;
use super::types::{RecordView, TransferProgress, UploadState};

pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// 聚合统计信息
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    /// 总记录数
    pub total: usize,
    pub idle: usize,
    pub queued: usize,
    pub uploading: usize,
    pub paused: usize,
    pub retrying: usize,
    pub completed: usize,
    pub error: usize,
    /// idle + queued + paused + retrying
    pub pending: usize,
    /// 曾经开始传输的记录的总字节数
    pub bytes_total: u64,
    /// 已完成记录的字节数 + 传输中记录已发送的字节数
    pub bytes_completed: u64,
    /// completed / total
    pub record_percent: f64,
    /// bytes_completed / bytes_total
    pub byte_percent: f64,
    /// 总体速度（所有传输中记录的总和）
    pub speed: f64,
    pub eta_seconds: Option<u64>,
}

impl SessionStats {
    /// completed + uploading + error + pending == total
    pub fn is_consistent(&self) -> bool {
        self.completed + self.uploading + self.error + self.pending == self.total
    }

    /// No record is waiting or transferring.
    pub fn is_settled(&self) -> bool {
        self.uploading == 0 && self.queued == 0 && self.retrying == 0 && self.paused == 0
    }
}

/// 从记录表派生统计，不持有任何状态
pub struct ProgressAggregator;

impl ProgressAggregator {
    pub fn aggregate(records: &[RecordView]) -> SessionStats {
        let mut stats = SessionStats {
            total: records.len(),
            ..Default::default()
        };

        for record in records {
            match record.state {
                UploadState::Idle => stats.idle += 1,
                UploadState::Queued => stats.queued += 1,
                UploadState::Uploading => stats.uploading += 1,
                UploadState::Paused => stats.paused += 1,
                UploadState::Retrying => stats.retrying += 1,
                UploadState::Completed => stats.completed += 1,
                UploadState::Error => stats.error += 1,
            }

            if !record.ever_started {
                continue;
            }

            stats.bytes_total += record.size;
            match record.state {
                UploadState::Completed => stats.bytes_completed += record.size,
                UploadState::Uploading => {
                    if let Some(progress) = &record.progress {
                        stats.bytes_completed += progress.bytes_done.min(record.size);
                        stats.speed += progress.speed;
                    }
                }
                _ => {}
            }
        }

        stats.pending = stats.idle + stats.queued + stats.paused + stats.retrying;

        if stats.total > 0 {
            stats.record_percent = stats.completed as f64 / stats.total as f64 * 100.0;
        }
        if stats.bytes_total > 0 {
            stats.byte_percent = stats.bytes_completed as f64 / stats.bytes_total as f64 * 100.0;
        }

        let in_flight_remaining: u64 = records
            .iter()
            .filter(|record| record.state == UploadState::Uploading)
            .filter_map(|record| record.progress.as_ref())
            .map(|progress| progress.bytes_total.saturating_sub(progress.bytes_done))
            .sum();
        stats.eta_seconds = if stats.uploading == 0 {
            None
        } else if in_flight_remaining == 0 {
            Some(0)
        } else if stats.speed > 0.0 {
            Some((in_flight_remaining as f64 / stats.speed).ceil() as u64)
        } else {
            None
        };

        stats
    }
}

/// 速度计算器（使用环形缓冲区）
pub struct SpeedCalculator {
    samples: Vec<SpeedSample>,
    write_index: usize,
    sample_count: usize,
    max_samples: usize,
}

/// 样本
#[derive(Clone, Copy, Debug)]
struct SpeedSample {
    bytes_total: u64,
    timestamp: Instant,
}

impl SpeedCalculator {
    pub fn new(max_samples: usize) -> Self {
        let max_samples = max_samples.max(2);
        Self {
            samples: vec![SpeedSample {
                bytes_total: 0,
                timestamp: Instant::now(),
            }; max_samples],
            write_index: 0,
            sample_count: 0,
            max_samples,
        }
    }

    pub fn add_sample(&mut self, bytes_total: u64, timestamp: Instant) {
        self.samples[self.write_index] = SpeedSample {
            bytes_total,
            timestamp,
        };

        self.write_index = (self.write_index + 1) % self.max_samples;
        self.sample_count = self.sample_count.saturating_add(1).min(self.max_samples);
    }

    /// 使用最近的几个样本计算瞬时速度
    pub fn instant_speed(&self) -> f64 {
        if self.sample_count < 2 {
            return 0.0;
        }

        let window_size = (self.sample_count / 3).clamp(2, 5);

        let newest_idx = (self.write_index + self.max_samples - 1) % self.max_samples;
        let oldest_idx = (self.write_index + self.max_samples - window_size) % self.max_samples;

        let newest = &self.samples[newest_idx];
        let oldest = &self.samples[oldest_idx];

        if newest.timestamp <= oldest.timestamp || newest.bytes_total < oldest.bytes_total {
            return 0.0;
        }

        let bytes_diff = newest.bytes_total - oldest.bytes_total;
        let time_diff = newest.timestamp.duration_since(oldest.timestamp).as_secs_f64();

        if time_diff > 0.0 {
            bytes_diff as f64 / time_diff
        } else {
            0.0
        }
    }
}

/// 传输层通过它上报进度，速度与 ETA 在这里计算
pub struct ProgressReporter {
    callback: ProgressCallback,
    calculator: Mutex<SpeedCalculator>,
    start_time: Instant,
}

impl ProgressReporter {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback,
            calculator: Mutex::new(SpeedCalculator::new(20)),
            start_time: Instant::now(),
        }
    }

    /// A reporter that drops every sample.
    pub fn noop() -> Self {
        Self::new(Arc::new(|_| {}))
    }

    pub fn report(&self, bytes_done: u64, bytes_total: u64) {
        let now = Instant::now();
        let instant_speed = {
            let mut calculator = self.calculator.lock();
            calculator.add_sample(bytes_done, now);
            calculator.instant_speed()
        };

        let speed = if instant_speed > 0.0 {
            instant_speed
        } else {
            let elapsed = now.duration_since(self.start_time).as_secs_f64();
            if elapsed > 0.0 { bytes_done as f64 / elapsed } else { 0.0 }
        };

        (self.callback)(TransferProgress::new(bytes_done, bytes_total, speed));
    }
}

use std::collections::HashMap;
use super::errors::{Result, UploadError};
use super::record::UploadRecord;
use super::types::{ArtifactType, CandidateFile, FileFingerprint, RecordId, RecordView, UploadState};

/// 记录表：会话中唯一可变的共享结构，只由会话 worker 持有
#[derive(Debug, Default)]
pub struct RecordStore {
    records: HashMap<RecordId, UploadRecord>,
    next_order: u64,
}

impl RecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, candidate: CandidateFile, artifact_type: ArtifactType, mime: String) -> RecordId {
        let record = UploadRecord::new(candidate, artifact_type, mime, self.next_order);
        self.next_order += 1;

        let id = record.id();
        self.records.insert(id, record);
        id
    }

    pub fn get(&self, id: &RecordId) -> Option<&UploadRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &RecordId) -> Option<&mut UploadRecord> {
        self.records.get_mut(id)
    }

    pub fn record(&self, id: RecordId) -> Result<&UploadRecord> {
        self.records.get(&id).ok_or(UploadError::RecordNotFound(id))
    }

    pub fn record_mut(&mut self, id: RecordId) -> Result<&mut UploadRecord> {
        self.records.get_mut(&id).ok_or(UploadError::RecordNotFound(id))
    }

    /// Removes the record and hands it back; dropping it releases the blob.
    pub fn remove(&mut self, id: &RecordId) -> Option<UploadRecord> {
        self.records.remove(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 按插入顺序
    pub fn ordered(&self) -> Vec<&UploadRecord> {
        let mut records: Vec<_> = self.records.values().collect();
        records.sort_by_key(|record| record.order());
        records
    }

    pub fn ids(&self) -> Vec<RecordId> {
        self.ordered().into_iter().map(|record| record.id()).collect()
    }

    pub fn ids_in_state(&self, state: UploadState) -> Vec<RecordId> {
        self.ordered()
            .into_iter()
            .filter(|record| record.state() == state)
            .map(|record| record.id())
            .collect()
    }

    /// queued, uploading, paused or retrying
    pub fn in_flight_ids(&self) -> Vec<RecordId> {
        self.ordered()
            .into_iter()
            .filter(|record| {
                matches!(
                    record.state(),
                    UploadState::Queued | UploadState::Uploading | UploadState::Paused | UploadState::Retrying
                )
            })
            .map(|record| record.id())
            .collect()
    }

    pub fn fingerprints(&self) -> Vec<FileFingerprint> {
        self.records.values().map(|record| record.fingerprint()).collect()
    }

    pub fn views(&self) -> Vec<RecordView> {
        self.ordered().into_iter().map(|record| record.view()).collect()
    }
}

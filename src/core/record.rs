use chrono::{DateTime, Utc};
use super::errors::{Result, UploadError};
use super::types::{
    ArtifactRole,
    ArtifactType,
    CandidateFile,
    FileFingerprint,
    MediaMetadata,
    ParentId,
    RecordId,
    RecordView,
    SourceBlob,
    Thumbnail,
    TransferProgress,
    TransferRequest,
    UploadState,
};

impl UploadState {
    /// 状态转换表
    pub fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::*;

        matches!(
            (self, next),
            (Idle, Queued)
                | (Queued, Uploading)
                | (Uploading, Completed)
                | (Uploading, Error)
                | (Uploading, Idle)
                | (Uploading, Paused)
                | (Paused, Queued)
                | (Error, Retrying)
                | (Retrying, Uploading)
                // cancelling a record that is still waiting for a slot
                | (Queued, Idle)
                | (Retrying, Idle)
                | (Paused, Idle)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Completed | UploadState::Error)
    }

    /// Waiting in the scheduler queue for a slot.
    pub fn is_waiting(self) -> bool {
        matches!(self, UploadState::Queued | UploadState::Retrying)
    }
}

/// 一个被选中的文件及其生命周期状态
///
/// `state` 只能通过下面的方法改变，每个方法都会先检查转换表。
#[derive(Debug)]
pub struct UploadRecord {
    id: RecordId,
    order: u64,
    name: String,
    mime: String,
    size: u64,
    last_modified: DateTime<Utc>,
    artifact_type: ArtifactType,
    role: ArtifactRole,
    title: Option<String>,
    description: Option<String>,
    source: SourceBlob,
    state: UploadState,
    progress: Option<TransferProgress>,
    retry_count: u32,
    attempt: u64,
    ever_started: bool,
    result_url: Option<String>,
    error_reason: Option<String>,
    media: Option<MediaMetadata>,
    thumbnail: Option<Thumbnail>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl UploadRecord {
    pub fn new(candidate: CandidateFile, artifact_type: ArtifactType, mime: String, order: u64) -> Self {
        Self {
            id: RecordId::new(),
            order,
            name: candidate.name,
            mime,
            size: candidate.size,
            last_modified: candidate.last_modified,
            artifact_type,
            role: candidate.role,
            title: candidate.title,
            description: candidate.description,
            source: candidate.source,
            state: UploadState::Idle,
            progress: None,
            retry_count: 0,
            attempt: 0,
            ever_started: false,
            result_url: None,
            error_reason: None,
            media: None,
            thumbnail: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn order(&self) -> u64 {
        self.order
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn state(&self) -> UploadState {
        self.state
    }

    pub fn artifact_type(&self) -> ArtifactType {
        self.artifact_type
    }

    pub fn role(&self) -> ArtifactRole {
        self.role
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn result_url(&self) -> Option<&str> {
        self.result_url.as_deref()
    }

    pub fn error_reason(&self) -> Option<&str> {
        self.error_reason.as_deref()
    }

    pub fn progress(&self) -> Option<&TransferProgress> {
        self.progress.as_ref()
    }

    pub fn source(&self) -> &SourceBlob {
        &self.source
    }

    pub fn fingerprint(&self) -> FileFingerprint {
        FileFingerprint {
            name: self.name.clone(),
            size: self.size,
            last_modified: self.last_modified,
        }
    }

    fn transition(&mut self, next: UploadState) -> Result<UploadState> {
        let old_state = self.state;
        if !old_state.can_transition_to(next) {
            return Err(UploadError::InvalidTransition {
                id: self.id,
                from: old_state,
                to: next,
            });
        }

        // 进度字段只在 uploading 期间存在
        if old_state == UploadState::Uploading {
            self.progress = None;
        }

        self.state = next;
        Ok(old_state)
    }

    /// idle -> queued
    pub fn queue(&mut self) -> Result<UploadState> {
        self.transition(UploadState::Queued)
    }

    /// queued/retrying -> uploading, returns the new attempt number.
    pub fn begin_upload(&mut self) -> Result<u64> {
        self.transition(UploadState::Uploading)?;
        self.attempt += 1;
        self.ever_started = true;
        self.started_at = Some(Utc::now());
        self.progress = Some(TransferProgress::starting(self.size));
        Ok(self.attempt)
    }

    /// Applies a progress sample if it belongs to the running attempt.
    pub fn apply_progress(&mut self, attempt: u64, progress: TransferProgress) -> bool {
        if self.state != UploadState::Uploading || self.attempt != attempt {
            return false;
        }

        self.progress = Some(progress);
        true
    }

    pub fn complete(&mut self, url: String) -> Result<UploadState> {
        let old_state = self.transition(UploadState::Completed)?;
        self.result_url = Some(url);
        self.completed_at = Some(Utc::now());
        Ok(old_state)
    }

    pub fn fail(&mut self, reason: String) -> Result<UploadState> {
        let old_state = self.transition(UploadState::Error)?;
        self.error_reason = Some(reason);
        self.completed_at = Some(Utc::now());
        Ok(old_state)
    }

    /// 取消：回到 idle。已经是 idle 或终态时不做任何事。
    pub fn cancel(&mut self) -> Result<Option<UploadState>> {
        match self.state {
            UploadState::Uploading | UploadState::Queued | UploadState::Retrying | UploadState::Paused => {
                self.transition(UploadState::Idle).map(Some)
            }
            _ => Ok(None),
        }
    }

    pub fn pause(&mut self) -> Result<UploadState> {
        self.transition(UploadState::Paused)
    }

    pub fn resume(&mut self) -> Result<UploadState> {
        self.transition(UploadState::Queued)
    }

    /// error -> retrying, returns the new retry count.
    pub fn retry(&mut self) -> Result<u32> {
        self.transition(UploadState::Retrying)?;
        self.retry_count += 1;
        self.error_reason = None;
        self.completed_at = None;
        Ok(self.retry_count)
    }

    pub fn set_details(&mut self, title: Option<String>, description: Option<String>) {
        if title.is_some() {
            self.title = title;
        }
        if description.is_some() {
            self.description = description;
        }
    }

    pub fn set_media(&mut self, metadata: MediaMetadata, thumbnail: Option<Thumbnail>) {
        self.media = Some(metadata);
        self.thumbnail = thumbnail;
    }

    pub fn transfer_request(&self, parent_id: Option<ParentId>) -> TransferRequest {
        TransferRequest {
            record_id: self.id,
            name: self.name.clone(),
            mime: self.mime.clone(),
            size: self.size,
            artifact_type: self.artifact_type,
            role: self.role,
            destination: self.role.destination(self.artifact_type).to_string(),
            parent_id,
            title: self.title.clone(),
            description: self.description.clone(),
            source: self.source.clone(),
        }
    }

    pub fn view(&self) -> RecordView {
        RecordView {
            id: self.id,
            order: self.order,
            name: self.name.clone(),
            mime: self.mime.clone(),
            size: self.size,
            last_modified: self.last_modified,
            artifact_type: self.artifact_type,
            role: self.role,
            title: self.title.clone(),
            description: self.description.clone(),
            state: self.state,
            progress: self.progress.clone(),
            retry_count: self.retry_count,
            attempt: self.attempt,
            ever_started: self.ever_started,
            result_url: self.result_url.clone(),
            error_reason: self.error_reason.clone(),
            media: self.media.clone(),
            thumbnail: self.thumbnail.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> UploadRecord {
        let candidate = CandidateFile::from_bytes("poster.png", vec![0u8; 128], Utc::now());
        UploadRecord::new(candidate, ArtifactType::Image, "image/png".to_string(), 0)
    }

    #[test]
    fn test_upload_state_transition() {
        use UploadState::*;

        // valid
        assert!(Idle.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Uploading));
        assert!(Uploading.can_transition_to(Completed));
        assert!(Uploading.can_transition_to(Error));
        assert!(Uploading.can_transition_to(Idle));
        assert!(Uploading.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Queued));
        assert!(Error.can_transition_to(Retrying));
        assert!(Retrying.can_transition_to(Uploading));

        // invalid
        assert!(!Idle.can_transition_to(Uploading));
        assert!(!Completed.can_transition_to(Uploading));
        assert!(!Completed.can_transition_to(Idle));
        assert!(!Error.can_transition_to(Uploading));
        assert!(!Error.can_transition_to(Queued));
        assert!(!Queued.can_transition_to(Completed));
        assert!(!Paused.can_transition_to(Uploading));
    }

    #[test]
    fn test_illegal_transition_is_rejected() {
        let mut record = record();
        let err = record.complete("https://cdn/x".to_string()).unwrap_err();
        assert!(matches!(err, UploadError::InvalidTransition { from: UploadState::Idle, to: UploadState::Completed, .. }));
        assert_eq!(record.state(), UploadState::Idle);
        assert!(record.result_url().is_none());
    }

    #[test]
    fn test_progress_only_while_uploading() {
        let mut record = record();
        record.queue().unwrap();
        assert!(record.progress().is_none());

        let attempt = record.begin_upload().unwrap();
        assert_eq!(attempt, 1);
        assert!(record.apply_progress(attempt, TransferProgress::new(64, 128, 10.0)));
        assert_eq!(record.progress().unwrap().bytes_done, 64);

        // stale attempt
        assert!(!record.apply_progress(attempt + 1, TransferProgress::new(100, 128, 10.0)));

        record.complete("https://cdn/poster.png".to_string()).unwrap();
        assert!(record.progress().is_none());
        assert_eq!(record.result_url(), Some("https://cdn/poster.png"));
        assert!(!record.apply_progress(attempt, TransferProgress::new(128, 128, 10.0)));
    }

    #[test]
    fn test_failure_does_not_touch_retry_count() {
        let mut record = record();
        record.queue().unwrap();
        record.begin_upload().unwrap();
        record.fail("connection reset".to_string()).unwrap();

        assert_eq!(record.state(), UploadState::Error);
        assert_eq!(record.retry_count(), 0);
        assert_eq!(record.error_reason(), Some("connection reset"));
    }

    #[test]
    fn test_retry_monotonic() {
        let mut record = record();
        record.queue().unwrap();

        for expected in 1..=3 {
            record.begin_upload().unwrap();
            record.fail("timeout".to_string()).unwrap();
            assert_eq!(record.retry().unwrap(), expected);
            assert!(record.error_reason().is_none());
            assert_eq!(record.state(), UploadState::Retrying);
        }

        assert_eq!(record.begin_upload().unwrap(), 4);
        record.complete("https://cdn/ok".to_string()).unwrap();
        assert_eq!(record.retry_count(), 3);
        assert!(record.error_reason().is_none());
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut record = record();
        record.queue().unwrap();
        record.begin_upload().unwrap();

        assert_eq!(record.cancel().unwrap(), Some(UploadState::Uploading));
        assert_eq!(record.state(), UploadState::Idle);
        assert!(record.error_reason().is_none());
        assert!(record.progress().is_none());

        assert_eq!(record.cancel().unwrap(), None);
        assert_eq!(record.state(), UploadState::Idle);
    }

    #[test]
    fn test_cancel_completed_is_noop() {
        let mut record = record();
        record.queue().unwrap();
        record.begin_upload().unwrap();
        record.complete("https://cdn/done".to_string()).unwrap();

        assert_eq!(record.cancel().unwrap(), None);
        assert_eq!(record.state(), UploadState::Completed);
        assert_eq!(record.result_url(), Some("https://cdn/done"));
    }

    #[test]
    fn test_transfer_request_carries_parent() {
        let candidate = CandidateFile::from_bytes("trailer.mp4", vec![1u8; 16], Utc::now())
            .with_role(ArtifactRole::Trailer)
            .with_title("Teaser");
        let record = UploadRecord::new(candidate, ArtifactType::Video, "video/mp4".to_string(), 3);

        let request = record.transfer_request(Some(ParentId::new("pitch-42")));
        assert_eq!(request.destination, "trailers");
        assert_eq!(request.parent_id, Some(ParentId::new("pitch-42")));

        let metadata = request.metadata();
        assert_eq!(metadata.get("parent_id").map(String::as_str), Some("pitch-42"));
        assert_eq!(metadata.get("title").map(String::as_str), Some("Teaser"));
        assert_eq!(metadata.get("filetype").map(String::as_str), Some("video/mp4"));
    }
}

use std::collections::BTreeMap;
use std::path::PathBuf;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;
use crate::validation::Rejection;
use super::errors::Result;
use super::progress::SessionStats;

/// 上传记录唯一标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 父实体（pitch）的持久化标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ParentId(String);

impl ParentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ParentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// 文件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Image,
    Video,
    Audio,
    Document,
    Archive,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Image => "image",
            ArtifactType::Video => "video",
            ArtifactType::Audio => "audio",
            ArtifactType::Document => "document",
            ArtifactType::Archive => "archive",
        }
    }

    /// Whether dimensions or duration can be probed for this type.
    pub fn has_media_metadata(&self) -> bool {
        matches!(self, ArtifactType::Image | ArtifactType::Video | ArtifactType::Audio)
    }

    pub fn has_preview(&self) -> bool {
        matches!(self, ArtifactType::Image | ArtifactType::Video)
    }
}

impl std::fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 文件在 pitch 中承担的角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    /// 封面图
    Cover,
    /// 预告片
    Trailer,
    /// 路演文档
    PitchDeck,
    /// 剧本
    Script,
    /// 保密协议
    Nda,
    /// 其他附加素材
    #[default]
    Supporting,
}

impl ArtifactRole {
    /// Field on the parent entity that receives this artifact's URL.
    pub fn parent_field(&self) -> Option<&'static str> {
        match self {
            ArtifactRole::Cover => Some("cover_image_url"),
            ArtifactRole::Trailer => Some("trailer_url"),
            ArtifactRole::PitchDeck => Some("pitch_deck_url"),
            ArtifactRole::Script => Some("script_url"),
            ArtifactRole::Nda => Some("nda_document_url"),
            ArtifactRole::Supporting => None,
        }
    }

    /// Destination category handed to the transport.
    pub fn destination(&self, artifact_type: ArtifactType) -> &'static str {
        match self {
            ArtifactRole::Cover => "covers",
            ArtifactRole::Trailer => "trailers",
            ArtifactRole::PitchDeck => "decks",
            ArtifactRole::Script => "scripts",
            ArtifactRole::Nda => "nda",
            ArtifactRole::Supporting => match artifact_type {
                ArtifactType::Image => "images",
                ArtifactType::Video => "videos",
                ArtifactType::Audio => "audio",
                ArtifactType::Document => "documents",
                ArtifactType::Archive => "archives",
            },
        }
    }
}

/// 上传状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    /// 已选择，未入队
    Idle,
    /// 等待中（在队列中）
    Queued,
    /// 上传中
    Uploading,
    /// 已暂停
    Paused,
    /// 重试中（等待空闲槽位）
    Retrying,
    /// 已完成
    Completed,
    /// 失败
    Error,
}

/// 文件内容，只归属于一条记录
#[derive(Debug, Clone)]
pub enum SourceBlob {
    File(PathBuf),
    Memory(Bytes),
}

impl SourceBlob {
    pub async fn read_all(&self) -> std::io::Result<Bytes> {
        match self {
            SourceBlob::File(path) => Ok(Bytes::from(tokio::fs::read(path).await?)),
            SourceBlob::Memory(data) => Ok(data.clone()),
        }
    }
}

/// (name, size, last modified) 用于判重
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FileFingerprint {
    pub name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// 用户选择的待上传文件
#[derive(Debug, Clone)]
pub struct CandidateFile {
    pub name: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub mime: Option<String>,
    pub role: ArtifactRole,
    pub title: Option<String>,
    pub description: Option<String>,
    pub source: SourceBlob,
}

impl CandidateFile {
    pub async fn from_path(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("{} is not a file", path.display()),
            ));
        }

        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::InvalidInput, "path has no file name"))?;
        let last_modified = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Self {
            name,
            size: metadata.len(),
            last_modified,
            mime: None,
            role: ArtifactRole::default(),
            title: None,
            description: None,
            source: SourceBlob::File(path),
        })
    }

    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>, last_modified: DateTime<Utc>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            last_modified,
            mime: None,
            role: ArtifactRole::default(),
            title: None,
            description: None,
            source: SourceBlob::Memory(data),
        }
    }

    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn with_role(mut self, role: ArtifactRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn fingerprint(&self) -> FileFingerprint {
        FileFingerprint {
            name: self.name.clone(),
            size: self.size,
            last_modified: self.last_modified,
        }
    }
}

/// 单个记录的传输进度，仅在 uploading 状态下存在
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TransferProgress {
    pub bytes_done: u64,
    pub bytes_total: u64,
    /// 0-100
    pub percent: f64,
    /// 字节/秒
    pub speed: f64,
    pub eta_seconds: Option<u64>,
}

impl TransferProgress {
    pub fn new(bytes_done: u64, bytes_total: u64, speed: f64) -> Self {
        let percent = if bytes_total > 0 {
            (bytes_done as f64 / bytes_total as f64 * 100.0).min(100.0)
        } else {
            0.0
        };

        let remaining = bytes_total.saturating_sub(bytes_done);
        let eta_seconds = if remaining == 0 {
            Some(0)
        } else if speed > 0.0 {
            Some((remaining as f64 / speed).ceil() as u64)
        } else {
            None
        };

        Self { bytes_done, bytes_total, percent, speed, eta_seconds }
    }

    pub fn starting(bytes_total: u64) -> Self {
        Self {
            bytes_done: 0,
            bytes_total,
            percent: 0.0,
            speed: 0.0,
            eta_seconds: None,
        }
    }
}

/// 尽力而为提取的媒体信息
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MediaMetadata {
    pub size: u64,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub duration_seconds: Option<f64>,
}

impl MediaMetadata {
    pub fn size_only(size: u64) -> Self {
        Self { size, ..Default::default() }
    }
}

/// 预览图
#[derive(Debug, Clone, Serialize)]
pub struct Thumbnail {
    pub width: u32,
    pub height: u32,
    pub mime: String,
    #[serde(skip)]
    pub data: Bytes,
}

/// 记录的只读视图（不含文件内容）
#[derive(Debug, Clone, Serialize)]
pub struct RecordView {
    pub id: RecordId,
    pub order: u64,
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub artifact_type: ArtifactType,
    pub role: ArtifactRole,
    pub title: Option<String>,
    pub description: Option<String>,
    pub state: UploadState,
    pub progress: Option<TransferProgress>,
    pub retry_count: u32,
    pub attempt: u64,
    pub ever_started: bool,
    pub result_url: Option<String>,
    pub error_reason: Option<String>,
    pub media: Option<MediaMetadata>,
    pub thumbnail: Option<Thumbnail>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// 会话视图：记录 + 派生统计
#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionView {
    pub parent_id: Option<ParentId>,
    /// 队列中的记录是否可以开始传输（有父实体，或会话不要求父实体）
    pub gate_open: bool,
    pub records: Vec<RecordView>,
    pub stats: SessionStats,
}

impl SessionView {
    pub fn record(&self, id: RecordId) -> Option<&RecordView> {
        self.records.iter().find(|record| record.id == id)
    }

    pub fn count_in(&self, state: UploadState) -> usize {
        self.records.iter().filter(|record| record.state == state).count()
    }
}

/// 一次传输请求
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub record_id: RecordId,
    pub name: String,
    pub mime: String,
    pub size: u64,
    pub artifact_type: ArtifactType,
    pub role: ArtifactRole,
    pub destination: String,
    pub parent_id: Option<ParentId>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub source: SourceBlob,
}

impl TransferRequest {
    /// Key/value metadata sent alongside the file body.
    pub fn metadata(&self) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        metadata.insert("filename".to_string(), self.name.clone());
        metadata.insert("filetype".to_string(), self.mime.clone());
        metadata.insert("artifact_type".to_string(), self.artifact_type.as_str().to_string());
        metadata.insert("record_id".to_string(), self.record_id.to_string());
        if let Some(parent_id) = &self.parent_id {
            metadata.insert("parent_id".to_string(), parent_id.to_string());
        }
        if let Some(title) = &self.title {
            metadata.insert("title".to_string(), title.clone());
        }
        if let Some(description) = &self.description {
            metadata.insert("description".to_string(), description.clone());
        }
        metadata
    }
}

/// 传输成功的回执
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReceipt {
    pub url: String,
}

/// select 的结果
#[derive(Debug, Default)]
pub struct SelectionReport {
    pub added: Vec<RecordId>,
    pub rejected: Vec<Rejection>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SettledUpload {
    pub id: RecordId,
    pub name: String,
    pub role: ArtifactRole,
    pub artifact_type: ArtifactType,
    pub title: Option<String>,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedUpload {
    pub id: RecordId,
    pub name: String,
    pub reason: String,
}

/// 一组记录全部结束后的划分
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub successful: Vec<SettledUpload>,
    pub failed: Vec<FailedUpload>,
    /// 被取消（回到 idle）或已移除的记录
    pub cancelled: Vec<RecordId>,
}

impl BatchOutcome {
    pub fn is_partial(&self) -> bool {
        !self.successful.is_empty() && !self.failed.is_empty()
    }
}

/// 上传管理器命令
pub enum ManagerCommand {
    /// 选择文件
    Select {
        files: Vec<CandidateFile>,
        reply: oneshot::Sender<Result<SelectionReport>>,
    },

    /// 将所有 idle 记录入队
    StartBatch {
        reply: oneshot::Sender<Result<Vec<RecordId>>>,
    },

    /// 设置父实体并释放所有暂存的记录
    AttachParent {
        parent_id: ParentId,
        reply: oneshot::Sender<Result<Vec<RecordId>>>,
    },

    /// 取消
    Cancel {
        id: RecordId,
        reply: oneshot::Sender<Result<()>>,
    },

    /// 暂停
    Pause {
        id: RecordId,
        reply: oneshot::Sender<Result<()>>,
    },

    /// 恢复
    Resume {
        id: RecordId,
        reply: oneshot::Sender<Result<()>>,
    },

    /// 移除记录（先取消传输）
    Remove {
        id: RecordId,
        reply: oneshot::Sender<Result<()>>,
    },

    /// 手动重试
    Retry {
        id: RecordId,
        reply: oneshot::Sender<Result<u32>>,
    },

    /// 重试所有失败的记录
    RetryAllFailed {
        reply: oneshot::Sender<Vec<RecordId>>,
    },

    /// 修改标题/描述
    UpdateDetails {
        id: RecordId,
        title: Option<String>,
        description: Option<String>,
        reply: oneshot::Sender<Result<()>>,
    },

    /// 等待一组记录全部结束
    WaitSettled {
        ids: Vec<RecordId>,
        reply: oneshot::Sender<BatchOutcome>,
    },

    /// 丢弃会话：取消所有传输并移除所有记录
    Discard {
        reply: oneshot::Sender<()>,
    },

    /// 关闭管理器
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// 上传事件
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// 记录已加入
    Added {
        id: RecordId,
    },

    /// 状态变更
    StateChanged {
        id: RecordId,
        old_state: UploadState,
        new_state: UploadState,
    },

    /// 进度更新
    Progress {
        id: RecordId,
        progress: TransferProgress,
    },

    /// 任务完成
    Completed {
        id: RecordId,
        url: String,
    },

    /// 任务失败
    Failed {
        id: RecordId,
        error: String,
    },

    /// 元数据/预览图已就绪
    MediaReady {
        id: RecordId,
    },

    /// 记录已移除
    Removed {
        id: RecordId,
    },

    /// 父实体已设置
    ParentAttached {
        parent_id: ParentId,
    },
}

// 静态断言确保类型是 Send 的
const _: () = {
    fn assert_send<T: Send>() {}
    fn assert_types() {
        assert_send::<CandidateFile>();
        assert_send::<UploadEvent>();
        assert_send::<ManagerCommand>();
        assert_send::<TransferRequest>();
    }
};

pub mod metadata;
pub mod thumbnail;

use std::process::Stdio;
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use crate::core::traits::MediaProbe;
use crate::core::types::{ArtifactType, MediaMetadata, SourceBlob, Thumbnail};

pub use metadata::MetadataExtractor;
pub use thumbnail::ThumbnailGenerator;

/// 元数据 / 预览图提取错误
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("IO error {0}")]
    Io(#[from] std::io::Error),

    #[error("Image decode error {0}")]
    Decode(#[from] image::ImageError),

    #[error("{program} failed: {message}")]
    Tool {
        program: String,
        message: String,
    },

    #[error("Could not parse probe output: {0}")]
    Parse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// 提取结果
#[derive(Debug, Clone)]
pub struct Probed {
    pub metadata: MediaMetadata,
    pub thumbnail: Option<Thumbnail>,
}

/// 本地提取：图片用 image 解码，音视频调用 ffprobe / ffmpeg
pub struct LocalMediaProbe {
    extractor: MetadataExtractor,
    thumbnails: ThumbnailGenerator,
}

impl LocalMediaProbe {
    pub fn new() -> Self {
        Self {
            extractor: MetadataExtractor::new("ffprobe"),
            thumbnails: ThumbnailGenerator::new("ffmpeg", thumbnail::DEFAULT_MAX_EDGE),
        }
    }

    pub fn with_tools(ffprobe_path: impl Into<String>, ffmpeg_path: impl Into<String>) -> Self {
        Self {
            extractor: MetadataExtractor::new(ffprobe_path),
            thumbnails: ThumbnailGenerator::new(ffmpeg_path, thumbnail::DEFAULT_MAX_EDGE),
        }
    }
}

impl Default for LocalMediaProbe {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaProbe for LocalMediaProbe {
    async fn extract_metadata(&self, source: &SourceBlob, artifact_type: ArtifactType) -> Result<MediaMetadata, ProbeError> {
        self.extractor.extract(source, artifact_type).await
    }

    async fn generate_thumbnail(&self, source: &SourceBlob, artifact_type: ArtifactType) -> Result<Option<Thumbnail>, ProbeError> {
        self.thumbnails.generate(source, artifact_type).await
    }
}

/// 尽力而为地提取元数据和预览图
///
/// Failures degrade to size-only metadata and no thumbnail. Returns `None`
/// only when the token fires first.
pub async fn probe_artifact(
    probe: &dyn MediaProbe,
    source: &SourceBlob,
    artifact_type: ArtifactType,
    size: u64,
    cancellation_token: &CancellationToken,
) -> Option<Probed> {
    let metadata = tokio::select! {
        biased;
        _ = cancellation_token.cancelled() => return None,
        result = probe.extract_metadata(source, artifact_type) => result,
    };
    let metadata = metadata.unwrap_or_else(|err| {
        debug!(%artifact_type, error = %err, "metadata extraction failed, using size only");
        MediaMetadata::size_only(size)
    });

    let thumbnail = if artifact_type.has_preview() {
        let result = tokio::select! {
            biased;
            _ = cancellation_token.cancelled() => return None,
            result = probe.generate_thumbnail(source, artifact_type) => result,
        };
        result.unwrap_or_else(|err| {
            debug!(%artifact_type, error = %err, "thumbnail generation failed");
            None
        })
    } else {
        None
    };

    Some(Probed { metadata, thumbnail })
}

/// 外部工具的输入参数：文件路径或者 stdin
pub(crate) fn input_arg(source: &SourceBlob) -> String {
    match source {
        SourceBlob::File(path) => path.to_string_lossy().into_owned(),
        SourceBlob::Memory(_) => "pipe:0".to_string(),
    }
}

/// 运行外部工具并返回 stdout，内存中的内容通过 stdin 传入
///
/// The child is killed when the returned future is dropped.
pub(crate) async fn run_tool(program: &str, args: &[String], source: &SourceBlob) -> Result<Vec<u8>, ProbeError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let input = match source {
        SourceBlob::Memory(data) => {
            command.stdin(Stdio::piped());
            Some(data.clone())
        }
        SourceBlob::File(_) => {
            command.stdin(Stdio::null());
            None
        }
    };

    let mut child = command.spawn().map_err(|err| ProbeError::Tool {
        program: program.to_string(),
        message: err.to_string(),
    })?;

    // 写 stdin 与读 stdout 必须并发进行
    let writer = match (input, child.stdin.take()) {
        (Some(data), Some(mut stdin)) => Some(tokio::spawn(async move {
            // 工具可能提前关闭 stdin，忽略 broken pipe
            let _ = stdin.write_all(&data).await;
            let _ = stdin.shutdown().await;
        })),
        _ => None,
    };

    let output = child.wait_with_output().await?;
    if let Some(writer) = writer {
        let _ = writer.await;
    }

    if !output.status.success() {
        return Err(ProbeError::Tool {
            program: program.to_string(),
            message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(output.stdout)
}

use std::io::Cursor;
use image::ImageReader;
use serde_json::Value;
use tracing::debug;
use crate::core::types::{ArtifactType, MediaMetadata, SourceBlob};
use super::{input_arg, run_tool, ProbeError};

/// 提取尺寸与时长
pub struct MetadataExtractor {
    ffprobe_path: String,
}

impl MetadataExtractor {
    pub fn new(ffprobe_path: impl Into<String>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }

    pub async fn extract(&self, source: &SourceBlob, artifact_type: ArtifactType) -> Result<MediaMetadata, ProbeError> {
        let size = source_size(source).await?;

        match artifact_type {
            ArtifactType::Image => {
                let data = source.read_all().await?;
                let (width, height) = tokio::task::spawn_blocking(move || {
                    ImageReader::new(Cursor::new(data)).with_guessed_format()?.into_dimensions()
                })
                .await
                .map_err(|err| ProbeError::Internal(err.to_string()))??;

                Ok(MediaMetadata {
                    size,
                    width: Some(width),
                    height: Some(height),
                    duration_seconds: None,
                })
            }
            ArtifactType::Video | ArtifactType::Audio => {
                let args = [
                    "-v",
                    "quiet",
                    "-print_format",
                    "json",
                    "-show_format",
                    "-show_streams",
                ]
                .iter()
                .map(|arg| arg.to_string())
                .chain(std::iter::once(input_arg(source)))
                .collect::<Vec<_>>();

                let stdout = run_tool(&self.ffprobe_path, &args, source).await?;
                let metadata = parse_ffprobe(&stdout, size)?;
                debug!(
                    width = ?metadata.width,
                    height = ?metadata.height,
                    duration = ?metadata.duration_seconds,
                    "media probe completed"
                );
                Ok(metadata)
            }
            ArtifactType::Document | ArtifactType::Archive => Ok(MediaMetadata::size_only(size)),
        }
    }
}

async fn source_size(source: &SourceBlob) -> Result<u64, ProbeError> {
    match source {
        SourceBlob::File(path) => Ok(tokio::fs::metadata(path).await?.len()),
        SourceBlob::Memory(data) => Ok(data.len() as u64),
    }
}

/// 解析 ffprobe 的 JSON 输出
pub fn parse_ffprobe(output: &[u8], size: u64) -> Result<MediaMetadata, ProbeError> {
    let probe_data: Value = serde_json::from_slice(output).map_err(|err| ProbeError::Parse(err.to_string()))?;

    let duration_seconds = probe_data["format"]["duration"]
        .as_str()
        .and_then(|duration| duration.parse::<f64>().ok())
        .filter(|duration| duration.is_finite() && *duration >= 0.0);

    let video_stream = probe_data["streams"]
        .as_array()
        .and_then(|streams| streams.iter().find(|stream| stream["codec_type"] == "video"));

    let dimension = |key: &str| {
        video_stream
            .and_then(|stream| stream[key].as_u64())
            .and_then(|value| u32::try_from(value).ok())
    };

    if duration_seconds.is_none() && video_stream.is_none() && probe_data["streams"].as_array().is_none() {
        return Err(ProbeError::Parse("no format or streams in ffprobe output".to_string()));
    }

    Ok(MediaMetadata {
        size,
        width: dimension("width"),
        height: dimension("height"),
        duration_seconds,
    })
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use super::*;

    fn png(width: u32, height: u32) -> Bytes {
        let image = ImageBuffer::from_pixel(width, height, Rgb([200u8, 40, 40]));
        let mut cursor = Cursor::new(Vec::new());
        image.write_to(&mut cursor, ImageFormat::Png).unwrap();
        Bytes::from(cursor.into_inner())
    }

    #[tokio::test]
    async fn test_image_dimensions() {
        let data = png(64, 48);
        let size = data.len() as u64;
        let extractor = MetadataExtractor::new("ffprobe");

        let metadata = extractor.extract(&SourceBlob::Memory(data), ArtifactType::Image).await.unwrap();
        assert_eq!(metadata.size, size);
        assert_eq!((metadata.width, metadata.height), (Some(64), Some(48)));
        assert_eq!(metadata.duration_seconds, None);
    }

    #[tokio::test]
    async fn test_corrupt_image_is_an_error() {
        let extractor = MetadataExtractor::new("ffprobe");
        let source = SourceBlob::Memory(Bytes::from_static(b"definitely not a png"));
        assert!(extractor.extract(&source, ArtifactType::Image).await.is_err());
    }

    #[tokio::test]
    async fn test_documents_are_size_only() {
        let extractor = MetadataExtractor::new("ffprobe");
        let source = SourceBlob::Memory(Bytes::from_static(b"%PDF-1.7"));
        let metadata = extractor.extract(&source, ArtifactType::Document).await.unwrap();
        assert_eq!(metadata, MediaMetadata::size_only(8));
    }

    #[test]
    fn test_parse_ffprobe_video() {
        let output = br#"{
            "streams": [
                {"codec_type": "audio", "codec_name": "aac"},
                {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080}
            ],
            "format": {"duration": "12.480000", "bit_rate": "4000000"}
        }"#;

        let metadata = parse_ffprobe(output, 1_000).unwrap();
        assert_eq!((metadata.width, metadata.height), (Some(1920), Some(1080)));
        assert_eq!(metadata.duration_seconds, Some(12.48));
    }

    #[test]
    fn test_parse_ffprobe_audio_has_no_dimensions() {
        let output = br#"{"streams": [{"codec_type": "audio"}], "format": {"duration": "200.5"}}"#;
        let metadata = parse_ffprobe(output, 10).unwrap();
        assert_eq!((metadata.width, metadata.height), (None, None));
        assert_eq!(metadata.duration_seconds, Some(200.5));
    }

    #[test]
    fn test_parse_ffprobe_garbage() {
        assert!(matches!(parse_ffprobe(b"{}", 1), Err(ProbeError::Parse(_))));
        assert!(matches!(parse_ffprobe(b"not json", 1), Err(ProbeError::Parse(_))));
    }
}

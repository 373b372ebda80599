use std::io::Cursor;
use bytes::Bytes;
use image::{GenericImageView, ImageFormat, ImageReader};
use crate::core::types::{ArtifactType, SourceBlob, Thumbnail};
use super::{input_arg, run_tool, ProbeError};

/// 预览图最长边
pub const DEFAULT_MAX_EDGE: u32 = 320;

/// 视频截帧的时间点（秒）
const FRAME_OFFSET_SECONDS: &str = "1";

/// 生成预览图：图片直接缩放，视频截取一帧
pub struct ThumbnailGenerator {
    ffmpeg_path: String,
    max_edge: u32,
}

impl ThumbnailGenerator {
    pub fn new(ffmpeg_path: impl Into<String>, max_edge: u32) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            max_edge: max_edge.max(1),
        }
    }

    pub async fn generate(&self, source: &SourceBlob, artifact_type: ArtifactType) -> Result<Option<Thumbnail>, ProbeError> {
        let frame = match artifact_type {
            ArtifactType::Image => source.read_all().await?,
            ArtifactType::Video => self.capture_frame(source).await?,
            _ => return Ok(None),
        };

        let max_edge = self.max_edge;
        let thumbnail = tokio::task::spawn_blocking(move || encode_thumbnail(frame, max_edge))
            .await
            .map_err(|err| ProbeError::Internal(err.to_string()))??;

        Ok(Some(thumbnail))
    }

    /// ffmpeg 截取一帧 PNG 写到 stdout
    async fn capture_frame(&self, source: &SourceBlob) -> Result<Bytes, ProbeError> {
        let args: Vec<String> = [
            "-v",
            "error",
            "-ss",
            FRAME_OFFSET_SECONDS,
            "-i",
        ]
        .iter()
        .map(|arg| arg.to_string())
        .chain(std::iter::once(input_arg(source)))
        .chain(["-frames:v", "1", "-f", "image2pipe", "-vcodec", "png", "pipe:1"].iter().map(|arg| arg.to_string()))
        .collect();

        let stdout = run_tool(&self.ffmpeg_path, &args, source).await?;
        if stdout.is_empty() {
            return Err(ProbeError::Tool {
                program: self.ffmpeg_path.clone(),
                message: "no frame captured".to_string(),
            });
        }
        Ok(Bytes::from(stdout))
    }
}

/// 缩放到 max_edge 以内并编码为 PNG
fn encode_thumbnail(data: Bytes, max_edge: u32) -> Result<Thumbnail, ProbeError> {
    let image = ImageReader::new(Cursor::new(data)).with_guessed_format()?.decode()?;

    let (width, height) = image.dimensions();
    let image = if width > max_edge || height > max_edge {
        image.thumbnail(max_edge, max_edge)
    } else {
        image
    };

    let mut cursor = Cursor::new(Vec::new());
    image.write_to(&mut cursor, ImageFormat::Png)?;

    let (width, height) = image.dimensions();
    Ok(Thumbnail {
        width,
        height,
        mime: "image/png".to_string(),
        data: Bytes::from(cursor.into_inner()),
    })
}

#[cfg(test)]
mod tests {
    use image::{ImageBuffer, Rgba};
    use super::*;

    fn png(width: u32, height: u32) -> Bytes {
        let image = ImageBuffer::from_pixel(width, height, Rgba([10u8, 120, 200, 255]));
        let mut cursor = Cursor::new(Vec::new());
        image.write_to(&mut cursor, ImageFormat::Png).unwrap();
        Bytes::from(cursor.into_inner())
    }

    #[tokio::test]
    async fn test_large_image_is_scaled_down() {
        let generator = ThumbnailGenerator::new("ffmpeg", 100);
        let thumbnail = generator
            .generate(&SourceBlob::Memory(png(400, 200)), ArtifactType::Image)
            .await
            .unwrap()
            .unwrap();

        assert_eq!((thumbnail.width, thumbnail.height), (100, 50));
        assert_eq!(thumbnail.mime, "image/png");
        assert!(thumbnail.data.starts_with(b"\x89PNG"));
    }

    #[tokio::test]
    async fn test_small_image_keeps_its_size() {
        let generator = ThumbnailGenerator::new("ffmpeg", 100);
        let thumbnail = generator
            .generate(&SourceBlob::Memory(png(40, 30)), ArtifactType::Image)
            .await
            .unwrap()
            .unwrap();
        assert_eq!((thumbnail.width, thumbnail.height), (40, 30));
    }

    #[tokio::test]
    async fn test_no_preview_for_documents() {
        let generator = ThumbnailGenerator::new("ffmpeg", 100);
        let source = SourceBlob::Memory(Bytes::from_static(b"%PDF-1.7"));
        assert!(generator.generate(&source, ArtifactType::Document).await.unwrap().is_none());
    }
}

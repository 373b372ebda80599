use std::path::Path;
use crate::core::types::ArtifactType;

/// 分类结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub artifact_type: ArtifactType,
    /// 规范化后的 MIME（小写，无参数）
    pub mime: String,
}

const DOCUMENT_MIMES: &[&str] = &[
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-powerpoint",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.oasis.opendocument.text",
    "application/vnd.oasis.opendocument.presentation",
    "application/rtf",
    "application/x-fdx",
];

/// 只接受纯文本类文稿，不接受 html/js/csv 之类
const TEXT_DOCUMENT_MIMES: &[&str] = &["text/plain", "text/markdown", "text/x-markdown", "text/rtf"];

const ARCHIVE_MIMES: &[&str] = &[
    "application/zip",
    "application/x-zip-compressed",
    "application/x-rar-compressed",
    "application/vnd.rar",
    "application/x-7z-compressed",
    "application/gzip",
    "application/x-gzip",
    "application/x-tar",
];

/// Extensions mime_guess does not know, or maps to something unhelpful.
const EXTENSION_TABLE: &[(&str, ArtifactType, &str)] = &[
    ("fdx", ArtifactType::Document, "application/x-fdx"),
    ("fountain", ArtifactType::Document, "text/plain"),
    ("key", ArtifactType::Document, "application/vnd.apple.keynote"),
    ("pages", ArtifactType::Document, "application/vnd.apple.pages"),
    ("heic", ArtifactType::Image, "image/heic"),
    ("mkv", ArtifactType::Video, "video/x-matroska"),
    ("m4a", ArtifactType::Audio, "audio/mp4"),
    ("7z", ArtifactType::Archive, "application/x-7z-compressed"),
    ("rar", ArtifactType::Archive, "application/vnd.rar"),
];

/// 根据 MIME 与扩展名推断文件类型，纯函数
pub struct FileClassifier;

impl FileClassifier {
    /// Classifies a file from its declared MIME (if any) and its name.
    ///
    /// A specific declared MIME wins. A missing or generic one
    /// (`application/octet-stream`) falls back to the extension. `None` means
    /// the file is not an uploadable artifact.
    pub fn classify(name: &str, declared_mime: Option<&str>) -> Option<Classification> {
        if let Some(mime) = declared_mime.map(normalize_mime).filter(|mime| is_specific(mime)) {
            if let Some(artifact_type) = Self::type_for_mime(&mime) {
                return Some(Classification { artifact_type, mime });
            }
        }

        let extension = extension(name)?;
        if let Some((_, artifact_type, mime)) = EXTENSION_TABLE.iter().find(|(ext, _, _)| *ext == extension) {
            return Some(Classification {
                artifact_type: *artifact_type,
                mime: mime.to_string(),
            });
        }

        mime_guess::from_ext(&extension).iter().find_map(|guess| {
            let mime = guess.essence_str().to_ascii_lowercase();
            Self::type_for_mime(&mime).map(|artifact_type| Classification { artifact_type, mime })
        })
    }

    pub fn type_for_mime(mime: &str) -> Option<ArtifactType> {
        let (top, _) = mime.split_once('/')?;
        match top {
            "image" => Some(ArtifactType::Image),
            "video" => Some(ArtifactType::Video),
            "audio" => Some(ArtifactType::Audio),
            "text" if TEXT_DOCUMENT_MIMES.contains(&mime) => Some(ArtifactType::Document),
            _ if DOCUMENT_MIMES.contains(&mime) || mime.starts_with("application/vnd.apple.") => {
                Some(ArtifactType::Document)
            }
            _ if ARCHIVE_MIMES.contains(&mime) => Some(ArtifactType::Archive),
            _ => None,
        }
    }
}

/// 小写扩展名（不含点）
pub fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

pub fn normalize_mime(mime: &str) -> String {
    mime.split(';').next().unwrap_or_default().trim().to_ascii_lowercase()
}

fn is_specific(mime: &str) -> bool {
    !mime.is_empty() && mime != "application/octet-stream" && mime.contains('/')
}

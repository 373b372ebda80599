pub mod classify;

use std::collections::HashMap;
use serde::{Deserialize, Serialize};
use crate::core::errors::ValidationError;
use crate::core::types::{ArtifactType, CandidateFile, FileFingerprint};
use classify::{extension, FileClassifier};

pub use classify::Classification;

const MIB: u64 = 1024 * 1024;

/// 校验配置
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// 单文件大小上限（字节）
    pub max_file_size: u64,
    /// 一个批次最多的文件数
    pub max_files: usize,
    /// HTML accept 形式：`.pdf`, `image/png`, `video/*`
    pub accept: Vec<String>,
    /// 按类型覆盖的大小上限
    pub type_limits: HashMap<ArtifactType, u64>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_file_size: 100 * MIB,
            max_files: 20,
            accept: Vec::new(),
            type_limits: HashMap::new(),
        }
    }
}

impl ValidationConfig {
    pub fn size_limit(&self, artifact_type: ArtifactType) -> u64 {
        self.type_limits
            .get(&artifact_type)
            .copied()
            .unwrap_or(self.max_file_size)
    }
}

/// 一条 accept 规则
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceptRule {
    Extension(String),
    Mime(String),
    MimePrefix(String),
}

impl AcceptRule {
    pub fn parse(rule: &str) -> Option<Self> {
        let rule = rule.trim().to_ascii_lowercase();
        if rule.is_empty() {
            return None;
        }

        if let Some(ext) = rule.strip_prefix('.') {
            return Some(AcceptRule::Extension(ext.to_string()));
        }
        if let Some(prefix) = rule.strip_suffix("/*") {
            return Some(AcceptRule::MimePrefix(format!("{}/", prefix)));
        }
        if rule.contains('/') {
            return Some(AcceptRule::Mime(rule));
        }
        Some(AcceptRule::Extension(rule))
    }

    pub fn matches(&self, name: &str, mime: &str) -> bool {
        match self {
            AcceptRule::Extension(ext) => extension(name).as_deref() == Some(ext.as_str()),
            AcceptRule::Mime(expected) => mime == expected,
            AcceptRule::MimePrefix(prefix) => mime.starts_with(prefix.as_str()),
        }
    }
}

/// 通过校验的文件
#[derive(Debug, Clone)]
pub struct AcceptedFile {
    pub candidate: CandidateFile,
    pub artifact_type: ArtifactType,
    pub mime: String,
}

/// 被拒绝的文件及原因
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub name: String,
    pub error: ValidationError,
}

#[derive(Debug, Default)]
pub struct BatchValidation {
    pub accepted: Vec<AcceptedFile>,
    pub rejected: Vec<Rejection>,
}

/// 选择阶段的校验，不修改任何状态
pub struct ValidationGate {
    config: ValidationConfig,
    rules: Vec<AcceptRule>,
}

impl ValidationGate {
    pub fn new(config: ValidationConfig) -> Self {
        let rules = config.accept.iter().filter_map(|rule| AcceptRule::parse(rule)).collect();
        Self { config, rules }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Checks one candidate against the files already in the batch.
    ///
    /// Order of checks: type, size, duplicate.
    pub fn check(&self, candidate: &CandidateFile, existing: &[FileFingerprint]) -> Result<Classification, ValidationError> {
        let declared = candidate.mime.as_deref();
        let classification = FileClassifier::classify(&candidate.name, declared).ok_or_else(|| {
            ValidationError::UnsupportedType {
                name: candidate.name.clone(),
                mime: declared.unwrap_or("unknown").to_string(),
            }
        })?;

        if !self.is_accepted(&candidate.name, &classification.mime) {
            return Err(ValidationError::UnsupportedType {
                name: candidate.name.clone(),
                mime: classification.mime,
            });
        }

        let max_size = self.config.size_limit(classification.artifact_type);
        if candidate.size > max_size {
            return Err(ValidationError::TooLarge {
                name: candidate.name.clone(),
                size: candidate.size,
                max_size,
            });
        }

        let fingerprint = candidate.fingerprint();
        if existing.contains(&fingerprint) {
            return Err(ValidationError::Duplicate {
                name: candidate.name.clone(),
            });
        }

        Ok(classification)
    }

    fn is_accepted(&self, name: &str, mime: &str) -> bool {
        self.rules.is_empty() || self.rules.iter().any(|rule| rule.matches(name, mime))
    }

    /// 校验整批候选文件
    ///
    /// Fails as a whole when `existing + candidates` exceeds `max_files`.
    /// Otherwise every candidate is checked individually, including against
    /// earlier candidates of the same selection.
    pub fn check_batch(
        &self,
        candidates: Vec<CandidateFile>,
        existing: &[FileFingerprint],
    ) -> Result<BatchValidation, ValidationError> {
        if existing.len() + candidates.len() > self.config.max_files {
            return Err(ValidationError::BatchTooLarge {
                attempted: candidates.len(),
                existing: existing.len(),
                max_files: self.config.max_files,
            });
        }

        let mut seen: Vec<FileFingerprint> = existing.to_vec();
        let mut result = BatchValidation::default();

        for candidate in candidates {
            match self.check(&candidate, &seen) {
                Ok(classification) => {
                    seen.push(candidate.fingerprint());
                    result.accepted.push(AcceptedFile {
                        candidate,
                        artifact_type: classification.artifact_type,
                        mime: classification.mime,
                    });
                }
                Err(error) => result.rejected.push(Rejection {
                    name: candidate.name,
                    error,
                }),
            }
        }

        Ok(result)
    }
}

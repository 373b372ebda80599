//! 两阶段提交：先创建 pitch，再上传并关联文件
//!
//! Files are collected into the session while no parent exists, so the
//! scheduler keeps them parked. Submitting creates the parent, attaches its id
//! to the session (which releases every parked record), waits for the released
//! records to settle, then patches the parent with the resulting URLs.

use std::sync::Arc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tracing::{error, info, warn};
use crate::core::errors::{ParentServiceError, UploadError};
use crate::core::traits::ParentService;
use crate::core::types::{BatchOutcome, CandidateFile, ParentId, SelectionReport};
use crate::core::UploadManager;

#[derive(Error, Debug)]
pub enum DeferredError {
    /// 创建父实体失败，没有任何文件被发送
    #[error("Failed to create parent: {0}")]
    ParentCreation(#[source] ParentServiceError),

    #[error("Session is already attached to parent {0}")]
    AlreadyAttached(ParentId),

    /// 会话不要求父实体，文件会在 pitch 创建之前就开始上传
    #[error("Session starts uploads without a parent, enable require_parent for deferred uploads")]
    NotDeferred,

    #[error(transparent)]
    Session(#[from] UploadError),
}

/// 回填父实体失败：文件与父实体都已存在，只是没有关联上
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationWarning {
    pub parent_id: ParentId,
    pub message: String,
    pub fields: Map<String, Value>,
}

/// 一次提交的结果
#[derive(Debug, Clone, Serialize)]
pub struct DeferredReport {
    pub parent_id: ParentId,
    pub outcome: BatchOutcome,
    /// 实际发送的 patch 字段
    pub patched: Map<String, Value>,
    pub warning: Option<ReconciliationWarning>,
}

impl DeferredReport {
    /// Some uploads succeeded and some failed.
    pub fn is_partial(&self) -> bool {
        self.outcome.is_partial()
    }

    pub fn is_clean(&self) -> bool {
        self.outcome.failed.is_empty() && self.outcome.cancelled.is_empty() && self.warning.is_none()
    }
}

pub struct DeferredUploadCoordinator {
    manager: UploadManager,
    parent_service: Arc<dyn ParentService>,
}

impl DeferredUploadCoordinator {
    pub fn new(manager: UploadManager, parent_service: Arc<dyn ParentService>) -> Self {
        Self { manager, parent_service }
    }

    pub fn manager(&self) -> &UploadManager {
        &self.manager
    }

    /// Phase 1: validate and store the files. Nothing is sent yet.
    pub async fn collect(&self, files: Vec<CandidateFile>) -> Result<SelectionReport, DeferredError> {
        self.ensure_parked()?;
        Ok(self.manager.select(files).await?)
    }

    /// 会话必须还没有父实体，并且在父实体出现之前不放行任何传输
    fn ensure_parked(&self) -> Result<(), DeferredError> {
        let view = self.manager.view();
        if let Some(parent_id) = view.parent_id {
            return Err(DeferredError::AlreadyAttached(parent_id));
        }
        if view.gate_open {
            warn!("session does not require a parent, refusing deferred upload");
            return Err(DeferredError::NotDeferred);
        }
        Ok(())
    }

    /// 创建父实体、释放暂存的文件、等待结束并回填
    pub async fn submit(&self, parent_data: Value) -> Result<DeferredReport, DeferredError> {
        self.ensure_parked()?;

        let parent_id = self.parent_service.create(parent_data).await.map_err(|err| {
            error!(error = %err, "parent creation failed, nothing was uploaded");
            DeferredError::ParentCreation(err)
        })?;
        info!(%parent_id, "parent created");

        let released = self.manager.attach_parent(parent_id.clone()).await?;
        info!(%parent_id, released = released.len(), "parked uploads released");

        let outcome = self.manager.wait_settled(released).await?;
        info!(
            %parent_id,
            successful = outcome.successful.len(),
            failed = outcome.failed.len(),
            cancelled = outcome.cancelled.len(),
            "uploads settled"
        );

        let patched = parent_patch(&outcome);
        let warning = if patched.is_empty() {
            None
        } else {
            match self.parent_service.patch(&parent_id, patched.clone()).await {
                Ok(()) => None,
                Err(err) => {
                    warn!(%parent_id, error = %err, "failed to patch parent with upload urls");
                    Some(ReconciliationWarning {
                        parent_id: parent_id.clone(),
                        message: err.to_string(),
                        fields: patched.clone(),
                    })
                }
            }
        };

        Ok(DeferredReport {
            parent_id,
            outcome,
            patched,
            warning,
        })
    }

    /// Phase 1 and the rest in one call.
    pub async fn run(&self, files: Vec<CandidateFile>, parent_data: Value) -> Result<(SelectionReport, DeferredReport), DeferredError> {
        let selection = self.collect(files).await?;
        let report = self.submit(parent_data).await?;
        Ok((selection, report))
    }
}

/// 由成功的上传生成父实体的 patch
///
/// Role-bearing artifacts fill their field; the first success per field wins.
/// Supporting artifacts are listed under `media`.
pub fn parent_patch(outcome: &BatchOutcome) -> Map<String, Value> {
    let mut fields = Map::new();
    let mut media = Vec::new();

    for upload in &outcome.successful {
        match upload.role.parent_field() {
            Some(field) => {
                fields.entry(field).or_insert_with(|| Value::String(upload.url.clone()));
            }
            None => media.push(json!({
                "url": upload.url,
                "type": upload.artifact_type,
                "name": upload.name,
                "title": upload.title,
            })),
        }
    }

    if !media.is_empty() {
        fields.insert("media".to_string(), Value::Array(media));
    }
    fields
}

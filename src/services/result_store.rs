//! 结果持久化 - 业务能力层
//!
//! 只负责"保存一次运行的汇总结果"能力。存储后端是外部协作者，
//! 编排器只通过 `ResultStore` 调用它，每次成功运行恰好调用一次。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{AppError, PersistenceError};
use crate::models::response::GenerationResponse;

/// 结果存储
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_result(
        &self,
        subject_id: &str,
        stage_id: u8,
        response: &GenerationResponse,
    ) -> Result<(), AppError>;
}

/// 写入 `<目录>/<subject>_step<stage>.json`
pub struct FileResultStore {
    dir: PathBuf,
}

impl FileResultStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, subject_id: &str, stage_id: u8) -> PathBuf {
        let safe: String = subject_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{}_step{}.json", safe, stage_id))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ResultStore for FileResultStore {
    async fn save_result(
        &self,
        subject_id: &str,
        stage_id: u8,
        response: &GenerationResponse,
    ) -> Result<(), AppError> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            PersistenceError::CreateDirFailed {
                path: self.dir.display().to_string(),
                source: Box::new(e),
            }
        })?;

        let path = self.path_for(subject_id, stage_id);
        let json = serde_json::to_string_pretty(response)?;
        debug!("写入结果文件: {} ({} 字节)", path.display(), json.len());

        tokio::fs::write(&path, json)
            .await
            .map_err(|e| AppError::write_failed(path.display().to_string(), e))?;

        info!("💾 结果已保存: {}", path.display());
        Ok(())
    }
}

/// 内存存储，按 (subject, stage) 覆盖保存
#[derive(Default)]
pub struct MemoryResultStore {
    saved: Mutex<HashMap<(String, u8), GenerationResponse>>,
    saves: Mutex<usize>,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, subject_id: &str, stage_id: u8) -> Option<GenerationResponse> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(subject_id.to_string(), stage_id))
            .cloned()
    }

    /// 累计保存次数
    pub fn save_count(&self) -> usize {
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn save_result(
        &self,
        subject_id: &str,
        stage_id: u8,
        response: &GenerationResponse,
    ) -> Result<(), AppError> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((subject_id.to_string(), stage_id), response.clone());
        *self.saves.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }
}

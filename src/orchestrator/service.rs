//! 生成服务 - 编排层
//!
//! 对外的两种调用方式：
//!
//! - **同步**：`generate` 等待运行结束，返回汇总结果或分类后的错误
//! - **流式**：`start_streaming` 在后台启动运行并返回事件流；
//!   同一个 (科目, 步骤) 已在运行时直接接入现有运行，不会重复发起调用
//!
//! 观察者断开不会取消运行，运行在后台完成并照常保存结果。
//! 显式取消通过 `cancel` 完成。

use tracing::{debug, info};

use crate::error::{AppError, AppResult, RegistryError};
use crate::models::request::GenerationRequest;
use crate::models::response::GenerationResponse;
use crate::orchestrator::run_registry::{ProgressStream, RunHandle, RunKey, RunRegistry};
use crate::orchestrator::stage_orchestrator::StageOrchestrator;

enum Admission {
    Started(RunHandle),
    Attached(ProgressStream),
}

/// 生成服务
#[derive(Clone)]
pub struct GenerationService {
    orchestrator: StageOrchestrator,
    registry: RunRegistry,
}

impl GenerationService {
    pub fn new(orchestrator: StageOrchestrator, registry: RunRegistry) -> Self {
        Self {
            orchestrator,
            registry,
        }
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    /// 同步生成
    ///
    /// 同步运行同样登记在登记表中，流式观察者可以接入。
    /// 必需阶段失败时按主要失败类型归类为超时 / 限流 / 服务错误。
    pub async fn generate(&self, request: GenerationRequest) -> AppResult<GenerationResponse> {
        let key = RunKey::new(request.subject_id.clone(), request.stage_id);
        let handle = self.registry.start(key)?;
        let cancel = handle.cancel_token();

        self.orchestrator
            .run(&request, &handle, &cancel)
            .await
            .map_err(AppError::into_sync_error)
    }

    /// 流式生成
    ///
    /// 返回的流以 `connected` 开始，以 `complete` 或 `error` 结束
    pub fn start_streaming(&self, request: GenerationRequest) -> AppResult<ProgressStream> {
        let key = RunKey::new(request.subject_id.clone(), request.stage_id);

        let handle = match self.registry.start(key.clone()) {
            Ok(handle) => handle,
            Err(RegistryError::AlreadyRunning { key }) => {
                info!("🔁 {} 已在运行，接入现有运行", key);
                match self.join_existing(&key)? {
                    Admission::Attached(stream) => return Ok(stream),
                    Admission::Started(handle) => handle,
                }
            }
            Err(e) => return Err(e.into()),
        };

        // 先订阅再启动，保证不漏掉任何事件
        let stream = self.registry.attach(&key)?;
        let orchestrator = self.orchestrator.clone();

        tokio::spawn(async move {
            let cancel = handle.cancel_token();
            match orchestrator.run(&request, &handle, &cancel).await {
                Ok(response) => debug!(
                    "后台运行 {} 结束，共 {} 个产物",
                    handle.key(),
                    response.artifacts().count()
                ),
                Err(e) => debug!("后台运行 {} 以错误结束: {}", handle.key(), e),
            }
        });

        Ok(stream)
    }

    /// 接入已有运行；它恰好在两次加锁之间结束时重新登记一次
    fn join_existing(&self, key: &RunKey) -> Result<Admission, RegistryError> {
        match self.registry.attach(key) {
            Ok(stream) => Ok(Admission::Attached(stream)),
            Err(RegistryError::NotFound { .. }) => {
                debug!("{} 在接入前已结束，重新登记", key);
                self.registry.start(key.clone()).map(Admission::Started)
            }
            Err(e) => Err(e),
        }
    }

    /// 接入一个正在进行的运行
    pub fn attach(&self, key: &RunKey) -> AppResult<ProgressStream> {
        Ok(self.registry.attach(key)?)
    }

    /// 取消一个正在进行的运行
    pub fn cancel(&self, key: &RunKey) -> AppResult<()> {
        Ok(self.registry.cancel(key)?)
    }
}

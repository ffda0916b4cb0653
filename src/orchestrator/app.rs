//! 应用入口 - 编排层
//!
//! ## 职责
//!
//! 1. **应用初始化**：检查配置、加载请求、创建客户端 / 存储 / 登记表
//! 2. **启动清扫**：后台定期清理长时间没有进展的运行
//! 3. **逐个运行**：每个请求以流式方式运行，事件以 SSE 帧写到标准输出
//! 4. **全局统计**：汇总所有请求的结果

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::clients::OpenAiGenerationClient;
use crate::config::Config;
use crate::error::{AppError, ConfigError};
use crate::models::loaders::{load_all_requests, load_request};
use crate::models::request::GenerationRequest;
use crate::orchestrator::run_registry::RunRegistry;
use crate::orchestrator::service::GenerationService;
use crate::orchestrator::stage_orchestrator::StageOrchestrator;
use crate::progress::{pump_frames, write_rejection};
use crate::services::FileResultStore;
use crate::utils::logging::{log_startup, print_final_stats};

/// 应用主结构
pub struct App {
    config: Config,
    service: GenerationService,
    requests: Vec<GenerationRequest>,
    sweeper: JoinHandle<()>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        if config.llm_api_key.trim().is_empty() {
            return Err(AppError::Config(ConfigError::MissingRequired {
                var_name: "LLM_API_KEY".to_string(),
            })
            .into());
        }

        let requests = load_requests(&config.request_file).await?;
        log_startup(&config.llm_model_name, requests.len());

        let client = Arc::new(OpenAiGenerationClient::new(&config));
        let store = Arc::new(FileResultStore::new(&config.results_dir));
        let registry = RunRegistry::from_config(&config);
        let sweeper = registry.spawn_sweeper(config.sweep_interval());

        let orchestrator = StageOrchestrator::from_config(client, store, config.clone());
        let service = GenerationService::new(orchestrator, registry);

        Ok(Self {
            config,
            service,
            requests,
            sweeper,
        })
    }

    /// 运行应用主逻辑
    pub async fn run(self) -> Result<()> {
        if self.requests.is_empty() {
            warn!("⚠️ 没有找到待处理的请求，程序结束");
            self.sweeper.abort();
            return Ok(());
        }

        let total = self.requests.len();
        let mut success = 0;
        let mut stdout = tokio::io::stdout();

        for (index, request) in self.requests.iter().enumerate() {
            info!(
                "\n📄 处理第 {}/{} 个请求: {}#{}",
                index + 1,
                total,
                request.subject_id,
                request.stage_id
            );

            let stream = match self.service.start_streaming(request.clone()) {
                Ok(stream) => stream,
                Err(e) => {
                    error!("❌ 无法启动运行: {}", e);
                    write_rejection(&mut stdout, &e.to_string()).await?;
                    continue;
                }
            };

            let report = pump_frames(stream.into_stream(), &mut stdout)
                .await
                .context("写出事件流失败")?;

            if report.completed {
                success += 1;
            } else if !report.terminated {
                warn!("⚠️ 事件流在终止事件之前结束");
            }
        }

        print_final_stats(success, total - success, total, &self.config.results_dir);
        self.sweeper.abort();
        Ok(())
    }
}

/// 请求文件可以是单个文件，也可以是一个目录
async fn load_requests(path: &str) -> Result<Vec<GenerationRequest>> {
    info!("\n📁 正在加载请求: {}", path);
    let metadata = tokio::fs::metadata(path)
        .await
        .with_context(|| format!("无法访问请求路径: {}", path))?;

    if metadata.is_dir() {
        load_all_requests(path).await
    } else {
        Ok(vec![load_request(Path::new(path)).await?])
    }
}

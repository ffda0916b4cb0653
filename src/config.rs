use std::time::Duration;

/// 程序配置文件
#[derive(Clone, Debug)]
pub struct Config {
    // --- LLM 配置 ---
    pub llm_api_key: String,
    pub llm_api_base_url: String,
    pub llm_model_name: String,
    // --- 节流与重试 ---
    /// 两次生成调用之间的固定间隔（毫秒）
    pub inter_call_delay_ms: u64,
    /// 单次调用的最大尝试次数（含第一次）
    pub max_attempts: u32,
    /// 指数退避基数（毫秒）
    pub backoff_base_ms: u64,
    /// 指数退避上限（毫秒）
    pub backoff_max_ms: u64,
    // --- 各阶段预算 ---
    pub formative_timeout_secs: u64,
    pub formative_max_tokens: u32,
    pub summative_timeout_secs: u64,
    pub summative_max_tokens: u32,
    pub sample_timeout_secs: u64,
    pub derived_timeout_secs: u64,
    pub derived_max_tokens: u32,
    /// 单个阶段的整体期限（秒），0 表示不限制
    pub stage_deadline_secs: u64,
    // --- 运行登记表 ---
    /// 超过该时间没有任何事件的运行视为失联（秒）
    pub stale_run_timeout_secs: u64,
    /// 清扫失联运行的间隔（秒）
    pub sweep_interval_secs: u64,
    // --- 输入输出 ---
    /// 生成请求文件（TOML 或 JSON）
    pub request_file: String,
    /// 生成结果保存目录
    pub results_dir: String,
    /// 是否要求请求必须带有课程描述
    pub require_description: bool,
    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_api_base_url: "https://api.openai.com/v1".to_string(),
            llm_model_name: "gpt-4o-mini".to_string(),
            inter_call_delay_ms: 1_000,
            max_attempts: 3,
            backoff_base_ms: 1_000,
            backoff_max_ms: 16_000,
            formative_timeout_secs: 120,
            formative_max_tokens: 3_000,
            summative_timeout_secs: 180,
            summative_max_tokens: 4_000,
            sample_timeout_secs: 90,
            derived_timeout_secs: 240,
            derived_max_tokens: 6_000,
            stage_deadline_secs: 0,
            stale_run_timeout_secs: 1_800,
            sweep_interval_secs: 60,
            request_file: "request.toml".to_string(),
            results_dir: "output_results".to_string(),
            require_description: true,
            verbose_logging: false,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            llm_api_key: std::env::var("LLM_API_KEY").unwrap_or(default.llm_api_key),
            llm_api_base_url: std::env::var("LLM_API_BASE_URL").unwrap_or(default.llm_api_base_url),
            llm_model_name: std::env::var("LLM_MODEL_NAME").unwrap_or(default.llm_model_name),
            inter_call_delay_ms: env_parse("INTER_CALL_DELAY_MS").unwrap_or(default.inter_call_delay_ms),
            max_attempts: env_parse("MAX_ATTEMPTS").unwrap_or(default.max_attempts),
            backoff_base_ms: env_parse("BACKOFF_BASE_MS").unwrap_or(default.backoff_base_ms),
            backoff_max_ms: env_parse("BACKOFF_MAX_MS").unwrap_or(default.backoff_max_ms),
            formative_timeout_secs: env_parse("FORMATIVE_TIMEOUT_SECS").unwrap_or(default.formative_timeout_secs),
            formative_max_tokens: env_parse("FORMATIVE_MAX_TOKENS").unwrap_or(default.formative_max_tokens),
            summative_timeout_secs: env_parse("SUMMATIVE_TIMEOUT_SECS").unwrap_or(default.summative_timeout_secs),
            summative_max_tokens: env_parse("SUMMATIVE_MAX_TOKENS").unwrap_or(default.summative_max_tokens),
            sample_timeout_secs: env_parse("SAMPLE_TIMEOUT_SECS").unwrap_or(default.sample_timeout_secs),
            derived_timeout_secs: env_parse("DERIVED_TIMEOUT_SECS").unwrap_or(default.derived_timeout_secs),
            derived_max_tokens: env_parse("DERIVED_MAX_TOKENS").unwrap_or(default.derived_max_tokens),
            stage_deadline_secs: env_parse("STAGE_DEADLINE_SECS").unwrap_or(default.stage_deadline_secs),
            stale_run_timeout_secs: env_parse("STALE_RUN_TIMEOUT_SECS").unwrap_or(default.stale_run_timeout_secs),
            sweep_interval_secs: env_parse("SWEEP_INTERVAL_SECS").unwrap_or(default.sweep_interval_secs),
            request_file: std::env::var("REQUEST_FILE").unwrap_or(default.request_file),
            results_dir: std::env::var("RESULTS_DIR").unwrap_or(default.results_dir),
            require_description: env_parse("REQUIRE_DESCRIPTION").unwrap_or(default.require_description),
            verbose_logging: env_parse("VERBOSE_LOGGING").unwrap_or(default.verbose_logging),
        }
    }

    pub fn inter_call_delay(&self) -> Duration {
        Duration::from_millis(self.inter_call_delay_ms)
    }

    /// 阶段整体期限，0 表示不限制
    pub fn stage_deadline(&self) -> Option<Duration> {
        (self.stage_deadline_secs > 0).then(|| Duration::from_secs(self.stage_deadline_secs))
    }

    pub fn stale_run_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_run_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

use std::fmt;

use crate::clients::GenerationError;
use crate::models::response::{FailedItem, FailureKind, ItemStatus, StageResult};
use crate::models::stage::StageKind;
use crate::orchestrator::run_registry::RunKey;

/// 应用程序错误类型
#[derive(Debug)]
pub enum AppError {
    /// 请求校验失败（不会执行任何阶段）
    Validation(ValidationError),
    /// 生成服务错误（超时 / 限流 / 服务错误）
    Generation(GenerationError),
    /// 必需阶段没有任何可用产出
    Aggregate(AggregateError),
    /// 运行登记表错误
    Registry(RegistryError),
    /// 持久化错误
    Persistence(PersistenceError),
    /// 配置错误
    Config(ConfigError),
    /// 运行被显式取消
    Cancelled { stage: Option<StageKind> },
    /// 其他错误（用于包装第三方库错误）
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(e) => write!(f, "请求校验失败: {}", e),
            AppError::Generation(e) => write!(f, "生成服务错误: {}", e),
            AppError::Aggregate(e) => write!(f, "阶段失败: {}", e),
            AppError::Registry(e) => write!(f, "运行登记错误: {}", e),
            AppError::Persistence(e) => write!(f, "持久化错误: {}", e),
            AppError::Config(e) => write!(f, "配置错误: {}", e),
            AppError::Cancelled { stage: Some(stage) } => write!(f, "运行已取消 (阶段: {})", stage),
            AppError::Cancelled { stage: None } => write!(f, "运行已取消"),
            AppError::Other(msg) => write!(f, "错误: {}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Validation(e) => Some(e),
            AppError::Generation(e) => Some(e),
            AppError::Aggregate(e) => Some(e),
            AppError::Registry(e) => Some(e),
            AppError::Persistence(e) => Some(e),
            AppError::Config(e) => Some(e),
            AppError::Cancelled { .. } | AppError::Other(_) => None,
        }
    }
}

/// 请求校验错误
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// 缺少课程描述
    DescriptionMissing,
    /// 课程描述过短
    DescriptionTooShort { len: usize, min: usize },
    /// 步骤编号超出范围
    StepOutOfRange { value: u8, min: u8, max: u8 },
    /// 形成性与总结性权重之和不为 100
    WeightsMismatch { formative: f64, summative: f64 },
    /// 单个权重不在 [0, 100]
    WeightOutOfRange { stage: StageKind, value: f64 },
    /// 生成数量超出范围
    CountOutOfRange {
        field: &'static str,
        value: u8,
        min: u8,
        max: u8,
    },
    /// 没有请求任何阶段
    NoStageRequested,
    /// 阶段需要模块但模块列表为空
    NoUnits { stage: StageKind },
    /// 模块 ID 为空
    BlankUnitId { index: usize },
    /// 模块 ID 重复
    DuplicateUnitId { id: String },
    /// 请求了派生结构但没有指定格式
    NoDerivedFormats,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::DescriptionMissing => write!(f, "课程描述不能为空"),
            ValidationError::DescriptionTooShort { len, min } => {
                write!(f, "课程描述过短: {} 个字符，至少需要 {} 个", len, min)
            }
            ValidationError::StepOutOfRange { value, min, max } => {
                write!(f, "步骤编号 {} 超出范围 [{}, {}]", value, min, max)
            }
            ValidationError::WeightsMismatch {
                formative,
                summative,
            } => {
                write!(
                    f,
                    "形成性权重 {} 与总结性权重 {} 之和必须为 100",
                    formative, summative
                )
            }
            ValidationError::WeightOutOfRange { stage, value } => {
                write!(f, "{} 权重 {} 超出范围 [0, 100]", stage, value)
            }
            ValidationError::CountOutOfRange {
                field,
                value,
                min,
                max,
            } => {
                write!(f, "{} 的值 {} 超出范围 [{}, {}]", field, value, min, max)
            }
            ValidationError::NoStageRequested => write!(f, "至少需要请求一个阶段"),
            ValidationError::NoUnits { stage } => write!(f, "{} 需要至少一个模块", stage),
            ValidationError::BlankUnitId { index } => write!(f, "第 {} 个模块的 ID 为空", index + 1),
            ValidationError::DuplicateUnitId { id } => write!(f, "模块 ID 重复: {}", id),
            ValidationError::NoDerivedFormats => write!(f, "派生结构需要至少一种目标格式"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// 必需阶段失败
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateError {
    pub stage: StageKind,
    /// 每个失败迭代项的分类与原因
    pub failures: Vec<(FailedItem, Option<FailureKind>)>,
}

impl AggregateError {
    /// 从阶段结果收集失败项
    pub fn from_stage(result: &StageResult) -> Self {
        let failures = result
            .outcomes
            .iter()
            .filter_map(|outcome| {
                let (kind, reason) = match &outcome.status {
                    ItemStatus::Succeeded { .. } => return None,
                    ItemStatus::Failed { kind, reason } => (Some(*kind), reason),
                    ItemStatus::Skipped { reason } => (None, reason),
                };
                Some((
                    FailedItem {
                        stage: result.stage,
                        item_id: outcome.item_id.clone(),
                        reason: reason.clone(),
                    },
                    kind,
                ))
            })
            .collect();

        Self {
            stage: result.stage,
            failures,
        }
    }

    /// 出现次数最多的失败分类，用于同步调用方的错误归类
    ///
    /// 次数相同时按 超时 → 限流 → 服务错误 的顺序取第一个
    pub fn dominant_kind(&self) -> Option<FailureKind> {
        const PRIORITY: [FailureKind; 5] = [
            FailureKind::Timeout,
            FailureKind::RateLimited,
            FailureKind::Service,
            FailureKind::InvalidOutput,
            FailureKind::MalformedRequest,
        ];

        PRIORITY
            .iter()
            .map(|kind| {
                let count = self
                    .failures
                    .iter()
                    .filter(|(_, k)| *k == Some(*kind))
                    .count();
                (*kind, count)
            })
            .filter(|(_, count)| *count > 0)
            .fold(None, |best: Option<(FailureKind, usize)>, (kind, count)| match best {
                Some((_, best_count)) if best_count >= count => best,
                _ => Some((kind, count)),
            })
            .map(|(kind, _)| kind)
    }

    /// 最后一个失败原因，作为诊断信息
    pub fn last_reason(&self) -> Option<&str> {
        self.failures.last().map(|(item, _)| item.reason.as_str())
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "必需阶段 {} 没有产出任何内容 ({} 项失败)",
            self.stage,
            self.failures.len()
        )?;
        if let Some(reason) = self.last_reason() {
            write!(f, ", 最后错误: {}", reason)?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateError {}

/// 运行登记表错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// 同一个 key 已有运行中的任务
    AlreadyRunning { key: RunKey },
    /// 没有找到运行中的任务
    NotFound { key: RunKey },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::AlreadyRunning { key } => write!(f, "{} 已在运行中", key),
            RegistryError::NotFound { key } => write!(f, "没有找到运行: {}", key),
        }
    }
}

impl std::error::Error for RegistryError {}

/// 持久化错误
#[derive(Debug)]
pub enum PersistenceError {
    /// 创建目录失败
    CreateDirFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 写入文件失败
    WriteFailed {
        path: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// 序列化失败
    SerializeFailed {
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::CreateDirFailed { path, source } => {
                write!(f, "创建目录失败 ({}): {}", path, source)
            }
            PersistenceError::WriteFailed { path, source } => {
                write!(f, "写入文件失败 ({}): {}", path, source)
            }
            PersistenceError::SerializeFailed { source } => write!(f, "序列化失败: {}", source),
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PersistenceError::CreateDirFailed { source, .. }
            | PersistenceError::WriteFailed { source, .. }
            | PersistenceError::SerializeFailed { source } => {
                Some(source.as_ref() as &(dyn std::error::Error + 'static))
            }
        }
    }
}

/// 配置错误
#[derive(Debug)]
pub enum ConfigError {
    /// 缺少必需的配置项
    MissingRequired { var_name: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingRequired { var_name } => {
                write!(f, "缺少必需的配置: {}", var_name)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ========== 从常见错误类型转换 ==========

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err)
    }
}

impl From<GenerationError> for AppError {
    fn from(err: GenerationError) -> Self {
        AppError::Generation(err)
    }
}

impl From<AggregateError> for AppError {
    fn from(err: AggregateError) -> Self {
        AppError::Aggregate(err)
    }
}

impl From<RegistryError> for AppError {
    fn from(err: RegistryError) -> Self {
        AppError::Registry(err)
    }
}

impl From<PersistenceError> for AppError {
    fn from(err: PersistenceError) -> Self {
        AppError::Persistence(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Persistence(PersistenceError::SerializeFailed {
            source: Box::new(err),
        })
    }
}

// ========== 便捷构造函数 ==========

impl AppError {
    /// 创建文件写入错误
    pub fn write_failed(
        path: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        AppError::Persistence(PersistenceError::WriteFailed {
            path: path.into(),
            source: Box::new(source),
        })
    }

    /// 转换为同步调用方看到的错误
    ///
    /// 同步调用只会看到 校验 / 超时 / 限流 / 服务 四类错误，
    /// 阶段聚合错误按主要失败分类归并，原因作为诊断信息保留
    pub fn into_sync_error(self) -> AppError {
        match self {
            AppError::Aggregate(aggregate) => {
                let message = aggregate.to_string();
                let error = match aggregate.dominant_kind() {
                    Some(FailureKind::Timeout) => GenerationError::Timeout { message },
                    Some(FailureKind::RateLimited) => GenerationError::RateLimited { message },
                    _ => GenerationError::Service { message },
                };
                AppError::Generation(error)
            }
            other => other,
        }
    }

    /// 是否为请求校验错误
    pub fn is_validation(&self) -> bool {
        matches!(self, AppError::Validation(_))
    }
}

// ========== Result 类型别名 ==========

/// 应用程序结果类型
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(id: &str, kind: FailureKind) -> (FailedItem, Option<FailureKind>) {
        (
            FailedItem {
                stage: StageKind::Formative,
                item_id: id.to_string(),
                reason: format!("{:?}", kind),
            },
            Some(kind),
        )
    }

    #[test]
    fn test_dominant_kind_prefers_most_frequent() {
        let error = AggregateError {
            stage: StageKind::Formative,
            failures: vec![
                failure("m1", FailureKind::Service),
                failure("m2", FailureKind::RateLimited),
                failure("m3", FailureKind::RateLimited),
            ],
        };
        assert_eq!(error.dominant_kind(), Some(FailureKind::RateLimited));
    }

    #[test]
    fn test_aggregate_maps_to_sync_timeout() {
        let error = AppError::Aggregate(AggregateError {
            stage: StageKind::Summative,
            failures: vec![failure("m1", FailureKind::Timeout)],
        });

        match error.into_sync_error() {
            AppError::Generation(GenerationError::Timeout { message }) => {
                assert!(message.contains("总结性评价"));
            }
            other => panic!("意外的错误: {:?}", other),
        }
    }

    #[test]
    fn test_validation_error_display() {
        let error = ValidationError::WeightsMismatch {
            formative: 40.0,
            summative: 50.0,
        };
        assert!(error.to_string().contains("100"));
    }
}

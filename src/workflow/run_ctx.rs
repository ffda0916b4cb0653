//! 运行上下文
//!
//! 封装"我正在处理哪个科目的哪一步"这一信息

use std::fmt::Display;

use crate::models::request::GenerationRequest;

/// 运行上下文
///
/// 只用于日志前缀，不参与业务判断
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCtx {
    /// 科目ID
    pub subject_id: String,

    /// 工作流步骤
    pub stage_id: u8,
}

impl RunCtx {
    /// 创建新的运行上下文
    pub fn new(subject_id: impl Into<String>, stage_id: u8) -> Self {
        Self {
            subject_id: subject_id.into(),
            stage_id,
        }
    }

    pub fn for_request(request: &GenerationRequest) -> Self {
        Self::new(request.subject_id.clone(), request.stage_id)
    }
}

impl Display for RunCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[运行 {}#{}]", self.subject_id, self.stage_id)
    }
}

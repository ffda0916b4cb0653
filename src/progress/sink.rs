//! 进度输出接口
//!
//! 编排器和批处理器只依赖 `ProgressSink`，不关心事件最终怎么送达：
//! 同步调用方用 `CollectingSink` 或 `NullSink`，流式调用方用运行登记表
//! 提供的 `RunHandle`，测试里注入记录型 sink 即可。

use std::sync::{Mutex, PoisonError};

use crate::progress::event::ProgressEvent;

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// 记录所有事件，按发出顺序保存
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已记录事件的快照
    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// 已记录事件的 `type` 序列
    pub fn types(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(ProgressEvent::type_name)
            .collect()
    }
}

impl ProgressSink for CollectingSink {
    fn emit(&self, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl<T: ProgressSink + ?Sized> ProgressSink for std::sync::Arc<T> {
    fn emit(&self, event: ProgressEvent) {
        (**self).emit(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collecting_sink_keeps_order() {
        let sink = CollectingSink::new();
        sink.emit(ProgressEvent::Connected);
        sink.emit(ProgressEvent::error(None, "x"));
        assert_eq!(sink.types(), vec!["connected", "error"]);
    }
}

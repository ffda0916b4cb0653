//! 测试辅助
//!
//! `ScriptedClient` 按脚本返回结果并记录调用次数，用于在不访问网络的情况下
//! 驱动批处理器和编排器。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::clients::{GenerationClient, GenerationError, GenerationPrompt};

/// 单次调用的脚本化回复
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(GenerationError),
    /// 永远不返回，用来触发超时
    Hang,
}

impl From<Result<String, GenerationError>> for Reply {
    fn from(result: Result<String, GenerationError>) -> Self {
        match result {
            Ok(text) => Reply::Text(text),
            Err(e) => Reply::Fail(e),
        }
    }
}

type Responder = Box<dyn Fn(&GenerationPrompt) -> Reply + Send + Sync>;

/// 脚本化的生成客户端
pub struct ScriptedClient {
    queue: Mutex<VecDeque<Reply>>,
    responder: Responder,
    calls: AtomicUsize,
    prompts: Mutex<Vec<GenerationPrompt>>,
}

impl ScriptedClient {
    /// 按提示词决定回复
    pub fn with_responder<F>(responder: F) -> Self
    where
        F: Fn(&GenerationPrompt) -> Reply + Send + Sync + 'static,
    {
        Self {
            queue: Mutex::new(VecDeque::new()),
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// 每次都返回同一个结果
    pub fn always(result: Result<String, GenerationError>) -> Self {
        let reply = Reply::from(result);
        Self::with_responder(move |_| reply.clone())
    }

    /// 按顺序返回，用完后返回服务错误
    pub fn sequence(results: Vec<Result<String, GenerationError>>) -> Self {
        let client = Self::with_responder(|_| {
            Reply::Fail(GenerationError::service("脚本已用完"))
        });
        *client.queue.lock().unwrap_or_else(PoisonError::into_inner) =
            results.into_iter().map(Reply::from).collect();
        client
    }

    /// 永远不返回
    pub fn hanging() -> Self {
        Self::with_responder(|_| Reply::Hang)
    }

    /// 对每个提示词都返回五个通用条目，可被任何阶段解析
    pub fn generous() -> Self {
        Self::with_responder(|_| Reply::Text(generic_items_json(5)))
    }

    /// 已发起的调用次数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 已收到的提示词
    pub fn prompts(&self) -> Vec<GenerationPrompt> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl GenerationClient for ScriptedClient {
    async fn generate(
        &self,
        prompt: &GenerationPrompt,
        _max_tokens: u32,
        _timeout: Duration,
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt.clone());

        let queued = self
            .queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let reply = queued.unwrap_or_else(|| (self.responder)(prompt));

        match reply {
            Reply::Text(text) => Ok(text),
            Reply::Fail(e) => Err(e),
            Reply::Hang => futures::future::pending().await,
        }
    }
}

/// 生成 `count` 个通用条目的 JSON 数组
///
/// 每个条目同时带有各阶段需要的字段
pub fn generic_items_json(count: usize) -> String {
    let items: Vec<serde_json::Value> = (1..=count)
        .map(|i| {
            serde_json::json!({
                "title": format!("条目 {}", i),
                "format": "quiz",
                "instructions": "按要求完成",
                "questions": [format!("问题 {}", i)],
                "criteria": ["准确性"],
                "stem": format!("题干 {}", i),
                "options": ["A", "B"],
                "answer": "A",
                "explanation": "略",
                "body": {"index": i}
            })
        })
        .collect();
    serde_json::Value::Array(items).to_string()
}

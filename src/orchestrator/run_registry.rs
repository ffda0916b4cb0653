//! 运行登记表 - 编排层
//!
//! 记录每个 (科目, 步骤) 上正在进行的运行，是进程内唯一的共享可变状态。
//!
//! - 同一个 key 同时只允许一个运行，重复请求通过 `attach` 复用
//! - 每个观察者有自己的无界通道，慢观察者也不会丢事件；观察者断开不影响运行本身
//! - 终止事件（complete / error）发出后登记项被移除
//! - 长时间没有进展的运行由清扫任务标记失败并取消
//!
//! 所有事件都在持有锁时分发，所以同一运行的事件对所有观察者顺序一致。
//! 锁内不做任何 await。

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::RegistryError;
use crate::progress::{ProgressEvent, ProgressSink};

/// 运行标识：同一科目同一步骤同时只能有一个运行
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunKey {
    pub subject_id: String,
    pub stage_id: u8,
}

impl RunKey {
    pub fn new(subject_id: impl Into<String>, stage_id: u8) -> Self {
        Self {
            subject_id: subject_id.into(),
            stage_id,
        }
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.subject_id, self.stage_id)
    }
}

struct RunEntry {
    /// 区分同一个 key 上先后的运行
    run_id: u64,
    observers: Vec<mpsc::UnboundedSender<ProgressEvent>>,
    last_progress: Option<ProgressEvent>,
    last_activity: Instant,
    cancel: CancellationToken,
}

impl RunEntry {
    /// 发给所有仍在的观察者，顺便清掉已断开的
    fn dispatch(&mut self, event: &ProgressEvent) {
        self.observers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

struct RegistryInner {
    runs: Mutex<HashMap<RunKey, RunEntry>>,
    next_id: AtomicU64,
    stale_after: Duration,
}

/// 运行登记表，可廉价克隆
#[derive(Clone)]
pub struct RunRegistry {
    inner: Arc<RegistryInner>,
}

impl RunRegistry {
    pub fn new(stale_after: Duration) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                runs: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                stale_after,
            }),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.stale_run_timeout())
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<RunKey, RunEntry>> {
        self.inner
            .runs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// 登记一个新运行
    ///
    /// 同一个 key 已有运行时返回 `AlreadyRunning`，调用方应改为 `attach`
    pub fn start(&self, key: RunKey) -> Result<RunHandle, RegistryError> {
        let mut runs = self.runs();
        if runs.contains_key(&key) {
            return Err(RegistryError::AlreadyRunning { key });
        }

        let run_id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        runs.insert(
            key.clone(),
            RunEntry {
                run_id,
                observers: Vec::new(),
                last_progress: None,
                last_activity: Instant::now(),
                cancel: cancel.clone(),
            },
        );
        info!("📝 登记运行 {} (当前 {} 个)", key, runs.len());

        Ok(RunHandle {
            key,
            run_id,
            registry: self.clone(),
            cancel,
        })
    }

    /// 观察一个正在进行的运行
    ///
    /// 返回的流先给出 `connected`，再给出最近一次进度（如果有），之后是实时事件
    pub fn attach(&self, key: &RunKey) -> Result<ProgressStream, RegistryError> {
        let mut runs = self.runs();
        let entry = runs
            .get_mut(key)
            .ok_or_else(|| RegistryError::NotFound { key: key.clone() })?;

        let (tx, receiver) = mpsc::unbounded_channel();
        entry.observers.push(tx);

        let mut initial = VecDeque::with_capacity(2);
        initial.push_back(ProgressEvent::Connected);
        if let Some(progress) = &entry.last_progress {
            initial.push_back(progress.clone());
        }
        debug!("👀 新观察者接入 {}", key);

        Ok(ProgressStream {
            key: key.clone(),
            initial,
            receiver,
            finished: false,
        })
    }

    pub fn is_running(&self, key: &RunKey) -> bool {
        self.runs().contains_key(key)
    }

    /// 当前所有运行的 key，按字典序
    pub fn active_runs(&self) -> Vec<RunKey> {
        let mut keys: Vec<RunKey> = self.runs().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// 移除登记项，不发送事件
    ///
    /// 运行自己发出的终止事件已经会移除登记项；这里给不经过 `RunHandle`
    /// 收尾的调用方使用。观察者的流随之结束，不会收到额外事件。
    pub fn complete(&self, key: &RunKey) -> bool {
        let removed = self.runs().remove(key).is_some();
        if removed {
            debug!("登记项 {} 已移除", key);
        }
        removed
    }

    /// 以错误结束运行：广播 `error`、取消运行、移除登记项
    pub fn fail(&self, key: &RunKey, reason: &str) -> Result<(), RegistryError> {
        let mut runs = self.runs();
        let mut entry = runs
            .remove(key)
            .ok_or_else(|| RegistryError::NotFound { key: key.clone() })?;
        warn!("❌ 运行 {} 被标记失败: {}", key, reason);
        entry.cancel.cancel();
        entry.dispatch(&ProgressEvent::error(None, reason));
        Ok(())
    }

    /// 请求取消运行
    ///
    /// 运行会在下一个迭代项之前停下，并自行发出 `error` 事件
    pub fn cancel(&self, key: &RunKey) -> Result<(), RegistryError> {
        let runs = self.runs();
        let entry = runs
            .get(key)
            .ok_or_else(|| RegistryError::NotFound { key: key.clone() })?;
        info!("🛑 请求取消运行 {}", key);
        entry.cancel.cancel();
        Ok(())
    }

    /// 清扫超过 `stale_after` 没有任何事件的运行
    pub fn sweep(&self) -> Vec<RunKey> {
        let stale_after = self.inner.stale_after;
        let now = Instant::now();
        let mut runs = self.runs();

        let stale: Vec<RunKey> = runs
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_activity) > stale_after)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            if let Some(mut entry) = runs.remove(key) {
                warn!(
                    "🧹 运行 {} 超过 {} 秒没有进展，标记失败",
                    key,
                    stale_after.as_secs()
                );
                entry.cancel.cancel();
                entry.dispatch(&ProgressEvent::error(
                    None,
                    format!("运行超过 {} 秒没有进展，已终止", stale_after.as_secs()),
                ));
            }
        }
        stale
    }

    /// 启动周期清扫任务
    pub fn spawn_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let swept = registry.sweep();
                if !swept.is_empty() {
                    info!("🧹 本轮清扫 {} 个运行", swept.len());
                }
            }
        })
    }

    /// 由 `RunHandle` 调用：记录并分发事件
    fn publish(&self, key: &RunKey, run_id: u64, event: ProgressEvent) {
        let mut runs = self.runs();
        let Some(entry) = runs.get_mut(key).filter(|e| e.run_id == run_id) else {
            // 运行已被清扫或标记失败，后续事件丢弃
            debug!("运行 {} 已不在登记表中，丢弃 {} 事件", key, event.type_name());
            return;
        };

        entry.last_activity = Instant::now();
        if matches!(event, ProgressEvent::Progress { .. }) {
            entry.last_progress = Some(event.clone());
        }

        let terminal = event.is_terminal();
        entry.dispatch(&event);

        if terminal {
            runs.remove(key);
            debug!("运行 {} 已结束，移除登记项", key);
        }
    }

    /// `RunHandle` 被丢弃但运行没有发出终止事件时调用
    fn abandon(&self, key: &RunKey, run_id: u64) {
        let mut runs = self.runs();
        if runs.get(key).is_some_and(|e| e.run_id == run_id) {
            if let Some(mut entry) = runs.remove(key) {
                warn!("⚠️ 运行 {} 未正常结束，通知观察者", key);
                entry.dispatch(&ProgressEvent::error(None, "运行意外中断"));
            }
        }
    }
}

/// 单个运行的句柄，同时也是它的事件出口
pub struct RunHandle {
    key: RunKey,
    run_id: u64,
    registry: RunRegistry,
    cancel: CancellationToken,
}

impl RunHandle {
    pub fn key(&self) -> &RunKey {
        &self.key
    }

    /// 运行内部检查的取消令牌
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl ProgressSink for RunHandle {
    fn emit(&self, event: ProgressEvent) {
        self.registry.publish(&self.key, self.run_id, event);
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.registry.abandon(&self.key, self.run_id);
    }
}

/// 一个观察者看到的事件流，在终止事件之后结束
pub struct ProgressStream {
    key: RunKey,
    initial: VecDeque<ProgressEvent>,
    receiver: mpsc::UnboundedReceiver<ProgressEvent>,
    finished: bool,
}

impl ProgressStream {
    pub fn key(&self) -> &RunKey {
        &self.key
    }

    pub async fn next(&mut self) -> Option<ProgressEvent> {
        if self.finished {
            return None;
        }

        if let Some(event) = self.initial.pop_front() {
            self.finished = event.is_terminal();
            return Some(event);
        }

        match self.receiver.recv().await {
            Some(event) => {
                self.finished = event.is_terminal();
                Some(event)
            }
            None => {
                // 登记项被直接移除（`complete`），没有终止事件
                self.finished = true;
                None
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = ProgressEvent> + Send {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|event| (event, stream))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RunRegistry {
        RunRegistry::new(Duration::from_secs(60))
    }

    fn progress(completed: usize) -> ProgressEvent {
        ProgressEvent::Progress {
            stage: crate::models::stage::StageKind::Formative,
            unit_label: format!("模块 {}", completed),
            completed,
            total: 3,
            eta_seconds: None,
        }
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let registry = registry();
        let key = RunKey::new("CS101", 3);
        let _handle = registry.start(key.clone()).unwrap();

        match registry.start(key.clone()) {
            Err(RegistryError::AlreadyRunning { key: k }) => assert_eq!(k, key),
            other => panic!("意外的结果: {:?}", other.map(|h| h.key().clone())),
        }
        // 其他步骤不受影响
        assert!(registry.start(RunKey::new("CS101", 4)).is_ok());
    }

    #[tokio::test]
    async fn test_attach_replays_connected_and_last_progress() {
        let registry = registry();
        let key = RunKey::new("s", 1);
        let handle = registry.start(key.clone()).unwrap();
        handle.emit(progress(1));
        handle.emit(progress(2));

        let mut stream = registry.attach(&key).unwrap();
        assert_eq!(stream.next().await, Some(ProgressEvent::Connected));
        assert_eq!(stream.next().await, Some(progress(2)));

        handle.emit(ProgressEvent::error(None, "失败"));
        assert_eq!(stream.next().await.map(|e| e.type_name()), Some("error"));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_terminal_event_removes_entry() {
        let registry = registry();
        let key = RunKey::new("s", 1);
        let handle = registry.start(key.clone()).unwrap();
        assert!(registry.is_running(&key));

        handle.emit(ProgressEvent::error(None, "结束"));
        assert!(!registry.is_running(&key));
        assert!(matches!(
            registry.attach(&key),
            Err(RegistryError::NotFound { .. })
        ));
        // 结束后可以重新开始
        assert!(registry.start(key).is_ok());
    }

    #[tokio::test]
    async fn test_events_after_removal_are_dropped() {
        let registry = registry();
        let key = RunKey::new("s", 1);
        let old = registry.start(key.clone()).unwrap();
        registry.fail(&key, "人工终止").unwrap();
        assert!(old.cancel_token().is_cancelled());

        let new = registry.start(key.clone()).unwrap();
        let mut stream = registry.attach(&key).unwrap();
        old.emit(ProgressEvent::error(None, "旧运行"));
        assert!(registry.is_running(&key));

        new.emit(progress(1));
        assert_eq!(stream.next().await, Some(ProgressEvent::Connected));
        assert_eq!(stream.next().await, Some(progress(1)));
    }

    #[tokio::test]
    async fn test_cancel_trips_token_but_keeps_entry() {
        let registry = registry();
        let key = RunKey::new("s", 1);
        let handle = registry.start(key.clone()).unwrap();

        registry.cancel(&key).unwrap();
        assert!(handle.cancel_token().is_cancelled());
        assert!(registry.is_running(&key));
        assert!(registry.cancel(&RunKey::new("x", 1)).is_err());
    }

    #[tokio::test]
    async fn test_dropped_handle_emits_error() {
        let registry = registry();
        let key = RunKey::new("s", 1);
        let handle = registry.start(key.clone()).unwrap();
        let mut stream = registry.attach(&key).unwrap();

        drop(handle);
        assert_eq!(stream.next().await, Some(ProgressEvent::Connected));
        assert_eq!(stream.next().await.map(|e| e.type_name()), Some("error"));
        assert!(!registry.is_running(&key));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_fails_stale_runs_only() {
        let registry = RunRegistry::new(Duration::from_secs(30));
        let stale = registry.start(RunKey::new("old", 1)).unwrap();
        let mut stale_stream = registry.attach(stale.key()).unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        let fresh = registry.start(RunKey::new("new", 1)).unwrap();
        tokio::time::advance(Duration::from_secs(15)).await;

        let swept = registry.sweep();
        assert_eq!(swept, vec![RunKey::new("old", 1)]);
        assert!(stale.cancel_token().is_cancelled());
        assert!(!fresh.cancel_token().is_cancelled());
        assert_eq!(registry.active_runs(), vec![RunKey::new("new", 1)]);

        assert_eq!(stale_stream.next().await, Some(ProgressEvent::Connected));
        match stale_stream.next().await {
            Some(ProgressEvent::Error { message, .. }) => assert!(message.contains("30")),
            other => panic!("意外的事件: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_activity_keeps_run_alive() {
        let registry = RunRegistry::new(Duration::from_secs(30));
        let handle = registry.start(RunKey::new("s", 1)).unwrap();

        tokio::time::advance(Duration::from_secs(25)).await;
        handle.emit(progress(1));
        tokio::time::advance(Duration::from_secs(25)).await;

        assert!(registry.sweep().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_sweeper_runs_periodically() {
        let registry = RunRegistry::new(Duration::from_secs(10));
        let handle = registry.start(RunKey::new("s", 1)).unwrap();
        let sweeper = registry.spawn_sweeper(Duration::from_secs(5));

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(handle.cancel_token().is_cancelled());
        assert!(registry.active_runs().is_empty());
        sweeper.abort();
    }
    #[tokio::test]
    async fn test_slow_observer_receives_every_event() {
        let registry = registry();
        let key = RunKey::new("s", 1);
        let handle = registry.start(key.clone()).unwrap();
        let mut stream = registry.attach(&key).unwrap();

        // 观察者还没开始读，运行已经发完所有事件
        for completed in 1..=500 {
            handle.emit(progress(completed));
        }
        handle.emit(ProgressEvent::error(None, "结束"));

        assert_eq!(stream.next().await, Some(ProgressEvent::Connected));
        for completed in 1..=500 {
            assert_eq!(stream.next().await, Some(progress(completed)));
        }
        assert_eq!(stream.next().await.map(|e| e.type_name()), Some("error"));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn test_dropped_observer_does_not_affect_others() {
        let registry = registry();
        let key = RunKey::new("s", 1);
        let handle = registry.start(key.clone()).unwrap();
        let gone = registry.attach(&key).unwrap();
        let mut kept = registry.attach(&key).unwrap();
        drop(gone);

        handle.emit(progress(1));
        assert_eq!(kept.next().await, Some(ProgressEvent::Connected));
        assert_eq!(kept.next().await, Some(progress(1)));
        assert!(registry.is_running(&key));
    }

    #[tokio::test]
    async fn test_complete_removes_entry_without_event() {
        let registry = registry();
        let key = RunKey::new("s", 1);
        let handle = registry.start(key.clone()).unwrap();
        let mut stream = registry.attach(&key).unwrap();

        assert!(registry.complete(&key));
        assert!(!registry.is_running(&key));
        assert!(!registry.complete(&key));
        assert!(!registry.complete(&RunKey::new("x", 1)));

        // 观察者只看到 connected，随后流结束
        assert_eq!(stream.next().await, Some(ProgressEvent::Connected));
        assert_eq!(stream.next().await, None);

        // 旧句柄的事件和丢弃都不会影响新运行
        let fresh = registry.start(key.clone()).unwrap();
        handle.emit(progress(1));
        drop(handle);
        assert!(registry.is_running(&key));
        assert!(!fresh.cancel_token().is_cancelled());
    }
}

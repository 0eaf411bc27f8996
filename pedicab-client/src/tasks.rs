//! 会话后台任务管理
//!
//! Loops that belong to one session: presence heartbeat, location push and
//! the optional order auto-refresh. They share the session's cancellation
//! token, so ending the session stops them all.

use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

struct RegisteredTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

/// Background loops of a single session
///
/// ```ignore
/// let mut tasks = SessionTasks::new(scope.cancel.clone());
/// tasks.spawn_periodic("location_push", interval, move || {
///     let presence = presence.clone();
///     let scope = scope.clone();
///     async move { presence.push_location(&scope).await }
/// });
/// tasks.shutdown().await;
/// ```
pub struct SessionTasks {
    tasks: Vec<RegisteredTask>,
    shutdown: CancellationToken,
}

impl SessionTasks {
    /// Tasks stop when `session` is cancelled or on [`Self::shutdown`]
    pub fn new(session: CancellationToken) -> Self {
        Self {
            tasks: Vec::new(),
            shutdown: session.child_token(),
        }
    }

    /// 获取取消令牌
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// 注册并启动一个后台任务
    ///
    /// 任务会被包装以捕获 panic。
    fn spawn<F>(&mut self, name: &'static str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        let wrapped_future = async move {
            let result = AssertUnwindSafe(future).catch_unwind().await;
            match result {
                Ok(()) => {
                    if !shutdown.is_cancelled() {
                        tracing::warn!(task = %name, "Session task completed unexpectedly");
                    }
                }
                Err(panic_info) => {
                    let panic_msg: String = if let Some(s) = panic_info.downcast_ref::<&str>() {
                        (*s).to_string()
                    } else if let Some(s) = panic_info.downcast_ref::<String>() {
                        s.clone()
                    } else {
                        "Unknown panic".to_string()
                    };
                    tracing::error!(task = %name, panic = %panic_msg, "Session task panicked");
                }
            }
        };

        let handle = tokio::spawn(wrapped_future);
        tracing::debug!(task = %name, "Registered session task");
        self.tasks.push(RegisteredTask { name, handle });
    }

    /// Run `tick` every `interval` until the session ends
    ///
    /// The first tick fires immediately. A tick still running when the
    /// next one is due delays it rather than piling up.
    pub fn spawn_periodic<T, Fut>(&mut self, name: &'static str, interval: Duration, mut tick: T)
    where
        T: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let shutdown = self.shutdown.clone();
        self.spawn(name, async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!(task = %name, "Periodic task stopping");
                        break;
                    }
                    _ = timer.tick() => {
                        tokio::select! {
                            _ = shutdown.cancelled() => break,
                            _ = tick() => {}
                        }
                    }
                }
            }
        });
    }

    /// 获取已注册任务数量
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Names of tasks still running
    pub fn running(&self) -> Vec<&'static str> {
        self.tasks
            .iter()
            .filter(|t| !t.handle.is_finished())
            .map(|t| t.name)
            .collect()
    }

    /// 取消所有任务并等待完成
    pub async fn shutdown(self) {
        tracing::debug!(count = self.tasks.len(), "Stopping session tasks");
        self.shutdown.cancel();

        for task in self.tasks {
            match task.handle.await {
                Ok(()) => tracing::debug!(task = %task.name, "Task stopped"),
                Err(e) if e.is_cancelled() => {
                    tracing::debug!(task = %task.name, "Task cancelled")
                }
                Err(e) => tracing::error!(task = %task.name, error = ?e, "Task panicked"),
            }
        }
    }
}

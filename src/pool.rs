//! 固定数量工作者与有界 FIFO 队列组成的连接调度器。
//!
//! 接收循环通过 [`WorkerPool::submit`] 非阻塞地投递任务，队列已满或正在关闭时
//! 立即拒绝并把任务交还调用方。工作者在队列为空时等待通知，取出任务后释放锁，
//! 完整执行任务（包括全部 IO）后再回到等待状态。

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

pub const MAX_WORKERS: usize = 64;
pub const MAX_QUEUE_CAPACITY: usize = 65536;

/// 一个待执行的工作单元，携带自身行为与捕获的请求上下文。
pub struct Task {
    job: BoxFuture<'static, ()>,
}

impl Task {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            job: Box::pin(future),
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Task")
    }
}

/// 只会单调推进的调度器状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PoolState {
    Running,
    GracefulShutdown,
    ImmediateShutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
    /// 排空队列后退出。
    Graceful,
    /// 丢弃排队任务，工作者完成当前任务后退出。
    Immediate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    InvalidParameters { workers: usize, queue_capacity: usize },
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::InvalidParameters {
                workers,
                queue_capacity,
            } => write!(
                f,
                "invalid pool parameters: workers={workers} (1..={MAX_WORKERS}), \
                 queue_capacity={queue_capacity} (1..={MAX_QUEUE_CAPACITY})"
            ),
        }
    }
}

impl std::error::Error for PoolError {}

/// 被拒绝的任务原样交还，由调用方负责关闭其连接。
#[derive(Debug)]
pub enum SubmitError {
    QueueFull(Task),
    ShuttingDown(Task),
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::QueueFull(_) => f.write_str("queue full"),
            SubmitError::ShuttingDown(_) => f.write_str("shutting down"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolInfo {
    pub workers: usize,
    pub queue_capacity: usize,
}

struct QueueState {
    tasks: VecDeque<Task>,
    state: PoolState,
}

struct Shared {
    queue: Mutex<QueueState>,
    notify: Notify,
    capacity: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Next {
    Run(Task),
    Wait,
    Exit,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    info: PoolInfo,
}

impl WorkerPool {
    /// 创建调度器并立即启动工作者；需在 tokio 运行时内调用。
    pub fn new(workers: usize, queue_capacity: usize) -> Result<Self, PoolError> {
        if workers == 0
            || workers > MAX_WORKERS
            || queue_capacity == 0
            || queue_capacity > MAX_QUEUE_CAPACITY
        {
            return Err(PoolError::InvalidParameters {
                workers,
                queue_capacity,
            });
        }

        let shared = Arc::new(Shared {
            queue: Mutex::new(QueueState {
                tasks: VecDeque::with_capacity(queue_capacity),
                state: PoolState::Running,
            }),
            notify: Notify::new(),
            capacity: queue_capacity,
        });
        let handles = (0..workers)
            .map(|id| tokio::spawn(worker_loop(id, shared.clone())))
            .collect();
        info!(workers, queue_capacity, "worker pool started");

        Ok(Self {
            shared,
            workers: tokio::sync::Mutex::new(handles),
            info: PoolInfo {
                workers,
                queue_capacity,
            },
        })
    }

    /// 非阻塞投递。
    pub fn submit(&self, task: Task) -> Result<(), SubmitError> {
        {
            let mut queue = self.shared.lock();
            if queue.state != PoolState::Running {
                return Err(SubmitError::ShuttingDown(task));
            }
            if queue.tasks.len() >= self.shared.capacity {
                return Err(SubmitError::QueueFull(task));
            }
            queue.tasks.push_back(task);
        }
        self.shared.notify.notify_one();
        Ok(())
    }

    pub fn state(&self) -> PoolState {
        self.shared.lock().state
    }

    pub fn queued(&self) -> usize {
        self.shared.lock().tasks.len()
    }

    pub fn info(&self) -> PoolInfo {
        self.info
    }

    /// 推进关闭状态并等待全部工作者退出。
    ///
    /// 状态只升不降：已进入立即关闭后再请求优雅关闭不会恢复排队任务。
    pub async fn shutdown(&self, mode: ShutdownMode) {
        let requested = match mode {
            ShutdownMode::Graceful => PoolState::GracefulShutdown,
            ShutdownMode::Immediate => PoolState::ImmediateShutdown,
        };
        let discarded = {
            let mut queue = self.shared.lock();
            queue.state = queue.state.max(requested);
            if queue.state == PoolState::ImmediateShutdown {
                queue.tasks.drain(..).collect()
            } else {
                Vec::new()
            }
        };
        if !discarded.is_empty() {
            info!(count = discarded.len(), "discarding queued tasks");
        }
        drop(discarded);
        self.shared.notify.notify_waiters();

        // 逐个等待后再移除句柄，调用方取消等待时未结束的工作者仍可再次等待
        let mut workers = self.workers.lock().await;
        while let Some(handle) = workers.last_mut() {
            if let Err(err) = handle.await {
                error!(error = %err, "worker terminated abnormally");
            }
            workers.pop();
        }
        info!(state = ?self.state(), "worker pool stopped");
    }
}

async fn worker_loop(id: usize, shared: Arc<Shared>) {
    debug!(worker = id, "worker ready");
    loop {
        let notified = shared.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let next = {
            let mut queue = shared.lock();
            match queue.state {
                PoolState::ImmediateShutdown => Next::Exit,
                state => match queue.tasks.pop_front() {
                    Some(task) => Next::Run(task),
                    None if state == PoolState::GracefulShutdown => Next::Exit,
                    None => Next::Wait,
                },
            }
        };

        match next {
            Next::Run(task) => {
                if AssertUnwindSafe(task.job).catch_unwind().await.is_err() {
                    error!(worker = id, "task panicked");
                }
            }
            Next::Wait => notified.await,
            Next::Exit => break,
        }
    }
    debug!(worker = id, "worker exited");
}

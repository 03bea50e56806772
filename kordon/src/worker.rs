//! 后台 worker：等待 → 取批 → 分发
//!
//! 每个总线一个常驻任务，状态机为 `Waiting → Draining → Dispatching → Waiting`：
//! - 等待唤醒信号或取消信号；
//! - 一次加锁取走整个队列并复制处理器快照；
//! - 为每个处理器启动一个投递任务，不等待其完成。
//!
//! 同一处理器的投递按批次串行（lane）：新批次的投递任务先等待该处理器上一批
//! 投递结束，再在阻塞线程池中执行，因此跨批次也保持 raise 顺序；
//! 不同处理器之间互不等待。
//!
//! 处理器 panic 只影响当前这一次调用，投递会继续处理批内的下一个事件。
//!
use crate::bus::Shared;
use crate::config::IdlePolicy;
use crate::handler::Handler;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, debug_span, error, trace, warn};

/// 每个处理器最近一次投递任务的句柄
type Lanes<T> = HashMap<Handler<T>, JoinHandle<()>>;

/// worker 当前所处的阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Waiting = 0,
    Draining = 1,
    Dispatching = 2,
    /// 已退出（总线关闭或空闲停止），不会再回到其他状态
    Stopped = 3,
}

impl WorkerState {
    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Waiting,
            1 => Self::Draining,
            2 => Self::Dispatching,
            _ => Self::Stopped,
        }
    }
}

enum Cycle {
    Dispatched,
    /// 批次或处理器快照为空；`discarded` 为因无处理器而丢弃的事件数
    Idle { discarded: usize },
}

pub(crate) async fn run<T: Send + Sync + 'static>(shared: Arc<Shared<T>>) {
    debug!("worker started");
    let mut lanes: Lanes<T> = HashMap::new();

    loop {
        shared.set_worker_state(WorkerState::Waiting);

        let cancelled = tokio::select! {
            biased;
            _ = shared.token.cancelled() => true,
            _ = shared.wake.notified() => false,
        };

        let cycle = drain_and_dispatch(&shared, &mut lanes);

        if cancelled {
            debug!("worker cancelled, final batch flushed");
            break;
        }

        if let Cycle::Idle { discarded } = cycle {
            match shared.idle_policy {
                IdlePolicy::Wait => {
                    if discarded > 0 {
                        debug!(discarded, "no handlers at drain time, batch discarded");
                    }
                }
                IdlePolicy::Stop => {
                    let dropped = shared.close();
                    warn!(
                        discarded = discarded + dropped,
                        "empty drain cycle, worker stopping and bus closed"
                    );
                    break;
                }
            }
        }
    }

    shared.set_worker_state(WorkerState::Stopped);
}

fn drain_and_dispatch<T: Send + Sync + 'static>(
    shared: &Shared<T>,
    lanes: &mut Lanes<T>,
) -> Cycle {
    shared.set_worker_state(WorkerState::Draining);
    let (batch, handlers) = shared.drain();

    if batch.is_empty() || handlers.is_empty() {
        let discarded = if handlers.is_empty() { batch.len() } else { 0 };
        return Cycle::Idle { discarded };
    }

    shared.set_worker_state(WorkerState::Dispatching);
    debug!(batch = batch.len(), handlers = handlers.len(), "dispatching batch");

    lanes.retain(|_, tail| !tail.is_finished());

    let batch = Arc::new(batch);
    for handler in handlers {
        let prev = lanes.remove(&handler);
        let tail = spawn_delivery(handler.clone(), Arc::clone(&batch), prev);
        lanes.insert(handler, tail);
    }

    Cycle::Dispatched
}

/// 启动一次投递：等待同一处理器的上一批结束后，在阻塞线程池中执行
fn spawn_delivery<T: Send + Sync + 'static>(
    handler: Handler<T>,
    batch: Arc<Vec<T>>,
    prev: Option<JoinHandle<()>>,
) -> JoinHandle<()> {
    let span = debug_span!("deliver", handler = handler.name(), batch = batch.len());

    tokio::spawn(
        async move {
            if let Some(prev) = prev {
                let _ = prev.await;
            }
            let span = tracing::Span::current();
            let res = tokio::task::spawn_blocking(move || {
                span.in_scope(|| deliver(&handler, &batch))
            })
            .await;
            if let Err(e) = res {
                error!(error = %e, "delivery task aborted");
            }
        }
        .instrument(span),
    )
}

/// 按 raise 顺序把整批事件交给一个处理器
fn deliver<T>(handler: &Handler<T>, batch: &[T]) {
    let mut failures = 0usize;

    for (index, value) in batch.iter().enumerate() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler.call(value))) {
            failures += 1;
            error!(
                index,
                panic = panic_message(payload.as_ref()),
                "handler panicked, continuing with next value"
            );
        }
    }

    trace!(delivered = batch.len() - failures, failures, "delivery finished");
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

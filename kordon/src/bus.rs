//! 进程内事件总线（EventBus）
//!
//! 每个总线实例持有一个待处理队列、一个处理器注册表以及一个常驻后台 worker：
//! - `raise`：入队并唤醒 worker，从不等待处理器执行；无处理器时直接丢弃；
//! - `register` / `unregister`：按身份去重增删处理器，`None` 视为空操作；
//! - worker：被唤醒后一次加锁取走整个队列并复制注册表，再为每个处理器
//!   并发投递整批事件（批内保持 raise 顺序）。
//!
//! 总线与 worker 生命周期绑定：`shutdown` 或 drop 总线都会取消 worker，
//! worker 在退出前会把已接收的事件做最后一次投递。
//!
use crate::config::{EventBusConfig, IdlePolicy};
use crate::error::{BusError, BusResult};
use crate::handler::Handler;
use crate::registry::HandlerRegistry;
use crate::worker::{self, WorkerState};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, trace};

/// 总线内部共享状态，由 `EventBus` 与 worker 共同持有
pub(crate) struct Shared<T> {
    pub(crate) name: String,
    pub(crate) idle_policy: IdlePolicy,
    /// 单许可唤醒信号：多次 notify 在一次消费前合并为一次
    pub(crate) wake: Notify,
    pub(crate) token: CancellationToken,
    state: Mutex<State<T>>,
    worker_state: AtomicU8,
}

struct State<T> {
    pending: VecDeque<T>,
    handlers: HandlerRegistry<T>,
    closed: bool,
}

impl<T> Shared<T> {
    fn new(config: EventBusConfig) -> Self {
        Self {
            name: config.name,
            idle_policy: config.idle_policy,
            wake: Notify::new(),
            token: CancellationToken::new(),
            state: Mutex::new(State {
                pending: VecDeque::new(),
                handlers: HandlerRegistry::default(),
                closed: false,
            }),
            worker_state: AtomicU8::new(WorkerState::Waiting as u8),
        }
    }

    // 锁内从不执行用户代码，中毒时直接取回内部数据
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 同一次加锁内取走全部待处理事件并复制当前处理器集合
    pub(crate) fn drain(&self) -> (Vec<T>, Vec<Handler<T>>) {
        let mut state = self.lock();
        let batch = Vec::from(std::mem::take(&mut state.pending));
        (batch, state.handlers.snapshot())
    }

    /// 关闭总线并丢弃仍在队列中的事件，返回丢弃数量
    ///
    /// 事件在释放锁之后才被 drop，`T` 的 `Drop` 可以安全地再次调用 `raise`。
    pub(crate) fn close(&self) -> usize {
        let dropped = {
            let mut state = self.lock();
            state.closed = true;
            std::mem::take(&mut state.pending)
        };
        dropped.len()
    }

    pub(crate) fn set_worker_state(&self, ws: WorkerState) {
        self.worker_state.store(ws as u8, Ordering::Release);
    }

    fn worker_state(&self) -> WorkerState {
        WorkerState::from_u8(self.worker_state.load(Ordering::Acquire))
    }
}

/// 泛型事件总线
///
/// 通常由应用持有（需要跨任务共享时放入 `Arc`）；总线被 drop 时后台 worker 随之退出。
pub struct EventBus<T: Send + Sync + 'static> {
    shared: Arc<Shared<T>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + Sync + 'static> EventBus<T> {
    /// 使用默认配置在当前 tokio 运行时上创建总线
    ///
    /// # Panics
    ///
    /// 在 tokio 运行时之外调用时 panic，与 `tokio::spawn` 一致；
    /// 需要显式处理时使用 [`EventBus::try_new`]。
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// # Panics
    ///
    /// 在 tokio 运行时之外调用时 panic。
    pub fn with_config(config: EventBusConfig) -> Self {
        Self::with_handle(&Handle::current(), config)
    }

    pub fn try_new() -> BusResult<Self> {
        Self::try_with_config(EventBusConfig::default())
    }

    pub fn try_with_config(config: EventBusConfig) -> BusResult<Self> {
        let handle = Handle::try_current()?;
        Ok(Self::with_handle(&handle, config))
    }

    /// 在指定运行时上启动 worker，可在运行时之外的线程中调用
    pub fn with_handle(handle: &Handle, config: EventBusConfig) -> Self {
        let shared = Arc::new(Shared::new(config));
        let span = info_span!("kordon.worker", bus = %shared.name);
        let worker = handle.spawn(worker::run(Arc::clone(&shared)).instrument(span));
        debug!(bus = %shared.name, idle_policy = ?shared.idle_policy, "event bus started");

        Self {
            shared,
            worker: Some(worker),
        }
    }

    /// 注册处理器；重复注册同一处理器或传入 `None` 均为空操作
    ///
    /// 返回后该处理器会参与之后的每一次 drain；当前正在投递的批次是否包含它不做保证。
    pub fn register(&self, handler: impl Into<Option<Handler<T>>>) {
        let Some(handler) = handler.into() else {
            return;
        };
        let name = handler.name().to_string();
        let added = self.shared.lock().handlers.insert(handler);
        trace!(bus = %self.shared.name, handler = %name, added, "register");
    }

    /// 注销处理器；未注册的处理器或 `None` 均为空操作
    ///
    /// 返回后该处理器不会出现在之后的任何 drain 快照中，已开始的投递会继续执行完毕。
    pub fn unregister<'a>(&self, handler: impl Into<Option<&'a Handler<T>>>) {
        let Some(handler) = handler.into() else {
            return;
        };
        let removed = self.shared.lock().handlers.remove(handler);
        trace!(bus = %self.shared.name, handler = handler.name(), removed, "unregister");
    }

    /// 发布一个事件
    ///
    /// 仅在入队（或丢弃）期间短暂持锁，从不等待处理器执行。
    /// 当前没有任何处理器或总线已关闭时事件被丢弃。
    pub fn raise(&self, value: T) {
        let _ = self.try_raise(value);
    }

    /// 与 [`EventBus::raise`] 行为相同，但通过错误告知事件是否被丢弃
    pub fn try_raise(&self, value: T) -> BusResult<()> {
        {
            let mut state = self.shared.lock();
            if state.closed {
                trace!(bus = %self.shared.name, "raise on closed bus, value discarded");
                return Err(BusError::Closed);
            }
            if state.handlers.is_empty() {
                trace!(bus = %self.shared.name, "raise without handlers, value discarded");
                return Err(BusError::NoHandlers);
            }
            state.pending.push_back(value);
        }
        self.shared.wake.notify_one();
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn handler_count(&self) -> usize {
        self.shared.lock().handlers.len()
    }

    /// 尚未被 worker 取走的事件数量
    pub fn pending_len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn worker_state(&self) -> WorkerState {
        self.shared.worker_state()
    }

    /// 关闭总线并通知 worker 退出
    ///
    /// 之后的 raise 全部丢弃；已入队的事件会由 worker 做最后一次投递。
    /// 重复调用无副作用。
    pub fn shutdown(&self) {
        if self.shared.token.is_cancelled() {
            return;
        }
        self.shared.lock().closed = true;
        self.shared.token.cancel();
        debug!(bus = %self.shared.name, "event bus shutdown requested");
    }

    /// 关闭总线并等待 worker 退出
    ///
    /// 会先调用 [`EventBus::shutdown`]，因此即使调用方没有显式关闭也不会一直挂起。
    pub async fn join(mut self) -> BusResult<()> {
        self.shutdown();
        match self.worker.take() {
            Some(worker) => Ok(worker.await?),
            None => Ok(()),
        }
    }
}

impl<T: Send + Sync + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (handlers, pending, closed) = {
            let state = self.shared.lock();
            (state.handlers.len(), state.pending.len(), state.closed)
        };
        f.debug_struct("EventBus")
            .field("name", &self.shared.name)
            .field("handlers", &handlers)
            .field("pending", &pending)
            .field("closed", &closed)
            .field("worker_state", &self.worker_state())
            .finish()
    }
}

impl<T: Send + Sync + 'static> Drop for EventBus<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn counting_handler(hits: &Arc<AtomicUsize>) -> Handler<u32> {
        let hits = hits.clone();
        Handler::new(move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[tokio::test]
    async fn raise_without_handlers_is_discarded() {
        let bus = EventBus::<u32>::new();
        bus.raise(1);
        assert_eq!(bus.pending_len(), 0);
        assert!(matches!(bus.try_raise(2), Err(BusError::NoHandlers)));
    }

    #[tokio::test]
    async fn register_deduplicates_and_ignores_none() {
        let bus = EventBus::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = counting_handler(&hits);

        bus.register(h.clone());
        bus.register(h.clone());
        bus.register(None::<Handler<u32>>);
        assert_eq!(bus.handler_count(), 1);

        bus.unregister(None::<&Handler<u32>>);
        bus.unregister(&Handler::<u32>::new(|_| {}));
        assert_eq!(bus.handler_count(), 1);

        bus.unregister(&h);
        bus.unregister(&h);
        assert_eq!(bus.handler_count(), 0);
    }

    // 单线程运行时下 worker 只在测试让出执行权后才会运行
    #[tokio::test]
    async fn raise_enqueues_until_worker_runs() {
        let bus = EventBus::<u32>::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.register(counting_handler(&hits));

        bus.raise(1);
        bus.raise(2);
        assert_eq!(bus.pending_len(), 2);
        assert_eq!(bus.worker_state(), WorkerState::Waiting);

        tokio::time::timeout(Duration::from_secs(2), async {
            while hits.load(Ordering::SeqCst) < 2 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("both values delivered");
        assert_eq!(bus.pending_len(), 0);
    }

    #[tokio::test]
    async fn shutdown_closes_and_stops_worker() {
        let bus = EventBus::<u32>::new();
        bus.register(Handler::<u32>::new(|_| {}));
        bus.shutdown();
        bus.shutdown();

        assert!(bus.is_closed());
        assert!(matches!(bus.try_raise(1), Err(BusError::Closed)));

        let state = Arc::clone(&bus.shared);
        bus.join().await.expect("worker exits cleanly");
        assert_eq!(state.worker_state(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn join_without_explicit_shutdown_completes() {
        let bus = EventBus::<u32>::new();
        bus.register(Handler::<u32>::new(|_| {}));
        let state = Arc::clone(&bus.shared);

        tokio::time::timeout(Duration::from_secs(2), bus.join())
            .await
            .expect("join returns without a prior shutdown")
            .expect("worker exits cleanly");
        assert_eq!(state.worker_state(), WorkerState::Stopped);
        assert!(state.lock().closed);
    }

    /// Drop 时向同一总线再发布一次的事件
    struct Echo {
        bus: Option<std::sync::Weak<EventBus<Echo>>>,
    }

    impl Drop for Echo {
        fn drop(&mut self) {
            if let Some(bus) = self.bus.take().and_then(|w| w.upgrade()) {
                bus.raise(Echo { bus: None });
            }
        }
    }

    // 单线程运行时下 worker 尚未运行，事件一直留在队列里直到 close
    #[tokio::test]
    async fn close_drops_pending_values_outside_the_lock() {
        let bus = Arc::new(EventBus::<Echo>::new());
        bus.register(Handler::<Echo>::new(|_| {}));
        bus.raise(Echo {
            bus: Some(Arc::downgrade(&bus)),
        });
        assert_eq!(bus.pending_len(), 1);

        let shared = Arc::clone(&bus.shared);
        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::spawn(move || {
            let _ = tx.send(shared.close());
        });

        let dropped = rx
            .recv_timeout(Duration::from_secs(2))
            .expect("close must not deadlock when a dropped value raises");
        assert_eq!(dropped, 1);
        assert!(bus.is_closed());
        assert_eq!(bus.pending_len(), 0);
    }

    #[test]
    fn try_new_outside_runtime_fails() {
        assert!(matches!(
            EventBus::<u32>::try_new(),
            Err(BusError::NoRuntime { .. })
        ));
    }

    #[test]
    fn with_handle_works_from_plain_thread() {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .enable_all()
            .build()
            .unwrap();
        let bus = EventBus::<u32>::with_handle(rt.handle(), EventBusConfig::default());
        let hits = Arc::new(AtomicUsize::new(0));
        bus.register(counting_handler(&hits));
        bus.raise(7);

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while hits.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn debug_reports_counts() {
        let bus = EventBus::<u32>::with_config(EventBusConfig::builder().name("dbg").build());
        bus.register(Handler::<u32>::new(|_| {}));
        let out = format!("{bus:?}");
        assert!(out.contains("\"dbg\""));
        assert!(out.contains("handlers: 1"));
    }
}

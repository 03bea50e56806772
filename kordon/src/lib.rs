//! kordon：进程内泛型事件总线
//!
//! 生产者发布类型为 `T` 的值，已注册的处理器在后台被异步调用，
//! 既不占用发布者的调用栈，也不会阻塞发布者。
//!
//! - `bus`：对外的 [`EventBus`]，负责注册/注销/发布与生命周期；
//! - `worker`：常驻后台任务，按“等待 → 取批 → 分发”循环运行；
//! - `handler` / `registry`：处理器身份与去重集合；
//! - `config` / `error`：配置与错误类型。
//!
//! 典型用法：
//! 1. 在 tokio 运行时中创建 `EventBus::<T>::new()`；
//! 2. 以 [`Handler::new`] 包装回调并 `register`，保留一份克隆用于 `unregister`；
//! 3. 从任意线程调用 `raise`，每个处理器按发布顺序收到整批事件。
//!
pub mod bus;
pub mod config;
pub mod error;
pub mod handler;
mod registry;
pub mod worker;

pub use bus::EventBus;
pub use config::{EventBusConfig, IdlePolicy};
pub use error::{BusError, BusResult};
pub use handler::Handler;
pub use worker::WorkerState;

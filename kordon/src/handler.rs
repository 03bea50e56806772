//! 事件处理器（Handler）
//!
//! 对 `Fn(&T)` 回调的轻量包装：
//! - 以共享闭包的地址作为身份，克隆体彼此相等，独立创建的处理器永不相等；
//! - 名称仅用于日志与诊断，不参与相等性比较。
//!
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

type HandlerFn<T> = dyn Fn(&T) + Send + Sync;

const ANONYMOUS: &str = "anonymous";

/// 事件处理器：接收一个事件值，无返回值
pub struct Handler<T> {
    name: Option<Arc<str>>,
    f: Arc<HandlerFn<T>>,
}

impl<T> Handler<T> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            name: None,
            f: Arc::new(f),
        }
    }

    /// 创建带名称的处理器，名称会出现在投递日志中
    pub fn named<F>(name: impl Into<Arc<str>>, f: F) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        Self {
            name: Some(name.into()),
            f: Arc::new(f),
        }
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(ANONYMOUS)
    }

    pub fn call(&self, value: &T) {
        (self.f)(value)
    }
}

// 手写 Clone：派生实现会多出一个 `T: Clone` 约束
impl<T> Clone for Handler<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            f: Arc::clone(&self.f),
        }
    }
}

impl<T> PartialEq for Handler<T> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.f), Arc::as_ptr(&other.f))
    }
}

impl<T> Eq for Handler<T> {}

impl<T> Hash for Handler<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.f).cast::<()>().hash(state);
    }
}

impl<T> fmt::Debug for Handler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handler")
            .field("name", &self.name())
            .field("addr", &Arc::as_ptr(&self.f).cast::<()>())
            .finish()
    }
}

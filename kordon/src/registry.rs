//! 处理器注册表（HandlerRegistry）
//!
//! 按身份去重的处理器集合；插入顺序保留但不影响投递语义（各处理器并发投递）。
//!
use crate::handler::Handler;

pub(crate) struct HandlerRegistry<T> {
    handlers: Vec<Handler<T>>,
}

impl<T> Default for HandlerRegistry<T> {
    fn default() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }
}

impl<T> HandlerRegistry<T> {
    /// 已存在时不重复插入，返回是否新增
    pub(crate) fn insert(&mut self, handler: Handler<T>) -> bool {
        if self.contains(&handler) {
            return false;
        }
        self.handlers.push(handler);
        true
    }

    /// 返回是否确实移除了一个处理器
    pub(crate) fn remove(&mut self, handler: &Handler<T>) -> bool {
        match self.handlers.iter().position(|h| h == handler) {
            Some(idx) => {
                self.handlers.remove(idx);
                true
            }
            None => false,
        }
    }

    pub(crate) fn contains(&self, handler: &Handler<T>) -> bool {
        self.handlers.iter().any(|h| h == handler)
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// 当前处理器集合的快照，供一次 drain 周期使用
    pub(crate) fn snapshot(&self) -> Vec<Handler<T>> {
        self.handlers.clone()
    }
}

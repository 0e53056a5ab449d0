//! 会话变量存储
//! 规则步骤与脚本共享同一份存储，只读写不删除

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// 变量存储句柄，克隆后指向同一份数据
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    inner: Rc<RefCell<HashMap<String, String>>>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.inner.borrow().get(name).cloned()
    }

    /// 写入变量，同名覆盖
    pub fn put(&self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.borrow_mut().insert(name.into(), value.into());
    }

    /// 批量写入
    pub fn put_map<I, K, V>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut map = self.inner.borrow_mut();
        for (name, value) in entries {
            map.insert(name.into(), value.into());
        }
    }

    /// 当前存储快照
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.inner.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

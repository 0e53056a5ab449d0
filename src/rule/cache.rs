//! 规则编译缓存
//! 会话内缓存，键为（占位符替换后的规则文本，方言/标志）；编译失败不入缓存

use std::collections::HashMap;
use std::rc::Rc;
use tracing::debug;

use crate::compiler::{RuleMode, RulePattern, RulePatterns, VariableFlag, VariablesPattern};
use crate::error::RuleResult;

/// 单个分区缓存
#[derive(Debug)]
struct Slot<K, V> {
    entries: HashMap<K, Rc<V>>,
}

impl<K: std::hash::Hash + Eq, V> Default for Slot<K, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

impl<K: std::hash::Hash + Eq, V> Slot<K, V> {
    fn get_or_try_insert(
        &mut self,
        enabled: bool,
        key: K,
        compile: impl FnOnce() -> RuleResult<V>,
    ) -> RuleResult<Rc<V>> {
        if !enabled {
            return compile().map(Rc::new);
        }
        if let Some(hit) = self.entries.get(&key) {
            return Ok(Rc::clone(hit));
        }
        let compiled = Rc::new(compile()?);
        self.entries.insert(key, Rc::clone(&compiled));
        Ok(compiled)
    }
}

/// 规则缓存
#[derive(Debug, Default)]
pub struct RuleCache {
    enabled: bool,
    multi: Slot<(String, RuleMode), RulePatterns>,
    single: Slot<(String, RuleMode), RulePattern>,
    variables: Slot<(String, VariableFlag), VariablesPattern>,
}

impl RuleCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Default::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// 多步骤规则：命中返回同一个 Rc，未命中则编译并缓存
    pub fn patterns(
        &mut self,
        rule: &str,
        mode: RuleMode,
        compile: impl FnOnce() -> RuleResult<RulePatterns>,
    ) -> RuleResult<Rc<RulePatterns>> {
        let hit = self.enabled && self.multi.entries.contains_key(&(rule.to_string(), mode));
        debug!("多步骤规则缓存{}：{}", if hit { "命中" } else { "未命中" }, rule);
        self.multi
            .get_or_try_insert(self.enabled, (rule.to_string(), mode), compile)
    }

    /// 单步骤规则
    pub fn pattern(
        &mut self,
        rule: &str,
        mode: RuleMode,
        compile: impl FnOnce() -> RuleResult<RulePattern>,
    ) -> RuleResult<Rc<RulePattern>> {
        self.single
            .get_or_try_insert(self.enabled, (rule.to_string(), mode), compile)
    }

    /// 变量映射规则
    pub fn variables(
        &mut self,
        rule: &str,
        flag: VariableFlag,
        compile: impl FnOnce() -> RuleResult<VariablesPattern>,
    ) -> RuleResult<Rc<VariablesPattern>> {
        self.variables
            .get_or_try_insert(self.enabled, (rule.to_string(), flag), compile)
    }

    /// 已缓存的规则总数
    pub fn len(&self) -> usize {
        self.multi.entries.len() + self.single.entries.len() + self.variables.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.multi.entries.clear();
        self.single.entries.clear();
        self.variables.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::RuleCompiler;
    use crate::error::RuleError;

    #[test]
    fn test_enabled_cache_returns_same_rc() {
        let mut cache = RuleCache::new(true);
        let a = cache.patterns("h1", RuleMode::Css, || RuleCompiler::compile("h1", RuleMode::Css)).unwrap();
        let b = cache.patterns("h1", RuleMode::Css, || RuleCompiler::compile("h1", RuleMode::Css)).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        // 方言不同视为不同键
        let c = cache.patterns("h1", RuleMode::Text, || RuleCompiler::compile("h1", RuleMode::Text)).unwrap();
        assert!(!Rc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_disabled_cache_compiles_every_time() {
        let mut cache = RuleCache::new(false);
        let a = cache.pattern("h1", RuleMode::Css, || RuleCompiler::compile_single("h1", RuleMode::Css)).unwrap();
        let b = cache.pattern("h1", RuleMode::Css, || RuleCompiler::compile_single("h1", RuleMode::Css)).unwrap();
        assert!(!Rc::ptr_eq(&a, &b));
        assert_eq!(*a, *b);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_failed_compile_is_not_cached() {
        let mut cache = RuleCache::new(true);
        let result = cache.patterns("a##(", RuleMode::Css, || RuleCompiler::compile("a##(", RuleMode::Css));
        assert!(matches!(result, Err(RuleError::MalformedRule { .. })));
        assert!(cache.is_empty());
    }
}

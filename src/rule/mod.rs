//! 会话状态：变量存储与规则编译缓存
pub mod cache;
pub mod store;

pub use self::cache::RuleCache;
pub use self::store::VariableStore;

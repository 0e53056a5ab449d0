//! rsbookrule - 书源规则编译与执行引擎

// 导出全局错误类型
pub use self::error::{RuleError, RuleResult};

// 导出配置模块
pub use self::config::{AnalyzerConfig, ConfigManager, CustomConfigBuilder};

// 导出编译模块核心接口
pub use self::compiler::{
    ReplaceSpec, RuleCompiler, RuleMode, RulePattern, RulePatterns, VariableFlag,
    VariableMapCompiler, VariablesPattern,
};

// 导出文档抽象
pub use self::document::{Document, DomNode, Primitive, SourceDocument};

// 导出会话状态
pub use self::rule::{RuleCache, VariableStore};

// 导出脚本接口
pub use self::script::{
    BoaScriptEngine, HostContext, HttpFetcher, ReqwestFetcher, ScriptEngine, ScriptHost,
    ScriptValue,
};

// 导出HTML文本处理
pub use self::extractor::{format_html, unescape_html3, unescape_html4};

// 导出工具函数
pub use self::utils::{resolve_url, stringify};

// 导出执行模块核心接口
pub use self::analyzer::{run_session, run_session_with_timeout, RuleAnalyzer};

// 声明所有子模块
pub mod config;
pub mod error;
pub mod compiler;
pub mod document;
pub mod rule;
pub mod script;
pub mod extractor;
pub mod utils;
pub mod analyzer;

//! 编译模块：将原始规则编译为可执行的步骤序列
pub mod pattern;
pub mod tokenizer;
pub mod compiler;
pub mod variables;

pub use self::pattern::{
    ReplaceSpec, RuleMode, RulePattern, RulePatterns, VariableFlag, VariablesPattern,
};
pub use self::compiler::RuleCompiler;
pub use self::variables::VariableMapCompiler;

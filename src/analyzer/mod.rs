//! 执行模块：规则执行器、执行管线与抽取会话
pub mod analyzer;
mod pipeline;
pub mod session;

pub use self::analyzer::RuleAnalyzer;
pub use self::session::{run_session, run_session_with_timeout};

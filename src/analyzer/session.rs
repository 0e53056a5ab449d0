//! 抽取会话：在阻塞线程上创建并使用执行器
//! 执行器不可跨线程（!Send），因此必须在工作线程内构造

use std::time::Duration;
use tracing::{debug, warn};

use super::analyzer::RuleAnalyzer;
use crate::config::AnalyzerConfig;
use crate::error::{RuleError, RuleResult};

/// 在独立的阻塞线程上运行一次抽取会话
pub async fn run_session<F, T>(config: AnalyzerConfig, task: F) -> RuleResult<T>
where
    F: FnOnce(&mut RuleAnalyzer) -> RuleResult<T> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::task::spawn_blocking(move || {
        let mut analyzer = RuleAnalyzer::new(config);
        let result = task(&mut analyzer);
        debug!("抽取会话结束，缓存规则{}条", analyzer.cache().len());
        result
    });

    handle.await.map_err(|e| {
        warn!("抽取会话异常终止：{}", e);
        RuleError::SessionAborted(e.to_string())
    })?
}

/// 带超时的抽取会话，超时后放弃等待（工作线程自行结束）
pub async fn run_session_with_timeout<F, T>(
    config: AnalyzerConfig,
    timeout: Duration,
    task: F,
) -> RuleResult<T>
where
    F: FnOnce(&mut RuleAnalyzer) -> RuleResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::time::timeout(timeout, run_session(config, task))
        .await
        .map_err(|_| RuleError::SessionTimeout)?
}

//! 全局错误类型定义

use thiserror::Error;
use serde_json::Error as SerdeJsonError;
use url::ParseError as UrlParseError;

#[derive(Error, Debug)]
pub enum RuleError {
    // 规则编译错误
    #[error("规则语法错误：{reason}（规则：{rule}）")]
    MalformedRule { rule: String, reason: String },

    // 脚本执行错误
    #[error("脚本执行失败：{0}")]
    ScriptExecution(String),

    // 规则步骤与当前文档后端不匹配（执行器会降级为空结果）
    #[error("后端不匹配：{mode} 规则无法作用于 {backend} 节点")]
    BackendMismatch { mode: String, backend: String },

    // URL 相关错误
    #[error("未配置基础URL，无法解析相对地址")]
    MissingBaseUrl,
    #[error("URL解析失败：{0}")]
    UrlError(#[from] UrlParseError),

    // 网络相关错误
    #[error("网络请求失败：{0}")]
    HttpError(#[from] reqwest::Error),
    #[error("请求 {url} 返回状态码 {status}")]
    HttpStatus { url: String, status: u16 },

    // 序列化/反序列化错误
    #[error("JSON解析失败：{0}")]
    JsonError(#[from] SerdeJsonError),

    // 会话错误
    #[error("抽取会话异常终止：{0}")]
    SessionAborted(String),
    #[error("抽取会话超时")]
    SessionTimeout,

    // 基础错误
    #[error("无效输入：{0}")]
    InvalidInput(String),
}

impl RuleError {
    /// 构造规则语法错误
    pub fn malformed(rule: &str, reason: impl Into<String>) -> Self {
        RuleError::MalformedRule {
            rule: rule.to_string(),
            reason: reason.into(),
        }
    }
}

// 全局Result类型
pub type RuleResult<T> = Result<T, RuleError>;

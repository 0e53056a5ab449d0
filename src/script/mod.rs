//! 脚本执行模块
//! 规则中的 `<js>` / `@js:` 片段通过 [`ScriptEngine`] 执行，宿主能力通过 [`ScriptHost`] 注入
pub mod boa;
pub mod host;

use std::rc::Rc;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::error::{RuleError, RuleResult};
use crate::extractor;

pub use self::boa::BoaScriptEngine;
pub use self::host::{HostContext, HttpFetcher, ReqwestFetcher};

/// 脚本值（与 JSON 值同构）
pub type ScriptValue = serde_json::Value;

/// 脚本可调用的宿主接口
pub trait ScriptHost {
    /// 读取会话变量，不存在时为空串
    fn get_variable(&self, name: &str) -> String;

    /// 写入会话变量
    fn put_variable(&self, name: &str, value: &str);

    /// 同步请求并返回响应文本
    fn ajax(&self, url: &str) -> RuleResult<String>;

    fn base64_encode(&self, input: &str) -> String {
        STANDARD.encode(input)
    }

    fn base64_decode(&self, input: &str) -> RuleResult<String> {
        let bytes = STANDARD
            .decode(input.trim())
            .map_err(|e| RuleError::InvalidInput(format!("base64 解码失败：{}", e)))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn unescape_html3(&self, input: &str) -> String {
        extractor::unescape_html3(input)
    }

    fn unescape_html4(&self, input: &str) -> String {
        extractor::unescape_html4(input)
    }

    fn format_html(&self, input: &str) -> String {
        extractor::format_html(input)
    }
}

/// 脚本引擎
pub trait ScriptEngine {
    /// 执行一段脚本：`result` 为种子值，返回脚本最后一个表达式的值
    fn eval(
        &self,
        script: &str,
        host: &Rc<dyn ScriptHost>,
        seed: &ScriptValue,
        base_url: Option<&str>,
    ) -> RuleResult<ScriptValue>;
}

//! 相对地址解析

use url::Url;

use crate::error::{RuleError, RuleResult};

/// 将抽取到的地址解析为绝对地址
/// - 空值返回空串
/// - 自带协议的地址原样返回
/// - 其余按基础URL做标准相对解析（协议相对、根相对、路径相对）
pub fn resolve_url(base_url: Option<&str>, value: &str) -> RuleResult<String> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(String::new());
    }
    if Url::parse(value).is_ok() {
        return Ok(value.to_string());
    }
    let base = base_url
        .filter(|b| !b.trim().is_empty())
        .ok_or(RuleError::MissingBaseUrl)?;
    let base = Url::parse(base.trim())?;
    Ok(base.join(value)?.to_string())
}

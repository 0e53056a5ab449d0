//! 书源配置管理,存储执行器的所有可配置项

use serde::Deserialize;

use crate::error::{RuleError, RuleResult};

/// 执行器配置（来自书源配置）
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AnalyzerConfig {
    // 当前页面的基础URL，用于相对地址解析
    #[serde(alias = "bookSourceUrl")]
    pub base_url: Option<String>,
    // 是否启用规则编译缓存
    pub enable_rule_cache: bool,
    // ajax 超时配置（单位：秒）
    pub http_timeout: u64,
    // ajax 请求使用的 User-Agent
    pub user_agent: String,
    // 脚本单次执行的循环次数上限，0 表示不限制
    pub script_loop_limit: u64,
    // 脚本递归深度上限
    pub script_recursion_limit: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            enable_rule_cache: true,
            http_timeout: 30,
            user_agent: "Mozilla/5.0 (Linux; Android 10) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Mobile Safari/537.36".to_string(),
            script_loop_limit: 1_000_000,
            script_recursion_limit: 512,
        }
    }
}

/// 配置管理器
pub struct ConfigManager;

impl ConfigManager {
    /// 获取默认配置
    pub fn get_default() -> AnalyzerConfig {
        AnalyzerConfig::default()
    }

    /// 自定义配置
    pub fn custom() -> CustomConfigBuilder {
        CustomConfigBuilder::new()
    }

    /// 从书源 JSON 中读取配置，缺失字段使用默认值
    pub fn from_book_source_json(json: &str) -> RuleResult<AnalyzerConfig> {
        let config: AnalyzerConfig = serde_json::from_str(json)?;
        if config.http_timeout == 0 {
            return Err(RuleError::InvalidInput("httpTimeout 不能为 0".to_string()));
        }
        Ok(config)
    }
}

/// 配置构建器（便于自定义配置）
#[derive(Debug, Clone)]
pub struct CustomConfigBuilder {
    config: AnalyzerConfig,
}

impl Default for CustomConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CustomConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AnalyzerConfig::default(),
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    pub fn enable_rule_cache(mut self, enabled: bool) -> Self {
        self.config.enable_rule_cache = enabled;
        self
    }

    pub fn http_timeout(mut self, timeout: u64) -> Self {
        self.config.http_timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn script_loop_limit(mut self, limit: u64) -> Self {
        self.config.script_loop_limit = limit;
        self
    }

    pub fn script_recursion_limit(mut self, limit: usize) -> Self {
        self.config.script_recursion_limit = limit;
        self
    }

    pub fn build(self) -> AnalyzerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_book_source_json_defaults() {
        let config = ConfigManager::from_book_source_json(
            r#"{"bookSourceUrl":"https://a.com","enableRuleCache":false}"#,
        )
        .unwrap();
        assert_eq!(config.base_url.as_deref(), Some("https://a.com"));
        assert!(!config.enable_rule_cache);
        assert_eq!(config.http_timeout, 30);
    }

    #[test]
    fn test_from_book_source_json_rejects_zero_timeout() {
        let result = ConfigManager::from_book_source_json(r#"{"httpTimeout":0}"#);
        assert!(matches!(result, Err(RuleError::InvalidInput(_))));
    }

    #[test]
    fn test_builder() {
        let config = ConfigManager::custom()
            .base_url("https://a.com/b/c")
            .enable_rule_cache(false)
            .http_timeout(5)
            .build();
        assert_eq!(config.base_url.as_deref(), Some("https://a.com/b/c"));
        assert!(!config.enable_rule_cache);
        assert_eq!(config.http_timeout, 5);
    }
}

//! 脚本宿主实现：会话变量、网络请求

use std::rc::Rc;
use std::time::Duration;
use once_cell::unsync::OnceCell;
use reqwest::blocking::Client;
use tracing::debug;

use super::ScriptHost;
use crate::config::AnalyzerConfig;
use crate::error::{RuleError, RuleResult};
use crate::rule::VariableStore;
use crate::utils::resolve_url;

/// 同步 HTTP 请求接口
pub trait HttpFetcher {
    fn fetch(&self, url: &str) -> RuleResult<String>;
}

/// 基于 reqwest 阻塞客户端的默认实现，客户端在首次请求时创建
#[derive(Debug)]
pub struct ReqwestFetcher {
    timeout: Duration,
    user_agent: String,
    client: OnceCell<Client>,
}

impl ReqwestFetcher {
    pub fn new(config: &AnalyzerConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.http_timeout),
            user_agent: config.user_agent.clone(),
            client: OnceCell::new(),
        }
    }

    fn client(&self) -> RuleResult<&Client> {
        self.client.get_or_try_init(|| {
            Client::builder()
                .timeout(self.timeout)
                .user_agent(self.user_agent.as_str())
                .build()
                .map_err(RuleError::from)
        })
    }
}

impl HttpFetcher for ReqwestFetcher {
    fn fetch(&self, url: &str) -> RuleResult<String> {
        let start = std::time::Instant::now();
        let response = self
            .client()?
            .get(url)
            .header("Accept-Encoding", "gzip, deflate")
            .send()?;

        if !response.status().is_success() {
            return Err(RuleError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let body = response.text()?;
        debug!("ajax 请求完成，耗时{:?}，响应{}字节：{}", start.elapsed(), body.len(), url);
        Ok(body)
    }
}

/// 执行器注入给脚本的宿主
pub struct HostContext {
    store: VariableStore,
    fetcher: Rc<dyn HttpFetcher>,
    base_url: Option<String>,
}

impl HostContext {
    pub fn new(store: VariableStore, fetcher: Rc<dyn HttpFetcher>, base_url: Option<String>) -> Self {
        Self {
            store,
            fetcher,
            base_url,
        }
    }
}

impl ScriptHost for HostContext {
    fn get_variable(&self, name: &str) -> String {
        self.store.get(name).unwrap_or_default()
    }

    fn put_variable(&self, name: &str, value: &str) {
        self.store.put(name, value);
    }

    fn ajax(&self, url: &str) -> RuleResult<String> {
        // 相对地址按基础URL补全
        let url = resolve_url(self.base_url.as_deref(), url)?;
        if url.is_empty() {
            return Err(RuleError::InvalidInput("ajax 地址为空".to_string()));
        }
        self.fetcher.fetch(&url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    /// 记录请求地址的桩实现
    #[derive(Default)]
    struct StubFetcher {
        requested: RefCell<Vec<String>>,
    }

    impl HttpFetcher for StubFetcher {
        fn fetch(&self, url: &str) -> RuleResult<String> {
            self.requested.borrow_mut().push(url.to_string());
            Ok(format!("body of {}", url))
        }
    }

    #[test]
    fn test_host_variables_share_store() {
        let store = VariableStore::new();
        let host = HostContext::new(store.clone(), Rc::new(StubFetcher::default()), None);
        host.put_variable("key", "v1");
        assert_eq!(store.get("key").as_deref(), Some("v1"));
        assert_eq!(host.get_variable("key"), "v1");
        assert_eq!(host.get_variable("missing"), "");
    }

    #[test]
    fn test_ajax_resolves_relative_url() {
        let fetcher = Rc::new(StubFetcher::default());
        let host = HostContext::new(
            VariableStore::new(),
            fetcher.clone(),
            Some("https://a.com/book/1".to_string()),
        );
        assert_eq!(host.ajax("/api?id=1").unwrap(), "body of https://a.com/api?id=1");
        assert_eq!(fetcher.requested.borrow().as_slice(), ["https://a.com/api?id=1"]);
        assert!(host.ajax("").is_err());
    }

    #[test]
    fn test_base64_and_html_helpers() {
        let host = HostContext::new(VariableStore::new(), Rc::new(StubFetcher::default()), None);
        assert_eq!(host.base64_encode("书源"), "5Lmm5rqQ");
        assert_eq!(host.base64_decode("5Lmm5rqQ").unwrap(), "书源");
        assert!(host.base64_decode("!!").is_err());
        assert_eq!(host.unescape_html3("&copy;"), "©");
        assert_eq!(host.format_html("<p>a</p>"), "\u{3000}\u{3000}a");
    }
}

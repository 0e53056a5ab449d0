//! 规则执行器：编排编译缓存、文档选择、脚本与后处理
use std::borrow::Cow;
use std::collections::HashMap;
use std::rc::Rc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use super::pipeline::Pipeline;
use crate::compiler::tokenizer::{starts_with_ignore_case, SCRIPT_OPEN, SCRIPT_PREFIX, STEP_SEPARATOR, REGEX_FENCE};
use crate::compiler::{
    RuleCompiler, RuleMode, RulePattern, RulePatterns, VariableFlag, VariableMapCompiler,
    VariablesPattern,
};
use crate::config::AnalyzerConfig;
use crate::document::{xpath, Primitive, SourceDocument};
use crate::error::RuleResult;
use crate::rule::{RuleCache, VariableStore};
use crate::script::{BoaScriptEngine, HostContext, HttpFetcher, ReqwestFetcher, ScriptEngine, ScriptHost};
use crate::utils::{resolve_url, stringify};

/// `{{name}}` 变量占位符
static PLACEHOLDER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\{\s*([^{}\s]+)\s*\}\}").unwrap()
});

/// 直接规则的读取目标
#[derive(Debug, Clone, Copy, PartialEq)]
enum DirectTarget {
    Text,
    Url,
}

/// 规则执行器，一个实例对应一次抓取会话
pub struct RuleAnalyzer {
    config: AnalyzerConfig,
    cache: RuleCache,
    store: VariableStore,
    engine: Box<dyn ScriptEngine>,
    host: Rc<dyn ScriptHost>,
}

impl RuleAnalyzer {
    /// 创建执行器（默认 reqwest 请求与 boa 脚本引擎）
    pub fn new(config: AnalyzerConfig) -> Self {
        let fetcher = Rc::new(ReqwestFetcher::new(&config));
        Self::with_fetcher(config, fetcher)
    }

    /// 使用自定义请求实现创建执行器
    pub fn with_fetcher(config: AnalyzerConfig, fetcher: Rc<dyn HttpFetcher>) -> Self {
        let store = VariableStore::new();
        let host = Rc::new(HostContext::new(store.clone(), fetcher, config.base_url.clone()));
        Self {
            cache: RuleCache::new(config.enable_rule_cache),
            engine: Box::new(BoaScriptEngine::from_config(&config)),
            store,
            host,
            config,
        }
    }

    /// 替换脚本引擎
    pub fn with_engine(mut self, engine: Box<dyn ScriptEngine>) -> Self {
        self.engine = engine;
        self
    }

    /// 替换脚本宿主
    pub fn with_host(mut self, host: Rc<dyn ScriptHost>) -> Self {
        self.host = host;
        self
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// 会话变量存储
    pub fn store(&self) -> &VariableStore {
        &self.store
    }

    pub fn cache(&self) -> &RuleCache {
        &self.cache
    }

    /// 替换 `{{name}}` 占位符，未定义的变量替换为空串
    fn substitute<'r>(&self, raw: &'r str) -> Cow<'r, str> {
        PLACEHOLDER_REGEX.replace_all(raw, |caps: &regex::Captures<'_>| {
            self.store.get(&caps[1]).unwrap_or_default()
        })
    }

    /// 编译多步骤规则（带缓存）
    pub fn compile_rule(
        &mut self,
        raw: &str,
        mode: RuleMode,
        with_variable_store: bool,
    ) -> RuleResult<Rc<RulePatterns>> {
        let rule = if with_variable_store {
            self.substitute(raw)
        } else {
            Cow::Borrowed(raw)
        };
        self.cache.patterns(&rule, mode, || RuleCompiler::compile(&rule, mode))
    }

    /// 编译单步骤规则（带缓存）
    pub fn compile_single_rule(
        &mut self,
        raw: &str,
        mode: RuleMode,
        with_variable_store: bool,
    ) -> RuleResult<Rc<RulePattern>> {
        let rule = if with_variable_store {
            self.substitute(raw)
        } else {
            Cow::Borrowed(raw)
        };
        self.cache.pattern(&rule, mode, || RuleCompiler::compile_single(&rule, mode))
    }

    /// 编译变量映射规则（带缓存）
    pub fn compile_variable_rule(&mut self, raw: &str, flag: VariableFlag) -> RuleResult<Rc<VariablesPattern>> {
        self.cache.variables(raw, flag, || VariableMapCompiler::compile(raw, flag))
    }

    /// 抽取单个文本值
    pub fn extract_text(&mut self, doc: &dyn SourceDocument, rule: &str) -> RuleResult<String> {
        if let Some(text) = self.extract_direct(doc.primitive(), rule, DirectTarget::Text)? {
            return Ok(text);
        }
        self.run_single(doc.primitive(), rule)
    }

    /// 抽取未解析的原始地址
    pub fn extract_raw_url(&mut self, doc: &dyn SourceDocument, rule: &str) -> RuleResult<String> {
        if let Some(url) = self.extract_direct(doc.primitive(), rule, DirectTarget::Url)? {
            return Ok(url);
        }
        self.run_single(doc.primitive(), rule)
    }

    /// 抽取地址并按基础URL解析为绝对地址
    pub fn extract_url(&mut self, doc: &dyn SourceDocument, rule: &str) -> RuleResult<String> {
        let raw = self.extract_raw_url(doc, rule)?;
        resolve_url(self.config.base_url.as_deref(), &raw)
    }

    /// 抽取文本列表
    pub fn extract_text_list(&mut self, doc: &dyn SourceDocument, rule: &str) -> RuleResult<Vec<String>> {
        let primitive = doc.primitive();
        let patterns = self.compile_rule(rule, RuleMode::of(primitive), true)?;
        self.pipeline().run_list(&patterns, primitive)
    }

    /// 抽取地址列表，逐项解析为绝对地址
    pub fn extract_url_list(&mut self, doc: &dyn SourceDocument, rule: &str) -> RuleResult<Vec<String>> {
        let base_url = self.config.base_url.clone();
        self.extract_text_list(doc, rule)?
            .iter()
            .map(|raw| resolve_url(base_url.as_deref(), raw))
            .collect()
    }

    /// 按变量映射规则抽取并写入会话变量，返回写入后的全部变量
    pub fn extract_variables(
        &mut self,
        doc: &dyn SourceDocument,
        rule: &str,
        flag: VariableFlag,
    ) -> RuleResult<HashMap<String, String>> {
        if doc.is_source_empty() || rule.trim().is_empty() {
            return Ok(self.store.snapshot());
        }

        let pattern = self.compile_variable_rule(rule, flag)?;
        let mut extracted = Vec::with_capacity(pattern.len());
        for (name, sub_rule) in &pattern.entries {
            let value = match pattern.flag {
                VariableFlag::Content => self.extract_text(doc, sub_rule)?,
                VariableFlag::Url => self.extract_url(doc, sub_rule)?,
            };
            // 空值不覆盖已有变量
            if value.is_empty() {
                debug!("变量{}抽取结果为空，已跳过", name);
                continue;
            }
            extracted.push((name.clone(), value));
        }
        self.store.put_map(extracted);
        Ok(self.store.snapshot())
    }

    fn pipeline(&self) -> Pipeline<'_> {
        Pipeline {
            engine: self.engine.as_ref(),
            host: &self.host,
            base_url: self.config.base_url.as_deref(),
        }
    }

    fn run_single(&mut self, primitive: &Primitive, rule: &str) -> RuleResult<String> {
        let patterns = self.compile_rule(rule, RuleMode::of(primitive), true)?;
        self.pipeline().run_single(&patterns, primitive)
    }

    /// 直接规则快速通道，非直接规则返回 None
    fn extract_direct(&self, primitive: &Primitive, rule: &str, target: DirectTarget) -> RuleResult<Option<String>> {
        let rule = rule.trim();
        if !is_direct_rule(rule) {
            return Ok(None);
        }

        let value = match (primitive, target) {
            (Primitive::Object(value), _) => value.get(rule).map(stringify).unwrap_or_default(),
            (Primitive::Element(node), DirectTarget::Text) => {
                if rule.contains('@') {
                    return Ok(None);
                }
                if rule.is_empty() {
                    node.text()
                } else {
                    // 未匹配时回退为元素自身文本
                    match node.select_first(rule)? {
                        Some(found) => found.text(),
                        None => node.text(),
                    }
                }
            }
            (Primitive::Element(node), DirectTarget::Url) => {
                if !is_attribute_name(rule) {
                    return Ok(None);
                }
                node.attr(rule).unwrap_or_default()
            }
            (Primitive::XPath(node), _) => {
                if rule.is_empty() {
                    node.text()
                } else {
                    xpath::select_one(node, rule)?
                        .map(|item| item.as_text())
                        .unwrap_or_default()
                }
            }
            (Primitive::Text(_), _) => return Ok(None),
        };
        debug!("直接规则抽取完成：{}", rule);
        Ok(Some(value))
    }
}

/// 不含任何管线语法的规则
fn is_direct_rule(rule: &str) -> bool {
    let has_pipeline_syntax = rule.contains(STEP_SEPARATOR)
        || rule.contains(REGEX_FENCE)
        || rule.contains("{{")
        || rule.contains(SCRIPT_OPEN)
        || contains_ignore_case(rule, SCRIPT_PREFIX)
        || RuleMode::from_hint(rule).is_some()
        || rule.starts_with("$.")
        || rule.starts_with("$[");
    !has_pipeline_syntax
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack
        .char_indices()
        .any(|(i, _)| starts_with_ignore_case(&haystack[i..], needle))
}

/// 空串或裸属性名
fn is_attribute_name(rule: &str) -> bool {
    rule.chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ':'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigManager;
    use crate::document::Document;
    use crate::error::RuleError;
    use serde_json::json;

    struct StubFetcher;

    impl HttpFetcher for StubFetcher {
        fn fetch(&self, url: &str) -> RuleResult<String> {
            Ok(format!("stub:{}", url))
        }
    }

    fn analyzer_with_base(base_url: &str) -> RuleAnalyzer {
        let config = ConfigManager::custom().base_url(base_url).build();
        RuleAnalyzer::with_fetcher(config, Rc::new(StubFetcher))
    }

    fn analyzer() -> RuleAnalyzer {
        analyzer_with_base("https://a.com/b/c")
    }

    const BOOK_HTML: &str = r#"
        <html><body>
            <div id="info">
                <h1>斗破苍穹</h1>
                <span class="author">天蚕土豆</span>
                <span class="empty"></span>
                <img src="/cover.jpg">
            </div>
            <ul class="list">
                <li><a id="l1" href="d/e">第一章</a></li>
                <li><a id="l2" href="/f">第二章</a></li>
                <li><a id="l3" href="//cdn.com/g">第三章</a></li>
                <li><a id="l4" href="https://x.com">第四章</a></li>
            </ul>
        </body></html>
    "#;

    #[test]
    fn test_cache_returns_identical_pattern() {
        let mut analyzer = analyzer();
        let a = analyzer.compile_rule("h1@text##\\s", RuleMode::Css, true).unwrap();
        let b = analyzer.compile_rule("h1@text##\\s", RuleMode::Css, true).unwrap();
        assert!(Rc::ptr_eq(&a, &b));
        let c = analyzer.compile_single_rule("h1", RuleMode::Css, false).unwrap();
        let d = analyzer.compile_single_rule("h1", RuleMode::Css, false).unwrap();
        assert!(Rc::ptr_eq(&c, &d));
    }

    #[test]
    fn test_disabled_cache_returns_equal_but_distinct() {
        let config = ConfigManager::custom().enable_rule_cache(false).build();
        let mut analyzer = RuleAnalyzer::with_fetcher(config, Rc::new(StubFetcher));
        let a = analyzer.compile_rule("h1@text##\\s", RuleMode::Css, true).unwrap();
        let b = analyzer.compile_rule("h1@text##\\s", RuleMode::Css, true).unwrap();
        assert!(!Rc::ptr_eq(&a, &b));
        assert_eq!(a, b);
        let v1 = analyzer.compile_variable_rule("a@@h1", VariableFlag::Content).unwrap();
        let v2 = analyzer.compile_variable_rule("a@@h1", VariableFlag::Content).unwrap();
        assert!(!Rc::ptr_eq(&v1, &v2));
        assert!(analyzer.cache().is_empty());
    }

    #[test]
    fn test_malformed_rule_is_reported_and_not_cached() {
        let mut analyzer = analyzer();
        let doc = Document::parse_html(BOOK_HTML);
        let result = analyzer.extract_text(&doc, "h1##(");
        assert!(matches!(result, Err(RuleError::MalformedRule { .. })));
        assert!(analyzer.cache().is_empty());
    }

    #[test]
    fn test_regex_with_group() {
        let mut analyzer = analyzer();
        let doc = Document::from_text("ch-12-34");
        assert_eq!(analyzer.extract_text(&doc, r"##(\d+)-(\d+)####2").unwrap(), "34");
        assert_eq!(analyzer.extract_text(&doc, r"##(\d+)-(\d+)####1").unwrap(), "12");
        assert_eq!(analyzer.extract_text(&doc, r"##(\d+)-(\d+)##$2/$1").unwrap(), "ch-34/12");
        assert_eq!(analyzer.extract_text(&doc, r"##x(\d+)##$1##1").unwrap(), "");
    }

    #[test]
    fn test_regex_strips_html_comments() {
        let mut analyzer = analyzer();
        let doc = Document::parse_html(r#"<div class="c">x<!--ad-->y</div>"#);
        assert_eq!(analyzer.extract_text(&doc, ".c@html##<!--.*?-->").unwrap(), "xy");
    }

    #[test]
    fn test_element_without_match_falls_back_to_own_text() {
        let mut analyzer = analyzer();
        let doc = Document::parse_html("<div>Hello</div>");
        assert_eq!(analyzer.extract_text(&doc, ".missing").unwrap(), "Hello");
        assert_eq!(analyzer.extract_text(&doc, "").unwrap(), "Hello");
    }

    #[test]
    fn test_direct_rules_per_backend() {
        let mut analyzer = analyzer();
        let html = Document::parse_html(BOOK_HTML);
        assert_eq!(analyzer.extract_text(&html, "#info h1").unwrap(), "斗破苍穹");
        assert_eq!(analyzer.extract_text(&html, ".author").unwrap(), "天蚕土豆");

        let tree = Document::parse_html_for_xpath(BOOK_HTML);
        assert_eq!(analyzer.extract_text(&tree, "//span[@class='author']").unwrap(), "天蚕土豆");
        assert_eq!(analyzer.extract_url(&tree, "//img/@src").unwrap(), "https://a.com/cover.jpg");

        let object = Document::from_value(json!({"name": "斗破苍穹", "words": 5.0, "cover": "/c.jpg"}));
        assert_eq!(analyzer.extract_text(&object, "name").unwrap(), "斗破苍穹");
        assert_eq!(analyzer.extract_text(&object, "words").unwrap(), "5");
        assert_eq!(analyzer.extract_text(&object, "missing").unwrap(), "");
        assert_eq!(analyzer.extract_url(&object, "cover").unwrap(), "https://a.com/c.jpg");
        // 直接规则不经过缓存
        assert!(analyzer.cache().is_empty());
    }

    #[test]
    fn test_url_resolution_table() {
        let mut analyzer = analyzer();
        let doc = Document::parse_html(BOOK_HTML);
        let cases = [
            ("#l1@href", "https://a.com/b/d/e"),
            ("#l2@href", "https://a.com/f"),
            ("#l3@href", "https://cdn.com/g"),
            ("#l4@href", "https://x.com"),
        ];
        for (rule, expected) in cases {
            assert_eq!(analyzer.extract_url(&doc, rule).unwrap(), expected, "rule {}", rule);
        }
        assert_eq!(analyzer.extract_raw_url(&doc, "#l2@href").unwrap(), "/f");
        assert_eq!(analyzer.extract_url(&doc, ".empty@href").unwrap(), "");
    }

    #[test]
    fn test_direct_url_reads_attribute() {
        let mut analyzer = analyzer();
        let link = Document::parse_html(r#"<a href="/x">x</a>"#);
        let node = match link.primitive() {
            Primitive::Element(root) => root.select_first("a").unwrap().unwrap(),
            other => panic!("unexpected primitive {:?}", other),
        };
        let doc = Document::from_primitive(Primitive::Element(node));
        assert_eq!(analyzer.extract_raw_url(&doc, "href").unwrap(), "/x");
        assert_eq!(analyzer.extract_url(&doc, "href").unwrap(), "https://a.com/x");
        assert_eq!(analyzer.extract_url(&doc, "title").unwrap(), "");
    }

    #[test]
    fn test_missing_base_url() {
        let mut analyzer = RuleAnalyzer::with_fetcher(ConfigManager::get_default(), Rc::new(StubFetcher));
        let doc = Document::parse_html(BOOK_HTML);
        assert!(matches!(analyzer.extract_url(&doc, "#l2@href"), Err(RuleError::MissingBaseUrl)));
        assert_eq!(analyzer.extract_url(&doc, "#l4@href").unwrap(), "https://x.com");
    }

    #[test]
    fn test_list_scripts_then_regex() {
        let mut analyzer = analyzer();
        let doc = Document::from_value(json!(["a", "b"]));
        let values = analyzer
            .extract_text_list(&doc, "$[*]<js>result.toUpperCase()</js>##A##X")
            .unwrap();
        assert_eq!(values, vec!["X", "B"]);
    }

    #[test]
    fn test_single_element_script_array_expands() {
        let mut analyzer = analyzer();
        let doc = Document::from_text("a,b,c");
        let values = analyzer.extract_text_list(&doc, "<js>result.split(',')</js>").unwrap();
        assert_eq!(values, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_url_list_and_multi_step() {
        let mut analyzer = analyzer();
        let doc = Document::parse_html(BOOK_HTML);
        let titles = analyzer.extract_text_list(&doc, ".list -> a@text").unwrap();
        assert_eq!(titles, vec!["第一章", "第二章", "第三章", "第四章"]);
        let urls = analyzer.extract_url_list(&doc, ".list a@href").unwrap();
        assert_eq!(
            urls,
            vec!["https://a.com/b/d/e", "https://a.com/f", "https://cdn.com/g", "https://x.com"]
        );
    }

    #[test]
    fn test_intermediate_script_sees_outer_html() {
        let mut analyzer = analyzer();
        let doc = Document::parse_html(r#"<div class="c"><b>x</b></div>"#);
        let text = analyzer
            .extract_text(&doc, ".c@html<js>result.replace(/x/g, 'y')</js> -> b@text")
            .unwrap();
        assert_eq!(text, "y");
        let text = analyzer
            .extract_text(&doc, ".c<js>result.indexOf('<div') == 0 ? 'outer' : 'inner'</js> -> @text")
            .unwrap();
        assert_eq!(text, "outer");
    }

    #[test]
    fn test_script_chain_order_matters() {
        let mut analyzer = analyzer();
        let doc = Document::from_text("1");
        let forward = "<js>String(parseInt(result) * 2)</js><js>result + '!'</js>";
        let reversed = "<js>result + '!'</js><js>String(parseInt(result) * 2)</js>";
        assert_eq!(analyzer.extract_text(&doc, forward).unwrap(), "2!");
        assert_eq!(analyzer.extract_text(&doc, reversed).unwrap(), "2");
    }

    #[test]
    fn test_script_error_keeps_earlier_puts() {
        let mut analyzer = analyzer();
        let doc = Document::from_text("x");
        let result = analyzer.extract_text(&doc, "<js>java.put('seen', result); throw new Error('bad')</js>");
        assert!(matches!(result, Err(RuleError::ScriptExecution(_))));
        assert_eq!(analyzer.store().get("seen").as_deref(), Some("x"));
    }

    #[test]
    fn test_ajax_goes_through_fetcher() {
        let mut analyzer = analyzer();
        let doc = Document::from_text("");
        let body = analyzer.extract_text(&doc, "@js:java.ajax('/api?id=' + 1)").unwrap();
        assert_eq!(body, "stub:https://a.com/api?id=1");
    }

    #[test]
    fn test_placeholders_use_store() {
        let mut analyzer = analyzer();
        analyzer.store().put("no", "7");
        let doc = Document::from_text("第7章 第8章");
        assert_eq!(analyzer.extract_text(&doc, "@text:第({{no}})章").unwrap(), "7");
        // 替换后的文本作为缓存键
        analyzer.store().put("no", "8");
        assert_eq!(analyzer.extract_text(&doc, "@text:第({{no}})章").unwrap(), "8");
        assert_eq!(analyzer.cache().len(), 2);
        let raw = analyzer.compile_rule("{{no}}", RuleMode::Text, false).unwrap();
        assert_eq!(raw.steps[0].selector, "{{no}}");
    }

    #[test]
    fn test_backend_mismatch_yields_empty() {
        let mut analyzer = analyzer();
        let doc = Document::from_value(json!({"a": 1}));
        assert_eq!(analyzer.extract_text(&doc, "@css:p").unwrap(), "");
        assert!(analyzer.extract_text_list(&doc, "@xpath://p").unwrap().is_empty());
    }

    #[test]
    fn test_variable_precedence() {
        let mut analyzer = analyzer();
        analyzer.store().put("author", "Old");
        analyzer.store().put("intro", "keep");
        let doc = Document::parse_html(BOOK_HTML.replace("天蚕土豆", "Jane").as_str());
        let vars = analyzer
            .extract_variables(&doc, "author@@.author&&intro@@.empty@text", VariableFlag::Content)
            .unwrap();
        assert_eq!(vars["author"], "Jane");
        assert_eq!(vars["intro"], "keep");

        let vars = analyzer
            .extract_variables(&doc, "cover@@#info img@src", VariableFlag::Url)
            .unwrap();
        assert_eq!(vars["cover"], "https://a.com/cover.jpg");
        assert_eq!(vars.len(), 3);
    }

    #[test]
    fn test_variables_on_empty_source_return_snapshot() {
        let mut analyzer = analyzer();
        analyzer.store().put("k", "v");
        let empty = Document::parse_html("   ");
        let vars = analyzer.extract_variables(&empty, "a@@h1", VariableFlag::Content).unwrap();
        assert_eq!(vars, HashMap::from([("k".to_string(), "v".to_string())]));
        let doc = Document::parse_html(BOOK_HTML);
        let vars = analyzer.extract_variables(&doc, "  ", VariableFlag::Content).unwrap();
        assert_eq!(vars.len(), 1);
        assert!(analyzer.extract_variables(&doc, "a@@h1&&a@@h2", VariableFlag::Content).is_err());
    }

    #[test]
    fn test_direct_rule_detection() {
        assert!(is_direct_rule("h1"));
        assert!(is_direct_rule("//div/a"));
        assert!(is_direct_rule("name"));
        assert!(!is_direct_rule("a -> b"));
        assert!(!is_direct_rule("h1##x"));
        assert!(!is_direct_rule("h1<js>result</js>"));
        assert!(!is_direct_rule("@JS:result"));
        assert!(!is_direct_rule("@css:h1"));
        assert!(!is_direct_rule("$.name"));
        assert!(!is_direct_rule("{{x}}"));
        assert!(is_attribute_name("data-src"));
        assert!(!is_attribute_name("img@src"));
    }
}

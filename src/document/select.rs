//! 按规则方言在原语上执行选择
//! 后端与方言不兼容时返回 BackendMismatch，由调用方决定如何降级

use regex::Regex;
use serde_json::Value;

use super::dom::DomNode;
use super::xpath::{self, XPathItem};
use super::{json_path, Primitive};
use crate::compiler::RuleMode;
use crate::error::{RuleError, RuleResult};

/// CSS 访问器
#[derive(Debug, Clone, PartialEq)]
enum Accessor {
    Text,
    OwnText,
    TextNodes,
    Html,
    OuterHtml,
    Attr(String),
}

impl Accessor {
    fn parse(name: &str) -> Self {
        match name {
            "text" => Accessor::Text,
            "ownText" => Accessor::OwnText,
            "textNodes" => Accessor::TextNodes,
            "html" => Accessor::Html,
            "all" | "outerHtml" => Accessor::OuterHtml,
            attr => Accessor::Attr(attr.to_string()),
        }
    }

    fn read(&self, node: &DomNode) -> Vec<String> {
        match self {
            Accessor::Text => vec![node.text()],
            Accessor::OwnText => vec![node.own_text()],
            Accessor::TextNodes => node.text_nodes(),
            Accessor::Html => vec![node.inner_html()],
            Accessor::OuterHtml => vec![node.outer_html()],
            Accessor::Attr(name) => node.attr(name).into_iter().collect(),
        }
    }
}

/// 按方言选择
pub fn select(primitive: &Primitive, mode: RuleMode, selector: &str) -> RuleResult<Vec<Primitive>> {
    match mode {
        RuleMode::Css => select_css(primitive, selector),
        RuleMode::XPath => select_xpath(primitive, selector),
        RuleMode::Json => select_json(primitive, selector),
        RuleMode::Text => select_text(primitive, selector),
    }
}

fn mismatch(mode: RuleMode, primitive: &Primitive) -> RuleError {
    RuleError::BackendMismatch {
        mode: mode.to_string(),
        backend: primitive.backend_name().to_string(),
    }
}

/// 将选择器末尾的 `@访问器` 分离出来（忽略引号与方括号内的 `@`）
fn split_accessor(selector: &str) -> (&str, Option<&str>) {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut split_at = None;
    for (i, c) in selector.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '[' | '(' => depth += 1,
                ']' | ')' => depth = depth.saturating_sub(1),
                '@' if depth == 0 => split_at = Some(i),
                _ => {}
            },
        }
    }
    match split_at {
        Some(i) => (selector[..i].trim(), Some(selector[i + 1..].trim())),
        None => (selector.trim(), None),
    }
}

fn css_context(primitive: &Primitive) -> RuleResult<DomNode> {
    match primitive {
        Primitive::Element(node) | Primitive::XPath(node) => Ok(node.clone()),
        Primitive::Text(text) => Ok(DomNode::parse_fragment(text)),
        Primitive::Object(_) => Err(mismatch(RuleMode::Css, primitive)),
    }
}

fn select_css(primitive: &Primitive, selector: &str) -> RuleResult<Vec<Primitive>> {
    let context = css_context(primitive)?;
    let (css, accessor) = split_accessor(selector);

    let nodes = if css.is_empty() {
        vec![context]
    } else {
        context.select(css)?
    };

    let Some(accessor) = accessor.filter(|a| !a.is_empty()) else {
        return Ok(nodes.into_iter().map(Primitive::Element).collect());
    };
    let accessor = Accessor::parse(accessor);
    Ok(nodes
        .iter()
        .flat_map(|node| accessor.read(node))
        .filter(|value| !value.is_empty())
        .map(Primitive::Text)
        .collect())
}

fn select_xpath(primitive: &Primitive, selector: &str) -> RuleResult<Vec<Primitive>> {
    let context = match primitive {
        Primitive::Element(node) | Primitive::XPath(node) => node.clone(),
        Primitive::Text(text) => DomNode::parse_fragment(text),
        Primitive::Object(_) => return Err(mismatch(RuleMode::XPath, primitive)),
    };
    if selector.trim().is_empty() {
        return Ok(vec![Primitive::XPath(context)]);
    }
    Ok(xpath::select(&context, selector)?
        .into_iter()
        .map(|item| match item {
            XPathItem::Node(node) => Primitive::XPath(node),
            XPathItem::Text(text) => Primitive::Text(text),
        })
        .collect())
}

fn select_json(primitive: &Primitive, selector: &str) -> RuleResult<Vec<Primitive>> {
    let parsed;
    let root = match primitive {
        Primitive::Object(value) => value,
        Primitive::Text(text) => {
            parsed = serde_json::from_str::<Value>(text)
                .map_err(|_| mismatch(RuleMode::Json, primitive))?;
            &parsed
        }
        Primitive::Element(_) | Primitive::XPath(_) => {
            return Err(mismatch(RuleMode::Json, primitive));
        }
    };
    if selector.trim().is_empty() {
        return Ok(vec![Primitive::Object(root.clone())]);
    }
    Ok(json_path::select(root, selector)?
        .into_iter()
        .map(Primitive::from_script_value)
        .collect())
}

fn select_text(primitive: &Primitive, selector: &str) -> RuleResult<Vec<Primitive>> {
    let text = primitive.as_text();
    if selector.is_empty() {
        return Ok(vec![Primitive::Text(text)]);
    }
    let regex = Regex::new(selector)
        .map_err(|e| RuleError::malformed(selector, format!("文本正则编译失败：{}", e)))?;
    Ok(regex
        .captures_iter(&text)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
        .map(|m| Primitive::Text(m.as_str().to_string()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const HTML: &str = r#"
        <div class="book">
            <h1>斗破苍穹</h1>
            <p class="intro">简介<b>加粗</b></p>
            <a href="/c/1.html" data-mail="x@y.com">第一章</a>
            <a href="/c/2.html">第二章</a>
        </div>
    "#;

    fn texts(items: Vec<Primitive>) -> Vec<String> {
        items.iter().map(Primitive::as_text).collect()
    }

    #[test]
    fn test_split_accessor() {
        assert_eq!(split_accessor("a@href"), ("a", Some("href")));
        assert_eq!(split_accessor("a[data-mail='x@y.com']@text"), ("a[data-mail='x@y.com']", Some("text")));
        assert_eq!(split_accessor("@href"), ("", Some("href")));
        assert_eq!(split_accessor("div > p"), ("div > p", None));
    }

    #[test]
    fn test_css_accessors() {
        let root = Primitive::Element(DomNode::parse_document(HTML));
        assert_eq!(texts(select(&root, RuleMode::Css, "a@href").unwrap()), vec!["/c/1.html", "/c/2.html"]);
        assert_eq!(texts(select(&root, RuleMode::Css, "p.intro@ownText").unwrap()), vec!["简介"]);
        assert_eq!(texts(select(&root, RuleMode::Css, "p.intro@html").unwrap()), vec!["简介<b>加粗</b>"]);
        assert_eq!(texts(select(&root, RuleMode::Css, "p.intro@textNodes").unwrap()), vec!["简介", "加粗"]);
        // 缺失属性被过滤
        assert_eq!(texts(select(&root, RuleMode::Css, "a@data-mail").unwrap()), vec!["x@y.com"]);
        let elements = select(&root, RuleMode::Css, "h1").unwrap();
        assert!(matches!(elements[0], Primitive::Element(_)));
    }

    #[test]
    fn test_css_on_text_reparses_fragment() {
        let text = Primitive::Text("<p>一</p><p>二</p>".into());
        assert_eq!(texts(select(&text, RuleMode::Css, "p").unwrap()), vec!["一", "二"]);
    }

    #[test]
    fn test_backend_mismatch() {
        let object = Primitive::Object(json!({"a": 1}));
        assert!(matches!(
            select(&object, RuleMode::Css, "p"),
            Err(RuleError::BackendMismatch { .. })
        ));
        let element = Primitive::Element(DomNode::parse_document(HTML));
        assert!(matches!(
            select(&element, RuleMode::Json, "$.a"),
            Err(RuleError::BackendMismatch { .. })
        ));
        let not_json = Primitive::Text("<p>x</p>".into());
        assert!(matches!(
            select(&not_json, RuleMode::Json, "$.a"),
            Err(RuleError::BackendMismatch { .. })
        ));
    }

    #[test]
    fn test_json_strings_become_text() {
        let object = Primitive::Object(json!({"data": {"html": "<p>正文</p>", "n": 2}}));
        let html = select(&object, RuleMode::Json, "$.data.html").unwrap();
        assert_eq!(html, vec![Primitive::Text("<p>正文</p>".into())]);
        let n = select(&object, RuleMode::Json, "$.data.n").unwrap();
        assert_eq!(n, vec![Primitive::Object(json!(2))]);
        let text = Primitive::Text(r#"{"a": ["x", "y"]}"#.into());
        assert_eq!(texts(select(&text, RuleMode::Json, "$.a[*]").unwrap()), vec!["x", "y"]);
    }

    #[test]
    fn test_xpath_and_text_modes() {
        let root = Primitive::XPath(DomNode::parse_document(HTML));
        assert_eq!(texts(select(&root, RuleMode::XPath, "//a/text()").unwrap()), vec!["第一章", "第二章"]);

        let text = Primitive::Text("第12章 第34章".into());
        assert_eq!(texts(select(&text, RuleMode::Text, r"第(\d+)章").unwrap()), vec!["12", "34"]);
        assert_eq!(texts(select(&text, RuleMode::Text, "").unwrap()), vec!["第12章 第34章"]);
        assert!(select(&text, RuleMode::Text, "(").is_err());
    }
}

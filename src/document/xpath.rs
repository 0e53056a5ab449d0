//! XPath 子集
//! 支持 `/`、`//`、名称测试、`*`、`.`、`..`、`text()`、`@attr`、`@*`、常用谓词与 `|` 并集
//! 上下文为文档根元素时，开头的 `/` 与 `//` 从文档顶层开始；其余情况相对于当前上下文节点
//! 位置谓词 `[n]`、`[last()]` 按父节点分组计算

use std::collections::HashSet;

use super::dom::{collapse_whitespace, DomNode};
use crate::error::{RuleError, RuleResult};

/// XPath 结果项
#[derive(Debug, Clone, PartialEq)]
pub enum XPathItem {
    Node(DomNode),
    Text(String),
}

impl XPathItem {
    /// 字符串化：节点取文本
    pub fn as_text(&self) -> String {
        match self {
            XPathItem::Node(node) => node.text(),
            XPathItem::Text(text) => text.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Axis {
    Child,
    Descendant,
}

#[derive(Debug, Clone, PartialEq)]
enum NodeTest {
    Name(String),
    AnyElement,
    Text,
    Attr(String),
    AnyAttr,
    SelfNode,
    Parent,
}

#[derive(Debug, Clone, PartialEq)]
enum Predicate {
    Index(usize),
    Last,
    HasAttr(String),
    AttrEq(String, String),
    AttrContains(String, String),
    TextEq(String),
    TextContains(String),
}

#[derive(Debug, Clone, PartialEq)]
struct Step {
    axis: Axis,
    test: NodeTest,
    predicates: Vec<Predicate>,
}

#[derive(Debug, Clone, PartialEq)]
struct LocationPath {
    absolute: bool,
    steps: Vec<Step>,
}

/// 编译后的 XPath 表达式（多个路径的并集）
#[derive(Debug, Clone, PartialEq)]
pub struct XPathExpr {
    paths: Vec<LocationPath>,
}

impl XPathExpr {
    /// 解析表达式
    pub fn parse(expr: &str) -> RuleResult<Self> {
        let expr = expr.trim();
        if expr.is_empty() {
            return Err(RuleError::malformed(expr, "XPath 表达式为空"));
        }
        let paths = split_top_level(expr, '|')
            .into_iter()
            .map(|path| parse_path(expr, path.trim()))
            .collect::<RuleResult<Vec<_>>>()?;
        Ok(Self { paths })
    }

    /// 在上下文节点上求值，节点结果去重
    pub fn evaluate(&self, context: &DomNode) -> Vec<XPathItem> {
        let mut results = Vec::new();
        let mut seen = HashSet::new();
        for path in &self.paths {
            let start = if path.absolute && context.is_root_element() {
                context.top_level()
            } else {
                context.clone()
            };
            let mut items = vec![XPathItem::Node(start)];
            for step in &path.steps {
                items = apply_step(step, &items);
            }
            for item in items {
                match &item {
                    XPathItem::Node(node) => {
                        if seen.insert(node.id()) {
                            results.push(item);
                        }
                    }
                    XPathItem::Text(_) => results.push(item),
                }
            }
        }
        results
    }
}

/// 选择全部结果
pub fn select(context: &DomNode, expr: &str) -> RuleResult<Vec<XPathItem>> {
    Ok(XPathExpr::parse(expr)?.evaluate(context))
}

/// 选择第一个结果
pub fn select_one(context: &DomNode, expr: &str) -> RuleResult<Option<XPathItem>> {
    Ok(select(context, expr)?.into_iter().next())
}

/// 在括号与引号之外按字符切分
fn split_top_level(s: &str, sep: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '[' | '(' => depth += 1,
                ']' | ')' => depth = depth.saturating_sub(1),
                _ if c == sep && depth == 0 => {
                    parts.push(&s[start..i]);
                    start = i + c.len_utf8();
                }
                _ => {}
            },
        }
    }
    parts.push(&s[start..]);
    parts
}

fn parse_path(expr: &str, path: &str) -> RuleResult<LocationPath> {
    let mut steps = Vec::new();
    let mut rest = path;
    let mut axis = Axis::Child;
    let absolute = path.starts_with('/');
    if let Some(stripped) = rest.strip_prefix("//") {
        axis = Axis::Descendant;
        rest = stripped;
    } else if let Some(stripped) = rest.strip_prefix('/') {
        rest = stripped;
    }

    loop {
        let end = step_end(rest);
        let token = rest[..end].trim();
        steps.push(parse_step(expr, token, axis)?);
        rest = &rest[end..];
        if rest.is_empty() {
            break;
        }
        if let Some(stripped) = rest.strip_prefix("//") {
            axis = Axis::Descendant;
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('/') {
            axis = Axis::Child;
            rest = stripped;
        }
        if rest.trim().is_empty() {
            return Err(RuleError::malformed(expr, "XPath 以分隔符结尾"));
        }
    }
    Ok(LocationPath { absolute, steps })
}

/// 当前步骤结束位置（下一个顶层 `/`）
fn step_end(s: &str) -> usize {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                '[' | '(' => depth += 1,
                ']' | ')' => depth = depth.saturating_sub(1),
                '/' if depth == 0 => return i,
                _ => {}
            },
        }
    }
    s.len()
}

fn parse_step(expr: &str, token: &str, axis: Axis) -> RuleResult<Step> {
    let (head, mut rest) = match token.find('[') {
        Some(pos) => (token[..pos].trim(), &token[pos..]),
        None => (token, ""),
    };

    let test = match head {
        "" => return Err(RuleError::malformed(expr, "XPath 步骤为空")),
        "*" => NodeTest::AnyElement,
        "." => NodeTest::SelfNode,
        ".." => NodeTest::Parent,
        "text()" => NodeTest::Text,
        "@*" => NodeTest::AnyAttr,
        _ if head.starts_with('@') => NodeTest::Attr(valid_name(expr, &head[1..])?),
        _ => NodeTest::Name(valid_name(expr, head)?.to_ascii_lowercase()),
    };

    let mut predicates = Vec::new();
    while !rest.is_empty() {
        if !rest.starts_with('[') {
            return Err(RuleError::malformed(expr, format!("XPath 谓词格式错误：{}", rest)));
        }
        let close = predicate_end(rest)
            .ok_or_else(|| RuleError::malformed(expr, "XPath 谓词未闭合"))?;
        predicates.push(parse_predicate(expr, rest[1..close].trim())?);
        rest = rest[close + 1..].trim_start();
    }

    Ok(Step {
        axis,
        test,
        predicates,
    })
}

fn predicate_end(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices().skip(1) {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None => match c {
                '\'' | '"' => quote = Some(c),
                ']' => return Some(i),
                _ => {}
            },
        }
    }
    None
}

fn valid_name(expr: &str, name: &str) -> RuleResult<String> {
    let name = name.trim();
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'));
    if valid {
        Ok(name.to_string())
    } else {
        Err(RuleError::malformed(expr, format!("XPath 名称无效：{}", name)))
    }
}

fn unquote(s: &str) -> Option<String> {
    let s = s.trim();
    let quote = s.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    s.strip_prefix(quote)
        .and_then(|inner| inner.strip_suffix(quote))
        .map(|inner| inner.to_string())
}

fn parse_predicate(expr: &str, body: &str) -> RuleResult<Predicate> {
    let invalid = || RuleError::malformed(expr, format!("不支持的 XPath 谓词：[{}]", body));

    if let Ok(index) = body.parse::<usize>() {
        return if index == 0 { Err(invalid()) } else { Ok(Predicate::Index(index)) };
    }
    if body == "last()" {
        return Ok(Predicate::Last);
    }
    if let Some(args) = body.strip_prefix("contains(").and_then(|b| b.strip_suffix(')')) {
        let (target, value) = args.split_once(',').ok_or_else(invalid)?;
        let value = unquote(value).ok_or_else(invalid)?;
        let target = target.trim();
        return if target == "text()" {
            Ok(Predicate::TextContains(value))
        } else if let Some(attr) = target.strip_prefix('@') {
            Ok(Predicate::AttrContains(valid_name(expr, attr)?, value))
        } else {
            Err(invalid())
        };
    }
    if let Some((left, right)) = body.split_once('=') {
        let value = unquote(right).ok_or_else(invalid)?;
        let left = left.trim();
        return if left == "text()" {
            Ok(Predicate::TextEq(value))
        } else if let Some(attr) = left.strip_prefix('@') {
            Ok(Predicate::AttrEq(valid_name(expr, attr)?, value))
        } else {
            Err(invalid())
        };
    }
    if let Some(attr) = body.strip_prefix('@') {
        return Ok(Predicate::HasAttr(valid_name(expr, attr)?));
    }
    Err(invalid())
}

fn apply_step(step: &Step, items: &[XPathItem]) -> Vec<XPathItem> {
    let mut out = Vec::new();
    for item in items {
        // 文本结果无法继续导航
        let XPathItem::Node(node) = item else {
            continue;
        };
        match (step.axis, &step.test) {
            (Axis::Descendant, NodeTest::Name(_) | NodeTest::AnyElement) => {
                out.extend(descendant_elements(step, node));
            }
            _ => out.extend(filter_predicates(&step.predicates, candidates(step, node))),
        }
    }
    out
}

fn element_matches(test: &NodeTest, node: &DomNode) -> bool {
    match test {
        NodeTest::Name(name) => node.tag_name().eq_ignore_ascii_case(name),
        NodeTest::AnyElement => true,
        _ => false,
    }
}

/// `//name` 即 descendant-or-self::node()/child::name：谓词逐个父节点应用，结果按文档顺序
fn descendant_elements(step: &Step, node: &DomNode) -> Vec<XPathItem> {
    let descendants = node.descendant_elements();
    let mut selected = HashSet::new();
    for parent in std::iter::once(node).chain(descendants.iter()) {
        let children = parent
            .child_elements()
            .into_iter()
            .filter(|child| element_matches(&step.test, child))
            .map(XPathItem::Node)
            .collect();
        for item in filter_predicates(&step.predicates, children) {
            if let XPathItem::Node(child) = item {
                selected.insert(child.id());
            }
        }
    }
    descendants
        .into_iter()
        .filter(|n| selected.contains(&n.id()))
        .map(XPathItem::Node)
        .collect()
}

fn candidates(step: &Step, node: &DomNode) -> Vec<XPathItem> {
    let with_self = || {
        let mut nodes = vec![node.clone()];
        nodes.extend(node.descendant_elements());
        nodes
    };

    match &step.test {
        NodeTest::Name(_) | NodeTest::AnyElement => node
            .child_elements()
            .into_iter()
            .filter(|n| element_matches(&step.test, n))
            .map(XPathItem::Node)
            .collect(),
        NodeTest::SelfNode => match step.axis {
            Axis::Child => vec![XPathItem::Node(node.clone())],
            Axis::Descendant => with_self().into_iter().map(XPathItem::Node).collect(),
        },
        NodeTest::Parent => node.parent().map(XPathItem::Node).into_iter().collect(),
        NodeTest::Text => match step.axis {
            Axis::Child => node
                .own_text_nodes()
                .into_iter()
                .map(XPathItem::Text)
                .collect(),
            Axis::Descendant => node
                .text_nodes()
                .into_iter()
                .map(XPathItem::Text)
                .collect(),
        },
        NodeTest::Attr(name) => {
            let nodes = match step.axis {
                Axis::Child => vec![node.clone()],
                Axis::Descendant => with_self(),
            };
            nodes
                .iter()
                .filter_map(|n| n.attr(name))
                .map(XPathItem::Text)
                .collect()
        }
        NodeTest::AnyAttr => {
            let nodes = match step.axis {
                Axis::Child => vec![node.clone()],
                Axis::Descendant => with_self(),
            };
            nodes
                .iter()
                .flat_map(|n| n.attr_values())
                .map(XPathItem::Text)
                .collect()
        }
    }
}

fn filter_predicates(predicates: &[Predicate], mut items: Vec<XPathItem>) -> Vec<XPathItem> {
    for predicate in predicates {
        items = match predicate {
            Predicate::Index(index) => items.into_iter().nth(index - 1).into_iter().collect(),
            Predicate::Last => items.pop().into_iter().collect(),
            _ => items
                .into_iter()
                .filter(|item| match item {
                    XPathItem::Node(node) => node_matches(predicate, node),
                    XPathItem::Text(_) => false,
                })
                .collect(),
        };
    }
    items
}

fn node_matches(predicate: &Predicate, node: &DomNode) -> bool {
    match predicate {
        Predicate::HasAttr(name) => node.attr(name).is_some(),
        Predicate::AttrEq(name, value) => node.attr(name).as_deref() == Some(value.as_str()),
        Predicate::AttrContains(name, value) => {
            node.attr(name).is_some_and(|v| v.contains(value.as_str()))
        }
        Predicate::TextEq(value) => node.own_text() == collapse_whitespace(value),
        Predicate::TextContains(value) => node.text().contains(value.as_str()),
        Predicate::Index(_) | Predicate::Last => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML: &str = r#"
        <html><body>
            <div class="list">
                <ul>
                    <li><a href="/1.html">第一章</a></li>
                    <li><a href="/2.html" class="vip">第二章</a></li>
                    <li><a href="/3.html">第三章</a></li>
                </ul>
            </div>
            <div class="info"><span>作者：</span>佚名</div>
        </body></html>
    "#;

    fn texts(items: Vec<XPathItem>) -> Vec<String> {
        items.iter().map(XPathItem::as_text).collect()
    }

    #[test]
    fn test_descendant_and_attribute() {
        let root = DomNode::parse_document(HTML);
        let hrefs = select(&root, "//div[@class='list']//a/@href").unwrap();
        assert_eq!(texts(hrefs), vec!["/1.html", "/2.html", "/3.html"]);
    }

    #[test]
    fn test_positional_predicates() {
        let root = DomNode::parse_document(HTML);
        assert_eq!(texts(select(&root, "//li[2]/a").unwrap()), vec!["第二章"]);
        assert_eq!(texts(select(&root, "//li[last()]/a/text()").unwrap()), vec!["第三章"]);
    }

    #[test]
    fn test_positions_count_per_parent() {
        let root = DomNode::parse_document(
            "<ul><li>a1</li><li>a2</li></ul><div><ul><li>b1</li><li>b2</li></ul></div>",
        );
        assert_eq!(texts(select(&root, "//li[1]").unwrap()), vec!["a1", "b1"]);
        assert_eq!(texts(select(&root, "//ul/li[last()]").unwrap()), vec!["a2", "b2"]);
        assert_eq!(texts(select(&root, "//div//li[2]").unwrap()), vec!["b2"]);
    }

    #[test]
    fn test_descendants_keep_document_order() {
        let root = DomNode::parse_document("<div><a>1</a><p><a>2</a></p><a>3</a></div>");
        assert_eq!(texts(select(&root, "//a").unwrap()), vec!["1", "2", "3"]);
    }

    #[test]
    fn test_absolute_paths_start_at_document() {
        let root = DomNode::parse_document(HTML);
        let items = select(&root, "/html/body/div/ul/li/a/@href").unwrap();
        assert_eq!(texts(items), vec!["/1.html", "/2.html", "/3.html"]);
        assert_eq!(select(&root, "//html").unwrap().len(), 1);

        // 非根上下文中开头的 `/` 仍相对于上下文
        let list = select_one(&root, "//div[@class='list']").unwrap().unwrap();
        let XPathItem::Node(list) = list else {
            panic!("应为节点");
        };
        assert_eq!(select(&list, "/ul/li").unwrap().len(), 3);
    }

    #[test]
    fn test_child_text_yields_each_node() {
        let root = DomNode::parse_document("<p>第一行<br>第二行<br>第三行</p>");
        assert_eq!(texts(select(&root, "//p/text()").unwrap()), vec!["第一行", "第二行", "第三行"]);
    }

    #[test]
    fn test_contains_and_text_predicates() {
        let root = DomNode::parse_document(HTML);
        let vip = select_one(&root, "//a[contains(@class,'vip')]").unwrap().unwrap();
        assert_eq!(vip.as_text(), "第二章");
        let first = select_one(&root, "//a[text()='第一章']/@href").unwrap().unwrap();
        assert_eq!(first.as_text(), "/1.html");
    }

    #[test]
    fn test_own_text_and_parent() {
        let root = DomNode::parse_document(HTML);
        let own = select_one(&root, "//div[@class='info']/text()").unwrap().unwrap();
        assert_eq!(own.as_text(), "佚名");
        let parent = select_one(&root, "//span/..").unwrap().unwrap();
        assert_eq!(parent.as_text(), "作者：佚名");
    }

    #[test]
    fn test_union_dedupes_nodes() {
        let root = DomNode::parse_document(HTML);
        let items = select(&root, "//li[1]/a | //a[@href='/1.html'] | //a[@class]").unwrap();
        assert_eq!(texts(items), vec!["第一章", "第二章"]);
    }

    #[test]
    fn test_malformed_expressions() {
        let root = DomNode::parse_document(HTML);
        assert!(select(&root, "//li[0]").is_err());
        assert!(select(&root, "//li[").is_err());
        assert!(select(&root, "//li/").is_err());
        assert!(select(&root, "//li[position()>1]").is_err());
    }
}

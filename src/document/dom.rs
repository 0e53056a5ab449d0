//! DOM 节点封装
//! 基于 scraper 的解析树，节点以 (文档, 节点ID) 形式持有，可廉价克隆

use std::fmt;
use std::rc::Rc;
use ego_tree::iter::Edge;
use ego_tree::{NodeId, NodeRef};
use scraper::{ElementRef, Html, Node, Selector};

use crate::error::{RuleError, RuleResult};

/// 产生换行/空格边界的块级标签
const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "fieldset",
    "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header",
    "hr", "li", "main", "nav", "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

/// 将空白折叠为单个空格并去除首尾空白
pub(crate) fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// DOM 元素节点
#[derive(Clone)]
pub struct DomNode {
    doc: Rc<Html>,
    id: NodeId,
    fragment: bool,
}

impl DomNode {
    /// 解析完整HTML文档，返回根元素
    pub fn parse_document(html: &str) -> Self {
        let doc = Html::parse_document(html);
        let id = doc.root_element().id();
        Self {
            doc: Rc::new(doc),
            id,
            fragment: false,
        }
    }

    /// 解析HTML片段，返回片段根元素
    pub fn parse_fragment(html: &str) -> Self {
        let doc = Html::parse_fragment(html);
        let id = doc.root_element().id();
        Self {
            doc: Rc::new(doc),
            id,
            fragment: true,
        }
    }

    pub(crate) fn with_id(&self, id: NodeId) -> Self {
        Self {
            doc: Rc::clone(&self.doc),
            id,
            fragment: self.fragment,
        }
    }

    /// 是否为解析树的根元素
    pub fn is_root_element(&self) -> bool {
        self.doc.root_element().id() == self.id
    }

    /// 顶层节点的容器：完整文档为树根（其子节点是 `<html>`），片段为包裹用的根元素
    pub(crate) fn top_level(&self) -> DomNode {
        if self.fragment {
            self.with_id(self.doc.root_element().id())
        } else {
            self.with_id(self.doc.tree.root().id())
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn node_ref(&self) -> Option<NodeRef<'_, Node>> {
        self.doc.tree.get(self.id)
    }

    pub fn element(&self) -> Option<ElementRef<'_>> {
        self.node_ref().and_then(ElementRef::wrap)
    }

    /// 标签名
    pub fn tag_name(&self) -> String {
        self.element()
            .map(|el| el.value().name().to_string())
            .unwrap_or_default()
    }

    /// 元素全部文本（块级标签之间以空格分隔，空白折叠）
    pub fn text(&self) -> String {
        let Some(node) = self.node_ref() else {
            return String::new();
        };
        let mut buf = String::new();
        for edge in node.traverse() {
            match edge {
                Edge::Open(n) => match n.value() {
                    Node::Text(text) => buf.push_str(text),
                    Node::Element(el) if BLOCK_TAGS.contains(&el.name()) => buf.push(' '),
                    _ => {}
                },
                Edge::Close(n) => {
                    if let Node::Element(el) = n.value() {
                        if BLOCK_TAGS.contains(&el.name()) {
                            buf.push(' ');
                        }
                    }
                }
            }
        }
        collapse_whitespace(&buf)
    }

    /// 元素自身文本（仅直接子文本节点）
    pub fn own_text(&self) -> String {
        let Some(node) = self.node_ref() else {
            return String::new();
        };
        let mut buf = String::new();
        for child in node.children() {
            if let Node::Text(text) = child.value() {
                buf.push_str(text);
                buf.push(' ');
            }
        }
        collapse_whitespace(&buf)
    }

    /// 直接子文本节点，每个节点一项（去空白后非空）
    pub fn own_text_nodes(&self) -> Vec<String> {
        let Some(node) = self.node_ref() else {
            return Vec::new();
        };
        node.children()
            .filter_map(|n| match n.value() {
                Node::Text(text) => Some(collapse_whitespace(text)),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// 所有后代文本节点（去空白后非空）
    pub fn text_nodes(&self) -> Vec<String> {
        let Some(node) = self.node_ref() else {
            return Vec::new();
        };
        node.descendants()
            .filter_map(|n| match n.value() {
                Node::Text(text) => Some(collapse_whitespace(text)),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn inner_html(&self) -> String {
        self.element().map(|el| el.inner_html()).unwrap_or_default()
    }

    pub fn outer_html(&self) -> String {
        self.element().map(|el| el.html()).unwrap_or_default()
    }

    /// 属性值，不存在时为 None
    pub fn attr(&self, name: &str) -> Option<String> {
        self.element()
            .and_then(|el| el.value().attr(name))
            .map(|v| v.to_string())
    }

    /// 所有属性值
    pub fn attr_values(&self) -> Vec<String> {
        self.element()
            .map(|el| el.value().attrs().map(|(_, v)| v.to_string()).collect())
            .unwrap_or_default()
    }

    pub fn has_attributes(&self) -> bool {
        self.element()
            .is_some_and(|el| el.value().attrs().next().is_some())
    }

    /// 父元素
    pub fn parent(&self) -> Option<DomNode> {
        self.node_ref()
            .and_then(|n| n.parent())
            .filter(|p| p.value().is_element())
            .map(|p| self.with_id(p.id()))
    }

    /// 直接子元素
    pub fn child_elements(&self) -> Vec<DomNode> {
        self.node_ref()
            .map(|n| {
                n.children()
                    .filter(|c| c.value().is_element())
                    .map(|c| self.with_id(c.id()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 后代元素（不含自身，文档顺序）
    pub fn descendant_elements(&self) -> Vec<DomNode> {
        self.node_ref()
            .map(|n| {
                n.descendants()
                    .skip(1)
                    .filter(|c| c.value().is_element())
                    .map(|c| self.with_id(c.id()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// CSS 选择全部匹配元素
    pub fn select(&self, css: &str) -> RuleResult<Vec<DomNode>> {
        let selector = parse_selector(css)?;
        let Some(element) = self.element() else {
            return Ok(Vec::new());
        };
        Ok(element
            .select(&selector)
            .map(|el| self.with_id(el.id()))
            .collect())
    }

    /// CSS 选择第一个匹配元素
    pub fn select_first(&self, css: &str) -> RuleResult<Option<DomNode>> {
        let selector = parse_selector(css)?;
        Ok(self
            .element()
            .and_then(|element| element.select(&selector).next())
            .map(|el| self.with_id(el.id())))
    }

    /// 节点无内容（无子节点且无属性）
    pub fn is_blank(&self) -> bool {
        self.inner_html().trim().is_empty() && !self.has_attributes()
    }
}

fn parse_selector(css: &str) -> RuleResult<Selector> {
    Selector::parse(css).map_err(|e| RuleError::malformed(css, format!("CSS 选择器无效：{:?}", e)))
}

impl PartialEq for DomNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.doc, &other.doc) && self.id == other.id
    }
}

impl fmt::Debug for DomNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DomNode")
            .field("tag", &self.tag_name())
            .field("id", &self.id)
            .finish()
    }
}

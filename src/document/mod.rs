//! 源文档抽象
//! 一个文档对应一种后端值：DOM元素、脚本对象、XPath节点或纯文本
pub mod dom;
pub mod json_path;
pub mod select;
pub mod xpath;

use serde_json::Value;

pub use self::dom::DomNode;
pub use self::xpath::XPathItem;
use crate::error::RuleResult;
use crate::utils::value::stringify;

/// 后端原语
#[derive(Debug, Clone, PartialEq)]
pub enum Primitive {
    /// CSS 选择器可用的 DOM 元素
    Element(DomNode),
    /// 脚本对象（JSON 值）
    Object(Value),
    /// XPath 可寻址的节点
    XPath(DomNode),
    /// 纯文本
    Text(String),
}

impl Primitive {
    /// 后端名称，用于日志与错误信息
    pub fn backend_name(&self) -> &'static str {
        match self {
            Primitive::Element(_) => "element",
            Primitive::Object(_) => "object",
            Primitive::XPath(_) => "xpath-node",
            Primitive::Text(_) => "text",
        }
    }

    /// 字符串化：节点取文本，对象按脚本规则转字符串
    pub fn as_text(&self) -> String {
        match self {
            Primitive::Element(node) | Primitive::XPath(node) => node.text(),
            Primitive::Object(value) => stringify(value),
            Primitive::Text(text) => text.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Primitive::Element(node) | Primitive::XPath(node) => node.is_blank(),
            Primitive::Object(value) => match value {
                Value::Null => true,
                Value::String(s) => s.trim().is_empty(),
                Value::Array(items) => items.is_empty(),
                Value::Object(map) => map.is_empty(),
                _ => false,
            },
            Primitive::Text(text) => text.trim().is_empty(),
        }
    }

    /// 作为脚本的 `result` 种子：节点传外层HTML
    pub fn to_script_value(&self) -> Value {
        match self {
            Primitive::Element(node) | Primitive::XPath(node) => Value::String(node.outer_html()),
            Primitive::Object(value) => value.clone(),
            Primitive::Text(text) => Value::String(text.clone()),
        }
    }

    /// 脚本结果转回原语：字符串为文本，其余为对象
    pub fn from_script_value(value: Value) -> Self {
        match value {
            Value::String(s) => Primitive::Text(s),
            other => Primitive::Object(other),
        }
    }
}

/// 源文档接口
pub trait SourceDocument {
    /// 当前文档的后端原语
    fn primitive(&self) -> &Primitive;
    /// 源内容是否为空
    fn is_source_empty(&self) -> bool;
}

/// 默认文档实现
#[derive(Debug, Clone)]
pub struct Document {
    primitive: Primitive,
    empty: bool,
}

impl Document {
    /// HTML 文档，按 CSS 规则访问
    pub fn parse_html(html: &str) -> Self {
        Self {
            primitive: Primitive::Element(DomNode::parse_document(html)),
            empty: html.trim().is_empty(),
        }
    }

    /// HTML 文档，按 XPath 规则访问
    pub fn parse_html_for_xpath(html: &str) -> Self {
        Self {
            primitive: Primitive::XPath(DomNode::parse_document(html)),
            empty: html.trim().is_empty(),
        }
    }

    /// JSON 文本
    pub fn parse_json(json: &str) -> RuleResult<Self> {
        if json.trim().is_empty() {
            return Ok(Self {
                primitive: Primitive::Object(Value::Null),
                empty: true,
            });
        }
        let value: Value = serde_json::from_str(json)?;
        Ok(Self::from_value(value))
    }

    pub fn from_value(value: Value) -> Self {
        Self::from_primitive(Primitive::Object(value))
    }

    pub fn from_text(text: impl Into<String>) -> Self {
        Self::from_primitive(Primitive::Text(text.into()))
    }

    pub fn from_primitive(primitive: Primitive) -> Self {
        let empty = primitive.is_empty();
        Self { primitive, empty }
    }
}

impl SourceDocument for Document {
    fn primitive(&self) -> &Primitive {
        &self.primitive
    }

    fn is_source_empty(&self) -> bool {
        self.empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_constructors() {
        let doc = Document::parse_html("<p>你好</p>");
        assert!(matches!(doc.primitive(), Primitive::Element(_)));
        assert!(!doc.is_source_empty());
        assert_eq!(doc.primitive().as_text(), "你好");

        let doc = Document::parse_html_for_xpath("  ");
        assert!(matches!(doc.primitive(), Primitive::XPath(_)));
        assert!(doc.is_source_empty());

        let doc = Document::parse_json(r#"{"a": 1}"#).unwrap();
        assert_eq!(doc.primitive(), &Primitive::Object(json!({"a": 1})));
        assert!(Document::parse_json("{bad").is_err());
        assert!(Document::parse_json("").unwrap().is_source_empty());

        assert!(Document::from_text("").is_source_empty());
        assert!(Document::from_value(json!({})).is_source_empty());
    }

    #[test]
    fn test_script_value_conversion() {
        let node = DomNode::parse_fragment("<b>粗体</b>");
        let seed = Primitive::Element(node.select_first("b").unwrap().unwrap()).to_script_value();
        assert_eq!(seed, json!("<b>粗体</b>"));
        assert_eq!(Primitive::from_script_value(json!("x")), Primitive::Text("x".into()));
        assert_eq!(
            Primitive::from_script_value(json!([1, 2])),
            Primitive::Object(json!([1, 2]))
        );
        assert_eq!(Primitive::Object(json!(3.0)).as_text(), "3");
        assert_eq!(Primitive::Object(Value::Null).as_text(), "");
    }
}

//! 编译后模式模型
//! 规则字符串编译后的结构

use std::fmt;
use regex::Regex;

use crate::document::Primitive;

/// 规则方言（编译期确定，之后不再变化）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleMode {
    Css,   // DOM 选择器
    XPath, // XPath 表达式
    Json,  // 脚本对象路径
    Text,  // 纯文本 / 仅正则
}

impl RuleMode {
    /// 根据当前文档后端推导规则方言
    pub fn of(primitive: &Primitive) -> Self {
        match primitive {
            Primitive::Element(_) => RuleMode::Css,
            Primitive::XPath(_) => RuleMode::XPath,
            Primitive::Object(_) => RuleMode::Json,
            Primitive::Text(_) => RuleMode::Text,
        }
    }

    /// 解析步骤前缀提示，返回方言与前缀长度
    pub(crate) fn from_hint(segment: &str) -> Option<(Self, usize)> {
        const HINTS: [(&str, RuleMode); 4] = [
            ("@css:", RuleMode::Css),
            ("@xpath:", RuleMode::XPath),
            ("@json:", RuleMode::Json),
            ("@text:", RuleMode::Text),
        ];
        HINTS.iter().find_map(|(prefix, mode)| {
            segment
                .get(..prefix.len())
                .filter(|head| head.eq_ignore_ascii_case(prefix))
                .map(|_| (*mode, prefix.len()))
        })
    }

    /// 规则描述
    pub fn describe(&self) -> &'static str {
        match self {
            RuleMode::Css => "css",
            RuleMode::XPath => "xpath",
            RuleMode::Json => "json",
            RuleMode::Text => "text",
        }
    }
}

impl fmt::Display for RuleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// 正则替换配置 `##regex##replacement##group`
#[derive(Debug, Clone)]
pub struct ReplaceSpec {
    pub regex: Regex,
    pub replacement: String,
    pub group: Option<usize>,
}

impl ReplaceSpec {
    /// 单值替换：指定分组时只返回分组文本（分组内做首次替换），否则全局替换
    pub fn apply(&self, input: &str) -> String {
        match self.group {
            Some(group) => match self.regex.captures(input) {
                Some(captures) => {
                    let group_text = captures.get(group).map(|m| m.as_str()).unwrap_or_default();
                    self.regex.replace(group_text, self.replacement.as_str()).into_owned()
                }
                None => String::new(),
            },
            None => self.replace_all(input),
        }
    }

    /// 列表替换：逐元素全局替换，不区分分组
    pub fn replace_all(&self, input: &str) -> String {
        self.regex.replace_all(input, self.replacement.as_str()).into_owned()
    }
}

impl PartialEq for ReplaceSpec {
    fn eq(&self, other: &Self) -> bool {
        self.regex.as_str() == other.regex.as_str()
            && self.replacement == other.replacement
            && self.group == other.group
    }
}

/// 单个编译步骤
#[derive(Debug, Clone, PartialEq)]
pub struct RulePattern {
    pub selector: String,
    pub mode: RuleMode,
    pub scripts: Vec<String>,
    pub replace: Option<ReplaceSpec>,
}

impl RulePattern {
    pub fn has_scripts(&self) -> bool {
        !self.scripts.is_empty()
    }
}

/// 多步骤规则，只有最后一步的输出对外可见
#[derive(Debug, Clone, PartialEq)]
pub struct RulePatterns {
    pub steps: Vec<RulePattern>,
}

impl RulePatterns {
    /// 最后一个步骤
    pub fn last(&self) -> Option<&RulePattern> {
        self.steps.last()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// 变量写入模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VariableFlag {
    #[default]
    Content, // 子规则按文本抽取
    Url,     // 子规则按URL抽取（绝对地址）
}

/// 变量映射规则 `name@@rule&&name2@@rule2`
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariablesPattern {
    pub entries: Vec<(String, String)>,
    pub flag: VariableFlag,
}

impl VariablesPattern {
    /// 按变量名查找子规则
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, rule)| rule.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(pattern: &str, replacement: &str, group: Option<usize>) -> ReplaceSpec {
        ReplaceSpec {
            regex: Regex::new(pattern).unwrap(),
            replacement: replacement.to_string(),
            group,
        }
    }

    #[test]
    fn test_replace_with_group_keeps_other_groups() {
        let second = spec(r"(\d+)-(\d+)", "", Some(2));
        assert_eq!(second.apply("ch-12-34"), "34");

        let first = spec(r"(\d+)-(\d+)", "", Some(1));
        assert_eq!(first.apply("ch-12-34"), "12");
    }

    #[test]
    fn test_replace_with_group_rewrites_inside_group() {
        // 分组文本内再做一次首次替换
        let rule = spec(r"(\d+)", "<$1>", Some(1));
        assert_eq!(rule.apply("第12章"), "<12>");
    }

    #[test]
    fn test_replace_with_group_no_match_is_empty() {
        let rule = spec(r"(\d+)", "", Some(1));
        assert_eq!(rule.apply("无数字"), "");
    }

    #[test]
    fn test_replace_all_without_group() {
        let rule = spec(r"\s+", " ", None);
        assert_eq!(rule.apply("a  b \n c"), "a b c");
    }

    #[test]
    fn test_mode_hint() {
        assert_eq!(RuleMode::from_hint("@XPath://a"), Some((RuleMode::XPath, 7)));
        assert_eq!(RuleMode::from_hint("@json:$.a"), Some((RuleMode::Json, 6)));
        assert_eq!(RuleMode::from_hint("div.a"), None);
    }
}

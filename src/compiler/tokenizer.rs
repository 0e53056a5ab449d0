//! 规则分词器
//! 按步骤分隔符切分原始规则，同时剥离脚本块与正则段

use crate::error::{RuleError, RuleResult};

/// 步骤分隔符
pub const STEP_SEPARATOR: &str = "->";
/// 正则段分隔符
pub const REGEX_FENCE: &str = "##";
/// 脚本块起止标记
pub const SCRIPT_OPEN: &str = "<js>";
pub const SCRIPT_CLOSE: &str = "</js>";
/// 终止型脚本前缀，吞掉规则剩余全部内容
pub const SCRIPT_PREFIX: &str = "@js:";

/// 分词后的原始步骤
#[derive(Debug, Default, Clone, PartialEq)]
pub(crate) struct RawSegment {
    pub body: String,
    pub regex: Option<String>,
    pub scripts: Vec<String>,
}

impl RawSegment {
    fn is_blank(&self) -> bool {
        self.body.trim().is_empty() && self.regex.is_none() && self.scripts.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Zone {
    Selector,
    Regex,
}

/// 忽略大小写的前缀判断
pub(crate) fn starts_with_ignore_case(s: &str, prefix: &str) -> bool {
    s.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

/// 切分规则步骤
pub(crate) fn split_steps(raw: &str) -> RuleResult<Vec<RawSegment>> {
    let mut segments = Vec::new();
    let mut current = RawSegment::default();
    let mut zone = Zone::Selector;
    let mut brackets: Vec<char> = Vec::new();
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < raw.len() {
        let rest = &raw[i..];

        if quote.is_none() && rest.starts_with(SCRIPT_OPEN) {
            let body_start = i + SCRIPT_OPEN.len();
            let Some(len) = raw[body_start..].find(SCRIPT_CLOSE) else {
                return Err(RuleError::malformed(raw, "脚本块 <js> 未闭合"));
            };
            current.scripts.push(raw[body_start..body_start + len].trim().to_string());
            i = body_start + len + SCRIPT_CLOSE.len();
            continue;
        }

        if quote.is_none() && brackets.is_empty() && starts_with_ignore_case(rest, SCRIPT_PREFIX) {
            current.scripts.push(rest[SCRIPT_PREFIX.len()..].trim().to_string());
            i = raw.len();
            continue;
        }

        let Some(c) = rest.chars().next() else {
            break;
        };

        match zone {
            Zone::Regex => {
                // 正则段内只有前置空白的 `->` 才是步骤分隔符，`<!--.*?-->` 之类保持原样
                let regex_ends = current
                    .regex
                    .as_deref()
                    .is_some_and(|r| r.ends_with(char::is_whitespace));
                if regex_ends && rest.starts_with(STEP_SEPARATOR) {
                    if let Some(regex) = current.regex.as_mut() {
                        regex.truncate(regex.trim_end().len());
                    }
                    finish_segment(raw, &mut segments, &mut current)?;
                    zone = Zone::Selector;
                    i += STEP_SEPARATOR.len();
                    continue;
                }
                if let Some(regex) = current.regex.as_mut() {
                    regex.push(c);
                }
            }
            Zone::Selector => {
                if let Some(q) = quote {
                    if c == '\\' {
                        i += push_escaped(&mut current.body, rest);
                        continue;
                    }
                    if c == q {
                        quote = None;
                    }
                    current.body.push(c);
                } else {
                    match c {
                        '\\' => {
                            i += push_escaped(&mut current.body, rest);
                            continue;
                        }
                        '"' | '\'' if opens_quote(raw, i) => {
                            quote = Some(c);
                            current.body.push(c);
                        }
                        '(' | '[' | '{' => {
                            brackets.push(c);
                            current.body.push(c);
                        }
                        ')' | ']' | '}' => {
                            let expected = match c {
                                ')' => '(',
                                ']' => '[',
                                _ => '{',
                            };
                            if brackets.pop() != Some(expected) {
                                return Err(RuleError::malformed(raw, format!("括号不匹配：多余的 '{}'", c)));
                            }
                            current.body.push(c);
                        }
                        _ if brackets.is_empty() && rest.starts_with(STEP_SEPARATOR) => {
                            finish_segment(raw, &mut segments, &mut current)?;
                            i += STEP_SEPARATOR.len();
                            continue;
                        }
                        _ if brackets.is_empty() && rest.starts_with(REGEX_FENCE) => {
                            zone = Zone::Regex;
                            current.regex = Some(String::new());
                            i += REGEX_FENCE.len();
                            continue;
                        }
                        _ => current.body.push(c),
                    }
                }
            }
        }
        i += c.len_utf8();
    }

    if quote.is_some() {
        return Err(RuleError::malformed(raw, "引号未闭合"));
    }
    if let Some(open) = brackets.last() {
        return Err(RuleError::malformed(raw, format!("括号不匹配：'{}' 未闭合", open)));
    }
    finish_segment(raw, &mut segments, &mut current)?;
    Ok(segments)
}

/// 紧跟在字母数字之后的引号视为撇号（如 `it's`），不开启引号
fn opens_quote(raw: &str, at: usize) -> bool {
    !raw[..at].chars().next_back().is_some_and(char::is_alphanumeric)
}

/// 转义字符原样保留（反斜杠与后续字符），返回消耗的字节数
fn push_escaped(buf: &mut String, rest: &str) -> usize {
    let mut chars = rest.chars();
    let mut consumed = 0;
    for c in chars.by_ref().take(2) {
        buf.push(c);
        consumed += c.len_utf8();
    }
    consumed
}

fn finish_segment(
    raw: &str,
    segments: &mut Vec<RawSegment>,
    current: &mut RawSegment,
) -> RuleResult<()> {
    if current.is_blank() {
        return Err(RuleError::malformed(raw, format!("第{}个步骤为空", segments.len() + 1)));
    }
    segments.push(std::mem::take(current));
    Ok(())
}

/// 在脚本块与引号之外按分隔符切分（变量映射规则使用）
pub(crate) fn split_outside_scripts<'a>(raw: &'a str, separator: &str) -> RuleResult<Vec<&'a str>> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;
    let mut i = 0;

    while i < raw.len() {
        let rest = &raw[i..];
        if quote.is_none() && rest.starts_with(SCRIPT_OPEN) {
            let body_start = i + SCRIPT_OPEN.len();
            let Some(len) = raw[body_start..].find(SCRIPT_CLOSE) else {
                return Err(RuleError::malformed(raw, "脚本块 <js> 未闭合"));
            };
            i = body_start + len + SCRIPT_CLOSE.len();
            continue;
        }
        let Some(c) = rest.chars().next() else {
            break;
        };
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if (c == '"' || c == '\'') && opens_quote(raw, i) => quote = Some(c),
            None if rest.starts_with(separator) => {
                parts.push(&raw[start..i]);
                i += separator.len();
                start = i;
                continue;
            }
            None => {}
        }
        i += c.len_utf8();
    }
    parts.push(&raw[start..]);
    Ok(parts)
}

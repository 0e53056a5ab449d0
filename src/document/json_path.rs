//! JSONPath 子集
//! 支持 `$`、`.key`、`['key']`、`[n]`、`[-n]`、`[*]`、`.*`、`..key`

use serde_json::Value;

use crate::error::{RuleError, RuleResult};

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    Index(i64),
    Wildcard,
    Recursive(String),
}

/// 编译后的 JSONPath
#[derive(Debug, Clone, PartialEq)]
pub struct JsonPath {
    segments: Vec<Segment>,
}

impl JsonPath {
    /// 解析路径，允许省略开头的 `$`
    pub fn parse(path: &str) -> RuleResult<Self> {
        let raw = path;
        let path = path.trim();
        let mut rest = path.strip_prefix('$').unwrap_or(path);
        let mut segments = Vec::new();

        // 省略 `$` 时首段按键名处理
        if !path.starts_with('$') && !rest.is_empty() && !rest.starts_with(['.', '[']) {
            let end = rest.find(['.', '[']).unwrap_or(rest.len());
            segments.push(Segment::Key(rest[..end].to_string()));
            rest = &rest[end..];
        }

        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix("..") {
                let end = after.find(['.', '[']).unwrap_or(after.len());
                let key = &after[..end];
                if key.is_empty() {
                    return Err(RuleError::malformed(raw, "JSONPath 递归下降缺少键名"));
                }
                segments.push(Segment::Recursive(key.to_string()));
                rest = &after[end..];
            } else if let Some(after) = rest.strip_prefix('.') {
                let end = after.find(['.', '[']).unwrap_or(after.len());
                let key = &after[..end];
                match key {
                    "" => return Err(RuleError::malformed(raw, "JSONPath 键名为空")),
                    "*" => segments.push(Segment::Wildcard),
                    _ => segments.push(Segment::Key(key.to_string())),
                }
                rest = &after[end..];
            } else if let Some(after) = rest.strip_prefix('[') {
                let close = bracket_end(after)
                    .ok_or_else(|| RuleError::malformed(raw, "JSONPath 方括号未闭合"))?;
                segments.push(parse_bracket(raw, after[..close].trim())?);
                rest = &after[close + 1..];
            } else {
                return Err(RuleError::malformed(raw, format!("JSONPath 无法解析：{}", rest)));
            }
        }

        Ok(Self { segments })
    }

    /// 求值，返回全部匹配值
    pub fn evaluate<'a>(&self, root: &'a Value) -> Vec<&'a Value> {
        let mut current = vec![root];
        for segment in &self.segments {
            let mut next = Vec::new();
            for value in current {
                match segment {
                    Segment::Key(key) => next.extend(value.get(key.as_str())),
                    Segment::Index(index) => next.extend(index_of(value, *index)),
                    Segment::Wildcard => match value {
                        Value::Array(items) => next.extend(items.iter()),
                        Value::Object(map) => next.extend(map.values()),
                        _ => {}
                    },
                    Segment::Recursive(key) => collect_recursive(value, key, &mut next),
                }
            }
            current = next;
        }
        current
    }
}

/// 选择全部结果（克隆）
pub fn select(root: &Value, path: &str) -> RuleResult<Vec<Value>> {
    Ok(JsonPath::parse(path)?
        .evaluate(root)
        .into_iter()
        .cloned()
        .collect())
}

fn bracket_end(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
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

fn parse_bracket(raw: &str, body: &str) -> RuleResult<Segment> {
    if body == "*" {
        return Ok(Segment::Wildcard);
    }
    if let Ok(index) = body.parse::<i64>() {
        return Ok(Segment::Index(index));
    }
    for quote in ['\'', '"'] {
        if let Some(key) = body.strip_prefix(quote).and_then(|b| b.strip_suffix(quote)) {
            return Ok(Segment::Key(key.to_string()));
        }
    }
    Err(RuleError::malformed(raw, format!("JSONPath 方括号内容无效：[{}]", body)))
}

fn index_of(value: &Value, index: i64) -> Option<&Value> {
    let items = value.as_array()?;
    let pos = if index < 0 {
        items.len().checked_sub(index.unsigned_abs() as usize)?
    } else {
        index as usize
    };
    items.get(pos)
}

fn collect_recursive<'a>(value: &'a Value, key: &str, out: &mut Vec<&'a Value>) {
    match value {
        Value::Object(map) => {
            if let Some(found) = map.get(key) {
                out.push(found);
            }
            for child in map.values() {
                collect_recursive(child, key, out);
            }
        }
        Value::Array(items) => {
            for child in items {
                collect_recursive(child, key, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "data": {
                "name": "斗破苍穹",
                "chapters": [
                    {"title": "第一章", "url": "/c/1"},
                    {"title": "第二章", "url": "/c/2"},
                    {"title": "第三章", "url": "/c/3"}
                ],
                "book info": {"author": "天蚕土豆"}
            }
        })
    }

    #[test]
    fn test_keys_and_indexes() {
        let root = sample();
        assert_eq!(select(&root, "$.data.name").unwrap(), vec![json!("斗破苍穹")]);
        assert_eq!(select(&root, "$.data.chapters[0].url").unwrap(), vec![json!("/c/1")]);
        assert_eq!(select(&root, "$.data.chapters[-1].title").unwrap(), vec![json!("第三章")]);
        assert_eq!(select(&root, "$.data['book info'].author").unwrap(), vec![json!("天蚕土豆")]);
        assert_eq!(select(&root, "data.name").unwrap(), vec![json!("斗破苍穹")]);
    }

    #[test]
    fn test_wildcards_and_recursive() {
        let root = sample();
        let titles = select(&root, "$.data.chapters[*].title").unwrap();
        assert_eq!(titles.len(), 3);
        let urls = select(&root, "$..url").unwrap();
        assert_eq!(urls, vec![json!("/c/1"), json!("/c/2"), json!("/c/3")]);
        assert_eq!(select(&root, "$.data.chapters.*.url").unwrap().len(), 3);
    }

    #[test]
    fn test_missing_paths_are_empty() {
        let root = sample();
        assert!(select(&root, "$.data.nothing").unwrap().is_empty());
        assert!(select(&root, "$.data.chapters[9]").unwrap().is_empty());
        assert!(select(&root, "$.data.chapters[-9]").unwrap().is_empty());
        assert_eq!(select(&root, "$").unwrap(), vec![root.clone()]);
    }

    #[test]
    fn test_malformed_paths() {
        let root = sample();
        assert!(select(&root, "$.data[").is_err());
        assert!(select(&root, "$.data.").is_err());
        assert!(select(&root, "$..").is_err());
        assert!(select(&root, "$.data[abc]").is_err());
    }
}

//! 规则编译器核心
//! 仅负责将原始规则字符串编译为可执行的步骤序列

use std::time::Instant;
use regex::Regex;
use tracing::debug;

use super::pattern::{ReplaceSpec, RuleMode, RulePattern, RulePatterns};
use super::tokenizer::{split_steps, RawSegment, REGEX_FENCE};
use crate::error::{RuleError, RuleResult};

/// 规则编译器
pub struct RuleCompiler;

impl RuleCompiler {
    /// 编译多步骤规则
    pub fn compile(raw: &str, mode: RuleMode) -> RuleResult<RulePatterns> {
        let start = Instant::now();
        let trimmed = raw.trim();

        // 空规则：整个节点
        if trimmed.is_empty() {
            return Ok(RulePatterns {
                steps: vec![RulePattern {
                    selector: String::new(),
                    mode,
                    scripts: Vec::new(),
                    replace: None,
                }],
            });
        }

        let segments = split_steps(trimmed)?;
        let mut steps = Vec::with_capacity(segments.len());
        let mut stats = CompileStats::default();
        for segment in segments {
            let step = Self::compile_segment(trimmed, segment, mode)?;
            stats.record(&step);
            steps.push(step);
        }

        debug!(
            "规则编译完成，耗时{:?}：步骤{}个、脚本{}段、正则{}条，规则={}",
            start.elapsed(),
            steps.len(),
            stats.script_count,
            stats.regex_count,
            trimmed
        );

        Ok(RulePatterns { steps })
    }

    /// 编译单步骤规则
    pub fn compile_single(raw: &str, mode: RuleMode) -> RuleResult<RulePattern> {
        let mut patterns = Self::compile(raw, mode)?;
        if patterns.steps.len() != 1 {
            return Err(RuleError::malformed(
                raw,
                format!("单值规则只能包含一个步骤，实际为{}个", patterns.steps.len()),
            ));
        }
        patterns
            .steps
            .pop()
            .ok_or_else(|| RuleError::malformed(raw, "规则没有可执行的步骤"))
    }

    /// 编译单个步骤
    fn compile_segment(raw: &str, segment: RawSegment, default_mode: RuleMode) -> RuleResult<RulePattern> {
        let body = segment.body.trim();
        let (mode, selector) = Self::resolve_mode(body, default_mode);
        let replace = match segment.regex.as_deref() {
            Some(parts) => Self::compile_replace(raw, parts)?,
            None => None,
        };

        Ok(RulePattern {
            selector: selector.trim().to_string(),
            mode,
            scripts: segment.scripts,
            replace,
        })
    }

    /// 解析步骤方言：显式前缀优先，其次按选择器形态推断
    fn resolve_mode(body: &str, default_mode: RuleMode) -> (RuleMode, &str) {
        if let Some((mode, len)) = RuleMode::from_hint(body) {
            return (mode, &body[len..]);
        }
        if body.starts_with("//") {
            (RuleMode::XPath, body)
        } else if body.starts_with("$.") || body.starts_with("$[") {
            (RuleMode::Json, body)
        } else {
            (default_mode, body)
        }
    }

    /// 编译正则替换段 `regex##replacement##group`
    fn compile_replace(raw: &str, parts: &str) -> RuleResult<Option<ReplaceSpec>> {
        let pieces: Vec<&str> = parts.split(REGEX_FENCE).collect();
        if pieces.len() > 3 {
            return Err(RuleError::malformed(raw, "正则替换段过多，格式应为 ##正则##替换##分组"));
        }

        let pattern = pieces[0];
        if pattern.is_empty() {
            if pieces.iter().skip(1).any(|p| !p.trim().is_empty()) {
                return Err(RuleError::malformed(raw, "正则为空却指定了替换内容或分组"));
            }
            return Ok(None);
        }

        let regex = Regex::new(pattern)
            .map_err(|e| RuleError::malformed(raw, format!("正则编译失败：{}", e)))?;
        let replacement = Self::normalize_replacement(pieces.get(1).copied().unwrap_or_default());

        let group = match pieces.get(2).map(|g| g.trim()) {
            Some(g) if !g.is_empty() => {
                let group: usize = g
                    .parse()
                    .map_err(|_| RuleError::malformed(raw, format!("分组序号无效：{}", g)))?;
                if group >= regex.captures_len() {
                    return Err(RuleError::malformed(
                        raw,
                        format!("分组序号{}超出正则分组数{}", group, regex.captures_len() - 1),
                    ));
                }
                Some(group)
            }
            _ => None,
        };

        Ok(Some(ReplaceSpec {
            regex,
            replacement,
            group,
        }))
    }

    /// 兼容 Java 风格替换串：`$1` 转为 `${1}`，`\$` 为字面量
    fn normalize_replacement(s: &str) -> String {
        let mut normalized = String::with_capacity(s.len() + 4);
        let mut chars = s.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some('$') => normalized.push_str("$$"),
                    Some(next_c) => normalized.push(next_c),
                    None => normalized.push('\\'),
                },
                '$' => match chars.peek() {
                    Some(d) if d.is_ascii_digit() => {
                        normalized.push_str("${");
                        while let Some(&d) = chars.peek() {
                            if !d.is_ascii_digit() {
                                break;
                            }
                            normalized.push(d);
                            chars.next();
                        }
                        normalized.push('}');
                    }
                    Some('{') => normalized.push('$'),
                    _ => normalized.push_str("$$"),
                },
                _ => normalized.push(c),
            }
        }

        normalized
    }
}

/// 编译统计信息
#[derive(Debug, Clone, Default)]
struct CompileStats {
    script_count: usize,
    regex_count: usize,
}

impl CompileStats {
    fn record(&mut self, step: &RulePattern) {
        self.script_count += step.scripts.len();
        if step.replace.is_some() {
            self.regex_count += 1;
        }
    }
}

//! 变量映射规则编译器
//! 语法：`name@@rule&&name2@@rule2`

use std::collections::HashSet;
use tracing::debug;

use super::pattern::{VariableFlag, VariablesPattern};
use super::tokenizer::split_outside_scripts;
use crate::error::{RuleError, RuleResult};

/// 变量对分隔符
pub const PAIR_SEPARATOR: &str = "&&";
/// 变量名与子规则分隔符
pub const NAME_SEPARATOR: &str = "@@";

/// 变量映射编译器
pub struct VariableMapCompiler;

impl VariableMapCompiler {
    /// 编译变量映射规则，保持变量出现顺序
    pub fn compile(raw: &str, flag: VariableFlag) -> RuleResult<VariablesPattern> {
        let mut pattern = VariablesPattern {
            entries: Vec::new(),
            flag,
        };
        if raw.trim().is_empty() {
            return Ok(pattern);
        }

        let mut seen = HashSet::new();
        for pair in split_outside_scripts(raw, PAIR_SEPARATOR)? {
            let pair = pair.trim();
            if pair.is_empty() {
                continue;
            }

            let Some((name, rule)) = pair.split_once(NAME_SEPARATOR) else {
                return Err(RuleError::malformed(raw, format!("变量定义缺少 @@ 分隔：{}", pair)));
            };
            let name = name.trim();
            if name.is_empty() || name.chars().any(char::is_whitespace) {
                return Err(RuleError::malformed(raw, format!("变量名无效：'{}'", name)));
            }
            if !seen.insert(name.to_string()) {
                return Err(RuleError::malformed(raw, format!("变量名重复：{}", name)));
            }

            // 空子规则直接丢弃
            let rule = rule.trim();
            if rule.is_empty() {
                debug!("变量{}的子规则为空，已忽略", name);
                continue;
            }
            pattern.entries.push((name.to_string(), rule.to_string()));
        }

        Ok(pattern)
    }
}

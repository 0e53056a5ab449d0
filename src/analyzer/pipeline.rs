//! 编译后规则的执行管线
//! 依次执行各步骤的选择；中间步骤的脚本与正则逐元素执行，最后一步的脚本与正则按单值/列表语义执行

use std::rc::Rc;
use tracing::{debug, warn};

use crate::compiler::{RulePattern, RulePatterns};
use crate::document::select::select;
use crate::document::Primitive;
use crate::error::{RuleError, RuleResult};
use crate::script::{ScriptEngine, ScriptHost, ScriptValue};
use crate::utils::{stringify, stringify_list};

/// 单次执行所需的上下文
pub(crate) struct Pipeline<'a> {
    pub engine: &'a dyn ScriptEngine,
    pub host: &'a Rc<dyn ScriptHost>,
    pub base_url: Option<&'a str>,
}

impl Pipeline<'_> {
    /// 依次执行脚本链，每段脚本以上一段的输出为 `result`
    pub fn run_scripts(&self, scripts: &[String], seed: ScriptValue) -> RuleResult<ScriptValue> {
        let mut value = seed;
        for script in scripts {
            value = self
                .engine
                .eval(script, self.host, &value, self.base_url)
                .inspect_err(|e| warn!("规则脚本执行失败：{}", e))?;
        }
        Ok(value)
    }

    /// 单步选择，后端不匹配降级为空结果
    fn select_step(&self, item: &Primitive, step: &RulePattern) -> RuleResult<Vec<Primitive>> {
        match select(item, step.mode, &step.selector) {
            Err(RuleError::BackendMismatch { mode, backend }) => {
                debug!("步骤{}与{}后端不匹配，结果置空：{}", mode, backend, step.selector);
                Ok(Vec::new())
            }
            other => other,
        }
    }

    /// 中间步骤的后处理：脚本看到节点外层HTML，正则逐元素执行
    fn post_process_intermediate(&self, step: &RulePattern, items: Vec<Primitive>) -> RuleResult<Vec<Primitive>> {
        if !step.has_scripts() && step.replace.is_none() {
            return Ok(items);
        }
        let mut processed = Vec::with_capacity(items.len());
        for item in items {
            let item = if step.has_scripts() {
                let value = self.run_scripts(&step.scripts, item.to_script_value())?;
                if value.is_null() {
                    continue;
                }
                Primitive::from_script_value(value)
            } else {
                item
            };
            let item = match &step.replace {
                Some(replace) => Primitive::Text(replace.apply(&item.as_text())),
                None => item,
            };
            if !item.is_empty() {
                processed.push(item);
            }
        }
        Ok(processed)
    }

    /// 执行全部选择，返回最后一步的选择结果（尚未执行最后一步的脚本与正则）
    fn select_through(&self, patterns: &RulePatterns, input: &Primitive) -> RuleResult<Vec<Primitive>> {
        let mut current = vec![input.clone()];
        let last = patterns.len().saturating_sub(1);
        for (index, step) in patterns.steps.iter().enumerate() {
            let mut next = Vec::new();
            for item in &current {
                next.extend(self.select_step(item, step)?);
            }
            current = if index < last {
                self.post_process_intermediate(step, next)?
            } else {
                next
            };
            if current.is_empty() {
                break;
            }
        }
        Ok(current)
    }

    /// 单值执行：结果以换行拼接后执行脚本链，再做分组感知的正则替换
    pub fn run_single(&self, patterns: &RulePatterns, input: &Primitive) -> RuleResult<String> {
        let Some(last) = patterns.last() else {
            return Ok(String::new());
        };
        let items = self.select_through(patterns, input)?;

        let mut text = if last.has_scripts() {
            let seed = match items.as_slice() {
                [Primitive::Object(value)] => value.clone(),
                _ => ScriptValue::String(join_text(&items)),
            };
            stringify(&self.run_scripts(&last.scripts, seed)?)
        } else {
            join_text(&items)
        };

        if let Some(replace) = &last.replace {
            text = replace.apply(&text);
        }
        Ok(text)
    }

    /// 列表执行：逐元素执行脚本链，再对整个列表逐元素全局替换
    pub fn run_list(&self, patterns: &RulePatterns, input: &Primitive) -> RuleResult<Vec<String>> {
        let Some(last) = patterns.last() else {
            return Ok(Vec::new());
        };
        let items = self.select_through(patterns, input)?;

        let mut values = if !last.has_scripts() {
            items.iter().map(Primitive::as_text).collect()
        } else if let [only] = items.as_slice() {
            // 单元素经脚本得到数组时展开为列表
            let value = self.run_scripts(&last.scripts, final_seed(only))?;
            stringify_list(&value)
        } else {
            let mut values = Vec::with_capacity(items.len());
            for item in &items {
                values.push(stringify(&self.run_scripts(&last.scripts, final_seed(item))?));
            }
            values
        };

        if let Some(replace) = &last.replace {
            values = values.iter().map(|v| replace.replace_all(v)).collect();
        }
        Ok(values)
    }
}

/// 最后一步的脚本种子：节点先转文本
fn final_seed(item: &Primitive) -> ScriptValue {
    match item {
        Primitive::Object(value) => value.clone(),
        other => ScriptValue::String(other.as_text()),
    }
}

fn join_text(items: &[Primitive]) -> String {
    items
        .iter()
        .map(Primitive::as_text)
        .collect::<Vec<_>>()
        .join("\n")
}

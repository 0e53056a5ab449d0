//! 基于 boa_engine 的脚本引擎
//! 每段脚本使用独立的上下文执行，宿主函数同时注册为全局函数与 `java` 对象成员

use std::rc::Rc;
use std::time::Instant;
use boa_engine::property::Attribute;
use boa_engine::{
    js_string, Context, JsError, JsNativeError, JsResult, JsString, JsValue,
    NativeFunction, Source,
};
use tracing::debug;

use super::{ScriptEngine, ScriptHost, ScriptValue};
use crate::config::AnalyzerConfig;
use crate::error::{RuleError, RuleResult};

type HostCall = fn(&dyn ScriptHost, &[String]) -> RuleResult<String>;

fn arg(args: &[String], index: usize) -> &str {
    args.get(index).map(String::as_str).unwrap_or_default()
}

fn host_get_variable(host: &dyn ScriptHost, args: &[String]) -> RuleResult<String> {
    Ok(host.get_variable(arg(args, 0)))
}

fn host_put_variable(host: &dyn ScriptHost, args: &[String]) -> RuleResult<String> {
    let value = arg(args, 1);
    host.put_variable(arg(args, 0), value);
    Ok(value.to_string())
}

fn host_ajax(host: &dyn ScriptHost, args: &[String]) -> RuleResult<String> {
    host.ajax(arg(args, 0))
}

fn host_base64_encode(host: &dyn ScriptHost, args: &[String]) -> RuleResult<String> {
    Ok(host.base64_encode(arg(args, 0)))
}

fn host_base64_decode(host: &dyn ScriptHost, args: &[String]) -> RuleResult<String> {
    host.base64_decode(arg(args, 0))
}

fn host_unescape_html3(host: &dyn ScriptHost, args: &[String]) -> RuleResult<String> {
    Ok(host.unescape_html3(arg(args, 0)))
}

fn host_unescape_html4(host: &dyn ScriptHost, args: &[String]) -> RuleResult<String> {
    Ok(host.unescape_html4(arg(args, 0)))
}

fn host_format_html(host: &dyn ScriptHost, args: &[String]) -> RuleResult<String> {
    Ok(host.format_html(arg(args, 0)))
}

/// 宿主函数表：（名称，参数个数，实现）
const HOST_FUNCTIONS: [(&str, usize, HostCall); 8] = [
    ("getVariable", 1, host_get_variable),
    ("putVariable", 2, host_put_variable),
    ("ajax", 1, host_ajax),
    ("base64Encode", 1, host_base64_encode),
    ("base64Decode", 1, host_base64_decode),
    ("unescapeHtml3", 1, host_unescape_html3),
    ("unescapeHtml4", 1, host_unescape_html4),
    ("formatHtml", 1, host_format_html),
];

/// 兼容旧规则的 `java.*` 调用方式
const JAVA_PRELUDE: &str = r#"
var java = {
    getVariable: getVariable, putVariable: putVariable,
    get: getVariable, put: putVariable,
    ajax: ajax,
    base64Encode: base64Encode, base64Decode: base64Decode,
    unescapeHtml3: unescapeHtml3, unescapeHtml4: unescapeHtml4,
    formatHtml: formatHtml
};
"#;

fn script_error(e: JsError) -> RuleError {
    RuleError::ScriptExecution(e.to_string())
}

/// boa 脚本引擎
#[derive(Debug, Clone)]
pub struct BoaScriptEngine {
    loop_limit: u64,
    recursion_limit: usize,
}

impl Default for BoaScriptEngine {
    fn default() -> Self {
        Self::from_config(&AnalyzerConfig::default())
    }
}

impl BoaScriptEngine {
    pub fn from_config(config: &AnalyzerConfig) -> Self {
        Self {
            loop_limit: config.script_loop_limit,
            recursion_limit: config.script_recursion_limit,
        }
    }

    /// 创建上下文并注册宿主函数与全局变量
    fn prepare_context(
        &self,
        host: &Rc<dyn ScriptHost>,
        seed: &ScriptValue,
        base_url: Option<&str>,
    ) -> JsResult<Context> {
        let mut context = Context::default();
        if self.loop_limit > 0 {
            context.runtime_limits_mut().set_loop_iteration_limit(self.loop_limit);
        }
        context.runtime_limits_mut().set_recursion_limit(self.recursion_limit);

        for (name, length, call) in HOST_FUNCTIONS {
            let host = Rc::clone(host);
            // SAFETY: 闭包只捕获宿主句柄与函数指针，不持有任何受 GC 管理的值
            let function = unsafe {
                NativeFunction::from_closure(move |_this, args, ctx| {
                    let args = args
                        .iter()
                        .map(|a| a.to_string(ctx).map(|s| s.to_std_string_escaped()))
                        .collect::<JsResult<Vec<_>>>()?;
                    call(host.as_ref(), &args)
                        .map(|s| JsValue::from(JsString::from(s.as_str())))
                        .map_err(|e| JsNativeError::error().with_message(e.to_string()).into())
                })
            };
            context.register_global_builtin_callable(JsString::from(name), length, function)?;
        }
        context.eval(Source::from_bytes(JAVA_PRELUDE))?;

        let seed = JsValue::from_json(seed, &mut context)?;
        context.register_global_property(js_string!("result"), seed, Attribute::all())?;
        let base_url = match base_url {
            Some(url) => JsValue::from(JsString::from(url)),
            None => JsValue::null(),
        };
        context.register_global_property(js_string!("baseUrl"), base_url, Attribute::all())?;
        Ok(context)
    }
}

impl ScriptEngine for BoaScriptEngine {
    fn eval(
        &self,
        script: &str,
        host: &Rc<dyn ScriptHost>,
        seed: &ScriptValue,
        base_url: Option<&str>,
    ) -> RuleResult<ScriptValue> {
        let start = Instant::now();
        let mut context = self.prepare_context(host, seed, base_url).map_err(script_error)?;

        let value = context
            .eval(Source::from_bytes(script))
            .map_err(script_error)?;
        let value = if value.is_undefined() || value.is_null() {
            ScriptValue::Null
        } else {
            value.to_json(&mut context).map_err(script_error)?
        };

        debug!("脚本执行完成，耗时{:?}，脚本长度{}", start.elapsed(), script.len());
        Ok(value)
    }
}

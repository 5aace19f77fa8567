use std::sync::{
    Arc, LazyLock,
    atomic::{AtomicBool, Ordering},
};

use regex::Regex;
use rquickjs::{Context as JsContext, Ctx, FromJs, Runtime as JsRuntime};
use rustpython_vm::{
    AsObject, Interpreter, PyObjectRef, VirtualMachine,
    builtins::{PyDict, PyFloat, PyInt, PyList, PyStr},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ResflowError, Result};

static JS_FUNCTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"function\s+([a-zA-Z_][a-zA-Z0-9_]*)\s*\(").expect("valid js function regex"));
static PY_FUNCTION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"def\s+([a-zA-Z_][a-zA-Z0-9_]*)\s*\(").expect("valid python function regex"));

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScriptLanguage {
    Python3,
    Javascript,
}

impl ScriptLanguage {
    /// Call the first function declared in `code` with `params` as its only
    /// argument and return what it returns.
    ///
    /// Blocks the calling thread. Setting `interrupt` aborts a running
    /// JavaScript function; a Python function always runs to completion.
    pub fn call(
        &self,
        code: &str,
        params: Value,
        interrupt: &Arc<AtomicBool>,
    ) -> Result<Value> {
        match self {
            ScriptLanguage::Javascript => QuickJs::call(code, params, interrupt.clone()),
            ScriptLanguage::Python3 => RustPython::call(code, params),
        }
    }

    fn first_function(
        &self,
        code: &str,
    ) -> Option<String> {
        let re = match self {
            ScriptLanguage::Javascript => &JS_FUNCTION,
            ScriptLanguage::Python3 => &PY_FUNCTION,
        };
        re.captures(code).map(|caps| caps[1].to_string())
    }
}

fn no_function(language: ScriptLanguage) -> ResflowError {
    ResflowError::Script(format!("no function declared in {:?} script", language))
}

struct QuickJs;

impl QuickJs {
    fn call(
        code: &str,
        params: Value,
        interrupt: Arc<AtomicBool>,
    ) -> Result<Value> {
        let func_name = ScriptLanguage::Javascript.first_function(code).ok_or_else(|| no_function(ScriptLanguage::Javascript))?;

        let runtime = JsRuntime::new().map_err(|e| ResflowError::Script(e.to_string()))?;
        runtime.set_interrupt_handler(Some(Box::new(move || interrupt.load(Ordering::Relaxed))));
        let ctx = JsContext::full(&runtime).map_err(|e| ResflowError::Script(e.to_string()))?;

        ctx.with(|ctx| {
            match ctx.eval::<(), _>(code) {
                Ok(()) => {}
                Err(rquickjs::Error::Exception) => return Err(Self::exception(&ctx, "eval")),
                Err(e) => return Err(ResflowError::Script(e.to_string())),
            }

            let call_code = format!("JSON.stringify({}({}))", func_name, serde_json::to_string(&params)?);
            match ctx.eval::<String, _>(call_code) {
                Ok(json_str) => Ok(serde_json::from_str(&json_str)?),
                Err(rquickjs::Error::Exception) => Err(Self::exception(&ctx, "call")),
                Err(e) => Err(ResflowError::Script(e.to_string())),
            }
        })
    }

    fn exception(
        ctx: &Ctx<'_>,
        phase: &str,
    ) -> ResflowError {
        let message = rquickjs::Exception::from_js(ctx, ctx.catch())
            .ok()
            .and_then(|exception| exception.message())
            .unwrap_or_else(|| "unknown exception".to_string());
        ResflowError::Script(format!("javascript {} failed: {}", phase, message))
    }
}

struct RustPython;

impl RustPython {
    fn call(
        code: &str,
        params: Value,
    ) -> Result<Value> {
        let func_name = ScriptLanguage::Python3.first_function(code).ok_or_else(|| no_function(ScriptLanguage::Python3))?;

        Interpreter::without_stdlib(Default::default()).enter(|vm| {
            let scope = vm.new_scope_with_builtins();

            let code_obj = vm
                .compile(code, rustpython_vm::compiler::Mode::Exec, "<resource>".to_owned())
                .map_err(|e| ResflowError::Script(format!("python compile failed: {:?}", e)))?;
            vm.run_code_obj(code_obj, scope.clone()).map_err(|e| ResflowError::Script(format!("python exec failed: {:?}", e)))?;

            let func = scope.globals.get_item(&func_name, vm).map_err(|e| ResflowError::Script(format!("{:?}", e)))?;
            let py_params = Self::to_py(vm, &params)?;
            let result = func.call((py_params,), vm).map_err(|e| ResflowError::Script(format!("python call failed: {:?}", e)))?;

            Self::to_json(vm, &result)
        })
    }

    fn to_py(
        vm: &VirtualMachine,
        value: &Value,
    ) -> Result<PyObjectRef> {
        Ok(match value {
            Value::Null => vm.ctx.none(),
            Value::Bool(b) => vm.ctx.new_bool(*b).into(),
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => vm.ctx.new_int(i).into(),
                (None, Some(f)) => vm.ctx.new_float(f).into(),
                _ => vm.ctx.none(),
            },
            Value::String(s) => vm.ctx.new_str(s.as_str()).into(),
            Value::Array(arr) => {
                let items = arr.iter().map(|v| Self::to_py(vm, v)).collect::<Result<Vec<_>>>()?;
                vm.ctx.new_list(items).into()
            }
            Value::Object(obj) => {
                let dict = vm.ctx.new_dict();
                for (k, v) in obj {
                    dict.set_item(k.as_str(), Self::to_py(vm, v)?, vm).map_err(|e| ResflowError::Script(format!("{:?}", e)))?;
                }
                dict.into()
            }
        })
    }

    fn to_json(
        vm: &VirtualMachine,
        obj: &PyObjectRef,
    ) -> Result<Value> {
        if vm.is_none(obj) {
            return Ok(Value::Null);
        }

        // bool subclasses int, so it must be checked first
        if obj.fast_isinstance(vm.ctx.types.bool_type) {
            return Ok(Value::Bool(obj.is(&vm.ctx.true_value)));
        }

        if let Some(i) = obj.payload::<PyInt>() {
            if let Ok(n) = i.try_to_primitive::<i64>(vm) {
                return Ok(Value::Number(n.into()));
            }
        }

        if let Some(f) = obj.payload::<PyFloat>() {
            if let Some(n) = serde_json::Number::from_f64(f.to_f64()) {
                return Ok(Value::Number(n));
            }
        }

        if let Some(s) = obj.payload::<PyStr>() {
            return Ok(Value::String(s.as_str().to_string()));
        }

        if let Some(list) = obj.payload::<PyList>() {
            return list.borrow_vec().iter().map(|item| Self::to_json(vm, item)).collect::<Result<Vec<_>>>().map(Value::Array);
        }

        if let Some(dict) = obj.payload::<PyDict>() {
            let mut map = serde_json::Map::new();
            for (k, v) in dict {
                let key = k.payload::<PyStr>().map(|s| s.as_str().to_string()).unwrap_or_else(|| format!("{:?}", k));
                map.insert(key, Self::to_json(vm, &v)?);
            }
            return Ok(Value::Object(map));
        }

        Ok(Value::String(format!("{:?}", obj)))
    }
}

#![forbid(unsafe_code)]

//! Which extern imports may run while compiling, and how they run.

use rain_ir::{HostFunctions, Import, RtValue, Trap};
use rain_sema::{CompileTimeEligibility, NoCompileTimeExterns};
use tracing::debug;

use crate::error::CodegenError;

/// Extern-import policy. Eligibility is asked during validation; the code
/// generator then asks for import attributes of every extern and, for the
/// eligible ones, for a host implementation the compile-time interpreter
/// can call under `symbol`.
pub trait ExternPolicy: CompileTimeEligibility {
    fn import(&self, keys: &[String]) -> Import {
        default_import(keys)
    }

    fn materialize(&self, keys: &[String], symbol: &str, hosts: &mut HostFunctions) -> Result<(), CodegenError>;
}

/// `[namespace, module, name]`. Validation guarantees all three keys.
pub fn default_import(keys: &[String]) -> Import {
    Import {
        module: keys.get(1).cloned().unwrap_or_default(),
        name: keys.get(2).cloned().unwrap_or_default(),
    }
}

impl ExternPolicy for NoCompileTimeExterns {
    fn materialize(&self, keys: &[String], symbol: &str, _hosts: &mut HostFunctions) -> Result<(), CodegenError> {
        Err(CodegenError::Internal {
            message: format!("extern `{symbol}` ({}) cannot run at compile time", keys.join(".")),
            span: None,
        })
    }
}

type Unary = fn(f64) -> f64;
type Binary = fn(f64, f64) -> f64;

enum MathFn {
    Unary(Unary),
    Binary(Binary),
}

fn math_function(name: &str) -> Option<MathFn> {
    Some(match name {
        "atan2" => MathFn::Binary(f64::atan2),
        "cos" => MathFn::Unary(f64::cos),
        "sin" => MathFn::Unary(f64::sin),
        "sqrt" => MathFn::Unary(f64::sqrt),
        "tan" => MathFn::Unary(f64::tan),
        _ => return None,
    })
}

/// The browser `Math` functions that are pure enough to evaluate while
/// compiling: `js.math.{atan2, cos, sin, sqrt, tan}`.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsMathPolicy;

impl CompileTimeEligibility for JsMathPolicy {
    fn is_eligible(&self, keys: &[String]) -> bool {
        match keys {
            [namespace, module, name] => namespace == "js" && module == "math" && math_function(name).is_some(),
            _ => false,
        }
    }
}

impl ExternPolicy for JsMathPolicy {
    fn materialize(&self, keys: &[String], symbol: &str, hosts: &mut HostFunctions) -> Result<(), CodegenError> {
        let function = keys
            .last()
            .and_then(|name| math_function(name))
            .ok_or_else(|| CodegenError::Internal {
                message: format!("`{}` is not a compile-time math function", keys.join(".")),
                span: None,
            })?;
        let name = symbol.to_string();
        match function {
            MathFn::Unary(f) => hosts.register(symbol, move |args: &[RtValue]| match args {
                [RtValue::F32(x)] => Ok(RtValue::F32(f(*x as f64) as f32)),
                [RtValue::F64(x)] => Ok(RtValue::F64(f(*x))),
                _ => Err(bad_arguments(&name, 1, args)),
            }),
            MathFn::Binary(f) => hosts.register(symbol, move |args: &[RtValue]| match args {
                [RtValue::F32(y), RtValue::F32(x)] => Ok(RtValue::F32(f(*y as f64, *x as f64) as f32)),
                [RtValue::F64(y), RtValue::F64(x)] => Ok(RtValue::F64(f(*y, *x))),
                _ => Err(bad_arguments(&name, 2, args)),
            }),
        }
        debug!(symbol, import = %keys.join("."), "materialized extern for compile-time execution");
        Ok(())
    }
}

fn bad_arguments(name: &str, expected: usize, args: &[RtValue]) -> Trap {
    Trap::Host {
        name: name.to_string(),
        message: format!("expected {expected} float argument(s) of one width, got {args:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(path: &[&str]) -> Vec<String> {
        path.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn only_whitelisted_math_is_eligible() {
        let policy = JsMathPolicy;
        assert!(policy.is_eligible(&keys(&["js", "math", "sin"])));
        assert!(policy.is_eligible(&keys(&["js", "math", "atan2"])));
        assert!(!policy.is_eligible(&keys(&["js", "math", "random"])));
        assert!(!policy.is_eligible(&keys(&["js", "console", "log"])));
        assert!(!policy.is_eligible(&keys(&["math", "sin"])));
        assert!(!policy.is_eligible(&keys(&["js", "math", "sin", "extra"])));
    }

    #[test]
    fn imports_take_module_and_name_after_the_namespace() {
        let import = JsMathPolicy.import(&keys(&["js", "math", "cos"]));
        assert_eq!(import.module, "math");
        assert_eq!(import.name, "cos");

        let import = default_import(&keys(&["js", "console", "log"]));
        assert_eq!(import.module, "console");
        assert_eq!(import.name, "log");
    }

    #[test]
    fn materialized_hosts_keep_the_float_width() {
        let mut hosts = HostFunctions::new();
        JsMathPolicy
            .materialize(&keys(&["js", "math", "sqrt"]), "sqrt", &mut hosts)
            .expect("materialize");
        let sqrt = hosts.get("sqrt").expect("registered");
        assert!(matches!(sqrt(&[RtValue::F32(9.0)]), Ok(RtValue::F32(v)) if v == 3.0));
        assert!(matches!(sqrt(&[RtValue::F64(16.0)]), Ok(RtValue::F64(v)) if v == 4.0));
        assert!(sqrt(&[RtValue::int(32, 4)]).is_err());
    }
}

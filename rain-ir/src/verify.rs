use std::collections::HashSet;

use crate::error::IrError;
use crate::module::{Function, InstKind, Module};
use crate::value::Value;

/// Structural checks run before emission.
pub fn verify_module(module: &Module) -> Result<(), IrError> {
    for (_, function) in module.functions() {
        verify_function(module, function)?;
    }
    Ok(())
}

fn verify_function(module: &Module, function: &Function) -> Result<(), IrError> {
    let fail = |message: String| IrError::Verify {
        function: function.name.clone(),
        message,
    };
    if function.is_declaration() {
        return Ok(());
    }

    let placed: HashSet<_> = function.placed_insts().map(|(_, i)| i).collect();
    let check_value = |value: Value| -> Result<(), IrError> {
        match value {
            Value::Inst(i) if !placed.contains(&i) => Err(fail(format!("use of unplaced value %{}", i.0))),
            Value::Arg(a) if a as usize >= function.signature.params.len() => {
                Err(fail(format!("argument {a} out of range")))
            }
            Value::Function(f) if module.function(f).is_err() => {
                Err(fail(format!("reference to removed function #{}", f.0)))
            }
            Value::Const(c) if module.constant(c).is_none() => Err(fail(format!("unknown constant #{}", c.0))),
            _ => Ok(()),
        }
    };

    for block in &function.blocks {
        let Some(term) = &block.terminator else {
            return Err(fail(format!("block '{}' has no terminator", block.name)));
        };
        for target in term.successors() {
            if function.block(target).is_none() {
                return Err(fail(format!("branch to missing block {}", target.0)));
            }
        }
        for operand in term.operands() {
            check_value(operand)?;
        }

        let mut past_phis = false;
        for inst in &block.insts {
            let data = function
                .inst(*inst)
                .ok_or_else(|| fail(format!("unknown instruction %{}", inst.0)))?;
            match &data.kind {
                InstKind::Phi { .. } if past_phis => {
                    return Err(fail(format!("phi after non-phi in block '{}'", block.name)));
                }
                InstKind::Phi { .. } => {}
                InstKind::Call { callee, .. } => {
                    past_phis = true;
                    if module.function(*callee).is_err() {
                        return Err(fail(format!("call to removed function #{}", callee.0)));
                    }
                }
                _ => past_phis = true,
            }
            for operand in data.kind.operands() {
                check_value(operand)?;
            }
        }
    }
    Ok(())
}

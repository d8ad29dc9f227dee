#![forbid(unsafe_code)]

//! Compile-time evaluation: the expression is lowered into a throwaway
//! function that writes its value through an output pointer, the function
//! runs in the IR interpreter, and the written bytes are read back as a
//! backend constant.

use rain_ast::{Expr, Span};
use rain_ir::{ConstId, Constant, Endian, FuncId, Interpreter, Linkage, RtValue, Signature, Type, Value};
use tracing::debug;

use crate::error::CodegenError;
use crate::generator::Generator;
use crate::lower::FunctionLowering;

impl Generator<'_> {
    pub(crate) fn evaluate_constant(&mut self, expr: &Expr) -> Result<ConstId, CodegenError> {
        let span = expr.span;
        let ty = expr
            .ty
            .ok_or_else(|| CodegenError::compile_time("expression has no value to compute", span))?;
        let lowered = self.lower_type(ty, span)?;
        let name = self.symbol("__comptime".to_string());
        let signature = Signature {
            params: vec![Type::Ptr],
            ret: Type::Void,
        };
        let func = self.module.add_function(name, signature, Linkage::Internal);
        let result = self.run_compile_time(func, expr, &lowered);
        self.module.remove_function(func)?;
        let constant = result?;
        debug!(ty = %self.tree.display(ty), "evaluated compile-time expression");
        Ok(constant)
    }

    fn run_compile_time(&mut self, func: FuncId, expr: &Expr, ty: &Type) -> Result<ConstId, CodegenError> {
        let span = expr.span;
        let mut lowering = FunctionLowering::new(self, func, None)?;
        let value = lowering.operand(expr)?;
        let untouched = lowering.generator.module.function(func)?.insts.is_empty();
        if let (Value::Const(constant), true) = (value, untouched) {
            return Ok(constant);
        }
        lowering.store_output(value, ty, Value::Arg(0))?;
        lowering.ir().ret(None)?;
        lowering.seal()?;
        self.define_reachable(func, span)?;

        let size = self.module.size_of(ty)?;
        let align = self.module.align_of(ty)?;
        let (bytes, steps) = {
            let mut interpreter = Interpreter::new(&self.module, &self.hosts, self.limits);
            let output = interpreter
                .allocate(size, align)
                .map_err(|trap| CodegenError::trap(trap, span))?;
            interpreter
                .run(func, &[RtValue::Ptr(output)])
                .map_err(|trap| CodegenError::trap(trap, span))?;
            for global in interpreter.globals_used() {
                let global = self.module.global(global)?;
                if global.initializer.is_none() {
                    return Err(CodegenError::compile_time(
                        format!("global `{}` is read before its value is computed", global.name),
                        span,
                    ));
                }
            }
            let bytes = interpreter
                .read_bytes(output, size)
                .map_err(|trap| CodegenError::trap(trap, span))?;
            (bytes, interpreter.steps())
        };
        debug!(ty = ?ty, size, align, steps, "ran compile-time function");
        self.constant_from_bytes(ty, &bytes, span)
    }

    /// Rebuild a constant of type `ty` from its in-memory representation.
    fn constant_from_bytes(&mut self, ty: &Type, bytes: &[u8], span: Span) -> Result<ConstId, CodegenError> {
        let endian = self.module.data_layout().endian;
        let constant = match ty {
            Type::Int(bits) => {
                let width = bits.div_ceil(8) as usize;
                Constant::int(ty.clone(), read_uint(bytes, width, endian, span)? as i64)
            }
            Type::F32 => Constant::Float {
                ty: Type::F32,
                bits: read_uint(bytes, 4, endian, span)?,
            },
            Type::F64 => Constant::Float {
                ty: Type::F64,
                bits: read_uint(bytes, 8, endian, span)?,
            },
            Type::Vector(_, len) => self.aggregate_from_bytes(ty, *len as u64, bytes, span)?,
            Type::Array(_, len) => self.aggregate_from_bytes(ty, *len, bytes, span)?,
            Type::Struct(id) => {
                let count = self.module.struct_def(*id)?.fields.len() as u64;
                self.aggregate_from_bytes(ty, count, bytes, span)?
            }
            Type::Ptr => {
                return Err(CodegenError::compile_time(
                    "a pointer computed at compile time cannot be materialized",
                    span,
                ));
            }
            Type::Void => return Err(CodegenError::compile_time("expression has no value to compute", span)),
        };
        Ok(self.module.add_constant(constant))
    }

    fn aggregate_from_bytes(&mut self, ty: &Type, count: u64, bytes: &[u8], span: Span) -> Result<Constant, CodegenError> {
        let mut elements = Vec::with_capacity(count as usize);
        for index in 0..count {
            let member = self.module.member_type(ty, index as u32)?;
            let offset = self.module.offset_of(ty, index)? as usize;
            let rest = bytes
                .get(offset..)
                .ok_or_else(|| CodegenError::internal("compile-time output is truncated", span))?;
            elements.push(self.constant_from_bytes(&member, rest, span)?);
        }
        Ok(Constant::Aggregate {
            ty: ty.clone(),
            elements,
        })
    }
}

fn read_uint(bytes: &[u8], width: usize, endian: Endian, span: Span) -> Result<u64, CodegenError> {
    let raw = bytes
        .get(..width)
        .ok_or_else(|| CodegenError::internal("compile-time output is truncated", span))?;
    let fold = |acc: u64, byte: &u8| (acc << 8) | u64::from(*byte);
    Ok(match endian {
        Endian::Little => raw.iter().rev().fold(0, fold),
        Endian::Big => raw.iter().fold(0, fold),
    })
}

impl FunctionLowering<'_, '_> {
    /// Write `value` through `ptr`: scalars directly, aggregates member by
    /// member.
    fn store_output(&mut self, value: Value, ty: &Type, ptr: Value) -> Result<(), CodegenError> {
        match ty {
            Type::Struct(id) => {
                let count = self.generator.module.struct_def(*id)?.fields.len() as u32;
                self.store_members(value, ty, count, ptr, false)
            }
            Type::Array(_, len) => self.store_members(value, ty, *len as u32, ptr, false),
            Type::Vector(_, len) => self.store_members(value, ty, *len, ptr, true),
            _ => Ok(self.ir().store(value, ptr)?),
        }
    }

    fn store_members(&mut self, value: Value, ty: &Type, count: u32, ptr: Value, vector: bool) -> Result<(), CodegenError> {
        for index in 0..count {
            let member_ty = self.generator.module.member_type(ty, index)?;
            let member = if vector {
                let lane = self.ir().const_int(Type::I32, index as i64);
                self.ir().extract_element(value, lane)?
            } else {
                self.ir().extract_value(value, index)?
            };
            let address = self.ir().member_gep(ty.clone(), ptr, index)?;
            self.store_output(member, &member_ty, address)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_integers_in_target_byte_order() {
        let bytes = [0x01, 0x02, 0x03, 0x04];
        let span = rain_ast::span(0, 0);
        assert_eq!(read_uint(&bytes, 4, Endian::Little, span).expect("read"), 0x0403_0201);
        assert_eq!(read_uint(&bytes, 4, Endian::Big, span).expect("read"), 0x0102_0304);
        assert_eq!(read_uint(&bytes, 1, Endian::Little, span).expect("read"), 0x01);
        assert!(read_uint(&bytes, 8, Endian::Little, span).is_err());
    }
}

//! LLVM-flavoured textual form of a module.

use std::collections::HashMap;
use std::fmt::{self, Write as _};

use crate::module::{
    BinOp, CastOp, FloatPredicate, Function, InstKind, IntPredicate, Linkage, Module, Terminator,
};
use crate::types::Type;
use crate::value::{BlockId, ConstId, Constant, FuncId, InstId, Value, sign_extend};

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; ModuleID = '{}'", self.name)?;
        writeln!(f, "source_filename = \"{}\"", self.name)?;
        writeln!(f, "target triple = \"{}\"", self.triple())?;

        let named: Vec<_> = self
            .structs()
            .filter_map(|(_, def)| def.name.as_ref().map(|n| (n, def)))
            .collect();
        if !named.is_empty() {
            writeln!(f)?;
        }
        for (name, def) in named {
            let fields: Vec<String> = def.fields.iter().map(|t| type_name(self, t)).collect();
            writeln!(f, "%{} = type {{ {} }}", symbol(name), fields.join(", "))?;
        }

        let mut globals = self.globals().peekable();
        if globals.peek().is_some() {
            writeln!(f)?;
        }
        for (_, global) in globals {
            let linkage = match global.linkage {
                Linkage::Internal => "internal ",
                Linkage::External => "",
            };
            let kind = if global.constant { "constant" } else { "global" };
            let init = match global.initializer {
                Some(id) => const_text(self, id),
                None => "zeroinitializer".to_string(),
            };
            writeln!(
                f,
                "@{} = {linkage}{kind} {} {init}",
                symbol(&global.name),
                type_name(self, &global.ty)
            )?;
        }

        for (id, function) in self.functions() {
            writeln!(f)?;
            f.write_str(&FunctionPrinter::new(self, id, function).render())?;
        }
        Ok(())
    }
}

pub(crate) fn symbol(name: &str) -> String {
    let plain = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '$' | '-'));
    if plain {
        name.to_string()
    } else {
        format!("\"{}\"", name.replace('"', "\\22"))
    }
}

pub(crate) fn type_name(module: &Module, ty: &Type) -> String {
    match ty {
        Type::Void => "void".to_string(),
        Type::Int(bits) => format!("i{bits}"),
        Type::F32 => "float".to_string(),
        Type::F64 => "double".to_string(),
        Type::Ptr => "ptr".to_string(),
        Type::Vector(element, len) => format!("<{len} x {}>", type_name(module, element)),
        Type::Array(element, len) => format!("[{len} x {}]", type_name(module, element)),
        Type::Struct(id) => match module.struct_def(*id) {
            Ok(def) => match &def.name {
                Some(name) => format!("%{}", symbol(name)),
                None if def.fields.is_empty() => "{}".to_string(),
                None => {
                    let fields: Vec<String> = def.fields.iter().map(|t| type_name(module, t)).collect();
                    format!("{{ {} }}", fields.join(", "))
                }
            },
            Err(_) => "<invalid>".to_string(),
        },
    }
}

fn const_text(module: &Module, id: ConstId) -> String {
    let Some(constant) = module.constant(id) else {
        return "<invalid>".to_string();
    };
    match constant {
        Constant::Int { ty: Type::Int(1), value } => (*value != 0).to_string(),
        Constant::Int { ty, value } => sign_extend(ty.int_bits().unwrap_or(64), *value).to_string(),
        Constant::Float { .. } => {
            let widened = constant.as_f64().unwrap_or(0.0);
            format!("0x{:016X}", widened.to_bits())
        }
        Constant::Zero(ty) => match ty {
            Type::Int(_) => "0".to_string(),
            Type::F32 | Type::F64 => "0.0".to_string(),
            Type::Ptr => "null".to_string(),
            _ => "zeroinitializer".to_string(),
        },
        Constant::Undef(_) => "undef".to_string(),
        Constant::Null => "null".to_string(),
        Constant::Aggregate { ty, elements } => {
            let items: Vec<String> = elements
                .iter()
                .map(|e| {
                    let ty = module.constant(*e).map(Constant::ty).unwrap_or(Type::Void);
                    format!("{} {}", type_name(module, &ty), const_text(module, *e))
                })
                .collect();
            match ty {
                Type::Array(..) => format!("[{}]", items.join(", ")),
                Type::Vector(..) => format!("<{}>", items.join(", ")),
                _ => format!("{{ {} }}", items.join(", ")),
            }
        }
        Constant::GlobalAddr { global, offset } => {
            let name = module
                .global(*global)
                .map(|g| symbol(&g.name))
                .unwrap_or_else(|_| "<invalid>".to_string());
            if *offset == 0 {
                format!("@{name}")
            } else {
                format!("getelementptr (i8, ptr @{name}, i64 {offset})")
            }
        }
    }
}

fn binop_name(op: BinOp) -> &'static str {
    match op {
        BinOp::Add => "add",
        BinOp::Sub => "sub",
        BinOp::Mul => "mul",
        BinOp::SDiv => "sdiv",
        BinOp::UDiv => "udiv",
        BinOp::SRem => "srem",
        BinOp::URem => "urem",
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::Xor => "xor",
        BinOp::Shl => "shl",
        BinOp::LShr => "lshr",
        BinOp::AShr => "ashr",
        BinOp::FAdd => "fadd",
        BinOp::FSub => "fsub",
        BinOp::FMul => "fmul",
        BinOp::FDiv => "fdiv",
        BinOp::FRem => "frem",
    }
}

fn icmp_name(pred: IntPredicate) -> &'static str {
    match pred {
        IntPredicate::Eq => "eq",
        IntPredicate::Ne => "ne",
        IntPredicate::Slt => "slt",
        IntPredicate::Sle => "sle",
        IntPredicate::Sgt => "sgt",
        IntPredicate::Sge => "sge",
        IntPredicate::Ult => "ult",
        IntPredicate::Ule => "ule",
        IntPredicate::Ugt => "ugt",
        IntPredicate::Uge => "uge",
    }
}

fn fcmp_name(pred: FloatPredicate) -> &'static str {
    match pred {
        FloatPredicate::Oeq => "oeq",
        FloatPredicate::One => "one",
        FloatPredicate::Olt => "olt",
        FloatPredicate::Ole => "ole",
        FloatPredicate::Ogt => "ogt",
        FloatPredicate::Oge => "oge",
    }
}

fn cast_name(op: CastOp) -> &'static str {
    match op {
        CastOp::Trunc => "trunc",
        CastOp::ZExt => "zext",
        CastOp::SExt => "sext",
        CastOp::FpTrunc => "fptrunc",
        CastOp::FpExt => "fpext",
        CastOp::SiToFp => "sitofp",
        CastOp::UiToFp => "uitofp",
        CastOp::FpToSi => "fptosi",
        CastOp::PtrToInt => "ptrtoint",
    }
}

struct FunctionPrinter<'m> {
    module: &'m Module,
    id: FuncId,
    function: &'m Function,
    numbers: HashMap<InstId, usize>,
}

impl<'m> FunctionPrinter<'m> {
    fn new(module: &'m Module, id: FuncId, function: &'m Function) -> Self {
        let mut numbers = HashMap::new();
        for (_, inst) in function.placed_insts() {
            if function.inst(inst).is_some_and(|d| d.ty != Type::Void) {
                let next = numbers.len();
                numbers.insert(inst, next);
            }
        }
        Self {
            module,
            id,
            function,
            numbers,
        }
    }

    fn label(&self, block: BlockId) -> String {
        let name = self
            .function
            .block(block)
            .map(|b| b.name.as_str())
            .unwrap_or("invalid");
        if block.0 == 0 {
            symbol(name)
        } else {
            symbol(&format!("{name}{}", block.0))
        }
    }

    fn value(&self, value: Value) -> String {
        match value {
            Value::Inst(id) => match self.numbers.get(&id) {
                Some(n) => format!("%{n}"),
                None => "<invalid>".to_string(),
            },
            Value::Arg(i) => format!("%arg{i}"),
            Value::Const(id) => const_text(self.module, id),
            Value::Global(id) => match self.module.global(id) {
                Ok(g) => format!("@{}", symbol(&g.name)),
                Err(_) => "<invalid>".to_string(),
            },
            Value::Function(id) => match self.module.function(id) {
                Ok(f) => format!("@{}", symbol(&f.name)),
                Err(_) => "<invalid>".to_string(),
            },
        }
    }

    fn ty(&self, ty: &Type) -> String {
        type_name(self.module, ty)
    }

    fn typed(&self, value: Value) -> String {
        let ty = self
            .module
            .value_type(self.id, value)
            .map(|t| self.ty(&t))
            .unwrap_or_else(|_| "<invalid>".to_string());
        format!("{ty} {}", self.value(value))
    }

    fn render(&self) -> String {
        let f = self.function;
        let ret = self.ty(&f.signature.ret);
        let name = symbol(&f.name);
        let mut out = String::new();

        if f.is_declaration() {
            let params: Vec<String> = f.signature.params.iter().map(|t| self.ty(t)).collect();
            let _ = write!(out, "declare {ret} @{name}({})", params.join(", "));
            if let Some(import) = &f.import {
                let _ = write!(
                    out,
                    " \"wasm-import-module\"=\"{}\" \"wasm-import-name\"=\"{}\"",
                    import.module, import.name
                );
            }
            out.push('\n');
            return out;
        }

        let linkage = match f.linkage {
            Linkage::Internal => "internal ",
            Linkage::External => "",
        };
        let params: Vec<String> = f
            .signature
            .params
            .iter()
            .enumerate()
            .map(|(i, t)| format!("{} %arg{i}", self.ty(t)))
            .collect();
        let _ = writeln!(out, "define {linkage}{ret} @{name}({}) {{", params.join(", "));

        for (index, block) in f.blocks.iter().enumerate() {
            if index > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "{}:", self.label(BlockId(index as u32)));
            for inst in &block.insts {
                let _ = writeln!(out, "  {}", self.inst(*inst));
            }
            match &block.terminator {
                Some(term) => {
                    let _ = writeln!(out, "  {}", self.terminator(term));
                }
                None => out.push_str("  ; missing terminator\n"),
            }
        }
        out.push_str("}\n");
        out
    }

    fn inst(&self, id: InstId) -> String {
        let Some(data) = self.function.inst(id) else {
            return "<invalid>".to_string();
        };
        let body = match &data.kind {
            InstKind::Binary { op, lhs, rhs } => {
                format!("{} {}, {}", binop_name(*op), self.typed(*lhs), self.value(*rhs))
            }
            InstKind::ICmp { pred, lhs, rhs } => {
                format!("icmp {} {}, {}", icmp_name(*pred), self.typed(*lhs), self.value(*rhs))
            }
            InstKind::FCmp { pred, lhs, rhs } => {
                format!("fcmp {} {}, {}", fcmp_name(*pred), self.typed(*lhs), self.value(*rhs))
            }
            InstKind::Cast { op, value } => {
                format!("{} {} to {}", cast_name(*op), self.typed(*value), self.ty(&data.ty))
            }
            InstKind::Alloca { ty } => format!("alloca {}", self.ty(ty)),
            InstKind::Load { ptr } => format!("load {}, {}", self.ty(&data.ty), self.typed(*ptr)),
            InstKind::Store { value, ptr } => format!("store {}, {}", self.typed(*value), self.typed(*ptr)),
            InstKind::Gep { base, ptr, indices } => {
                let mut text = format!("getelementptr {}, {}", self.ty(base), self.typed(*ptr));
                for index in indices {
                    let _ = write!(text, ", {}", self.typed(*index));
                }
                text
            }
            InstKind::ExtractValue { aggregate, index } => {
                format!("extractvalue {}, {index}", self.typed(*aggregate))
            }
            InstKind::InsertValue {
                aggregate,
                value,
                index,
            } => format!(
                "insertvalue {}, {}, {index}",
                self.typed(*aggregate),
                self.typed(*value)
            ),
            InstKind::ExtractElement { vector, index } => {
                format!("extractelement {}, {}", self.typed(*vector), self.typed(*index))
            }
            InstKind::InsertElement { vector, value, index } => format!(
                "insertelement {}, {}, {}",
                self.typed(*vector),
                self.typed(*value),
                self.typed(*index)
            ),
            InstKind::Call { callee, args } => {
                let args: Vec<String> = args.iter().map(|a| self.typed(*a)).collect();
                format!(
                    "call {} {}({})",
                    self.ty(&data.ty),
                    self.value(Value::Function(*callee)),
                    args.join(", ")
                )
            }
            InstKind::Phi { incoming } => {
                let edges: Vec<String> = incoming
                    .iter()
                    .map(|(v, b)| format!("[ {}, %{} ]", self.value(*v), self.label(*b)))
                    .collect();
                format!("phi {} {}", self.ty(&data.ty), edges.join(", "))
            }
        };
        match self.numbers.get(&id) {
            Some(n) => format!("%{n} = {body}"),
            None => body,
        }
    }

    fn terminator(&self, term: &Terminator) -> String {
        match term {
            Terminator::Br(target) => format!("br label %{}", self.label(*target)),
            Terminator::CondBr {
                cond,
                then_block,
                else_block,
            } => format!(
                "br {}, label %{}, label %{}",
                self.typed(*cond),
                self.label(*then_block),
                self.label(*else_block)
            ),
            Terminator::Ret(Some(v)) => format!("ret {}", self.typed(*v)),
            Terminator::Ret(None) => "ret void".to_string(),
            Terminator::Unreachable => "unreachable".to_string(),
        }
    }
}

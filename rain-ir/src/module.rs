use std::collections::HashMap;

use target_lexicon::Triple;

use crate::error::IrError;
use crate::layout::DataLayout;
use crate::types::{StructDef, StructId, Type};
use crate::value::{BlockId, ConstId, Constant, FuncId, GlobalId, InstId, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Linkage {
    Internal,
    External,
}

/// Host import attributes (`wasm-import-module` / `wasm-import-name`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Import {
    pub module: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<Type>,
    pub ret: Type,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    SDiv,
    UDiv,
    SRem,
    URem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

impl BinOp {
    pub fn is_float(self) -> bool {
        matches!(self, BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv | BinOp::FRem)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IntPredicate {
    Eq,
    Ne,
    Slt,
    Sle,
    Sgt,
    Sge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FloatPredicate {
    Oeq,
    One,
    Olt,
    Ole,
    Ogt,
    Oge,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    FpTrunc,
    FpExt,
    SiToFp,
    UiToFp,
    FpToSi,
    PtrToInt,
}

#[derive(Clone, Debug, PartialEq)]
pub enum InstKind {
    Binary { op: BinOp, lhs: Value, rhs: Value },
    ICmp { pred: IntPredicate, lhs: Value, rhs: Value },
    FCmp { pred: FloatPredicate, lhs: Value, rhs: Value },
    Cast { op: CastOp, value: Value },
    Alloca { ty: Type },
    Load { ptr: Value },
    Store { value: Value, ptr: Value },
    Gep { base: Type, ptr: Value, indices: Vec<Value> },
    ExtractValue { aggregate: Value, index: u32 },
    InsertValue { aggregate: Value, value: Value, index: u32 },
    ExtractElement { vector: Value, index: Value },
    InsertElement { vector: Value, value: Value, index: Value },
    Call { callee: FuncId, args: Vec<Value> },
    Phi { incoming: Vec<(Value, BlockId)> },
}

impl InstKind {
    pub fn operands(&self) -> Vec<Value> {
        match self {
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::ICmp { lhs, rhs, .. }
            | InstKind::FCmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            InstKind::Cast { value, .. } => vec![*value],
            InstKind::Alloca { .. } => Vec::new(),
            InstKind::Load { ptr } => vec![*ptr],
            InstKind::Store { value, ptr } => vec![*value, *ptr],
            InstKind::Gep { ptr, indices, .. } => {
                let mut out = vec![*ptr];
                out.extend(indices.iter().copied());
                out
            }
            InstKind::ExtractValue { aggregate, .. } => vec![*aggregate],
            InstKind::InsertValue { aggregate, value, .. } => vec![*aggregate, *value],
            InstKind::ExtractElement { vector, index } => vec![*vector, *index],
            InstKind::InsertElement { vector, value, index } => vec![*vector, *value, *index],
            InstKind::Call { args, .. } => args.clone(),
            InstKind::Phi { incoming } => incoming.iter().map(|(v, _)| *v).collect(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Value> {
        match self {
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::ICmp { lhs, rhs, .. }
            | InstKind::FCmp { lhs, rhs, .. } => vec![lhs, rhs],
            InstKind::Cast { value, .. } => vec![value],
            InstKind::Alloca { .. } => Vec::new(),
            InstKind::Load { ptr } => vec![ptr],
            InstKind::Store { value, ptr } => vec![value, ptr],
            InstKind::Gep { ptr, indices, .. } => {
                let mut out = vec![ptr];
                out.extend(indices.iter_mut());
                out
            }
            InstKind::ExtractValue { aggregate, .. } => vec![aggregate],
            InstKind::InsertValue { aggregate, value, .. } => vec![aggregate, value],
            InstKind::ExtractElement { vector, index } => vec![vector, index],
            InstKind::InsertElement { vector, value, index } => vec![vector, value, index],
            InstKind::Call { args, .. } => args.iter_mut().collect(),
            InstKind::Phi { incoming } => incoming.iter_mut().map(|(v, _)| v).collect(),
        }
    }

    pub fn has_side_effects(&self) -> bool {
        matches!(self, InstKind::Store { .. } | InstKind::Call { .. })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct InstData {
    pub kind: InstKind,
    /// Result type; `Void` for stores and void calls.
    pub ty: Type,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Terminator {
    Br(BlockId),
    CondBr {
        cond: Value,
        then_block: BlockId,
        else_block: BlockId,
    },
    Ret(Option<Value>),
    Unreachable,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Br(target) => vec![*target],
            Terminator::CondBr {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Ret(_) | Terminator::Unreachable => Vec::new(),
        }
    }

    pub fn operands(&self) -> Vec<Value> {
        match self {
            Terminator::CondBr { cond, .. } => vec![*cond],
            Terminator::Ret(Some(v)) => vec![*v],
            _ => Vec::new(),
        }
    }

    pub fn operands_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Terminator::CondBr { cond, .. } => vec![cond],
            Terminator::Ret(Some(v)) => vec![v],
            _ => Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BlockData {
    pub name: String,
    pub insts: Vec<InstId>,
    pub terminator: Option<Terminator>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub name: String,
    pub signature: Signature,
    pub linkage: Linkage,
    pub import: Option<Import>,
    pub blocks: Vec<BlockData>,
    pub insts: Vec<InstData>,
}

impl Function {
    pub fn new(name: impl Into<String>, signature: Signature, linkage: Linkage) -> Self {
        Self {
            name: name.into(),
            signature,
            linkage,
            import: None,
            blocks: Vec::new(),
            insts: Vec::new(),
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn entry(&self) -> Option<BlockId> {
        (!self.blocks.is_empty()).then_some(BlockId(0))
    }

    pub fn block(&self, id: BlockId) -> Option<&BlockData> {
        self.blocks.get(id.index())
    }

    pub fn inst(&self, id: InstId) -> Option<&InstData> {
        self.insts.get(id.index())
    }

    /// Every instruction in block order.
    pub fn placed_insts(&self) -> impl Iterator<Item = (BlockId, InstId)> + '_ {
        self.blocks.iter().enumerate().flat_map(|(b, block)| {
            block
                .insts
                .iter()
                .map(move |&inst| (BlockId(b as u32), inst))
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Global {
    pub name: String,
    pub ty: Type,
    pub initializer: Option<ConstId>,
    pub constant: bool,
    pub linkage: Linkage,
}

#[derive(Clone, Debug)]
pub struct Module {
    pub name: String,
    triple: Triple,
    layout: DataLayout,
    structs: Vec<StructDef>,
    anonymous_structs: HashMap<Vec<Type>, StructId>,
    constants: Vec<Constant>,
    constant_ids: HashMap<Constant, ConstId>,
    functions: Vec<Option<Function>>,
    globals: Vec<Global>,
}

impl Module {
    pub fn new(name: impl Into<String>, triple: Triple) -> Result<Self, IrError> {
        let layout = DataLayout::for_triple(&triple)?;
        Ok(Self {
            name: name.into(),
            triple,
            layout,
            structs: Vec::new(),
            anonymous_structs: HashMap::new(),
            constants: Vec::new(),
            constant_ids: HashMap::new(),
            functions: Vec::new(),
            globals: Vec::new(),
        })
    }

    pub fn triple(&self) -> &Triple {
        &self.triple
    }

    pub fn data_layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn named_struct(&mut self, name: impl Into<String>, fields: Vec<Type>) -> Type {
        let id = StructId(self.structs.len() as u32);
        self.structs.push(StructDef {
            name: Some(name.into()),
            fields,
        });
        Type::Struct(id)
    }

    pub fn anonymous_struct(&mut self, fields: Vec<Type>) -> Type {
        if let Some(id) = self.anonymous_structs.get(&fields) {
            return Type::Struct(*id);
        }
        let id = StructId(self.structs.len() as u32);
        self.structs.push(StructDef {
            name: None,
            fields: fields.clone(),
        });
        self.anonymous_structs.insert(fields, id);
        Type::Struct(id)
    }

    pub fn struct_def(&self, id: StructId) -> Result<&StructDef, IrError> {
        self.structs
            .get(id.0 as usize)
            .ok_or_else(|| IrError::builder(format!("unknown struct #{}", id.0)))
    }

    pub fn structs(&self) -> impl Iterator<Item = (StructId, &StructDef)> {
        self.structs
            .iter()
            .enumerate()
            .map(|(i, s)| (StructId(i as u32), s))
    }

    /// Type of the `index`-th member of a struct, array or vector type.
    pub fn member_type(&self, ty: &Type, index: u32) -> Result<Type, IrError> {
        match ty {
            Type::Struct(id) => self
                .struct_def(*id)?
                .fields
                .get(index as usize)
                .cloned()
                .ok_or_else(|| IrError::builder(format!("struct field {index} out of range"))),
            Type::Array(element, _) | Type::Vector(element, _) => Ok((**element).clone()),
            other => Err(IrError::builder(format!("{other:?} is not an aggregate"))),
        }
    }

    pub fn add_constant(&mut self, constant: Constant) -> ConstId {
        if let Some(id) = self.constant_ids.get(&constant) {
            return *id;
        }
        let id = ConstId(self.constants.len() as u32);
        self.constants.push(constant.clone());
        self.constant_ids.insert(constant, id);
        id
    }

    pub fn constant(&self, id: ConstId) -> Option<&Constant> {
        self.constants.get(id.index())
    }

    pub fn const_value(&mut self, constant: Constant) -> Value {
        Value::Const(self.add_constant(constant))
    }

    pub fn const_int(&mut self, ty: Type, value: i64) -> Value {
        self.const_value(Constant::int(ty, value))
    }

    /// Constant behind a value, if it is one.
    pub fn value_constant(&self, value: Value) -> Option<&Constant> {
        match value {
            Value::Const(id) => self.constant(id),
            _ => None,
        }
    }

    pub fn add_function(&mut self, name: impl Into<String>, signature: Signature, linkage: Linkage) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(Some(Function::new(name, signature, linkage)));
        id
    }

    pub fn function(&self, id: FuncId) -> Result<&Function, IrError> {
        self.functions
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or_else(|| IrError::builder(format!("unknown function #{}", id.0)))
    }

    pub fn function_mut(&mut self, id: FuncId) -> Result<&mut Function, IrError> {
        self.functions
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or_else(|| IrError::builder(format!("unknown function #{}", id.0)))
    }

    pub fn functions(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .filter_map(|(i, f)| f.as_ref().map(|f| (FuncId(i as u32), f)))
    }

    pub fn function_ids(&self) -> Vec<FuncId> {
        self.functions().map(|(id, _)| id).collect()
    }

    pub fn find_function(&self, name: &str) -> Option<FuncId> {
        self.functions()
            .find(|(_, f)| f.name == name)
            .map(|(id, _)| id)
    }

    /// Erase a function. Its id is never reused.
    pub fn remove_function(&mut self, id: FuncId) -> Result<Function, IrError> {
        self.functions
            .get_mut(id.index())
            .and_then(Option::take)
            .ok_or_else(|| IrError::builder(format!("unknown function #{}", id.0)))
    }

    pub fn append_block(&mut self, func: FuncId, name: impl Into<String>) -> Result<BlockId, IrError> {
        let function = self.function_mut(func)?;
        let id = BlockId(function.blocks.len() as u32);
        function.blocks.push(BlockData {
            name: name.into(),
            insts: Vec::new(),
            terminator: None,
        });
        Ok(id)
    }

    pub fn add_global(
        &mut self,
        name: impl Into<String>,
        ty: Type,
        initializer: Option<ConstId>,
        constant: bool,
    ) -> GlobalId {
        let id = GlobalId(self.globals.len() as u32);
        self.globals.push(Global {
            name: name.into(),
            ty,
            initializer,
            constant,
            linkage: Linkage::Internal,
        });
        id
    }

    pub fn global(&self, id: GlobalId) -> Result<&Global, IrError> {
        self.globals
            .get(id.index())
            .ok_or_else(|| IrError::builder(format!("unknown global #{}", id.0)))
    }

    pub fn global_mut(&mut self, id: GlobalId) -> Result<&mut Global, IrError> {
        self.globals
            .get_mut(id.index())
            .ok_or_else(|| IrError::builder(format!("unknown global #{}", id.0)))
    }

    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &Global)> {
        self.globals
            .iter()
            .enumerate()
            .map(|(i, g)| (GlobalId(i as u32), g))
    }

    pub fn value_type(&self, func: FuncId, value: Value) -> Result<Type, IrError> {
        match value {
            Value::Inst(id) => self
                .function(func)?
                .inst(id)
                .map(|inst| inst.ty.clone())
                .ok_or_else(|| IrError::builder(format!("unknown instruction %{}", id.0))),
            Value::Arg(index) => self
                .function(func)?
                .signature
                .params
                .get(index as usize)
                .cloned()
                .ok_or_else(|| IrError::builder(format!("argument {index} out of range"))),
            Value::Const(id) => self
                .constant(id)
                .map(Constant::ty)
                .ok_or_else(|| IrError::builder(format!("unknown constant #{}", id.0))),
            Value::Global(_) | Value::Function(_) => Ok(Type::Ptr),
        }
    }
}

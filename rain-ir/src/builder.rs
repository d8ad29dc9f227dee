use crate::error::IrError;
use crate::module::{
    BinOp, CastOp, FloatPredicate, InstData, InstKind, IntPredicate, Module, Terminator,
};
use crate::types::Type;
use crate::value::{BlockId, Constant, FuncId, InstId, Value};

/// Insertion point: the end of one block of one function.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Cursor {
    position: Option<(FuncId, BlockId)>,
}

impl Cursor {
    pub fn at(func: FuncId, block: BlockId) -> Self {
        Self {
            position: Some((func, block)),
        }
    }

    pub fn function(&self) -> Option<FuncId> {
        self.position.map(|(f, _)| f)
    }

    pub fn block(&self) -> Option<BlockId> {
        self.position.map(|(_, b)| b)
    }
}

/// Instruction builder borrowing a module and a cursor for the duration
/// of a few calls.
pub struct Builder<'a> {
    module: &'a mut Module,
    cursor: &'a mut Cursor,
}

impl<'a> Builder<'a> {
    pub fn new(module: &'a mut Module, cursor: &'a mut Cursor) -> Self {
        Self { module, cursor }
    }

    pub fn module(&mut self) -> &mut Module {
        self.module
    }

    fn position(&self) -> Result<(FuncId, BlockId), IrError> {
        self.cursor
            .position
            .ok_or_else(|| IrError::builder("builder has no insertion point"))
    }

    pub fn function(&self) -> Result<FuncId, IrError> {
        Ok(self.position()?.0)
    }

    pub fn current_block(&self) -> Result<BlockId, IrError> {
        Ok(self.position()?.1)
    }

    pub fn position_at_end(&mut self, block: BlockId) -> Result<(), IrError> {
        let func = self.function()?;
        *self.cursor = Cursor::at(func, block);
        Ok(())
    }

    pub fn append_block(&mut self, name: &str) -> Result<BlockId, IrError> {
        let func = self.function()?;
        self.module.append_block(func, name)
    }

    pub fn is_terminated(&self) -> Result<bool, IrError> {
        let (func, block) = self.position()?;
        let function = self.module.function(func)?;
        Ok(function
            .block(block)
            .is_some_and(|b| b.terminator.is_some()))
    }

    pub fn value_type(&self, value: Value) -> Result<Type, IrError> {
        self.module.value_type(self.function()?, value)
    }

    pub fn const_int(&mut self, ty: Type, value: i64) -> Value {
        self.module.const_int(ty, value)
    }

    pub fn const_value(&mut self, constant: Constant) -> Value {
        self.module.const_value(constant)
    }

    fn insert(&mut self, kind: InstKind, ty: Type) -> Result<Value, IrError> {
        let (func, block) = self.position()?;
        let function = self.module.function_mut(func)?;
        let id = InstId(function.insts.len() as u32);
        let data = function
            .blocks
            .get_mut(block.index())
            .ok_or_else(|| IrError::builder(format!("unknown block {}", block.0)))?;
        if data.terminator.is_some() {
            return Err(IrError::builder(format!(
                "block '{}' already has a terminator",
                data.name
            )));
        }
        data.insts.push(id);
        function.insts.push(InstData { kind, ty });
        Ok(Value::Inst(id))
    }

    fn terminate(&mut self, terminator: Terminator) -> Result<(), IrError> {
        let (func, block) = self.position()?;
        let data = self
            .module
            .function_mut(func)?
            .blocks
            .get_mut(block.index())
            .ok_or_else(|| IrError::builder(format!("unknown block {}", block.0)))?;
        if data.terminator.is_some() {
            return Err(IrError::builder(format!(
                "block '{}' already has a terminator",
                data.name
            )));
        }
        data.terminator = Some(terminator);
        Ok(())
    }

    pub fn binary(&mut self, op: BinOp, lhs: Value, rhs: Value) -> Result<Value, IrError> {
        let ty = self.value_type(lhs)?;
        let rhs_ty = self.value_type(rhs)?;
        if ty != rhs_ty {
            return Err(IrError::builder(format!(
                "{op:?} operands differ: {ty:?} vs {rhs_ty:?}"
            )));
        }
        if op.is_float() != ty.scalar().is_float() {
            return Err(IrError::builder(format!("{op:?} applied to {ty:?}")));
        }
        self.insert(InstKind::Binary { op, lhs, rhs }, ty)
    }

    pub fn icmp(&mut self, pred: IntPredicate, lhs: Value, rhs: Value) -> Result<Value, IrError> {
        self.insert(InstKind::ICmp { pred, lhs, rhs }, Type::I1)
    }

    pub fn fcmp(&mut self, pred: FloatPredicate, lhs: Value, rhs: Value) -> Result<Value, IrError> {
        self.insert(InstKind::FCmp { pred, lhs, rhs }, Type::I1)
    }

    pub fn cast(&mut self, op: CastOp, value: Value, to: Type) -> Result<Value, IrError> {
        self.insert(InstKind::Cast { op, value }, to)
    }

    pub fn alloca(&mut self, ty: Type) -> Result<Value, IrError> {
        self.insert(InstKind::Alloca { ty }, Type::Ptr)
    }

    pub fn load(&mut self, ty: Type, ptr: Value) -> Result<Value, IrError> {
        self.insert(InstKind::Load { ptr }, ty)
    }

    pub fn store(&mut self, value: Value, ptr: Value) -> Result<(), IrError> {
        self.insert(InstKind::Store { value, ptr }, Type::Void)?;
        Ok(())
    }

    pub fn gep(&mut self, base: Type, ptr: Value, indices: Vec<Value>) -> Result<Value, IrError> {
        self.insert(InstKind::Gep { base, ptr, indices }, Type::Ptr)
    }

    /// Address of member `index` of the aggregate `base` stored at `ptr`.
    pub fn member_gep(&mut self, base: Type, ptr: Value, index: u32) -> Result<Value, IrError> {
        let zero = self.const_int(Type::I32, 0);
        let field = self.const_int(Type::I32, index as i64);
        self.gep(base, ptr, vec![zero, field])
    }

    pub fn extract_value(&mut self, aggregate: Value, index: u32) -> Result<Value, IrError> {
        let ty = self.value_type(aggregate)?;
        let member = self.module.member_type(&ty, index)?;
        self.insert(InstKind::ExtractValue { aggregate, index }, member)
    }

    pub fn insert_value(&mut self, aggregate: Value, value: Value, index: u32) -> Result<Value, IrError> {
        let ty = self.value_type(aggregate)?;
        self.insert(
            InstKind::InsertValue {
                aggregate,
                value,
                index,
            },
            ty,
        )
    }

    pub fn extract_element(&mut self, vector: Value, index: Value) -> Result<Value, IrError> {
        let element = match self.value_type(vector)? {
            Type::Vector(element, _) => *element,
            other => return Err(IrError::builder(format!("extractelement from {other:?}"))),
        };
        self.insert(InstKind::ExtractElement { vector, index }, element)
    }

    pub fn insert_element(&mut self, vector: Value, value: Value, index: Value) -> Result<Value, IrError> {
        let ty = self.value_type(vector)?;
        self.insert(InstKind::InsertElement { vector, value, index }, ty)
    }

    /// Direct call; void calls still yield a (void-typed) value.
    pub fn call(&mut self, callee: FuncId, args: Vec<Value>) -> Result<Value, IrError> {
        let signature = self.module.function(callee)?.signature.clone();
        if signature.params.len() != args.len() {
            return Err(IrError::builder(format!(
                "call to '{}' with {} arguments, expected {}",
                self.module.function(callee)?.name,
                args.len(),
                signature.params.len()
            )));
        }
        self.insert(InstKind::Call { callee, args }, signature.ret)
    }

    pub fn phi(&mut self, ty: Type, incoming: Vec<(Value, BlockId)>) -> Result<Value, IrError> {
        self.insert(InstKind::Phi { incoming }, ty)
    }

    /// Add an edge to an existing phi, for loops whose back-edge value is
    /// built after the phi.
    pub fn add_incoming(&mut self, phi: Value, value: Value, block: BlockId) -> Result<(), IrError> {
        let func = self.function()?;
        let Value::Inst(id) = phi else {
            return Err(IrError::builder("add_incoming on a non-instruction"));
        };
        match self
            .module
            .function_mut(func)?
            .insts
            .get_mut(id.index())
            .map(|d| &mut d.kind)
        {
            Some(InstKind::Phi { incoming }) => {
                incoming.push((value, block));
                Ok(())
            }
            _ => Err(IrError::builder(format!("%{} is not a phi", id.0))),
        }
    }

    pub fn br(&mut self, target: BlockId) -> Result<(), IrError> {
        self.terminate(Terminator::Br(target))
    }

    pub fn cond_br(&mut self, cond: Value, then_block: BlockId, else_block: BlockId) -> Result<(), IrError> {
        self.terminate(Terminator::CondBr {
            cond,
            then_block,
            else_block,
        })
    }

    pub fn ret(&mut self, value: Option<Value>) -> Result<(), IrError> {
        self.terminate(Terminator::Ret(value))
    }

    pub fn unreachable(&mut self) -> Result<(), IrError> {
        self.terminate(Terminator::Unreachable)
    }
}

//! Reference interpreter over a flat byte memory.
//!
//! The compiler runs compile-time expressions through this engine: the
//! caller allocates a scratch buffer, passes its address to a function and
//! reads the bytes back. Declarations resolve to registered host functions.

use std::collections::HashMap;
use std::fmt;

use miette::Diagnostic;
use thiserror::Error;

use crate::arith;
use crate::error::IrError;
use crate::layout::Endian;
use crate::module::{Function, InstData, InstKind, Module, Terminator};
use crate::types::Type;
use crate::value::{BlockId, ConstId, Constant, FuncId, GlobalId, InstId, Value, mask, sign_extend};

#[derive(Clone, Debug, PartialEq)]
pub enum RtValue {
    Int { bits: u32, value: u64 },
    F32(f32),
    F64(f64),
    Ptr(u64),
    /// Struct, array or vector contents.
    Aggregate(Vec<RtValue>),
    Void,
}

impl RtValue {
    pub fn int(bits: u32, value: i64) -> Self {
        RtValue::Int {
            bits,
            value: mask(bits, value as u64),
        }
    }

    pub fn bool(value: bool) -> Self {
        RtValue::Int {
            bits: 1,
            value: value as u64,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            RtValue::Int { value, .. } | RtValue::Ptr(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            RtValue::Int { bits, value } => Some(sign_extend(*bits, *value)),
            RtValue::Ptr(p) => Some(*p as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            RtValue::F32(v) => Some(*v as f64),
            RtValue::F64(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Error, Diagnostic)]
pub enum Trap {
    #[error("evaluation exceeded its budget of {0} steps")]
    #[diagnostic(code(rain::ir::trap::fuel))]
    OutOfFuel(u64),

    #[error("evaluation exceeded its memory budget of {0} bytes")]
    #[diagnostic(code(rain::ir::trap::memory))]
    OutOfMemory(u64),

    #[error("call depth exceeded {0}")]
    #[diagnostic(code(rain::ir::trap::stack))]
    StackOverflow(u32),

    #[error("memory access out of bounds at {addr:#x} (+{len})")]
    #[diagnostic(code(rain::ir::trap::bounds))]
    OutOfBounds { addr: u64, len: u64 },

    #[error("integer division by zero")]
    #[diagnostic(code(rain::ir::trap::div_zero))]
    DivisionByZero,

    #[error("reached unreachable code")]
    #[diagnostic(code(rain::ir::trap::unreachable))]
    Unreachable,

    #[error("call to unresolved external function '{0}'")]
    #[diagnostic(code(rain::ir::trap::external))]
    UnresolvedExternal(String),

    #[error("host function '{name}' failed: {message}")]
    #[diagnostic(code(rain::ir::trap::host))]
    Host { name: String, message: String },

    #[error("malformed IR: {0}")]
    #[diagnostic(code(rain::ir::trap::malformed))]
    Malformed(String),
}

impl From<IrError> for Trap {
    fn from(err: IrError) -> Self {
        Trap::Malformed(err.to_string())
    }
}

pub type HostFn = Box<dyn Fn(&[RtValue]) -> Result<RtValue, Trap>>;

/// Host implementations for declared functions, keyed by symbol name.
#[derive(Default)]
pub struct HostFunctions {
    functions: HashMap<String, HostFn>,
}

impl HostFunctions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        f: impl Fn(&[RtValue]) -> Result<RtValue, Trap> + 'static,
    ) {
        self.functions.insert(name.into(), Box::new(f));
    }

    pub fn get(&self, name: &str) -> Option<&HostFn> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }
}

impl fmt::Debug for HostFunctions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("HostFunctions").field("functions", &names).finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InterpreterLimits {
    pub fuel: u64,
    pub memory: u64,
    pub call_depth: u32,
}

impl Default for InterpreterLimits {
    fn default() -> Self {
        Self {
            fuel: 1_000_000,
            memory: 1 << 20,
            call_depth: 256,
        }
    }
}

/// Addresses below this are never handed out, so null stays invalid.
const RESERVED: u64 = 16;

struct Memory {
    bytes: Vec<u8>,
    limit: u64,
    endian: Endian,
}

impl Memory {
    fn allocate(&mut self, size: u64, align: u64) -> Result<u64, Trap> {
        let top = (self.bytes.len() as u64).max(RESERVED);
        let start = top.div_ceil(align.max(1)) * align.max(1);
        let end = start + size.max(1);
        if end > self.limit {
            return Err(Trap::OutOfMemory(self.limit));
        }
        self.bytes.resize(end as usize, 0);
        Ok(start)
    }

    fn range(&self, addr: u64, len: u64) -> Result<std::ops::Range<usize>, Trap> {
        let end = addr.checked_add(len).ok_or(Trap::OutOfBounds { addr, len })?;
        if addr < RESERVED || end > self.bytes.len() as u64 {
            return Err(Trap::OutOfBounds { addr, len });
        }
        Ok(addr as usize..end as usize)
    }

    fn read(&self, addr: u64, len: u64) -> Result<&[u8], Trap> {
        let range = self.range(addr, len)?;
        Ok(&self.bytes[range])
    }

    fn write(&mut self, addr: u64, data: &[u8]) -> Result<(), Trap> {
        let range = self.range(addr, data.len() as u64)?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    fn read_uint(&self, addr: u64, len: u64) -> Result<u64, Trap> {
        let bytes = self.read(addr, len)?;
        let mut out = 0u64;
        match self.endian {
            Endian::Little => {
                for b in bytes.iter().rev() {
                    out = (out << 8) | *b as u64;
                }
            }
            Endian::Big => {
                for b in bytes {
                    out = (out << 8) | *b as u64;
                }
            }
        }
        Ok(out)
    }

    fn write_uint(&mut self, addr: u64, len: u64, value: u64) -> Result<(), Trap> {
        let mut bytes: Vec<u8> = (0..len).map(|i| (value >> (8 * i)) as u8).collect();
        if self.endian == Endian::Big {
            bytes.reverse();
        }
        self.write(addr, &bytes)
    }
}

struct Frame {
    func: FuncId,
    args: Vec<RtValue>,
    values: Vec<Option<RtValue>>,
}

pub struct Interpreter<'m> {
    module: &'m Module,
    hosts: &'m HostFunctions,
    limits: InterpreterLimits,
    memory: Memory,
    steps: u64,
    depth: u32,
    globals: HashMap<GlobalId, u64>,
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module, hosts: &'m HostFunctions, limits: InterpreterLimits) -> Self {
        Self {
            module,
            hosts,
            limits,
            memory: Memory {
                bytes: Vec::new(),
                limit: limits.memory,
                endian: module.data_layout().endian,
            },
            steps: 0,
            depth: 0,
            globals: HashMap::new(),
        }
    }

    /// Instructions executed so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Globals laid out so far, in id order.
    pub fn globals_used(&self) -> Vec<GlobalId> {
        let mut used: Vec<GlobalId> = self.globals.keys().copied().collect();
        used.sort();
        used
    }

    /// Reserve a zero-filled buffer.
    pub fn allocate(&mut self, size: u64, align: u64) -> Result<u64, Trap> {
        self.memory.allocate(size, align)
    }

    pub fn read_bytes(&self, addr: u64, len: u64) -> Result<Vec<u8>, Trap> {
        Ok(self.memory.read(addr, len)?.to_vec())
    }

    pub fn write_bytes(&mut self, addr: u64, data: &[u8]) -> Result<(), Trap> {
        self.memory.write(addr, data)
    }

    pub fn run(&mut self, func: FuncId, args: &[RtValue]) -> Result<RtValue, Trap> {
        self.call(func, args.to_vec())
    }

    fn call(&mut self, func: FuncId, args: Vec<RtValue>) -> Result<RtValue, Trap> {
        let module = self.module;
        let function = module.function(func)?;
        if function.is_declaration() {
            let host = self
                .hosts
                .get(&function.name)
                .ok_or_else(|| Trap::UnresolvedExternal(function.name.clone()))?;
            return host(&args);
        }
        if self.depth >= self.limits.call_depth {
            return Err(Trap::StackOverflow(self.limits.call_depth));
        }
        self.depth += 1;
        let result = self.exec(func, function, args);
        self.depth -= 1;
        result
    }

    fn tick(&mut self) -> Result<(), Trap> {
        self.steps += 1;
        if self.steps > self.limits.fuel {
            return Err(Trap::OutOfFuel(self.limits.fuel));
        }
        Ok(())
    }

    fn exec(&mut self, func: FuncId, function: &'m Function, args: Vec<RtValue>) -> Result<RtValue, Trap> {
        let mut frame = Frame {
            func,
            args,
            values: vec![None; function.insts.len()],
        };
        let mut block = BlockId(0);
        let mut prev: Option<BlockId> = None;
        loop {
            let data = function
                .block(block)
                .ok_or_else(|| Trap::Malformed(format!("missing block {}", block.0)))?;

            // Phis read their inputs before any of them is written.
            let mut incoming = Vec::new();
            let mut body_start = 0;
            for (i, inst_id) in data.insts.iter().enumerate() {
                let inst = inst_of(function, *inst_id)?;
                let InstKind::Phi { incoming: edges } = &inst.kind else {
                    break;
                };
                let from = prev.ok_or_else(|| Trap::Malformed("phi in entry block".to_string()))?;
                let (value, _) = edges
                    .iter()
                    .find(|(_, pred)| *pred == from)
                    .ok_or_else(|| Trap::Malformed(format!("phi has no edge from block {}", from.0)))?;
                incoming.push((*inst_id, self.operand(&frame, *value)?));
                body_start = i + 1;
            }
            for (id, value) in incoming {
                frame.values[id.index()] = Some(value);
            }

            for inst_id in &data.insts[body_start..] {
                self.tick()?;
                let value = self.exec_inst(&frame, *inst_id, function)?;
                frame.values[inst_id.index()] = Some(value);
            }

            self.tick()?;
            let terminator = data
                .terminator
                .as_ref()
                .ok_or_else(|| Trap::Malformed(format!("block '{}' is not terminated", data.name)))?;
            match terminator {
                Terminator::Br(target) => {
                    prev = Some(block);
                    block = *target;
                }
                Terminator::CondBr {
                    cond,
                    then_block,
                    else_block,
                } => {
                    let taken = self
                        .operand(&frame, *cond)?
                        .as_u64()
                        .ok_or_else(|| Trap::Malformed("non-integer branch condition".to_string()))?
                        != 0;
                    prev = Some(block);
                    block = if taken { *then_block } else { *else_block };
                }
                Terminator::Ret(value) => {
                    return match value {
                        Some(v) => self.operand(&frame, *v),
                        None => Ok(RtValue::Void),
                    };
                }
                Terminator::Unreachable => return Err(Trap::Unreachable),
            }
        }
    }

    fn exec_inst(&mut self, frame: &Frame, id: InstId, function: &'m Function) -> Result<RtValue, Trap> {
        let module = self.module;
        let inst = inst_of(function, id)?;
        match &inst.kind {
            InstKind::Binary { op, lhs, rhs } => {
                let (a, b) = (self.operand(frame, *lhs)?, self.operand(frame, *rhs)?);
                arith::binary(*op, &a, &b)
            }
            InstKind::ICmp { pred, lhs, rhs } => {
                let (a, b) = (self.operand(frame, *lhs)?, self.operand(frame, *rhs)?);
                arith::icmp(*pred, &a, &b)
            }
            InstKind::FCmp { pred, lhs, rhs } => {
                let (a, b) = (self.operand(frame, *lhs)?, self.operand(frame, *rhs)?);
                arith::fcmp(*pred, &a, &b)
            }
            InstKind::Cast { op, value } => {
                let v = self.operand(frame, *value)?;
                arith::cast(*op, &v, &inst.ty)
            }
            InstKind::Alloca { ty } => {
                let addr = self.memory.allocate(module.size_of(ty)?, module.align_of(ty)?)?;
                Ok(RtValue::Ptr(addr))
            }
            InstKind::Load { ptr } => {
                let addr = self.address(frame, *ptr)?;
                self.load(&inst.ty, addr)
            }
            InstKind::Store { value, ptr } => {
                let ty = module.value_type(frame.func, *value)?;
                let v = self.operand(frame, *value)?;
                let addr = self.address(frame, *ptr)?;
                self.store(&ty, &v, addr)?;
                Ok(RtValue::Void)
            }
            InstKind::Gep { base, ptr, indices } => {
                let mut addr = self.address(frame, *ptr)?;
                let mut current = base.clone();
                for (i, index) in indices.iter().enumerate() {
                    let idx = self
                        .operand(frame, *index)?
                        .as_i64()
                        .ok_or_else(|| Trap::Malformed("non-integer gep index".to_string()))?;
                    if i == 0 {
                        let stride = module.size_of(&current)? as i64;
                        addr = addr.wrapping_add_signed(idx.wrapping_mul(stride));
                        continue;
                    }
                    let offset = module.offset_of(&current, idx as u64)?;
                    addr = addr.wrapping_add(offset);
                    current = module.member_type(&current, idx as u32)?;
                }
                Ok(RtValue::Ptr(addr))
            }
            InstKind::ExtractValue { aggregate, index } => {
                match self.operand(frame, *aggregate)? {
                    RtValue::Aggregate(mut items) if (*index as usize) < items.len() => {
                        Ok(items.swap_remove(*index as usize))
                    }
                    other => Err(Trap::Malformed(format!("extractvalue {index} from {other:?}"))),
                }
            }
            InstKind::InsertValue {
                aggregate,
                value,
                index,
            } => {
                let v = self.operand(frame, *value)?;
                match self.operand(frame, *aggregate)? {
                    RtValue::Aggregate(mut items) if (*index as usize) < items.len() => {
                        items[*index as usize] = v;
                        Ok(RtValue::Aggregate(items))
                    }
                    other => Err(Trap::Malformed(format!("insertvalue {index} into {other:?}"))),
                }
            }
            InstKind::ExtractElement { vector, index } => {
                let idx = self.index(frame, *index)?;
                match self.operand(frame, *vector)? {
                    RtValue::Aggregate(mut items) if idx < items.len() => Ok(items.swap_remove(idx)),
                    other => Err(Trap::Malformed(format!("extractelement {idx} from {other:?}"))),
                }
            }
            InstKind::InsertElement { vector, value, index } => {
                let idx = self.index(frame, *index)?;
                let v = self.operand(frame, *value)?;
                match self.operand(frame, *vector)? {
                    RtValue::Aggregate(mut items) if idx < items.len() => {
                        items[idx] = v;
                        Ok(RtValue::Aggregate(items))
                    }
                    other => Err(Trap::Malformed(format!("insertelement {idx} into {other:?}"))),
                }
            }
            InstKind::Call { callee, args } => {
                let values = args
                    .iter()
                    .map(|a| self.operand(frame, *a))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(*callee, values)
            }
            InstKind::Phi { .. } => Err(Trap::Malformed("phi after non-phi instruction".to_string())),
        }
    }

    fn index(&mut self, frame: &Frame, value: Value) -> Result<usize, Trap> {
        self.operand(frame, value)?
            .as_u64()
            .map(|v| v as usize)
            .ok_or_else(|| Trap::Malformed("non-integer element index".to_string()))
    }

    fn address(&mut self, frame: &Frame, value: Value) -> Result<u64, Trap> {
        match self.operand(frame, value)? {
            RtValue::Ptr(p) => Ok(p),
            other => Err(Trap::Malformed(format!("expected pointer, found {other:?}"))),
        }
    }

    fn operand(&mut self, frame: &Frame, value: Value) -> Result<RtValue, Trap> {
        match value {
            Value::Inst(id) => frame
                .values
                .get(id.index())
                .cloned()
                .flatten()
                .ok_or_else(|| Trap::Malformed(format!("use of undefined value %{}", id.0))),
            Value::Arg(i) => frame
                .args
                .get(i as usize)
                .cloned()
                .ok_or_else(|| Trap::Malformed(format!("missing argument {i}"))),
            Value::Const(id) => self.constant(id),
            Value::Global(g) => Ok(RtValue::Ptr(self.global_address(g)?)),
            // Functions are only called directly; their address is opaque.
            Value::Function(f) => Ok(RtValue::Ptr(u64::MAX - f.0 as u64)),
        }
    }

    fn constant(&mut self, id: ConstId) -> Result<RtValue, Trap> {
        let module = self.module;
        let constant = module
            .constant(id)
            .ok_or_else(|| Trap::Malformed(format!("unknown constant #{}", id.0)))?;
        Ok(match constant {
            Constant::Int { ty, value } => RtValue::Int {
                bits: ty.int_bits().unwrap_or(64),
                value: *value,
            },
            Constant::Float { ty: Type::F32, bits } => RtValue::F32(f32::from_bits(*bits as u32)),
            Constant::Float { bits, .. } => RtValue::F64(f64::from_bits(*bits)),
            Constant::Zero(ty) | Constant::Undef(ty) => self.zero(ty)?,
            Constant::Aggregate { elements, .. } => RtValue::Aggregate(
                elements
                    .iter()
                    .map(|e| self.constant(*e))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Constant::GlobalAddr { global, offset } => RtValue::Ptr(self.global_address(*global)? + offset),
            Constant::Null => RtValue::Ptr(0),
        })
    }

    fn zero(&self, ty: &Type) -> Result<RtValue, Trap> {
        Ok(match ty {
            Type::Int(bits) => RtValue::Int { bits: *bits, value: 0 },
            Type::F32 => RtValue::F32(0.0),
            Type::F64 => RtValue::F64(0.0),
            Type::Ptr => RtValue::Ptr(0),
            Type::Void => RtValue::Void,
            Type::Vector(element, len) => RtValue::Aggregate(vec![self.zero(element)?; *len as usize]),
            Type::Array(element, len) => RtValue::Aggregate(vec![self.zero(element)?; *len as usize]),
            Type::Struct(id) => RtValue::Aggregate(
                self.module
                    .struct_def(*id)?
                    .fields
                    .iter()
                    .map(|f| self.zero(f))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        })
    }

    /// Globals are laid out in memory on first use.
    fn global_address(&mut self, id: GlobalId) -> Result<u64, Trap> {
        if let Some(addr) = self.globals.get(&id) {
            return Ok(*addr);
        }
        let module = self.module;
        let global = module.global(id)?;
        let addr = self
            .memory
            .allocate(module.size_of(&global.ty)?, module.align_of(&global.ty)?)?;
        self.globals.insert(id, addr);
        if let Some(init) = global.initializer {
            let value = self.constant(init)?;
            self.store(&global.ty, &value, addr)?;
        }
        Ok(addr)
    }

    pub fn load(&mut self, ty: &Type, addr: u64) -> Result<RtValue, Trap> {
        let module = self.module;
        Ok(match ty {
            Type::Int(bits) => {
                let len = (*bits as u64).div_ceil(8);
                RtValue::Int {
                    bits: *bits,
                    value: mask(*bits, self.memory.read_uint(addr, len)?),
                }
            }
            Type::F32 => RtValue::F32(f32::from_bits(self.memory.read_uint(addr, 4)? as u32)),
            Type::F64 => RtValue::F64(f64::from_bits(self.memory.read_uint(addr, 8)?)),
            Type::Ptr => RtValue::Ptr(self.memory.read_uint(addr, module.data_layout().pointer_bytes)?),
            Type::Vector(_, len) => self.load_members(ty, *len as u64, addr)?,
            Type::Array(_, len) => self.load_members(ty, *len, addr)?,
            Type::Struct(id) => {
                let count = module.struct_def(*id)?.fields.len() as u64;
                self.load_members(ty, count, addr)?
            }
            Type::Void => return Err(Trap::Malformed("load of void".to_string())),
        })
    }

    fn load_members(&mut self, ty: &Type, count: u64, addr: u64) -> Result<RtValue, Trap> {
        let module = self.module;
        let mut items = Vec::with_capacity(count as usize);
        for i in 0..count {
            let member = module.member_type(ty, i as u32)?;
            items.push(self.load(&member, addr + module.offset_of(ty, i)?)?);
        }
        Ok(RtValue::Aggregate(items))
    }

    pub fn store(&mut self, ty: &Type, value: &RtValue, addr: u64) -> Result<(), Trap> {
        let module = self.module;
        match (ty, value) {
            (Type::Int(bits), RtValue::Int { value, .. }) => {
                let len = (*bits as u64).div_ceil(8);
                self.memory.write_uint(addr, len, mask(*bits, *value))
            }
            (Type::F32, RtValue::F32(v)) => self.memory.write_uint(addr, 4, v.to_bits() as u64),
            (Type::F64, RtValue::F64(v)) => self.memory.write_uint(addr, 8, v.to_bits()),
            (Type::Ptr, RtValue::Ptr(p)) => {
                self.memory
                    .write_uint(addr, module.data_layout().pointer_bytes, *p)
            }
            (Type::Vector(..) | Type::Array(..) | Type::Struct(_), RtValue::Aggregate(items)) => {
                for (i, item) in items.iter().enumerate() {
                    let member = module.member_type(ty, i as u32)?;
                    self.store(&member, item, addr + module.offset_of(ty, i as u64)?)?;
                }
                Ok(())
            }
            (ty, value) => Err(Trap::Malformed(format!("cannot store {value:?} as {ty:?}"))),
        }
    }
}

fn inst_of(function: &Function, id: InstId) -> Result<&InstData, Trap> {
    function
        .inst(id)
        .ok_or_else(|| Trap::Malformed(format!("unknown instruction %{}", id.0)))
}

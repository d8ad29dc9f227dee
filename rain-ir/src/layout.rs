use target_lexicon::{Endianness, Triple};

use crate::error::IrError;
use crate::module::Module;
use crate::types::Type;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endian {
    Little,
    Big,
}

/// Size, alignment and endianness rules for one target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataLayout {
    pub pointer_bytes: u64,
    pub endian: Endian,
}

impl DataLayout {
    pub fn for_triple(triple: &Triple) -> Result<Self, IrError> {
        let pointer_bytes = triple
            .pointer_width()
            .map_err(|()| IrError::Layout(format!("unknown pointer width for target '{triple}'")))?
            .bytes() as u64;
        let endian = match triple.endianness() {
            Ok(Endianness::Big) => Endian::Big,
            Ok(Endianness::Little) => Endian::Little,
            Err(()) => {
                return Err(IrError::Layout(format!("unknown endianness for target '{triple}'")));
            }
        };
        Ok(Self { pointer_bytes, endian })
    }

    /// Allocation size: the distance between consecutive array elements.
    pub fn size_of(&self, module: &Module, ty: &Type) -> Result<u64, IrError> {
        Ok(match ty {
            Type::Void => return Err(IrError::Layout("void has no size".to_string())),
            Type::Int(bits) => align_to((*bits as u64).div_ceil(8), self.align_of(module, ty)?),
            Type::F32 => 4,
            Type::F64 => 8,
            Type::Ptr => self.pointer_bytes,
            Type::Vector(element, len) => {
                let raw = self.size_of(module, element)? * *len as u64;
                align_to(raw, self.align_of(module, ty)?)
            }
            Type::Array(element, len) => self.size_of(module, element)? * len,
            Type::Struct(id) => {
                let def = module.struct_def(*id)?;
                let mut offset = 0;
                for field in &def.fields {
                    offset = align_to(offset, self.align_of(module, field)?);
                    offset += self.size_of(module, field)?;
                }
                align_to(offset, self.align_of(module, ty)?)
            }
        })
    }

    pub fn align_of(&self, module: &Module, ty: &Type) -> Result<u64, IrError> {
        Ok(match ty {
            Type::Void => return Err(IrError::Layout("void has no alignment".to_string())),
            Type::Int(bits) => (*bits as u64).div_ceil(8).next_power_of_two().min(8),
            Type::F32 => 4,
            Type::F64 => 8,
            Type::Ptr => self.pointer_bytes,
            Type::Vector(element, len) => (self.size_of(module, element)? * *len as u64).next_power_of_two(),
            Type::Array(element, _) => self.align_of(module, element)?,
            Type::Struct(id) => {
                let def = module.struct_def(*id)?;
                let mut align = 1;
                for field in &def.fields {
                    align = align.max(self.align_of(module, field)?);
                }
                align
            }
        })
    }

    /// Byte offset of the `index`-th member of an aggregate.
    pub fn offset_of(&self, module: &Module, ty: &Type, index: u64) -> Result<u64, IrError> {
        match ty {
            Type::Array(element, _) | Type::Vector(element, _) => Ok(self.size_of(module, element)? * index),
            Type::Struct(id) => {
                let def = module.struct_def(*id)?;
                if index as usize >= def.fields.len() {
                    return Err(IrError::Layout(format!("struct field {index} out of range")));
                }
                let mut offset = 0;
                for (i, field) in def.fields.iter().enumerate() {
                    offset = align_to(offset, self.align_of(module, field)?);
                    if i as u64 == index {
                        break;
                    }
                    offset += self.size_of(module, field)?;
                }
                Ok(offset)
            }
            other => Err(IrError::Layout(format!("{other:?} has no members"))),
        }
    }
}

fn align_to(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

impl Module {
    pub fn size_of(&self, ty: &Type) -> Result<u64, IrError> {
        self.data_layout().size_of(self, ty)
    }

    pub fn align_of(&self, ty: &Type) -> Result<u64, IrError> {
        self.data_layout().align_of(self, ty)
    }

    pub fn offset_of(&self, ty: &Type, index: u64) -> Result<u64, IrError> {
        self.data_layout().offset_of(self, ty, index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wasm32() -> Module {
        Module::new("layout", "wasm32-unknown-unknown".parse().unwrap()).unwrap()
    }

    #[test]
    fn struct_fields_are_padded_to_alignment() {
        let mut m = wasm32();
        let ty = m.anonymous_struct(vec![Type::I8, Type::I32, Type::I1]);
        assert_eq!(m.offset_of(&ty, 1).unwrap(), 4);
        assert_eq!(m.offset_of(&ty, 2).unwrap(), 8);
        assert_eq!(m.size_of(&ty).unwrap(), 12);
        assert_eq!(m.align_of(&ty).unwrap(), 4);
    }

    #[test]
    fn pointer_width_follows_target() {
        let m32 = wasm32();
        let m64 = Module::new("layout", "x86_64-unknown-linux-gnu".parse().unwrap()).unwrap();
        assert_eq!(m32.size_of(&Type::Ptr).unwrap(), 4);
        assert_eq!(m64.size_of(&Type::Ptr).unwrap(), 8);
    }

    #[test]
    fn four_float_vector_is_sixteen_byte_aligned() {
        let m = wasm32();
        let ty = Type::vector(Type::F32, 4);
        assert_eq!(m.size_of(&ty).unwrap(), 16);
        assert_eq!(m.align_of(&ty).unwrap(), 16);
        assert_eq!(m.offset_of(&ty, 3).unwrap(), 12);
    }
}

//! The machine type algebra.
//!
//! Machine types are structural everywhere except structs, which are
//! nominal: two struct types are the same type exactly when they name the
//! same symbol. `type_check` is the contract check used throughout IR
//! construction; a mismatch is a compiler bug and panics.
//!
//! The word-sized `uint`/`int`/`float` aliases resolve against the
//! program's configured word size, so the same lowering code targets 32 and
//! 64 bit machines.

use std::rc::Rc;

use crate::config::WordSize;
use crate::core::{CoreModule, NecroType};
use crate::mach::ast::{MachProgram, MachSymbolId};
use crate::mach::error::MachError;

/// A nominal struct type.
#[derive(Debug, PartialEq, Eq)]
pub struct StructType {
    pub symbol: MachSymbolId,
    pub members: Vec<MachType>,
    /// For a sum-type variant, the symbol of the parent sum struct.
    pub sum_parent: Option<MachSymbolId>,
}

/// A function type.
#[derive(Debug, PartialEq, Eq)]
pub struct FnType {
    pub ret: MachType,
    pub params: Vec<MachType>,
}

/// A machine type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachType {
    U1,
    U8,
    U16,
    U32,
    U64,
    I32,
    I64,
    F32,
    F64,
    Char,
    Void,
    Ptr(Rc<MachType>),
    Array { elem: Rc<MachType>, len: usize },
    Struct(Rc<StructType>),
    Fn(Rc<FnType>),
}

impl MachType {
    pub fn ptr(elem: MachType) -> MachType {
        MachType::Ptr(Rc::new(elem))
    }

    pub fn array(elem: MachType, len: usize) -> MachType {
        MachType::Array {
            elem: Rc::new(elem),
            len,
        }
    }

    pub fn strukt(symbol: MachSymbolId, members: Vec<MachType>) -> MachType {
        MachType::Struct(Rc::new(StructType {
            symbol,
            members,
            sum_parent: None,
        }))
    }

    pub fn variant_strukt(
        symbol: MachSymbolId,
        members: Vec<MachType>,
        sum_parent: MachSymbolId,
    ) -> MachType {
        MachType::Struct(Rc::new(StructType {
            symbol,
            members,
            sum_parent: Some(sum_parent),
        }))
    }

    pub fn func(ret: MachType, params: Vec<MachType>) -> MachType {
        MachType::Fn(Rc::new(FnType { ret, params }))
    }

    pub fn is_ptr(&self) -> bool {
        matches!(self, MachType::Ptr(_))
    }

    /// The pointee of a pointer type. Panics on non-pointers; callers hold
    /// the pointer invariant.
    pub fn pointee(&self) -> &MachType {
        match self {
            MachType::Ptr(elem) => elem,
            other => panic!("expected pointer type, found {:?}", other),
        }
    }

    /// The struct payload of a struct type.
    pub fn as_struct(&self) -> Option<&StructType> {
        match self {
            MachType::Struct(s) => Some(s),
            _ => None,
        }
    }

    /// The function payload of a function type.
    pub fn as_fn(&self) -> Option<&FnType> {
        match self {
            MachType::Fn(f) => Some(f),
            _ => None,
        }
    }

    pub fn expect_fn(&self) -> &FnType {
        self.as_fn()
            .unwrap_or_else(|| panic!("expected function type, found {:?}", self))
    }

    fn is_int_like(&self) -> bool {
        matches!(
            self,
            MachType::U1
                | MachType::U8
                | MachType::U16
                | MachType::U32
                | MachType::U64
                | MachType::I32
                | MachType::I64
        )
    }
}

/// Structural equality; structs compare by symbol identity.
pub fn type_is_eq(a: &MachType, b: &MachType) -> bool {
    match (a, b) {
        (MachType::Ptr(ae), MachType::Ptr(be)) => type_is_eq(ae, be),
        (
            MachType::Array { elem: ae, len: al },
            MachType::Array { elem: be, len: bl },
        ) => al == bl && type_is_eq(ae, be),
        (MachType::Struct(a), MachType::Struct(b)) => a.symbol == b.symbol,
        (MachType::Fn(a), MachType::Fn(b)) => {
            a.params.len() == b.params.len()
                && a.params
                    .iter()
                    .zip(b.params.iter())
                    .all(|(x, y)| type_is_eq(x, y))
                && type_is_eq(&a.ret, &b.ret)
        }
        _ => std::mem::discriminant(a) == std::mem::discriminant(b),
    }
}

/// Assert two types are the same type.
///
/// This is the construction-time contract check: a failure means a pass
/// built ill-typed IR, which is a compiler bug.
#[track_caller]
pub fn type_check(a: &MachType, b: &MachType) {
    assert!(
        type_is_eq(a, b),
        "machine type mismatch: {:?} vs {:?}",
        a,
        b
    );
}

/// Assert `ty` is usable in integer arithmetic.
#[track_caller]
pub fn type_check_is_int(ty: &MachType) {
    assert!(ty.is_int_like(), "expected integer type, found {:?}", ty);
}

/// Assert `ty` is a float type.
#[track_caller]
pub fn type_check_is_float(ty: &MachType) {
    assert!(
        matches!(ty, MachType::F32 | MachType::F64),
        "expected float type, found {:?}",
        ty
    );
}

impl MachProgram {
    /// The word-sized unsigned integer type.
    pub fn word_uint_type(&self) -> MachType {
        match self.word_size {
            WordSize::FourBytes => MachType::U32,
            WordSize::EightBytes => MachType::U64,
        }
    }

    /// The word-sized signed integer type.
    pub fn word_int_type(&self) -> MachType {
        match self.word_size {
            WordSize::FourBytes => MachType::I32,
            WordSize::EightBytes => MachType::I64,
        }
    }

    /// The word-sized float type.
    pub fn word_float_type(&self) -> MachType {
        match self.word_size {
            WordSize::FourBytes => MachType::F32,
            WordSize::EightBytes => MachType::F64,
        }
    }

    /// Whether `ty` passes by value in registers (the word-sized scalars).
    pub fn is_unboxed(&self, ty: &MachType) -> bool {
        type_is_eq(ty, &self.word_uint_type())
            || type_is_eq(ty, &self.word_int_type())
            || type_is_eq(ty, &self.word_float_type())
    }

    pub fn is_word_uint(&self, ty: &MachType) -> bool {
        type_is_eq(ty, &self.word_uint_type())
    }

    /// Pointer-wrap any boxed (non word-scalar) type.
    pub fn make_ptr_if_boxed(&self, ty: &MachType) -> MachType {
        if self.is_unboxed(ty) {
            ty.clone()
        } else {
            MachType::ptr(ty.clone())
        }
    }

    /// Size of a value of `ty` in bytes.
    ///
    /// Struct members each occupy a whole number of words, matching the
    /// slot-based layout the runtime's collector walks.
    pub fn size_in_bytes(&self, ty: &MachType) -> usize {
        let word = self.word_size.bytes();
        let round_up = |n: usize| n.div_ceil(word) * word;
        match ty {
            MachType::Void => 0,
            MachType::U1 | MachType::U8 | MachType::Char => 1,
            MachType::U16 => 2,
            MachType::U32 | MachType::I32 | MachType::F32 => 4,
            MachType::U64 | MachType::I64 | MachType::F64 => 8,
            MachType::Ptr(_) | MachType::Fn(_) => word,
            MachType::Array { elem, len } => round_up(self.size_in_bytes(elem)) * len,
            MachType::Struct(s) => s
                .members
                .iter()
                .map(|m| round_up(self.size_in_bytes(m)))
                .sum(),
        }
    }

    /// Translate a source type to a machine type.
    ///
    /// The source type must be monomorphic with every constructor fully
    /// applied; anything else means the input violated the frontend
    /// contract and the conversion fails.
    pub fn mach_type_from_necro(
        &self,
        module: &CoreModule,
        ty: &NecroType,
    ) -> Result<MachType, MachError> {
        match ty.strip_for_all() {
            NecroType::Fun { .. } => self.mach_fn_type_from_necro(module, ty),
            NecroType::Con { symbol } => {
                let mach_symbol = self.mach_symbol_of_core(*symbol).ok_or_else(|| {
                    MachError::UnresolvedSymbol(self.core_symbol_name(module, *symbol))
                })?;
                self.symbols[mach_symbol].mach_type.clone().ok_or_else(|| {
                    MachError::UnresolvedSymbol(self.core_symbol_name(module, *symbol))
                })
            }
            NecroType::Var { .. } | NecroType::ForAll { .. } => Err(MachError::PolymorphicType(
                format!("{:?}", ty),
            )),
        }
    }

    /// Translate an arrow type to a machine function type; boxed arguments
    /// and results become pointers.
    pub fn mach_fn_type_from_necro(
        &self,
        module: &CoreModule,
        ty: &NecroType,
    ) -> Result<MachType, MachError> {
        let mut params = Vec::new();
        let mut cursor = ty.strip_for_all();
        while let NecroType::Fun { arg, result } = cursor {
            let param = self.mach_type_from_necro(module, arg)?;
            params.push(self.make_ptr_if_boxed(&param));
            cursor = result.strip_for_all();
        }
        let ret = self.mach_type_from_necro(module, cursor)?;
        Ok(MachType::func(self.make_ptr_if_boxed(&ret), params))
    }
}

//! The Mach IR data model.
//!
//! Mach is an LLVM-like, block-structured, typed machine IR with infinite
//! registers, specialized for programs whose main is called in cycles:
//! every source binding becomes a *machine definition* that owns a
//! persistent state record and a `mk`/`init`/`update` function triple.
//!
//! The C-style "one big tagged union" node splits here into the natural
//! Rust shapes: [`MachValue`] operands, [`MachInstr`] block statements,
//! [`Block`]/[`Terminator`], and the definition structs ([`StructDef`],
//! [`FnDef`], [`MachDef`]). Everything is owned by the [`MachProgram`] (or
//! by a definition the program owns) and cross-referenced with arena ids.

use std::collections::HashMap;

use crate::arena::{Arena, Id};
use crate::config::CompilerConfig;
use crate::core::{CoreSymbolId, NecroType, StateType};
use crate::intern::{Intern, Symbol};
use crate::mach::runtime::{Intrinsic, MachRuntime};
use crate::mach::types::MachType;

pub type MachSymbolId = Id<MachSymbol>;
pub type FnId = Id<FnDef>;
pub type DefId = Id<MachDef>;
pub type BlockId = Id<Block>;

/// What a machine symbol is bound to, if anything.
///
/// This is the dispatch point for variable lowering: a symbol may name a
/// machine definition, a function, or a plain value (locals, parameters,
/// runtime-owned globals).
#[derive(Debug, Clone, Default)]
pub enum SymbolBinding {
    #[default]
    None,
    Def(DefId),
    Fn(FnId),
    Value(MachValue),
}

/// A globally unique handle for a named machine-level entity.
#[derive(Debug, Clone)]
pub struct MachSymbol {
    pub name: Symbol,
    pub mach_type: Option<MachType>,
    pub necro_type: Option<NecroType>,
    pub state_type: StateType,
    pub is_enum: bool,
    pub is_constructor: bool,
    pub is_primitive: bool,
    /// Index of a constructor within its sum type.
    pub con_num: usize,
    /// Math primitive this symbol lowers to, if any.
    pub intrinsic: Option<Intrinsic>,
    pub binding: SymbolBinding,
}

impl MachSymbol {
    fn new(name: Symbol) -> Self {
        MachSymbol {
            name,
            mach_type: None,
            necro_type: None,
            state_type: StateType::Poly,
            is_enum: false,
            is_constructor: false,
            is_primitive: false,
            con_num: 0,
            intrinsic: None,
            binding: SymbolBinding::None,
        }
    }
}

/// An operand in the IR. Every value carries its machine type.
#[derive(Debug, Clone, PartialEq)]
pub struct MachValue {
    pub kind: MachValueKind,
    pub ty: MachType,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MachValueKind {
    /// The sentinel result of a void call.
    Void,
    Reg { symbol: MachSymbolId },
    Param { fn_symbol: MachSymbolId, index: usize },
    Global { symbol: MachSymbolId },
    U1(bool),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    NullPtr,
    Undefined,
}

impl MachValue {
    pub fn void() -> Self {
        MachValue {
            kind: MachValueKind::Void,
            ty: MachType::Void,
        }
    }

    pub fn u1(v: bool) -> Self {
        MachValue {
            kind: MachValueKind::U1(v),
            ty: MachType::U1,
        }
    }

    pub fn u32(v: u32) -> Self {
        MachValue {
            kind: MachValueKind::U32(v),
            ty: MachType::U32,
        }
    }

    pub fn null(ptr_ty: MachType) -> Self {
        debug_assert!(ptr_ty.is_ptr());
        MachValue {
            kind: MachValueKind::NullPtr,
            ty: ptr_ty,
        }
    }

    pub fn undefined(ty: MachType) -> Self {
        MachValue {
            kind: MachValueKind::Undefined,
            ty,
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self.kind, MachValueKind::Void)
    }
}

/// Integer, float and bitwise binary operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    IAdd,
    ISub,
    IMul,
    IDiv,
    UAdd,
    USub,
    UMul,
    UDiv,
    FAdd,
    FSub,
    FMul,
    FDiv,
    And,
    Or,
    Shl,
    Shr,
}

impl BinOp {
    pub fn is_float_op(self) -> bool {
        matches!(self, BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv)
    }
}

/// Unary operations: sign/abs and numeric conversions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UOp {
    IAbs,
    UAbs,
    FAbs,
    ISgn,
    USgn,
    FSgn,
    IToI,
    IToU,
    IToF,
    UToI,
    FTrI,
    FRnI,
    FToF,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// Calling convention of a call site: user-language or runtime C.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Lang,
    C,
}

/// A non-terminator statement in a block.
#[derive(Debug, Clone)]
pub enum MachInstr {
    Gep {
        source: MachValue,
        indices: Vec<u32>,
        dest: MachValue,
    },
    BitCast {
        from: MachValue,
        dest: MachValue,
    },
    ZExt {
        from: MachValue,
        dest: MachValue,
    },
    Load {
        source: MachValue,
        dest: MachValue,
    },
    Store {
        value: MachValue,
        dest: MachValue,
    },
    MemCpy {
        dest: MachValue,
        source: MachValue,
        bytes: MachValue,
    },
    MemSet {
        ptr: MachValue,
        value: MachValue,
        bytes: MachValue,
    },
    InsertValue {
        aggregate: MachValue,
        element: MachValue,
        index: usize,
        dest: MachValue,
    },
    ExtractValue {
        aggregate: MachValue,
        index: usize,
        dest: MachValue,
    },
    BinOp {
        op: BinOp,
        left: MachValue,
        right: MachValue,
        dest: MachValue,
    },
    UOp {
        op: UOp,
        operand: MachValue,
        dest: MachValue,
    },
    Cmp {
        op: CmpOp,
        left: MachValue,
        right: MachValue,
        dest: MachValue,
    },
    Phi {
        incoming: Vec<(BlockId, MachValue)>,
        dest: MachValue,
    },
    Call {
        callee: MachValue,
        args: Vec<MachValue>,
        call_kind: CallKind,
        dest: MachValue,
    },
    CallIntrinsic {
        intrinsic: Intrinsic,
        args: Vec<MachValue>,
        dest: MachValue,
    },
}

/// The single exit of a block.
#[derive(Debug, Clone)]
pub enum Terminator {
    Return(MachValue),
    ReturnVoid,
    Break(BlockId),
    CondBreak {
        cond: MachValue,
        true_block: BlockId,
        false_block: BlockId,
    },
    Switch {
        value: MachValue,
        cases: Vec<(u64, BlockId)>,
        else_block: BlockId,
    },
    Unreachable,
}

/// A basic block: named, an ordered statement list, one terminator.
#[derive(Debug, Clone)]
pub struct Block {
    pub symbol: MachSymbolId,
    pub statements: Vec<MachInstr>,
    pub terminator: Option<Terminator>,
}

/// Whether a function is defined in-language or provided by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FnKind {
    Lang,
    RuntimeC,
}

/// A function definition.
///
/// Blocks live in a per-function arena; `order` is the textual layout and
/// `current` the builders' cursor. Runtime functions carry no blocks.
#[derive(Debug, Clone)]
pub struct FnDef {
    pub symbol: MachSymbolId,
    pub kind: FnKind,
    pub ty: MachType,
    pub blocks: Arena<Block>,
    pub order: Vec<BlockId>,
    pub current: Option<BlockId>,
    pub state_type: StateType,
    pub fn_value: MachValue,
}

impl FnDef {
    /// Create a language function with an empty `entry` block.
    pub fn new(program: &mut MachProgram, symbol: MachSymbolId, ty: MachType) -> FnDef {
        debug_assert!(ty.as_fn().is_some());
        let fn_value = MachValue {
            kind: MachValueKind::Global { symbol },
            ty: ty.clone(),
        };
        let mut blocks = Arena::new();
        let entry_symbol = program.gen_symbol("entry");
        let entry = blocks.alloc(Block {
            symbol: entry_symbol,
            statements: Vec::new(),
            terminator: None,
        });
        program.symbols[symbol].mach_type = Some(ty.clone());
        FnDef {
            symbol,
            kind: FnKind::Lang,
            ty,
            blocks,
            order: vec![entry],
            current: Some(entry),
            state_type: StateType::Constant,
            fn_value,
        }
    }

    /// Create a runtime-provided C function (declaration only).
    pub fn new_runtime(program: &mut MachProgram, symbol: MachSymbolId, ty: MachType) -> FnDef {
        debug_assert!(ty.as_fn().is_some());
        let fn_value = MachValue {
            kind: MachValueKind::Global { symbol },
            ty: ty.clone(),
        };
        program.symbols[symbol].mach_type = Some(ty.clone());
        FnDef {
            symbol,
            kind: FnKind::RuntimeC,
            ty,
            blocks: Arena::new(),
            order: Vec::new(),
            current: None,
            state_type: StateType::Pointwise,
            fn_value,
        }
    }

    pub fn entry_block(&self) -> BlockId {
        self.order[0]
    }

    /// The value of the `index`-th parameter.
    pub fn param_value(&self, index: usize) -> MachValue {
        let fn_type = self.ty.expect_fn();
        assert!(
            index < fn_type.params.len(),
            "parameter index {} out of range for function with {} parameters",
            index,
            fn_type.params.len()
        );
        MachValue {
            kind: MachValueKind::Param {
                fn_symbol: self.symbol,
                index,
            },
            ty: fn_type.params[index].clone(),
        }
    }
}

/// A named struct definition.
#[derive(Debug, Clone)]
pub struct StructDef {
    pub symbol: MachSymbolId,
    pub ty: MachType,
}

/// The owner of a persistent slot.
#[derive(Debug, Clone, Copy)]
pub enum SlotOwner {
    Def(DefId),
    Constructor(MachSymbolId),
}

/// One persistent slot in a machine's state record.
#[derive(Debug, Clone)]
pub struct Slot {
    pub ty: MachType,
    pub owner: SlotOwner,
}

/// A machine definition: a source binding turned into a stateful object.
///
/// `members` is the persistent state layout discovered by state analysis;
/// `mk_fn`/`init_fn` exist exactly when `members` is non-empty. For
/// top-level argless bindings `global_value` holds the cell `necro_main`
/// publishes each tick's output into, and `global_state` the live state
/// pointer.
#[derive(Debug, Clone)]
pub struct MachDef {
    pub symbol: MachSymbolId,
    pub machine_name: MachSymbolId,
    pub state_name: MachSymbolId,
    /// The machine's state struct type; forward-declared empty, finalized
    /// at the end of state discovery.
    pub state_struct: Option<MachType>,
    /// The type the binding evaluates to each tick (boxed types become
    /// pointers at use sites).
    pub value_type: MachType,
    pub necro_value_type: Option<NecroType>,
    /// Set iff the binding takes arguments.
    pub fn_type: Option<MachType>,
    pub arg_names: Vec<MachSymbolId>,
    pub members: Vec<Slot>,
    pub mk_fn: Option<FnDef>,
    pub init_fn: Option<FnDef>,
    pub update_fn: Option<FnDef>,
    pub global_value: Option<MachValue>,
    pub global_state: Option<MachValue>,
    pub state_type: StateType,
    /// For a nested stateful binding, the slot in the enclosing machine's
    /// state where its per-tick value persists.
    pub persistent_slot: Option<usize>,
    /// The enclosing machine for nested bindings.
    pub outer: Option<DefId>,
}

impl MachDef {
    pub fn uses_state(&self) -> bool {
        !self.members.is_empty()
    }

    pub fn num_args(&self) -> usize {
        self.arg_names.len()
    }

    pub fn is_persistent_slot_set(&self) -> bool {
        self.persistent_slot.is_some()
    }
}

/// A reference to an emitted phi, for adding incoming edges arm by arm.
#[derive(Debug, Clone, Copy)]
pub struct PhiRef {
    pub block: BlockId,
    pub index: usize,
}

/// The complete Mach program: the sole mutable state of a compilation,
/// threaded explicitly through every pass.
#[derive(Debug)]
pub struct MachProgram {
    pub structs: Vec<StructDef>,
    pub functions: Arena<FnDef>,
    pub machine_defs: Arena<MachDef>,
    pub globals: Vec<MachValue>,
    pub necro_main: Option<FnDef>,
    pub word_size: crate::config::WordSize,
    pub tick_ms: u32,
    pub symbols: Arena<MachSymbol>,
    pub intern: Intern,
    pub runtime: MachRuntime,
    /// The machine def of the user-visible `main :: World -> World`.
    pub program_main: Option<DefId>,
    core_to_mach: HashMap<CoreSymbolId, MachSymbolId>,
    name_counts: HashMap<String, u64>,
}

impl MachProgram {
    pub fn new(intern: Intern, config: &CompilerConfig) -> Self {
        let mut program = MachProgram {
            structs: Vec::new(),
            functions: Arena::new(),
            machine_defs: Arena::new(),
            globals: Vec::new(),
            necro_main: None,
            word_size: config.word_size,
            tick_ms: config.tick_ms,
            symbols: Arena::new(),
            intern,
            runtime: MachRuntime::default(),
            program_main: None,
            core_to_mach: HashMap::new(),
            name_counts: HashMap::new(),
        };
        program.runtime = MachRuntime::declare(&mut program);
        program
    }

    /// Create a fresh symbol with a generated, program-unique name.
    ///
    /// The first use of a base name keeps it bare; later uses get a
    /// monotonic `_N` suffix, so register and block names stay readable
    /// and reproducible.
    pub fn gen_symbol(&mut self, base: &str) -> MachSymbolId {
        let count = self.name_counts.entry(base.to_string()).or_insert(0);
        let name = if *count == 0 {
            base.to_string()
        } else {
            format!("{}_{}", base, *count)
        };
        *count += 1;
        let name = self.intern.intern(&name);
        self.symbols.alloc(MachSymbol::new(name))
    }

    /// Create a symbol with exactly the given name (no suffixing).
    pub fn named_symbol(&mut self, name: &str) -> MachSymbolId {
        let name = self.intern.intern(name);
        self.symbols.alloc(MachSymbol::new(name))
    }

    /// The machine symbol for a Core symbol, creating it on first use.
    /// The same Core symbol always maps to the same machine symbol.
    pub fn mach_symbol_for_core(
        &mut self,
        module: &crate::core::CoreModule,
        core_symbol: CoreSymbolId,
    ) -> MachSymbolId {
        if let Some(&existing) = self.core_to_mach.get(&core_symbol) {
            return existing;
        }
        let core = &module.symbols[core_symbol];
        let mut symbol = MachSymbol::new(core.name);
        symbol.necro_type = Some(core.ty.clone());
        symbol.state_type = core.state_hint;
        symbol.is_primitive = core.is_primitive;
        let id = self.symbols.alloc(symbol);
        self.core_to_mach.insert(core_symbol, id);
        id
    }

    pub fn mach_symbol_of_core(&self, core_symbol: CoreSymbolId) -> Option<MachSymbolId> {
        self.core_to_mach.get(&core_symbol).copied()
    }

    /// Point a Core symbol at a specific machine symbol (used for
    /// constructors, whose machine identity is their `_mk` function).
    pub(crate) fn map_core_to_mach(&mut self, core_symbol: CoreSymbolId, mach: MachSymbolId) {
        self.core_to_mach.insert(core_symbol, mach);
    }

    /// Machine definitions of top-level bindings, in definition order.
    pub fn top_level_defs(&self) -> impl Iterator<Item = DefId> + '_ {
        self.machine_defs
            .iter()
            .filter(|(_, def)| def.outer.is_none())
            .map(|(id, _)| id)
    }

    pub fn symbol_name(&self, symbol: MachSymbolId) -> &str {
        self.intern.resolve(self.symbols[symbol].name)
    }

    pub fn core_symbol_name(
        &self,
        module: &crate::core::CoreModule,
        core_symbol: CoreSymbolId,
    ) -> String {
        self.intern
            .resolve(module.symbols[core_symbol].name)
            .to_string()
    }

    pub fn value_reg(&mut self, ty: MachType, name: &str) -> MachValue {
        let symbol = self.gen_symbol(name);
        self.symbols[symbol].mach_type = Some(ty.clone());
        MachValue {
            kind: MachValueKind::Reg { symbol },
            ty,
        }
    }

    pub fn value_global(&mut self, symbol: MachSymbolId, ty: MachType) -> MachValue {
        self.symbols[symbol].mach_type = Some(ty.clone());
        MachValue {
            kind: MachValueKind::Global { symbol },
            ty,
        }
    }

    pub fn value_word_uint(&self, v: u64) -> MachValue {
        match self.word_size {
            crate::config::WordSize::FourBytes => MachValue::u32(v as u32),
            crate::config::WordSize::EightBytes => MachValue {
                kind: MachValueKind::U64(v),
                ty: MachType::U64,
            },
        }
    }

    pub fn value_word_int(&self, v: i64) -> MachValue {
        match self.word_size {
            crate::config::WordSize::FourBytes => MachValue {
                kind: MachValueKind::I32(v as i32),
                ty: MachType::I32,
            },
            crate::config::WordSize::EightBytes => MachValue {
                kind: MachValueKind::I64(v),
                ty: MachType::I64,
            },
        }
    }

    pub fn value_word_float(&self, v: f64) -> MachValue {
        match self.word_size {
            crate::config::WordSize::FourBytes => MachValue {
                kind: MachValueKind::F32(v as f32),
                ty: MachType::F32,
            },
            crate::config::WordSize::EightBytes => MachValue {
                kind: MachValueKind::F64(v),
                ty: MachType::F64,
            },
        }
    }

    pub fn add_struct(&mut self, struct_def: StructDef) {
        let symbol = struct_def.symbol;
        self.symbols[symbol].mach_type = Some(struct_def.ty.clone());
        self.structs.push(struct_def);
    }

    pub fn add_function(&mut self, fn_def: FnDef) -> FnId {
        let symbol = fn_def.symbol;
        let id = self.functions.alloc(fn_def);
        self.symbols[symbol].binding = SymbolBinding::Fn(id);
        id
    }

    pub fn add_machine_def(&mut self, def: MachDef) -> DefId {
        let symbol = def.symbol;
        let machine_name = def.machine_name;
        let id = self.machine_defs.alloc(def);
        self.symbols[symbol].binding = SymbolBinding::Def(id);
        self.symbols[machine_name].binding = SymbolBinding::Def(id);
        id
    }

    pub fn add_global(&mut self, global: MachValue) {
        debug_assert!(matches!(global.kind, MachValueKind::Global { .. }));
        self.globals.push(global);
    }

    /// The callable value of a runtime function.
    pub fn runtime_fn_value(&self, fn_id: FnId) -> MachValue {
        self.functions[fn_id].fn_value.clone()
    }
}

/// Capitalize the first character of a source name, for generated
/// machine/struct names (`foo` becomes `_FooMachine`).
pub(crate) fn capitalized(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;

    fn test_program() -> MachProgram {
        MachProgram::new(Intern::new(), &CompilerConfig::default())
    }

    #[test]
    fn test_gen_symbol_unique_names() {
        let mut program = test_program();
        let a = program.gen_symbol("val");
        let b = program.gen_symbol("val");
        let c = program.gen_symbol("val");
        assert_eq!(program.symbol_name(a), "val");
        assert_eq!(program.symbol_name(b), "val_1");
        assert_eq!(program.symbol_name(c), "val_2");
    }

    #[test]
    fn test_fn_param_values_are_typed() {
        let mut program = test_program();
        let sym = program.gen_symbol("f");
        let ty = MachType::func(MachType::U64, vec![MachType::I64, MachType::U1]);
        let f = FnDef::new(&mut program, sym, ty);
        assert_eq!(f.param_value(0).ty, MachType::I64);
        assert_eq!(f.param_value(1).ty, MachType::U1);
        assert_eq!(f.order.len(), 1);
        assert_eq!(f.current, Some(f.entry_block()));
    }

    #[test]
    fn test_add_function_binds_symbol() {
        let mut program = test_program();
        let sym = program.gen_symbol("g");
        let ty = MachType::func(MachType::Void, vec![]);
        let f = FnDef::new(&mut program, sym, ty);
        let id = program.add_function(f);
        assert!(matches!(
            program.symbols[sym].binding,
            SymbolBinding::Fn(found) if found == id
        ));
    }

    #[test]
    fn test_word_literals_follow_word_size() {
        let program = test_program();
        assert_eq!(program.value_word_uint(3).ty, MachType::U64);
        let config = CompilerConfig::new().with_word_size(crate::config::WordSize::FourBytes);
        let program32 = MachProgram::new(Intern::new(), &config);
        assert_eq!(program32.value_word_uint(3).ty, MachType::U32);
        assert_eq!(program32.value_word_float(1.5).ty, MachType::F32);
    }

    #[test]
    fn test_capitalized() {
        assert_eq!(capitalized("twoForOne"), "TwoForOne");
        assert_eq!(capitalized("x"), "X");
    }
}

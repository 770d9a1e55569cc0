//! The runtime call surface.
//!
//! The compiler never links the runtime; it only embeds calls to these
//! symbols. All declarations live in a single data-driven table so the
//! printer, the verifier and main synthesis agree on every signature.
//!
//! Allocation goes through the copying collector's semi-space entry points
//! (`_necro_from_alloc`/`_necro_to_alloc`), and `necro_main` registers
//! every global state cell as a GC root at startup. The layout metadata
//! tables (`_necro_set_data_map`/`_necro_set_member_map`) are declared here
//! but populated by the downstream LLVM layer, which owns constant data
//! emission.

use std::collections::HashMap;

use crate::mach::ast::{FnDef, FnId, MachProgram, MachValue};
use crate::mach::types::MachType;

/// A runtime-provided function, addressed by role rather than name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuntimeFn {
    InitRuntime,
    UpdateRuntime,
    ErrorExit,
    Sleep,
    Print,
    DebugPrint,
    FromAlloc,
    ToAlloc,
    GcInitRootSet,
    GcSetRoot,
    GcCollect,
    FlipConst,
    SetDataMap,
    SetMemberMap,
}

impl RuntimeFn {
    /// The linker-level symbol for this runtime function.
    pub fn symbol_name(self) -> &'static str {
        match self {
            RuntimeFn::InitRuntime => "_necro_init_runtime",
            RuntimeFn::UpdateRuntime => "_necro_update_runtime",
            RuntimeFn::ErrorExit => "_necro_error_exit",
            RuntimeFn::Sleep => "_necro_sleep",
            RuntimeFn::Print => "_necro_print",
            RuntimeFn::DebugPrint => "_necro_debug_print",
            RuntimeFn::FromAlloc => "_necro_from_alloc",
            RuntimeFn::ToAlloc => "_necro_to_alloc",
            RuntimeFn::GcInitRootSet => "_necro_copy_gc_initialize_root_set",
            RuntimeFn::GcSetRoot => "_necro_copy_gc_set_root",
            RuntimeFn::GcCollect => "_necro_copy_gc_collect",
            RuntimeFn::FlipConst => "_necro_flip_const",
            RuntimeFn::SetDataMap => "_necro_set_data_map",
            RuntimeFn::SetMemberMap => "_necro_set_member_map",
        }
    }
}

/// Math and bit primitives with direct target-level support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    Fma,
    BRev,
    FAbs,
    Sin,
    Cos,
    Exp,
    Exp2,
    Log,
    Log10,
    Log2,
    Pow,
    Sqrt,
    Floor,
    Ceil,
    Trnc,
    Rnd,
    CpySgn,
    FMin,
    FMax,
}

impl Intrinsic {
    pub fn name(self) -> &'static str {
        match self {
            Intrinsic::Fma => "fma",
            Intrinsic::BRev => "brev",
            Intrinsic::FAbs => "fabs",
            Intrinsic::Sin => "sin",
            Intrinsic::Cos => "cos",
            Intrinsic::Exp => "exp",
            Intrinsic::Exp2 => "exp2",
            Intrinsic::Log => "log",
            Intrinsic::Log10 => "log10",
            Intrinsic::Log2 => "log2",
            Intrinsic::Pow => "pow",
            Intrinsic::Sqrt => "sqrt",
            Intrinsic::Floor => "floor",
            Intrinsic::Ceil => "ceil",
            Intrinsic::Trnc => "trnc",
            Intrinsic::Rnd => "rnd",
            Intrinsic::CpySgn => "cpysgn",
            Intrinsic::FMin => "fmin",
            Intrinsic::FMax => "fmax",
        }
    }

    /// Number of value arguments the intrinsic takes.
    pub fn arity(self) -> usize {
        match self {
            Intrinsic::Fma => 3,
            Intrinsic::Pow | Intrinsic::CpySgn | Intrinsic::FMin | Intrinsic::FMax => 2,
            _ => 1,
        }
    }
}

/// Cached handles to every declared runtime function.
#[derive(Debug, Default)]
pub struct MachRuntime {
    fns: HashMap<RuntimeFn, FnId>,
}

impl MachRuntime {
    /// Declare the full runtime surface into `program` and return the
    /// handle table.
    pub fn declare(program: &mut MachProgram) -> MachRuntime {
        let void = MachType::Void;
        let uword = program.word_uint_type();
        let iword = program.word_int_type();
        let word_ptr = MachType::ptr(uword.clone());
        let root_ptr = MachType::ptr(MachType::ptr(uword.clone()));

        let table: Vec<(RuntimeFn, MachType)> = vec![
            (RuntimeFn::InitRuntime, MachType::func(void.clone(), vec![])),
            (
                RuntimeFn::UpdateRuntime,
                MachType::func(void.clone(), vec![]),
            ),
            (
                RuntimeFn::ErrorExit,
                MachType::func(void.clone(), vec![MachType::U32]),
            ),
            (
                RuntimeFn::Sleep,
                MachType::func(void.clone(), vec![MachType::U32]),
            ),
            (
                RuntimeFn::Print,
                MachType::func(uword.clone(), vec![iword.clone(), uword.clone()]),
            ),
            (
                RuntimeFn::DebugPrint,
                MachType::func(void.clone(), vec![iword.clone()]),
            ),
            (
                RuntimeFn::FromAlloc,
                MachType::func(word_ptr.clone(), vec![uword.clone()]),
            ),
            (
                RuntimeFn::ToAlloc,
                MachType::func(word_ptr.clone(), vec![uword.clone()]),
            ),
            (
                RuntimeFn::GcInitRootSet,
                MachType::func(void.clone(), vec![uword.clone()]),
            ),
            (
                RuntimeFn::GcSetRoot,
                MachType::func(
                    void.clone(),
                    vec![root_ptr, uword.clone(), uword.clone()],
                ),
            ),
            (RuntimeFn::GcCollect, MachType::func(void.clone(), vec![])),
            (RuntimeFn::FlipConst, MachType::func(void.clone(), vec![])),
            (
                RuntimeFn::SetDataMap,
                MachType::func(void.clone(), vec![word_ptr.clone()]),
            ),
            (
                RuntimeFn::SetMemberMap,
                MachType::func(void.clone(), vec![word_ptr]),
            ),
        ];

        let mut fns = HashMap::new();
        for (role, ty) in table {
            let symbol = program.named_symbol(role.symbol_name());
            program.symbols[symbol].is_primitive = true;
            let fn_def = FnDef::new_runtime(program, symbol, ty);
            let id = program.add_function(fn_def);
            fns.insert(role, id);
        }
        MachRuntime { fns }
    }

    pub fn fn_id(&self, role: RuntimeFn) -> FnId {
        self.fns[&role]
    }
}

impl MachProgram {
    /// The callable value of a runtime function role.
    pub fn runtime_value(&self, role: RuntimeFn) -> MachValue {
        self.runtime_fn_value(self.runtime.fn_id(role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::intern::Intern;
    use crate::mach::ast::FnKind;

    #[test]
    fn test_runtime_surface_declared_on_creation() {
        let program = MachProgram::new(Intern::new(), &CompilerConfig::default());
        let print = program.runtime_value(RuntimeFn::Print);
        let fn_type = print.ty.expect_fn();
        assert_eq!(fn_type.params, vec![MachType::I64, MachType::U64]);
        assert_eq!(fn_type.ret, MachType::U64);

        let init_id = program.runtime.fn_id(RuntimeFn::InitRuntime);
        assert_eq!(program.functions[init_id].kind, FnKind::RuntimeC);
        assert_eq!(
            program.symbol_name(program.functions[init_id].symbol),
            "_necro_init_runtime"
        );
    }

    #[test]
    fn test_intrinsic_names_and_arity() {
        assert_eq!(Intrinsic::Fma.name(), "fma");
        assert_eq!(Intrinsic::Fma.arity(), 3);
        assert_eq!(Intrinsic::Pow.arity(), 2);
        assert_eq!(Intrinsic::Sqrt.arity(), 1);
        assert_eq!(Intrinsic::CpySgn.name(), "cpysgn");
    }
}

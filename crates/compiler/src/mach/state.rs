//! Pass 2: state discovery.
//!
//! Each top-level binding's body is walked to find every sub-expression
//! that carries state across ticks. Three shapes allocate a persistent
//! slot in the enclosing machine's state record:
//!
//! - a variable referencing a nested stateful binding (a lambda-lift
//!   survivor that closes over state) takes a slot of the callee's
//!   value type, pointer-wrapped if boxed;
//! - an application of a stateful machine takes a slot holding the
//!   callee's whole state struct inline;
//! - a constructor application (or nullary constructor use) takes a slot
//!   of the concrete variant struct it builds into.
//!
//! Slots are assigned in source-traversal order, exactly once per AST
//! node, so a compilation is reproducible; the node-to-slot assignment is
//! returned as a side table for the body lowerer. Once every layout is
//! final, an end-of-pass sweep fixes each machine's `mk`/`init`
//! signatures and emits their bodies.

use std::collections::HashMap;

use tracing::debug;

use crate::core::{CoreAstKind, CoreId, CoreModule, CoreSymbolId, StateType};
use crate::mach::ast::{
    CallKind, DefId, FnDef, MachProgram, Slot, SlotOwner, StructDef, SymbolBinding, capitalized,
};
use crate::mach::build::FnBuilder;
use crate::mach::error::MachError;
use crate::mach::runtime::RuntimeFn;
use crate::mach::types::{MachType, type_is_eq};

/// Persistent slot index per Core AST node, as discovered by this pass.
pub(crate) type SlotMap = HashMap<CoreId, usize>;

pub(crate) fn run(program: &mut MachProgram, module: &CoreModule) -> Result<SlotMap, MachError> {
    debug!("mach pass 2: state discovery");
    let mut slots = SlotMap::new();
    for &top in &module.top {
        discover_node(program, module, top, None, &mut slots)?;
    }
    emit_mk_and_init_fns(program);
    Ok(slots)
}

fn discover_node(
    program: &mut MachProgram,
    module: &CoreModule,
    id: CoreId,
    outer: Option<DefId>,
    slots: &mut SlotMap,
) -> Result<(), MachError> {
    match &module.nodes[id].kind {
        CoreAstKind::Lit(_) | CoreAstKind::DataDecl { .. } | CoreAstKind::DataCon { .. } => Ok(()),
        CoreAstKind::Var { symbol } => discover_var(program, module, id, *symbol, outer, slots),
        CoreAstKind::Bind { symbol, expr } => {
            discover_bind(program, module, *symbol, *expr, outer, slots)
        }
        CoreAstKind::BindRec { .. } => Err(MachError::Unimplemented("recursive binding groups")),
        CoreAstKind::App { .. } => discover_app(program, module, id, outer, slots),
        CoreAstKind::Lam { expr, .. } => discover_node(program, module, *expr, outer, slots),
        CoreAstKind::Let { bind, expr } => {
            discover_node(program, module, *bind, outer, slots)?;
            discover_node(program, module, *expr, outer, slots)
        }
        CoreAstKind::Case { expr, alts, .. } => {
            discover_node(program, module, *expr, outer, slots)?;
            for alt in alts {
                discover_node(program, module, alt.body, outer, slots)?;
            }
            Ok(())
        }
        CoreAstKind::For { .. } => Err(MachError::Unimplemented("for loops")),
    }
}

/// Append a persistent slot to `def`'s state record, returning its index.
fn add_member(program: &mut MachProgram, def: DefId, ty: MachType, owner: SlotOwner) -> usize {
    let members = &mut program.machine_defs[def].members;
    let index = members.len();
    members.push(Slot { ty, owner });
    index
}

fn is_machine_arg(program: &MachProgram, def: DefId, symbol: crate::mach::ast::MachSymbolId) -> bool {
    program.machine_defs[def].arg_names.contains(&symbol)
}

fn discover_var(
    program: &mut MachProgram,
    module: &CoreModule,
    var_id: CoreId,
    core_symbol: CoreSymbolId,
    outer: Option<DefId>,
    slots: &mut SlotMap,
) -> Result<(), MachError> {
    let mach = program.mach_symbol_for_core(module, core_symbol);
    if program.symbols[mach].is_enum {
        return Ok(());
    }
    match program.symbols[mach].binding.clone() {
        SymbolBinding::Def(callee) => {
            let Some(outer) = outer else { return Ok(()) };
            // Only nested stateful bindings persist through a slot;
            // top-level machines publish through their global value cell.
            let callee_def = &program.machine_defs[callee];
            if callee_def.state_type != StateType::Stateful || callee_def.outer.is_none() {
                return Ok(());
            }
            if is_machine_arg(program, outer, mach) {
                return Ok(());
            }
            if program.machine_defs[callee].is_persistent_slot_set() {
                return Ok(());
            }
            let value_type = program.machine_defs[callee].value_type.clone();
            let slot_ty = program.make_ptr_if_boxed(&value_type);
            let slot = add_member(program, outer, slot_ty, SlotOwner::Def(callee));
            program.machine_defs[callee].persistent_slot = Some(slot);
            slots.insert(var_id, slot);
            Ok(())
        }
        SymbolBinding::Fn(_) if program.symbols[mach].is_constructor => {
            // A nullary constructor use builds into state owned by the
            // enclosing machine.
            let Some(outer) = outer else { return Ok(()) };
            let con_ty = constructor_struct_type(program, mach)?;
            let slot = add_member(program, outer, con_ty, SlotOwner::Constructor(mach));
            slots.insert(var_id, slot);
            Ok(())
        }
        _ => Ok(()),
    }
}

/// The variant struct a constructor's `_mk` function builds into (its
/// first parameter's pointee).
fn constructor_struct_type(
    program: &MachProgram,
    con_symbol: crate::mach::ast::MachSymbolId,
) -> Result<MachType, MachError> {
    let ty = program.symbols[con_symbol]
        .mach_type
        .as_ref()
        .ok_or_else(|| {
            MachError::UnresolvedSymbol(program.symbol_name(con_symbol).to_string())
        })?;
    let fn_ty = ty.as_fn().ok_or_else(|| {
        MachError::UnresolvedSymbol(program.symbol_name(con_symbol).to_string())
    })?;
    Ok(fn_ty.params[0].pointee().clone())
}

fn discover_app(
    program: &mut MachProgram,
    module: &CoreModule,
    app_id: CoreId,
    outer: Option<DefId>,
    slots: &mut SlotMap,
) -> Result<(), MachError> {
    // Peel the application spine, discovering each argument.
    let mut arg_count = 0;
    let mut cursor = app_id;
    while let CoreAstKind::App { func, arg } = &module.nodes[cursor].kind {
        discover_node(program, module, *arg, outer, slots)?;
        arg_count += 1;
        cursor = *func;
    }
    let CoreAstKind::Var { symbol } = &module.nodes[cursor].kind else {
        return Err(MachError::UnresolvedSymbol(
            "application head is not a variable".to_string(),
        ));
    };
    let mach = program.mach_symbol_for_core(module, *symbol);

    let expected = match program.symbols[mach].binding.clone() {
        SymbolBinding::Def(callee) => {
            let callee_def = &program.machine_defs[callee];
            let fn_ty = callee_def.fn_type.clone().ok_or_else(|| {
                MachError::ArityMismatch {
                    name: program.symbol_name(mach).to_string(),
                    expected: 0,
                    found: arg_count,
                }
            })?;
            if program.machine_defs[callee].uses_state() {
                let Some(outer) = outer else {
                    return Err(MachError::UnresolvedSymbol(
                        "stateful application outside a machine".to_string(),
                    ));
                };
                let state_ty = program.machine_defs[callee]
                    .state_struct
                    .clone()
                    .expect("stateful callee has a state struct");
                let slot = add_member(program, outer, state_ty, SlotOwner::Def(callee));
                slots.insert(app_id, slot);
            }
            fn_ty.expect_fn().params.len()
        }
        SymbolBinding::Fn(_) if program.symbols[mach].is_constructor => {
            let Some(outer) = outer else {
                return Err(MachError::UnresolvedSymbol(
                    "constructor application outside a machine".to_string(),
                ));
            };
            let con_ty = constructor_struct_type(program, mach)?;
            let slot = add_member(program, outer, con_ty, SlotOwner::Constructor(mach));
            slots.insert(app_id, slot);
            let fn_ty = program.symbols[mach].mach_type.as_ref().unwrap().expect_fn();
            fn_ty.params.len() - 1
        }
        SymbolBinding::Fn(fn_id) => {
            if let Some(intrinsic) = program.symbols[mach].intrinsic {
                intrinsic.arity()
            } else {
                program.functions[fn_id].ty.expect_fn().params.len()
            }
        }
        SymbolBinding::Value(value) => {
            if let Some(intrinsic) = program.symbols[mach].intrinsic {
                intrinsic.arity()
            } else {
                let fn_ty = value.ty.as_fn().ok_or_else(|| {
                    MachError::UnresolvedSymbol(program.symbol_name(mach).to_string())
                })?;
                fn_ty.params.len()
            }
        }
        SymbolBinding::None => {
            if let Some(intrinsic) = program.symbols[mach].intrinsic {
                intrinsic.arity()
            } else {
                return Err(MachError::UnresolvedSymbol(
                    program.symbol_name(mach).to_string(),
                ));
            }
        }
    };
    if expected != arg_count {
        return Err(MachError::ArityMismatch {
            name: program.symbol_name(mach).to_string(),
            expected,
            found: arg_count,
        });
    }
    Ok(())
}

fn discover_bind(
    program: &mut MachProgram,
    module: &CoreModule,
    core_symbol: CoreSymbolId,
    expr: CoreId,
    outer: Option<DefId>,
    slots: &mut SlotMap,
) -> Result<(), MachError> {
    if module.symbols[core_symbol].is_primitive {
        return Ok(());
    }
    let mach = program.mach_symbol_for_core(module, core_symbol);
    let SymbolBinding::Def(def_id) = program.symbols[mach].binding else {
        return Err(MachError::UnresolvedSymbol(
            program.symbol_name(mach).to_string(),
        ));
    };

    // Nested bindings discover into the enclosing machine's state.
    if let Some(outer) = outer {
        discover_node(program, module, expr, Some(outer), slots)?;
        resolve_statefulness(program, def_id);
        return Ok(());
    }

    // Forward-declare the state struct; members are filled in below.
    // Nominal equality makes the empty declaration usable for slots in
    // other machines before the layout is final.
    let machine_name = program.machine_defs[def_id].machine_name;
    program.machine_defs[def_id].state_struct = Some(MachType::strukt(machine_name, Vec::new()));

    discover_node(program, module, expr, Some(def_id), slots)?;

    remove_only_self_recursive_member(program, def_id);
    resolve_statefulness(program, def_id);

    // Finalize the state struct from the discovered members.
    let member_tys: Vec<MachType> = program.machine_defs[def_id]
        .members
        .iter()
        .map(|slot| slot.ty.clone())
        .collect();
    let state_struct = MachType::strukt(machine_name, member_tys);
    program.machine_defs[def_id].state_struct = Some(state_struct.clone());
    if program.machine_defs[def_id].uses_state() {
        program.add_struct(StructDef {
            symbol: machine_name,
            ty: state_struct.clone(),
        });
    }

    let is_machine_fn = program.machine_defs[def_id].num_args() > 0;

    // Publish cell for the per-tick value of argless top-level bindings.
    if !is_machine_fn {
        let value_type = program.machine_defs[def_id].value_type.clone();
        let cell_ty = MachType::ptr(program.make_ptr_if_boxed(&value_type));
        let symbol = program.machine_defs[def_id].symbol;
        let global_value = program.value_global(symbol, cell_ty);
        program.machine_defs[def_id].global_value = Some(global_value.clone());
        program.add_global(global_value);
    }

    // Live-state cell for machines the tick loop drives directly.
    if !is_machine_fn && program.machine_defs[def_id].uses_state() {
        let state_name = program.machine_defs[def_id].state_name;
        let cell_ty = MachType::ptr(MachType::ptr(state_struct));
        let global_state = program.value_global(state_name, cell_ty);
        program.machine_defs[def_id].global_state = Some(global_state.clone());
        program.add_global(global_state);
    }

    debug!(
        name = program.symbol_name(mach),
        members = program.machine_defs[def_id].members.len(),
        state = ?program.machine_defs[def_id].state_type,
        "discovered machine state"
    );
    Ok(())
}

/// Drop the degenerate layout where an argless machine's only member is
/// its own state type, a self-reference artifact.
fn remove_only_self_recursive_member(program: &mut MachProgram, def_id: DefId) {
    let def = &program.machine_defs[def_id];
    if def.num_args() != 0 || def.members.len() != 1 {
        return;
    }
    let own = def
        .state_struct
        .as_ref()
        .expect("state struct is forward-declared before discovery");
    let member = &def.members[0].ty;
    let is_self = type_is_eq(member, own)
        || (member.is_ptr() && type_is_eq(member.pointee(), own));
    if is_self {
        program.machine_defs[def_id].members.clear();
    }
}

/// Settle a binding's classification.
///
/// Arg-taking bindings re-evaluate per call and keep their state inline in
/// the caller, so they are pointwise. Argless bindings that allocated
/// members carry state across ticks; otherwise an upstream hint wins, and
/// an unhinted argless binding is a one-shot constant.
fn resolve_statefulness(program: &mut MachProgram, def_id: DefId) {
    let def = &program.machine_defs[def_id];
    let hint = program.symbols[def.symbol].state_type;
    let resolved = if def.num_args() > 0 {
        StateType::Pointwise
    } else if def.uses_state() {
        StateType::Stateful
    } else if hint != StateType::Poly {
        hint
    } else {
        StateType::Constant
    };
    program.machine_defs[def_id].state_type = resolved;
    let symbol = program.machine_defs[def_id].symbol;
    program.symbols[symbol].state_type = resolved;
}

//--------------------
// mk / init synthesis
//--------------------

/// With every layout final, give each stateful machine its `mk` and
/// `init` functions.
///
/// Skeletons for all machines are created before any body is emitted so
/// `init` chaining can reference machines defined later in the module.
fn emit_mk_and_init_fns(program: &mut MachProgram) {
    let def_ids: Vec<DefId> = program
        .machine_defs
        .ids()
        .filter(|&id| program.machine_defs[id].uses_state())
        .collect();

    for &def_id in &def_ids {
        let source_name = program
            .symbol_name(program.machine_defs[def_id].symbol)
            .to_string();
        let state_ptr = MachType::ptr(
            program.machine_defs[def_id]
                .state_struct
                .clone()
                .expect("stateful machine has a state struct"),
        );

        let init_symbol = program.gen_symbol(&format!("_init{}", capitalized(&source_name)));
        let init_ty = MachType::func(MachType::Void, vec![state_ptr.clone()]);
        let init_fn = FnDef::new(program, init_symbol, init_ty);
        program.machine_defs[def_id].init_fn = Some(init_fn);

        let mk_symbol = program.gen_symbol(&format!("_mk{}", capitalized(&source_name)));
        let mk_ty = MachType::func(state_ptr, vec![]);
        let mk_fn = FnDef::new(program, mk_symbol, mk_ty);
        program.machine_defs[def_id].mk_fn = Some(mk_fn);
    }

    for &def_id in &def_ids {
        emit_init_body(program, def_id);
        emit_mk_body(program, def_id);
    }
}

/// `init` recursively initializes each member slot that itself owns a
/// stateful machine, by gep-ing the sub-region and chaining to its init.
/// An unboxed slot holds the member's region inline; a boxed slot holds a
/// pointer to it, which is loaded before chaining.
fn emit_init_body(program: &mut MachProgram, def_id: DefId) {
    let mut init_fn = program.machine_defs[def_id]
        .init_fn
        .take()
        .expect("init skeleton exists");
    let members = program.machine_defs[def_id].members.clone();
    {
        let mut b = FnBuilder::new(program, &mut init_fn);
        let data_ptr = b.param(0);
        for (i, slot) in members.iter().enumerate() {
            if let SlotOwner::Def(owner) = slot.owner
                && owner != def_id
                && b.program.machine_defs[owner].uses_state()
            {
                let callee = b.program.machine_defs[owner]
                    .init_fn
                    .as_ref()
                    .expect("stateful member machine has an init")
                    .fn_value
                    .clone();
                let member = b.build_gep(&data_ptr, &[0, i as u32], "member");
                let region = if slot.ty.is_ptr() {
                    b.build_load(&member, "member_ptr")
                } else {
                    member
                };
                b.build_call(&callee, &[region], CallKind::Lang, "");
            }
        }
        b.build_return_void();
    }
    program.machine_defs[def_id].init_fn = Some(init_fn);
}

/// `mk` allocates the state region in the collector's from-space, chains
/// to `init`, and returns the typed pointer.
fn emit_mk_body(program: &mut MachProgram, def_id: DefId) {
    let mut mk_fn = program.machine_defs[def_id]
        .mk_fn
        .take()
        .expect("mk skeleton exists");
    let state_struct = program.machine_defs[def_id]
        .state_struct
        .clone()
        .expect("stateful machine has a state struct");
    let size = program.size_in_bytes(&state_struct) as u64;
    {
        let from_alloc = program.runtime_value(RuntimeFn::FromAlloc);
        let init_value = program.machine_defs[def_id]
            .init_fn
            .as_ref()
            .expect("init exists alongside mk")
            .fn_value
            .clone();
        let mut b = FnBuilder::new(program, &mut mk_fn);
        let bytes = b.program.value_word_uint(size);
        let raw = b.build_call(&from_alloc, &[bytes], CallKind::C, "raw");
        let data_ptr = b.build_bit_cast(&raw, MachType::ptr(state_struct));
        b.build_call(&init_value, &[data_ptr.clone()], CallKind::Lang, "");
        b.build_return(data_ptr);
    }
    program.machine_defs[def_id].mk_fn = Some(mk_fn);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::NecroBase;
    use crate::config::CompilerConfig;
    use crate::core::{CoreLit, NecroType};
    use crate::intern::Intern;
    use crate::mach::data;

    struct Fixture {
        module: CoreModule,
        base: NecroBase,
        program: MachProgram,
    }

    fn setup() -> Fixture {
        let mut module = CoreModule::new();
        let mut intern = Intern::new();
        let base = NecroBase::new(&mut module, &mut intern);
        let mut program = MachProgram::new(intern, &CompilerConfig::default());
        base.install(&mut program, &module);
        Fixture {
            module,
            base,
            program,
        }
    }

    /// `data TwoInts = TwoInts Int Int` + `twoForOne i = TwoInts i i`.
    fn two_for_one(fixture: &mut Fixture) -> (CoreSymbolId, CoreSymbolId) {
        let module = &mut fixture.module;
        let intern = &mut fixture.program.intern;
        let int_ty = NecroType::con(fixture.base.int_type);
        let two_ints = module.type_symbol(intern, "TwoInts");
        let con = module.symbol(
            intern,
            "TwoInts",
            NecroType::fun_chain(&[int_ty.clone(), int_ty.clone()], NecroType::con(two_ints)),
        );
        let con_node = module.data_con(con);
        let decl = module.data_decl(two_ints, vec![con_node]);
        module.push_top(decl);

        let f = module.symbol(
            intern,
            "twoForOne",
            NecroType::fun_chain(&[int_ty.clone()], NecroType::con(two_ints)),
        );
        let i = module.symbol(intern, "i", int_ty);
        let con_var = module.var(con);
        let i1 = module.var(i);
        let i2 = module.var(i);
        let body = module.apps(con_var, &[i1, i2]);
        module.top_bind(f, &[i], body);
        (f, con)
    }

    #[test]
    fn test_constructor_application_allocates_slot() {
        let mut fixture = setup();
        let (f, _con) = two_for_one(&mut fixture);
        data::run(&mut fixture.program, &fixture.module).unwrap();
        let slots = run(&mut fixture.program, &fixture.module).unwrap();

        let program = &fixture.program;
        let f_mach = program.mach_symbol_of_core(f).unwrap();
        let SymbolBinding::Def(def_id) = program.symbols[f_mach].binding else {
            panic!("expected machine def");
        };
        let def = &program.machine_defs[def_id];
        assert_eq!(def.members.len(), 1);
        assert!(matches!(def.members[0].owner, SlotOwner::Constructor(_)));
        // The slot holds the TwoInts record inline: tag plus two ints.
        let slot_struct = def.members[0].ty.as_struct().unwrap();
        assert_eq!(slot_struct.members.len(), 3);
        // Arg-taking machines are pointwise; their state lives in callers.
        assert_eq!(def.state_type, StateType::Pointwise);
        // The application node received slot 0.
        assert!(slots.values().any(|&s| s == 0));
    }

    #[test]
    fn test_mk_and_init_emitted_iff_members() {
        let mut fixture = setup();
        let (f, _) = two_for_one(&mut fixture);
        // x = 3 has no state at all.
        let int_ty = NecroType::con(fixture.base.int_type);
        let x = fixture
            .module
            .symbol(&mut fixture.program.intern, "x", int_ty);
        let three = fixture.module.lit(CoreLit::Int(3));
        fixture.module.top_bind(x, &[], three);

        data::run(&mut fixture.program, &fixture.module).unwrap();
        run(&mut fixture.program, &fixture.module).unwrap();

        let program = &fixture.program;
        let f_def = machine_of(program, f);
        assert!(f_def.mk_fn.is_some() && f_def.init_fn.is_some());
        let x_def = machine_of(program, x);
        assert!(x_def.mk_fn.is_none() && x_def.init_fn.is_none());
        assert_eq!(x_def.state_type, StateType::Constant);

        // mk allocates through the collector and chains init.
        let mk = f_def.mk_fn.as_ref().unwrap();
        let entry = &mk.blocks[mk.entry_block()];
        let calls = entry
            .statements
            .iter()
            .filter(|s| matches!(s, crate::mach::ast::MachInstr::Call { .. }))
            .count();
        assert_eq!(calls, 2);
        assert_eq!(
            program.symbol_name(mk.symbol),
            "_mkTwoForOne"
        );
        assert_eq!(
            program.symbol_name(f_def.init_fn.as_ref().unwrap().symbol),
            "_initTwoForOne"
        );
    }

    #[test]
    fn test_state_struct_matches_members() {
        let mut fixture = setup();
        let (f, _) = two_for_one(&mut fixture);
        data::run(&mut fixture.program, &fixture.module).unwrap();
        run(&mut fixture.program, &fixture.module).unwrap();

        let def = machine_of(&fixture.program, f);
        let state = def.state_struct.as_ref().unwrap().as_struct().unwrap();
        assert_eq!(state.members.len(), def.members.len());
        for (struct_member, slot) in state.members.iter().zip(def.members.iter()) {
            assert!(type_is_eq(struct_member, &slot.ty));
        }
    }

    #[test]
    fn test_argless_binding_gets_global_value() {
        let mut fixture = setup();
        let int_ty = NecroType::con(fixture.base.int_type);
        let x = fixture
            .module
            .symbol(&mut fixture.program.intern, "x", int_ty);
        let three = fixture.module.lit(CoreLit::Int(3));
        fixture.module.top_bind(x, &[], three);

        data::run(&mut fixture.program, &fixture.module).unwrap();
        run(&mut fixture.program, &fixture.module).unwrap();

        let def = machine_of(&fixture.program, x);
        let global = def.global_value.as_ref().unwrap();
        assert_eq!(global.ty, MachType::ptr(MachType::I64));
        assert!(def.global_state.is_none());
        assert_eq!(fixture.program.globals.len(), 1);
    }

    #[test]
    fn test_slot_assignment_is_deterministic() {
        let mut fixture_a = setup();
        two_for_one(&mut fixture_a);
        data::run(&mut fixture_a.program, &fixture_a.module).unwrap();
        let slots_a = run(&mut fixture_a.program, &fixture_a.module).unwrap();

        let mut fixture_b = setup();
        two_for_one(&mut fixture_b);
        data::run(&mut fixture_b.program, &fixture_b.module).unwrap();
        let slots_b = run(&mut fixture_b.program, &fixture_b.module).unwrap();

        let mut a: Vec<(usize, usize)> =
            slots_a.iter().map(|(k, v)| (k.index(), *v)).collect();
        let mut b: Vec<(usize, usize)> =
            slots_b.iter().map(|(k, v)| (k.index(), *v)).collect();
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b);
    }

    /// `combo = let held = twoForOne 5 in let echo = held in echo`, with
    /// both nested bindings marked stateful by upstream state analysis.
    fn nested_stateful_combo(
        fixture: &mut Fixture,
        f: CoreSymbolId,
        con: CoreSymbolId,
    ) -> (CoreSymbolId, CoreSymbolId, CoreSymbolId, CoreId, CoreId, CoreId) {
        let record_ty = fixture.module.symbols[con].ty.result_type().clone();
        let module = &mut fixture.module;
        let intern = &mut fixture.program.intern;
        let combo = module.symbol(intern, "combo", record_ty.clone());
        let held = module.symbol(intern, "held", record_ty.clone());
        let echo = module.symbol(intern, "echo", record_ty);
        module.symbols[held].state_hint = StateType::Stateful;
        module.symbols[echo].state_hint = StateType::Stateful;

        let f_var = module.var(f);
        let five = module.lit(CoreLit::Int(5));
        let call = module.apps(f_var, &[five]);
        let held_bind = module.bind(held, call);
        let held_var = module.var(held);
        let echo_bind = module.bind(echo, held_var);
        let echo_var = module.var(echo);
        let inner = module.let_(echo_bind, echo_var);
        let body = module.let_(held_bind, inner);
        module.top_bind(combo, &[], body);
        (combo, held, echo, call, held_var, echo_var)
    }

    #[test]
    fn test_nested_stateful_bindings_allocate_pointer_slots() {
        let mut fixture = setup();
        let (f, con) = two_for_one(&mut fixture);
        let (combo, held, echo, call, held_var, echo_var) =
            nested_stateful_combo(&mut fixture, f, con);

        data::run(&mut fixture.program, &fixture.module).unwrap();
        let slots = run(&mut fixture.program, &fixture.module).unwrap();

        let program = &fixture.program;
        let combo_def = machine_of(program, combo);
        assert_eq!(combo_def.state_type, StateType::Stateful);
        assert_eq!(combo_def.members.len(), 3);
        // Slot 0 holds the applied machine's state inline; the nested
        // bindings persist their boxed values through pointer slots.
        assert!(!combo_def.members[0].ty.is_ptr());
        assert!(matches!(combo_def.members[0].owner, SlotOwner::Def(_)));
        assert!(combo_def.members[1].ty.is_ptr());
        assert!(matches!(combo_def.members[1].owner, SlotOwner::Def(_)));
        assert!(combo_def.members[2].ty.is_ptr());

        let held_def = machine_of(program, held);
        assert!(held_def.outer.is_some());
        assert_eq!(held_def.state_type, StateType::Stateful);
        assert_eq!(held_def.persistent_slot, Some(1));
        let echo_def = machine_of(program, echo);
        assert_eq!(echo_def.persistent_slot, Some(2));

        // Slots recorded on the nodes that introduced them.
        assert_eq!(slots.get(&call), Some(&0));
        assert_eq!(slots.get(&held_var), Some(&1));
        assert_eq!(slots.get(&echo_var), Some(&2));

        // The parent's init chains exactly once, into the inline machine
        // region; the pointer slots carry per-tick values, not regions.
        let init = combo_def.init_fn.as_ref().unwrap();
        let entry = &init.blocks[init.entry_block()];
        let calls: Vec<_> = entry
            .statements
            .iter()
            .filter(|s| matches!(s, crate::mach::ast::MachInstr::Call { .. }))
            .collect();
        assert_eq!(calls.len(), 1);
        let crate::mach::ast::MachInstr::Call { callee, args, .. } = calls[0] else {
            unreachable!();
        };
        assert_eq!(args.len(), 1);
        assert!(args[0].ty.is_ptr());
        let f_def = machine_of(program, f);
        assert_eq!(callee, &f_def.init_fn.as_ref().unwrap().fn_value);
    }

    #[test]
    fn test_chain_init_loads_boxed_member_slots() {
        use crate::mach::ast::MachInstr;

        let mut fixture = setup();
        let int_necro = NecroType::con(fixture.base.int_type);
        let program = &mut fixture.program;
        let word_int = program.word_int_type();
        let word_uint = program.word_uint_type();

        // A machine whose region another machine holds through a pointer.
        let inner_sym = program.gen_symbol("inner");
        let inner_id = data::create_initial_machine_def(
            program,
            &fixture.module,
            inner_sym,
            None,
            word_int.clone(),
            int_necro.clone(),
        );
        let inner_state = MachType::strukt(
            program.machine_defs[inner_id].machine_name,
            vec![word_uint.clone()],
        );
        program.machine_defs[inner_id].state_struct = Some(inner_state.clone());
        program.machine_defs[inner_id].members.push(Slot {
            ty: word_uint,
            owner: SlotOwner::Constructor(inner_sym),
        });

        let holder_sym = program.gen_symbol("holder");
        let holder_id = data::create_initial_machine_def(
            program,
            &fixture.module,
            holder_sym,
            None,
            word_int,
            int_necro,
        );
        let holder_state = MachType::strukt(
            program.machine_defs[holder_id].machine_name,
            vec![MachType::ptr(inner_state.clone())],
        );
        program.machine_defs[holder_id].state_struct = Some(holder_state);
        program.machine_defs[holder_id].members.push(Slot {
            ty: MachType::ptr(inner_state.clone()),
            owner: SlotOwner::Def(inner_id),
        });

        emit_mk_and_init_fns(program);

        // The boxed slot is loaded before chaining, and the chained init
        // receives the pointed-to region.
        let holder_def = &program.machine_defs[holder_id];
        let init = holder_def.init_fn.as_ref().unwrap();
        let entry = &init.blocks[init.entry_block()];
        assert!(matches!(entry.statements[0], MachInstr::Gep { .. }));
        assert!(matches!(entry.statements[1], MachInstr::Load { .. }));
        let MachInstr::Call { callee, args, .. } = &entry.statements[2] else {
            panic!("expected the chained init call");
        };
        assert_eq!(args.len(), 1);
        assert!(type_is_eq(&args[0].ty, &MachType::ptr(inner_state)));
        let inner_init = program.machine_defs[inner_id].init_fn.as_ref().unwrap();
        assert_eq!(callee, &inner_init.fn_value);
    }

    #[test]
    fn test_arity_mismatch_detected() {
        let mut fixture = setup();
        let (f, _) = two_for_one(&mut fixture);
        // broken = twoForOne 1 2 (one argument too many)
        let int_ty = NecroType::con(fixture.base.int_type);
        let broken = fixture
            .module
            .symbol(&mut fixture.program.intern, "broken", int_ty);
        let f_var = fixture.module.var(f);
        let one = fixture.module.lit(CoreLit::Int(1));
        let two = fixture.module.lit(CoreLit::Int(2));
        let call = fixture.module.apps(f_var, &[one, two]);
        fixture.module.top_bind(broken, &[], call);

        data::run(&mut fixture.program, &fixture.module).unwrap();
        let err = run(&mut fixture.program, &fixture.module).unwrap_err();
        assert!(matches!(err, MachError::ArityMismatch { expected: 1, found: 2, .. }));
    }

    fn machine_of<'a>(
        program: &'a MachProgram,
        core: CoreSymbolId,
    ) -> &'a crate::mach::ast::MachDef {
        let mach = program.mach_symbol_of_core(core).unwrap();
        let SymbolBinding::Def(def_id) = program.symbols[mach].binding else {
            panic!("expected machine def binding");
        };
        &program.machine_defs[def_id]
    }
}

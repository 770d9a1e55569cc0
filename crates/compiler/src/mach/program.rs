//! The driver: run the passes and synthesize `_necro_main`.
//!
//! Compilation is strictly sequential: data layout, then state discovery,
//! then body lowering, then main synthesis, then verification. A pass
//! either completes or fails the whole compilation; nothing is recovered.
//!
//! The generated `_necro_main` drives a flat, eager, statically ordered
//! dataflow tick. Its entry block boots the runtime, registers every
//! global state cell with the copying collector's root set, builds each
//! driven machine's state with its `mk`, and evaluates one-shot constants.
//! Its loop block updates the runtime, re-evaluates every pointwise and
//! stateful machine in definition order (publishing each result into the
//! machine's global value cell), invokes the user-visible
//! `main :: World -> World` when present, sleeps the configured tick
//! interval, and jumps back to itself.

use tracing::debug;

use crate::base::NecroBase;
use crate::config::CompilerConfig;
use crate::core::{CoreAstKind, CoreModule, StateType};
use crate::intern::Intern;
use crate::mach::ast::{CallKind, DefId, FnDef, MachProgram, MachValue, SymbolBinding};
use crate::mach::build::FnBuilder;
use crate::mach::error::MachError;
use crate::mach::runtime::RuntimeFn;
use crate::mach::types::MachType;
use crate::mach::{data, lower, state, verify};

/// Lower a monomorphized, lambda-lifted Core module into a verified
/// machine program.
pub fn transform(
    module: &CoreModule,
    base: &NecroBase,
    intern: Intern,
    config: &CompilerConfig,
) -> Result<MachProgram, MachError> {
    let mut program = MachProgram::new(intern, config);
    base.install(&mut program, module);
    data::run(&mut program, module)?;
    let slots = state::run(&mut program, module)?;
    lower::run(&mut program, module, &slots)?;
    construct_main(&mut program, module)?;
    verify::verify_program(&program)?;
    debug!(
        structs = program.structs.len(),
        machines = program.machine_defs.len(),
        "mach lowering complete"
    );
    Ok(program)
}

/// Find the machine def of the user-visible `main :: World -> World`.
fn find_program_main(program: &MachProgram, module: &CoreModule) -> Option<DefId> {
    for &top in &module.top {
        if let CoreAstKind::Bind { symbol, .. } = &module.nodes[top].kind
            && program.core_symbol_name(module, *symbol) == "main"
            && let Some(mach) = program.mach_symbol_of_core(*symbol)
            && let SymbolBinding::Def(def_id) = program.symbols[mach].binding
        {
            return Some(def_id);
        }
    }
    None
}

pub(crate) fn construct_main(
    program: &mut MachProgram,
    module: &CoreModule,
) -> Result<(), MachError> {
    program.program_main = find_program_main(program, module);

    // The user main is driven directly by the tick loop, so its state also
    // lives in a global cell even though it takes the world argument.
    if let Some(main_id) = program.program_main
        && program.machine_defs[main_id].uses_state()
        && program.machine_defs[main_id].global_state.is_none()
    {
        let state_struct = program.machine_defs[main_id]
            .state_struct
            .clone()
            .expect("stateful machine has a state struct");
        let state_name = program.machine_defs[main_id].state_name;
        let cell_ty = MachType::ptr(MachType::ptr(state_struct));
        let global_state = program.value_global(state_name, cell_ty);
        program.machine_defs[main_id].global_state = Some(global_state.clone());
        program.add_global(global_state);
    }

    let main_symbol = program.gen_symbol("_necro_main");
    let main_ty = MachType::func(MachType::Void, vec![]);
    let mut necro_main = FnDef::new(program, main_symbol, main_ty);

    let loop_block = {
        let mut b = FnBuilder::new(program, &mut necro_main);
        b.block_append("loop")
    };

    // Machines whose state the tick loop owns: argless machines with
    // members, plus the user main.
    let driven: Vec<DefId> = program
        .top_level_defs()
        .filter(|&id| {
            let def = &program.machine_defs[id];
            def.uses_state() && (def.num_args() == 0 || Some(id) == program.program_main)
        })
        .collect();
    let argless: Vec<DefId> = program
        .top_level_defs()
        .filter(|&id| program.machine_defs[id].num_args() == 0)
        .collect();

    //--------------------
    // entry
    //--------------------
    {
        let init_runtime = program.runtime_value(RuntimeFn::InitRuntime);
        let init_roots = program.runtime_value(RuntimeFn::GcInitRootSet);
        let set_root = program.runtime_value(RuntimeFn::GcSetRoot);
        let mut b = FnBuilder::new(program, &mut necro_main);
        b.build_call(&init_runtime, &[], CallKind::C, "");

        // Register every live-state cell as a collector root.
        let root_count = b.program.value_word_uint(driven.len() as u64);
        b.build_call(&init_roots, &[root_count], CallKind::C, "");
        for (root_index, &def_id) in driven.iter().enumerate() {
            let mk = b.program.machine_defs[def_id]
                .mk_fn
                .as_ref()
                .expect("driven machine has a mk")
                .fn_value
                .clone();
            let global_state = b.program.machine_defs[def_id]
                .global_state
                .clone()
                .expect("driven machine has a global state cell");
            let state = b.build_call(&mk, &[], CallKind::Lang, "state");
            b.build_store(&state, &global_state);

            let uword = b.program.word_uint_type();
            let root_cell = b.build_bit_cast(
                &global_state,
                MachType::ptr(MachType::ptr(uword)),
            );
            let index_value = b.program.value_word_uint(root_index as u64);
            let data_id = b.program.value_word_uint(def_id.index() as u64);
            b.build_call(&set_root, &[root_cell, index_value, data_id], CallKind::C, "");
        }

        // One-shot constants evaluate exactly once, before the loop.
        for &def_id in &argless {
            if b.program.machine_defs[def_id].state_type != StateType::Constant {
                continue;
            }
            emit_update_and_publish(&mut b, def_id, "constant_result");
        }
        b.build_break(loop_block);
    }

    //--------------------
    // loop
    //--------------------
    {
        let update_runtime = program.runtime_value(RuntimeFn::UpdateRuntime);
        let sleep = program.runtime_value(RuntimeFn::Sleep);
        let tick_ms = program.tick_ms;
        let mut b = FnBuilder::new(program, &mut necro_main);
        b.block_move_to(loop_block);
        b.build_call(&update_runtime, &[], CallKind::C, "");

        for &def_id in &argless {
            if b.program.machine_defs[def_id].state_type == StateType::Constant {
                continue;
            }
            let name = if b.program.machine_defs[def_id].uses_state() {
                "stateful_result"
            } else {
                "pointwise_result"
            };
            emit_update_and_publish(&mut b, def_id, name);
        }

        // main :: World -> World runs last, on a unit-like world token.
        if let Some(main_id) = b.program.program_main {
            let update = b.program.machine_defs[main_id]
                .update_fn
                .as_ref()
                .expect("main has an update function")
                .fn_value
                .clone();
            let world = b.program.value_word_uint(0);
            if b.program.machine_defs[main_id].uses_state() {
                let global_state = b.program.machine_defs[main_id]
                    .global_state
                    .clone()
                    .expect("stateful main has a global state cell");
                let state = b.build_load(&global_state, "state");
                b.build_call(&update, &[state, world], CallKind::Lang, "main_result");
            } else {
                b.build_call(&update, &[world], CallKind::Lang, "main_result");
            }
        }

        b.build_call(&sleep, &[MachValue::u32(tick_ms)], CallKind::C, "");
        b.build_break(loop_block);
    }

    program.necro_main = Some(necro_main);
    Ok(())
}

/// Call a machine's update (threading its loaded state if it has any) and
/// store the result into its global value cell.
fn emit_update_and_publish(b: &mut FnBuilder<'_>, def_id: DefId, result_name: &str) {
    let update = b.program.machine_defs[def_id]
        .update_fn
        .as_ref()
        .expect("driven machine has an update function")
        .fn_value
        .clone();
    let global_value = b.program.machine_defs[def_id]
        .global_value
        .clone()
        .expect("argless machine has a global value cell");
    let result = if b.program.machine_defs[def_id].uses_state() {
        let global_state = b.program.machine_defs[def_id]
            .global_state
            .clone()
            .expect("stateful machine has a global state cell");
        let state = b.build_load(&global_state, "state");
        b.build_call(&update, &[state], CallKind::Lang, result_name)
    } else {
        b.build_call(&update, &[], CallKind::Lang, result_name)
    };
    b.build_store(&result, &global_value);
}

/// Convenience entry mirroring the typical frontend handoff.
pub fn compile(
    module: &CoreModule,
    base: &NecroBase,
    intern: Intern,
) -> Result<MachProgram, MachError> {
    transform(module, base, intern, &CompilerConfig::default())
}

//! Pass 3: update-function synthesis.
//!
//! Every top-level binding gets an `_updateFoo` function: parameters are
//! the state pointer (present iff the machine has members) followed by the
//! binding's own arguments, and the return type is the binding's value
//! type, pointer-wrapped if boxed. Expression lowering is three-address:
//! each Core expression produces one machine value in the current block.
//!
//! Variable references dispatch on what the name is bound to: enum
//! constructors become tag literals, nullary constructors build into their
//! persistent slot, globals load their cell, nested stateful children gep
//! into the state record (loading scalars and pointers, otherwise handing
//! back the raw pointer into state - the shallow read the runtime
//! currently expects), and locals are the registers already produced.
//! Applications peel arguments right to left and prepend a state gep when
//! the callee carries state.

use tracing::debug;

use crate::core::{CoreAstKind, CoreId, CoreLit, CoreModule, CoreSymbolId};
use crate::mach::ast::{
    CallKind, DefId, FnDef, MachProgram, MachValue, MachValueKind, SymbolBinding,
};
use crate::mach::build::FnBuilder;
use crate::mach::case;
use crate::mach::error::MachError;
use crate::mach::state::SlotMap;
use crate::mach::types::MachType;

/// Read-only context threaded through expression lowering.
pub(crate) struct LowerCtx<'m> {
    pub module: &'m CoreModule,
    pub slots: &'m SlotMap,
}

pub(crate) fn run(
    program: &mut MachProgram,
    module: &CoreModule,
    slots: &SlotMap,
) -> Result<(), MachError> {
    debug!("mach pass 3: update synthesis");
    let ctx = LowerCtx { module, slots };
    for &top in &module.top {
        match &module.nodes[top].kind {
            CoreAstKind::Bind { symbol, expr } => {
                lower_top_bind(&ctx, program, *symbol, *expr)?;
            }
            CoreAstKind::DataDecl { .. } => {}
            CoreAstKind::BindRec { .. } => {
                return Err(MachError::Unimplemented("recursive binding groups"));
            }
            other => {
                return Err(MachError::UnresolvedSymbol(format!(
                    "unexpected top-level Core node: {:?}",
                    other
                )));
            }
        }
    }
    Ok(())
}

fn lower_top_bind(
    ctx: &LowerCtx<'_>,
    program: &mut MachProgram,
    core_symbol: CoreSymbolId,
    expr: CoreId,
) -> Result<(), MachError> {
    if ctx.module.symbols[core_symbol].is_primitive {
        return Ok(());
    }
    let mach = program
        .mach_symbol_of_core(core_symbol)
        .ok_or_else(|| MachError::UnresolvedSymbol(program.core_symbol_name(ctx.module, core_symbol)))?;
    let SymbolBinding::Def(def_id) = program.symbols[mach].binding else {
        return Err(MachError::UnresolvedSymbol(
            program.symbol_name(mach).to_string(),
        ));
    };

    let uses_state = program.machine_defs[def_id].uses_state();
    let source_name = program.symbol_name(mach).to_string();

    // _updateFoo(state_ptr?, arg0, ..., argK) -> value
    let mut params = Vec::new();
    if uses_state {
        let state_struct = program.machine_defs[def_id]
            .state_struct
            .clone()
            .expect("stateful machine has a state struct");
        params.push(MachType::ptr(state_struct));
    }
    if let Some(fn_ty) = program.machine_defs[def_id].fn_type.clone() {
        params.extend(fn_ty.expect_fn().params.iter().cloned());
    }
    let value_type = program.machine_defs[def_id].value_type.clone();
    let ret = program.make_ptr_if_boxed(&value_type);

    let update_symbol = program.gen_symbol(&format!(
        "_update{}",
        crate::mach::ast::capitalized(&source_name)
    ));
    let mut update_fn = FnDef::new(program, update_symbol, MachType::func(ret, params));
    update_fn.state_type = program.machine_defs[def_id].state_type;

    // Arguments were bound at function entry.
    let arg_names = program.machine_defs[def_id].arg_names.clone();
    let offset = usize::from(uses_state);
    for (i, &arg) in arg_names.iter().enumerate() {
        let param = update_fn.param_value(i + offset);
        program.symbols[arg].binding = SymbolBinding::Value(param);
    }

    let result = lower_expr(ctx, program, &mut update_fn, def_id, expr)?;
    {
        let mut b = FnBuilder::new(program, &mut update_fn);
        b.build_return(result);
    }
    program.machine_defs[def_id].update_fn = Some(update_fn);
    debug!(name = %source_name, "lowered update function");
    Ok(())
}

/// Lower one Core expression to a machine value in the current block.
pub(crate) fn lower_expr(
    ctx: &LowerCtx<'_>,
    program: &mut MachProgram,
    fn_def: &mut FnDef,
    outer: DefId,
    id: CoreId,
) -> Result<MachValue, MachError> {
    match &ctx.module.nodes[id].kind {
        CoreAstKind::Lit(lit) => Ok(lower_lit(program, *lit)),
        CoreAstKind::Var { symbol } => lower_var(ctx, program, fn_def, outer, id, *symbol),
        CoreAstKind::App { .. } => lower_app(ctx, program, fn_def, outer, id),
        CoreAstKind::Lam { expr, .. } => lower_expr(ctx, program, fn_def, outer, *expr),
        CoreAstKind::Let { bind, expr } => {
            lower_expr(ctx, program, fn_def, outer, *bind)?;
            lower_expr(ctx, program, fn_def, outer, *expr)
        }
        CoreAstKind::Bind { symbol, expr } => {
            lower_nested_bind(ctx, program, fn_def, outer, *symbol, *expr)
        }
        CoreAstKind::Case { .. } => case::lower_case(ctx, program, fn_def, outer, id),
        CoreAstKind::BindRec { .. } => Err(MachError::Unimplemented("recursive binding groups")),
        CoreAstKind::For { .. } => Err(MachError::Unimplemented("for loops")),
        CoreAstKind::DataDecl { .. } | CoreAstKind::DataCon { .. } => Err(
            MachError::UnresolvedSymbol("data declaration in expression position".to_string()),
        ),
    }
}

fn lower_lit(program: &MachProgram, lit: CoreLit) -> MachValue {
    match lit {
        CoreLit::Int(i) => program.value_word_int(i),
        CoreLit::Float(f) => program.value_word_float(f),
        CoreLit::Char(c) => program.value_word_uint(c as u64),
    }
}

fn lower_var(
    ctx: &LowerCtx<'_>,
    program: &mut MachProgram,
    fn_def: &mut FnDef,
    outer: DefId,
    var_id: CoreId,
    core_symbol: CoreSymbolId,
) -> Result<MachValue, MachError> {
    let mach = program.mach_symbol_for_core(ctx.module, core_symbol);
    let is_constructor = program.symbols[mach].is_constructor;

    // Enum constructors are bare tag values.
    if program.symbols[mach].is_enum {
        let con_num = program.symbols[mach].con_num;
        return Ok(program.value_word_uint(con_num as u64));
    }

    match program.symbols[mach].binding.clone() {
        // A nullary constructor builds into its persistent slot.
        SymbolBinding::Fn(fn_id) if is_constructor => {
            let slot = *ctx.slots.get(&var_id).ok_or_else(|| {
                MachError::UnresolvedSymbol(program.symbol_name(mach).to_string())
            })?;
            let callee = program.functions[fn_id].fn_value.clone();
            let param0 = fn_def.param_value(0);
            let mut b = FnBuilder::new(program, fn_def);
            let value_ptr = b.build_gep(&param0, &[0, slot as u32], "prs");
            Ok(b.build_call(&callee, &[value_ptr], CallKind::Lang, "con"))
        }
        // Runtime-owned global cells load their current value.
        SymbolBinding::Value(value) if matches!(value.kind, MachValueKind::Global { .. }) => {
            let mut b = FnBuilder::new(program, fn_def);
            Ok(b.build_load(&value, "glb"))
        }
        // A nested stateful child persists in the enclosing state record.
        // Scalars and pointers load; anything else hands back the pointer
        // into state (a shallow read the next tick may overwrite).
        SymbolBinding::Def(d)
            if program.machine_defs[d].state_type == crate::core::StateType::Stateful
                && program.machine_defs[d].outer.is_some() =>
        {
            let slot = program.machine_defs[d].persistent_slot.ok_or_else(|| {
                MachError::UnresolvedSymbol(program.symbol_name(mach).to_string())
            })?;
            let slot_ty = program.machine_defs[outer].members[slot].ty.clone();
            let param0 = fn_def.param_value(0);
            let mut b = FnBuilder::new(program, fn_def);
            let value_ptr = b.build_gep(&param0, &[0, slot as u32], "prs");
            if b.program.is_unboxed(&slot_ty) || slot_ty.is_ptr() {
                Ok(b.build_load(&value_ptr, "val"))
            } else {
                Ok(value_ptr)
            }
        }
        // Locals and parameters are already values.
        SymbolBinding::Value(value) => Ok(value),
        // A top-level machine's latest value is published in its global.
        SymbolBinding::Def(d) => {
            let global = program.machine_defs[d].global_value.clone().ok_or_else(|| {
                MachError::UnresolvedSymbol(program.symbol_name(mach).to_string())
            })?;
            let mut b = FnBuilder::new(program, fn_def);
            Ok(b.build_load(&global, "glb"))
        }
        SymbolBinding::Fn(_) | SymbolBinding::None => Err(MachError::UnresolvedSymbol(
            program.symbol_name(mach).to_string(),
        )),
    }
}

fn lower_app(
    ctx: &LowerCtx<'_>,
    program: &mut MachProgram,
    fn_def: &mut FnDef,
    outer: DefId,
    app_id: CoreId,
) -> Result<MachValue, MachError> {
    // Collect argument nodes; the spine yields them outermost (last) first.
    let mut arg_nodes = Vec::new();
    let mut cursor = app_id;
    while let CoreAstKind::App { func, arg } = &ctx.module.nodes[cursor].kind {
        arg_nodes.push(*arg);
        cursor = *func;
    }
    let CoreAstKind::Var { symbol } = &ctx.module.nodes[cursor].kind else {
        return Err(MachError::UnresolvedSymbol(
            "application head is not a variable".to_string(),
        ));
    };
    let mach = program.mach_symbol_for_core(ctx.module, *symbol);

    // Math primitives lower to intrinsic calls, no state involved.
    if let Some(intrinsic) = program.symbols[mach].intrinsic {
        let mut args = Vec::with_capacity(arg_nodes.len());
        for &node in arg_nodes.iter().rev() {
            args.push(lower_expr(ctx, program, fn_def, outer, node)?);
        }
        let mut b = FnBuilder::new(program, fn_def);
        return Ok(b.build_call_intrinsic(intrinsic, &args, "app"));
    }

    let (callee, call_kind, uses_state) = match program.symbols[mach].binding.clone() {
        SymbolBinding::Def(d) => {
            let callee = program.machine_defs[d]
                .update_fn
                .as_ref()
                .map(|f| f.fn_value.clone())
                .ok_or_else(|| {
                    MachError::UnresolvedSymbol(program.symbol_name(mach).to_string())
                })?;
            (callee, CallKind::Lang, program.machine_defs[d].uses_state())
        }
        SymbolBinding::Fn(f) if program.symbols[mach].is_constructor => {
            (program.functions[f].fn_value.clone(), CallKind::Lang, true)
        }
        SymbolBinding::Fn(f) => {
            let kind = match program.functions[f].kind {
                crate::mach::ast::FnKind::RuntimeC => CallKind::C,
                crate::mach::ast::FnKind::Lang => CallKind::Lang,
            };
            (program.functions[f].fn_value.clone(), kind, false)
        }
        SymbolBinding::Value(value) if value.ty.as_fn().is_some() => {
            (value, CallKind::Lang, false)
        }
        _ => {
            return Err(MachError::UnresolvedSymbol(
                program.symbol_name(mach).to_string(),
            ));
        }
    };

    // Arguments evaluate right to left, filling positions back to front.
    let state_offset = usize::from(uses_state);
    let mut args: Vec<Option<MachValue>> = vec![None; arg_nodes.len() + state_offset];
    for (peeled, &node) in arg_nodes.iter().enumerate() {
        let position = args.len() - 1 - peeled;
        args[position] = Some(lower_expr(ctx, program, fn_def, outer, node)?);
    }

    // A stateful callee receives a pointer to its sub-region first.
    if uses_state {
        let slot = *ctx.slots.get(&app_id).ok_or_else(|| {
            MachError::UnresolvedSymbol(program.symbol_name(mach).to_string())
        })?;
        let param0 = fn_def.param_value(0);
        let mut b = FnBuilder::new(program, fn_def);
        args[0] = Some(b.build_gep(&param0, &[0, slot as u32], "state"));
    }

    let args: Vec<MachValue> = args
        .into_iter()
        .map(|a| a.expect("every argument position is filled"))
        .collect();
    let mut b = FnBuilder::new(program, fn_def);
    Ok(b.build_call(&callee, &args, call_kind, "app"))
}

/// A nested binding either persists its per-tick value into its slot or
/// simply names the lowered value.
fn lower_nested_bind(
    ctx: &LowerCtx<'_>,
    program: &mut MachProgram,
    fn_def: &mut FnDef,
    outer: DefId,
    core_symbol: CoreSymbolId,
    expr: CoreId,
) -> Result<MachValue, MachError> {
    if ctx.module.symbols[core_symbol].is_primitive {
        return Err(MachError::UnresolvedSymbol(
            "primitive in nested binding position".to_string(),
        ));
    }
    let mach = program.mach_symbol_for_core(ctx.module, core_symbol);
    let value = lower_expr(ctx, program, fn_def, outer, expr)?;

    if let SymbolBinding::Def(d) = program.symbols[mach].binding
        && let Some(slot) = program.machine_defs[d].persistent_slot
    {
        let param0 = fn_def.param_value(0);
        let mut b = FnBuilder::new(program, fn_def);
        let slot_ptr = b.build_gep(&param0, &[0, slot as u32], "prs");
        b.build_store(&value, &slot_ptr);
        return Ok(value);
    }

    program.symbols[mach].binding = SymbolBinding::Value(value.clone());
    Ok(value)
}

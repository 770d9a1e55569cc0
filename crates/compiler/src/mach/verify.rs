//! Structural verification of a finished machine program.
//!
//! The verifier re-checks, after the fact, the invariants the builders
//! enforce during construction, plus the whole-program properties no
//! single builder can see: block termination, call/store typing, the
//! mk/init/members agreement, state struct layout pairing, gep index
//! discipline, and persistent slot bounds. It returns an error instead of
//! asserting so property tests can observe violations.

use crate::mach::ast::{
    Block, FnDef, FnKind, MachInstr, MachProgram, MachValue, MachValueKind, SlotOwner, Terminator,
};
use crate::mach::error::MachError;
use crate::mach::types::{MachType, type_is_eq};

pub fn verify_program(program: &MachProgram) -> Result<(), MachError> {
    for (_, fn_def) in program.functions.iter() {
        if fn_def.kind == FnKind::Lang {
            verify_fn(program, fn_def)?;
        }
    }
    for def_id in program.machine_defs.ids() {
        let def = &program.machine_defs[def_id];
        for fn_def in [&def.mk_fn, &def.init_fn, &def.update_fn]
            .into_iter()
            .flatten()
        {
            verify_fn(program, fn_def)?;
        }
        verify_machine_def(program, def_id)?;
    }
    if let Some(main) = &program.necro_main {
        verify_fn(program, main)?;
    }
    Ok(())
}

fn fail(fn_name: &str, what: impl std::fmt::Display) -> MachError {
    MachError::Verify(format!("in {}: {}", fn_name, what))
}

fn verify_fn(program: &MachProgram, fn_def: &FnDef) -> Result<(), MachError> {
    let name = program.symbol_name(fn_def.symbol);
    for &block_id in &fn_def.order {
        let block = &fn_def.blocks[block_id];
        verify_block(program, fn_def, name, block)?;
    }
    Ok(())
}

fn verify_block(
    program: &MachProgram,
    fn_def: &FnDef,
    fn_name: &str,
    block: &Block,
) -> Result<(), MachError> {
    let block_name = program.symbol_name(block.symbol);

    // Exactly one terminator, present after emission completes.
    match &block.terminator {
        None => {
            return Err(fail(
                fn_name,
                format_args!("block {} has no terminator", block_name),
            ));
        }
        Some(Terminator::Return(value)) => {
            if !type_is_eq(&fn_def.ty.expect_fn().ret, &value.ty) {
                return Err(fail(
                    fn_name,
                    format_args!("block {} returns a mistyped value", block_name),
                ));
            }
        }
        Some(Terminator::CondBreak { cond, .. }) => {
            if !type_is_eq(&cond.ty, &MachType::U1) {
                return Err(fail(
                    fn_name,
                    format_args!("block {} branches on a non-u1 condition", block_name),
                ));
            }
        }
        Some(_) => {}
    }

    let mut seen_non_phi = false;
    for instr in &block.statements {
        if matches!(instr, MachInstr::Phi { .. }) {
            if seen_non_phi {
                return Err(fail(
                    fn_name,
                    format_args!("block {} has a phi below other statements", block_name),
                ));
            }
        } else {
            seen_non_phi = true;
        }
        verify_instr(program, fn_name, block_name, instr)?;
    }
    Ok(())
}

fn verify_value(fn_name: &str, value: &MachValue) -> Result<(), MachError> {
    // Every operand carries a type; void is only legal as a call result.
    if matches!(value.kind, MachValueKind::Void) && !matches!(value.ty, MachType::Void) {
        return Err(fail(fn_name, "void value with a non-void type"));
    }
    Ok(())
}

fn verify_instr(
    program: &MachProgram,
    fn_name: &str,
    block_name: &str,
    instr: &MachInstr,
) -> Result<(), MachError> {
    match instr {
        MachInstr::Gep {
            source,
            indices,
            dest,
        } => {
            verify_value(fn_name, source)?;
            let mut ty = source.ty.clone();
            for (i, &index) in indices.iter().enumerate() {
                ty = match &ty {
                    MachType::Ptr(elem) => {
                        if i != 0 || index != 0 {
                            return Err(fail(
                                fn_name,
                                format_args!(
                                    "block {}: gep through a pointer needs a leading zero index",
                                    block_name
                                ),
                            ));
                        }
                        (**elem).clone()
                    }
                    MachType::Struct(s) => {
                        if (index as usize) >= s.members.len() {
                            return Err(fail(
                                fn_name,
                                format_args!(
                                    "block {}: gep index {} out of range",
                                    block_name, index
                                ),
                            ));
                        }
                        s.members[index as usize].clone()
                    }
                    MachType::Array { elem, .. } => (**elem).clone(),
                    _ => {
                        return Err(fail(
                            fn_name,
                            format_args!("block {}: gep through a scalar", block_name),
                        ));
                    }
                };
            }
            if !type_is_eq(&dest.ty, &MachType::ptr(ty)) {
                return Err(fail(
                    fn_name,
                    format_args!("block {}: gep result type disagrees", block_name),
                ));
            }
            Ok(())
        }
        MachInstr::Load { source, dest } => {
            if !source.ty.is_ptr() {
                return Err(fail(
                    fn_name,
                    format_args!("block {}: load from a non-pointer", block_name),
                ));
            }
            if !type_is_eq(source.ty.pointee(), &dest.ty) {
                return Err(fail(
                    fn_name,
                    format_args!("block {}: load result type disagrees", block_name),
                ));
            }
            Ok(())
        }
        MachInstr::Store { value, dest } => {
            if !dest.ty.is_ptr() || !type_is_eq(&value.ty, dest.ty.pointee()) {
                return Err(fail(
                    fn_name,
                    format_args!("block {}: store type disagrees with destination", block_name),
                ));
            }
            Ok(())
        }
        MachInstr::Call { callee, args, .. } => {
            let Some(fn_ty) = callee.ty.as_fn() else {
                return Err(fail(
                    fn_name,
                    format_args!("block {}: call of a non-function", block_name),
                ));
            };
            if fn_ty.params.len() != args.len() {
                return Err(fail(
                    fn_name,
                    format_args!("block {}: call argument count disagrees", block_name),
                ));
            }
            for (param, arg) in fn_ty.params.iter().zip(args.iter()) {
                verify_value(fn_name, arg)?;
                if !type_is_eq(param, &arg.ty) {
                    return Err(fail(
                        fn_name,
                        format_args!("block {}: call argument type disagrees", block_name),
                    ));
                }
            }
            Ok(())
        }
        MachInstr::Phi { incoming, dest } => {
            for (_, value) in incoming {
                if !type_is_eq(&value.ty, &dest.ty) {
                    return Err(fail(
                        fn_name,
                        format_args!("block {}: phi incoming type disagrees", block_name),
                    ));
                }
            }
            Ok(())
        }
        MachInstr::Cmp { dest, left, right, .. } => {
            if !type_is_eq(&dest.ty, &MachType::U1) || !type_is_eq(&left.ty, &right.ty) {
                return Err(fail(
                    fn_name,
                    format_args!("block {}: malformed comparison", block_name),
                ));
            }
            Ok(())
        }
        MachInstr::BinOp { left, right, dest, .. } => {
            if !type_is_eq(&left.ty, &right.ty) || !type_is_eq(&left.ty, &dest.ty) {
                return Err(fail(
                    fn_name,
                    format_args!("block {}: malformed binary op", block_name),
                ));
            }
            Ok(())
        }
        MachInstr::MemCpy { dest, source, bytes } => {
            if !dest.ty.is_ptr() || !source.ty.is_ptr() || !program.is_word_uint(&bytes.ty) {
                return Err(fail(
                    fn_name,
                    format_args!("block {}: malformed memcpy", block_name),
                ));
            }
            Ok(())
        }
        MachInstr::MemSet { ptr, value, bytes } => {
            if !ptr.ty.is_ptr()
                || !type_is_eq(&value.ty, &MachType::U8)
                || !program.is_word_uint(&bytes.ty)
            {
                return Err(fail(
                    fn_name,
                    format_args!("block {}: malformed memset", block_name),
                ));
            }
            Ok(())
        }
        MachInstr::BitCast { .. }
        | MachInstr::ZExt { .. }
        | MachInstr::UOp { .. }
        | MachInstr::InsertValue { .. }
        | MachInstr::ExtractValue { .. }
        | MachInstr::CallIntrinsic { .. } => Ok(()),
    }
}

fn verify_machine_def(
    program: &MachProgram,
    def_id: crate::mach::ast::DefId,
) -> Result<(), MachError> {
    let def = &program.machine_defs[def_id];
    let name = program.symbol_name(def.symbol);

    // mk and init exist exactly when the machine owns state.
    let has_members = !def.members.is_empty();
    if def.mk_fn.is_some() != has_members || def.init_fn.is_some() != has_members {
        return Err(MachError::Verify(format!(
            "machine {}: mk/init presence disagrees with its members",
            name
        )));
    }

    // The state struct mirrors the member slots one for one.
    if let Some(state_struct) = &def.state_struct {
        let members = &state_struct
            .as_struct()
            .ok_or_else(|| {
                MachError::Verify(format!("machine {}: state type is not a struct", name))
            })?
            .members;
        if members.len() != def.members.len() {
            return Err(MachError::Verify(format!(
                "machine {}: state struct arity disagrees with its slots",
                name
            )));
        }
        for (i, (struct_member, slot)) in members.iter().zip(def.members.iter()).enumerate() {
            if !type_is_eq(struct_member, &slot.ty) {
                return Err(MachError::Verify(format!(
                    "machine {}: state member {} type disagrees with its slot",
                    name, i
                )));
            }
        }
    } else if has_members {
        return Err(MachError::Verify(format!(
            "machine {}: members without a state struct",
            name
        )));
    }

    // Recorded slots stay in range of their owning machine.
    if let Some(slot) = def.persistent_slot {
        let Some(outer) = def.outer else {
            return Err(MachError::Verify(format!(
                "machine {}: persistent slot on a top-level machine",
                name
            )));
        };
        if slot >= program.machine_defs[outer].members.len() {
            return Err(MachError::Verify(format!(
                "machine {}: persistent slot {} out of range",
                name, slot
            )));
        }
    }
    for (i, slot) in def.members.iter().enumerate() {
        if let SlotOwner::Def(owner) = slot.owner
            && program.machine_defs.get(owner).is_none()
        {
            return Err(MachError::Verify(format!(
                "machine {}: slot {} owned by a dangling machine",
                name, i
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::intern::Intern;
    use crate::mach::ast::FnDef;
    use crate::mach::build::FnBuilder;

    fn test_program() -> MachProgram {
        MachProgram::new(Intern::new(), &CompilerConfig::default())
    }

    #[test]
    fn test_unterminated_block_reported() {
        let mut program = test_program();
        let symbol = program.gen_symbol("f");
        let ty = MachType::func(MachType::Void, vec![]);
        let f = FnDef::new(&mut program, symbol, ty);
        program.add_function(f);
        let err = verify_program(&program).unwrap_err();
        assert!(err.to_string().contains("no terminator"));
    }

    #[test]
    fn test_well_formed_function_passes() {
        let mut program = test_program();
        let symbol = program.gen_symbol("g");
        let ty = MachType::func(MachType::U64, vec![MachType::ptr(MachType::U64)]);
        let mut f = FnDef::new(&mut program, symbol, ty);
        {
            let mut b = FnBuilder::new(&mut program, &mut f);
            let p = b.param(0);
            let v = b.build_load(&p, "val");
            b.build_return(v);
        }
        program.add_function(f);
        verify_program(&program).unwrap();
    }

    #[test]
    fn test_hand_built_bad_store_reported() {
        let mut program = test_program();
        let symbol = program.gen_symbol("h");
        let ty = MachType::func(MachType::Void, vec![MachType::ptr(MachType::U64)]);
        let mut f = FnDef::new(&mut program, symbol, ty);
        let p = f.param_value(0);
        let bad = MachValue {
            kind: MachValueKind::I64(1),
            ty: MachType::I64,
        };
        // Bypass the builder to fabricate the corruption it would reject.
        let entry = f.entry_block();
        f.blocks[entry].statements.push(MachInstr::Store {
            value: bad,
            dest: p,
        });
        f.blocks[entry].terminator = Some(Terminator::ReturnVoid);
        program.add_function(f);
        let err = verify_program(&program).unwrap_err();
        assert!(err.to_string().contains("store type disagrees"));
    }

    #[test]
    fn test_gep_leading_index_discipline() {
        let mut program = test_program();
        let symbol = program.gen_symbol("k");
        let ty = MachType::func(MachType::Void, vec![MachType::ptr(MachType::U64)]);
        let mut f = FnDef::new(&mut program, symbol, ty);
        let p = f.param_value(0);
        let dest = program.value_reg(MachType::ptr(MachType::U64), "bad");
        let entry = f.entry_block();
        f.blocks[entry].statements.push(MachInstr::Gep {
            source: p,
            indices: vec![1],
            dest,
        });
        f.blocks[entry].terminator = Some(Terminator::ReturnVoid);
        program.add_function(f);
        let err = verify_program(&program).unwrap_err();
        assert!(err.to_string().contains("leading zero index"));
    }
}

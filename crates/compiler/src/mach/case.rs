//! Case-expression lowering.
//!
//! A case on scrutinee `s` becomes a tag dispatch: enums switch directly on
//! their word value, sums load the tag at slot 0 and switch on that. Each
//! constructor arm runs in its own block, bit-casting the scrutinee
//! pointer to the matching variant layout and binding sub-pattern
//! variables by gep into the variant's fields; nested constructor
//! sub-patterns chain further tag checks toward the default block. A
//! wildcard or variable arm becomes the switch's default; with no default
//! the frontend has guaranteed exhaustiveness and the else block is
//! `Unreachable`. All arms converge on a join block through a phi of the
//! arm results.

use crate::core::{CoreAlt, CoreAstKind, CoreId, CoreLit, CorePattern, CoreSymbolId};
use crate::mach::ast::{
    BlockId, CmpOp, DefId, FnDef, MachProgram, MachValue, SymbolBinding,
};
use crate::mach::build::FnBuilder;
use crate::mach::error::MachError;
use crate::mach::lower::{LowerCtx, lower_expr};
use crate::mach::types::{MachType, type_is_eq};

pub(crate) fn lower_case(
    ctx: &LowerCtx<'_>,
    program: &mut MachProgram,
    fn_def: &mut FnDef,
    outer: DefId,
    case_id: CoreId,
) -> Result<MachValue, MachError> {
    let CoreAstKind::Case {
        expr,
        alts,
        result_type,
    } = &ctx.module.nodes[case_id].kind
    else {
        unreachable!("lower_case on a non-case node");
    };

    let scrutinee = lower_expr(ctx, program, fn_def, outer, *expr)?;
    let result_ty = {
        let raw = program.mach_type_from_necro(ctx.module, result_type)?;
        program.make_ptr_if_boxed(&raw)
    };

    // Split the alternatives: at most one wildcard/variable arm becomes
    // the default; the rest dispatch on a tag value.
    let mut default_alt: Option<&CoreAlt> = None;
    let mut con_alts: Vec<&CoreAlt> = Vec::new();
    for alt in alts {
        match &alt.pattern {
            CorePattern::Wildcard | CorePattern::Var(_) => {
                if default_alt.is_none() {
                    default_alt = Some(alt);
                }
            }
            _ => con_alts.push(alt),
        }
    }

    // Blocks: one per constructor arm, a default, and the join point.
    let mut arm_blocks: Vec<BlockId> = Vec::with_capacity(con_alts.len());
    let (else_block, join_block) = {
        let mut b = FnBuilder::new(program, fn_def);
        for _ in 0..con_alts.len() {
            arm_blocks.push(b.block_append("case_alt"));
        }
        let else_block = b.block_append("case_else");
        let join_block = b.block_append("case_join");

        // The dispatch value: enums are already bare words, integer
        // scrutinees reinterpret as words, sums carry their tag at slot 0.
        let tag = if b.program.is_word_uint(&scrutinee.ty) {
            scrutinee.clone()
        } else if type_is_eq(&scrutinee.ty, &b.program.word_int_type()) {
            let uword = b.program.word_uint_type();
            b.build_bit_cast(&scrutinee, uword)
        } else {
            let tag_ptr = b.build_gep(&scrutinee, &[0, 0], "tag");
            b.build_load(&tag_ptr, "tag_val")
        };
        let mut cases = Vec::with_capacity(con_alts.len());
        for (alt, &block) in con_alts.iter().zip(arm_blocks.iter()) {
            cases.push((pattern_tag_value(b.program, ctx, &alt.pattern)?, block));
        }
        b.build_switch(&tag, cases, else_block);
        (else_block, join_block)
    };

    // The join phi is built first, at the top of its block, and fed one
    // incoming edge per arm as they finish.
    let (result, phi) = {
        let mut b = FnBuilder::new(program, fn_def);
        b.block_move_to(join_block);
        b.build_phi(result_ty, "case_result")
    };

    for (alt, &block) in con_alts.iter().zip(arm_blocks.iter()) {
        {
            let mut b = FnBuilder::new(program, fn_def);
            b.block_move_to(block);
        }
        bind_arm_pattern(ctx, program, fn_def, &scrutinee, &alt.pattern, else_block)?;
        let value = lower_expr(ctx, program, fn_def, outer, alt.body)?;
        let mut b = FnBuilder::new(program, fn_def);
        let incoming_block = b.fn_def.current.expect("arm lowering leaves a cursor");
        b.add_incoming(phi, incoming_block, value);
        b.build_break(join_block);
    }

    {
        let mut b = FnBuilder::new(program, fn_def);
        b.block_move_to(else_block);
    }
    match default_alt {
        Some(alt) => {
            if let CorePattern::Var(symbol) = &alt.pattern {
                let mach = program.mach_symbol_for_core(ctx.module, *symbol);
                program.symbols[mach].binding = SymbolBinding::Value(scrutinee.clone());
            }
            let value = lower_expr(ctx, program, fn_def, outer, alt.body)?;
            let mut b = FnBuilder::new(program, fn_def);
            let incoming_block = b.fn_def.current.expect("default lowering leaves a cursor");
            b.add_incoming(phi, incoming_block, value);
            b.build_break(join_block);
        }
        None => {
            let mut b = FnBuilder::new(program, fn_def);
            b.build_unreachable();
        }
    }

    let mut b = FnBuilder::new(program, fn_def);
    b.block_move_to(join_block);
    Ok(result)
}

/// The tag value an arm pattern dispatches on.
fn pattern_tag_value(
    program: &MachProgram,
    ctx: &LowerCtx<'_>,
    pattern: &CorePattern,
) -> Result<u64, MachError> {
    match pattern {
        CorePattern::Con { symbol, .. } => {
            let mach = program
                .mach_symbol_of_core(*symbol)
                .ok_or_else(|| {
                    MachError::UnresolvedSymbol(program.core_symbol_name(ctx.module, *symbol))
                })?;
            Ok(program.symbols[mach].con_num as u64)
        }
        CorePattern::Lit(CoreLit::Int(i)) => Ok(*i as u64),
        CorePattern::Lit(CoreLit::Char(c)) => Ok(*c as u64),
        CorePattern::Lit(CoreLit::Float(_)) => {
            Err(MachError::Unimplemented("floating point case patterns"))
        }
        CorePattern::Wildcard | CorePattern::Var(_) => {
            unreachable!("default patterns never reach the switch table")
        }
    }
}

/// Bind a top-level arm pattern. The arm's tag has already been matched by
/// the switch, so only field extraction (and nested checks) remain.
fn bind_arm_pattern(
    ctx: &LowerCtx<'_>,
    program: &mut MachProgram,
    fn_def: &mut FnDef,
    scrutinee: &MachValue,
    pattern: &CorePattern,
    else_block: BlockId,
) -> Result<(), MachError> {
    match pattern {
        CorePattern::Lit(_) => Ok(()),
        CorePattern::Con { symbol, fields } => {
            bind_con_fields(ctx, program, fn_def, scrutinee, *symbol, fields, else_block)
        }
        CorePattern::Wildcard | CorePattern::Var(_) => {
            unreachable!("default patterns never reach an arm block")
        }
    }
}

/// Cast the matched value to its variant layout and bind every field.
fn bind_con_fields(
    ctx: &LowerCtx<'_>,
    program: &mut MachProgram,
    fn_def: &mut FnDef,
    value: &MachValue,
    con_symbol: CoreSymbolId,
    fields: &[CorePattern],
    else_block: BlockId,
) -> Result<(), MachError> {
    let mach = program.mach_symbol_of_core(con_symbol).ok_or_else(|| {
        MachError::UnresolvedSymbol(program.core_symbol_name(ctx.module, con_symbol))
    })?;
    if program.symbols[mach].is_enum {
        // Enum constructors carry no fields.
        return Ok(());
    }

    let variant_ty = {
        let fn_ty = program.symbols[mach]
            .mach_type
            .as_ref()
            .and_then(|t| t.as_fn())
            .ok_or_else(|| {
                MachError::UnresolvedSymbol(program.symbol_name(mach).to_string())
            })?;
        fn_ty.params[0].pointee().clone()
    };

    let variant_ptr = {
        let mut b = FnBuilder::new(program, fn_def);
        if type_is_eq(value.ty.pointee(), &variant_ty) {
            value.clone()
        } else {
            b.build_bit_cast(value, MachType::ptr(variant_ty))
        }
    };

    for (i, field) in fields.iter().enumerate() {
        match field {
            CorePattern::Wildcard => {}
            CorePattern::Var(symbol) => {
                let field_mach = program.mach_symbol_for_core(ctx.module, *symbol);
                let mut b = FnBuilder::new(program, fn_def);
                let field_ptr = b.build_gep(&variant_ptr, &[0, (i + 1) as u32], "field");
                let field_value = b.build_load(&field_ptr, "val");
                b.program.symbols[field_mach].binding = SymbolBinding::Value(field_value);
            }
            nested => {
                let field_value = {
                    let mut b = FnBuilder::new(program, fn_def);
                    let field_ptr = b.build_gep(&variant_ptr, &[0, (i + 1) as u32], "field");
                    b.build_load(&field_ptr, "val")
                };
                bind_nested_pattern(ctx, program, fn_def, &field_value, nested, else_block)?;
            }
        }
    }
    Ok(())
}

/// A nested pattern has not had its tag matched yet: emit the check, fall
/// to the case's default block on mismatch, and continue binding in a
/// fresh block.
fn bind_nested_pattern(
    ctx: &LowerCtx<'_>,
    program: &mut MachProgram,
    fn_def: &mut FnDef,
    value: &MachValue,
    pattern: &CorePattern,
    else_block: BlockId,
) -> Result<(), MachError> {
    match pattern {
        CorePattern::Wildcard => Ok(()),
        CorePattern::Var(symbol) => {
            let mach = program.mach_symbol_for_core(ctx.module, *symbol);
            program.symbols[mach].binding = SymbolBinding::Value(value.clone());
            Ok(())
        }
        CorePattern::Lit(lit) => {
            let expected = match lit {
                CoreLit::Int(i) => program.value_word_int(*i),
                CoreLit::Char(c) => program.value_word_uint(*c as u64),
                CoreLit::Float(_) => {
                    return Err(MachError::Unimplemented("floating point case patterns"));
                }
            };
            let mut b = FnBuilder::new(program, fn_def);
            let matched = b.build_cmp(CmpOp::Eq, value, &expected);
            let continue_block = b.block_insert_before("case_bind", else_block);
            b.build_cond_break(&matched, continue_block, else_block);
            b.block_move_to(continue_block);
            Ok(())
        }
        CorePattern::Con { symbol, fields } => {
            let mach = program.mach_symbol_of_core(*symbol).ok_or_else(|| {
                MachError::UnresolvedSymbol(program.core_symbol_name(ctx.module, *symbol))
            })?;
            let con_num = program.symbols[mach].con_num as u64;

            if program.symbols[mach].is_enum {
                let expected = program.value_word_uint(con_num);
                let mut b = FnBuilder::new(program, fn_def);
                let matched = b.build_cmp(CmpOp::Eq, value, &expected);
                let continue_block = b.block_insert_before("case_bind", else_block);
                b.build_cond_break(&matched, continue_block, else_block);
                b.block_move_to(continue_block);
                return Ok(());
            }

            // For a sum variant the tag must be checked before the fields
            // are touched; a lone-constructor type needs no check.
            let is_sum_variant = {
                let fn_ty = program.symbols[mach]
                    .mach_type
                    .as_ref()
                    .and_then(|t| t.as_fn())
                    .ok_or_else(|| {
                        MachError::UnresolvedSymbol(program.symbol_name(mach).to_string())
                    })?;
                fn_ty.params[0]
                    .pointee()
                    .as_struct()
                    .is_some_and(|s| s.sum_parent.is_some())
            };
            if is_sum_variant {
                let expected = program.value_word_uint(con_num);
                let mut b = FnBuilder::new(program, fn_def);
                let tag_ptr = b.build_gep(value, &[0, 0], "tag");
                let tag = b.build_load(&tag_ptr, "tag_val");
                let matched = b.build_cmp(CmpOp::Eq, &tag, &expected);
                let continue_block = b.block_insert_before("case_bind", else_block);
                b.build_cond_break(&matched, continue_block, else_block);
                b.block_move_to(continue_block);
            }
            bind_con_fields(ctx, program, fn_def, value, *symbol, fields, else_block)
        }
    }
}

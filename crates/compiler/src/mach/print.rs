//! Textual printing of machine programs.
//!
//! The format is the compiler's debugging surface, not a serialization:
//! structs, then globals, then functions, then machines, then
//! `_necro_main`. Registers print as `%name`, globals as `@name`,
//! parameters as `%N`, literals with a width suffix except the word-sized
//! 64-bit forms, and most operands carry their type in parentheses.

use std::fmt::{self, Write as _};

use crate::core::StateType;
use crate::mach::ast::{
    BinOp, Block, BlockId, CmpOp, FnDef, FnKind, MachDef, MachInstr, MachProgram, MachValue,
    MachValueKind, Terminator, UOp,
};
use crate::mach::types::MachType;

struct Printer<'a> {
    program: &'a MachProgram,
}

impl fmt::Display for MachProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = Printer { program: self };
        writeln!(f, "///////////////////////////////////////////////////////")?;
        writeln!(f, "// NecroMachProgram")?;
        writeln!(f, "///////////////////////////////////////////////////////")?;
        writeln!(f)?;
        for struct_def in &self.structs {
            write!(f, "struct ")?;
            p.fmt_type(f, &struct_def.ty, true)?;
            writeln!(f)?;
        }
        if !self.structs.is_empty() {
            writeln!(f)?;
        }
        for global in &self.globals {
            p.fmt_value(f, global, true)?;
            writeln!(f)?;
        }
        if !self.globals.is_empty() {
            writeln!(f)?;
        }
        for (_, fn_def) in self.functions.iter() {
            p.fmt_fn(f, fn_def, 0)?;
            writeln!(f)?;
        }
        for def_id in self.top_level_defs() {
            p.fmt_machine(f, &self.machine_defs[def_id])?;
        }
        if let Some(main) = &self.necro_main {
            p.fmt_fn(f, main, 0)?;
        }
        Ok(())
    }
}

fn indent(f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        f.write_char(' ')?;
    }
    Ok(())
}

impl<'a> Printer<'a> {
    fn name(&self, symbol: crate::mach::ast::MachSymbolId) -> &str {
        self.program.symbol_name(symbol)
    }

    fn fmt_type(&self, f: &mut fmt::Formatter<'_>, ty: &MachType, recursive: bool) -> fmt::Result {
        match ty {
            MachType::Void => write!(f, "void"),
            MachType::U1 => write!(f, "u1"),
            MachType::U8 => write!(f, "u8"),
            MachType::U16 => write!(f, "u16"),
            MachType::U32 => write!(f, "u32"),
            MachType::U64 => write!(f, "u64"),
            MachType::I32 => write!(f, "i32"),
            MachType::I64 => write!(f, "i64"),
            MachType::F32 => write!(f, "f32"),
            MachType::F64 => write!(f, "f64"),
            MachType::Char => write!(f, "char"),
            MachType::Ptr(elem) => {
                self.fmt_type(f, elem, false)?;
                write!(f, "*")
            }
            MachType::Array { elem, len } => {
                self.fmt_type(f, elem, false)?;
                write!(f, "[{}]", len)
            }
            MachType::Struct(s) => {
                if recursive {
                    write!(f, "{} {{ ", self.name(s.symbol))?;
                    for (i, member) in s.members.iter().enumerate() {
                        self.fmt_type(f, member, false)?;
                        if i + 1 < s.members.len() {
                            write!(f, ", ")?;
                        }
                    }
                    write!(f, " }}")
                } else {
                    write!(f, "{}", self.name(s.symbol))
                }
            }
            MachType::Fn(_) => Ok(()),
        }
    }

    fn fmt_value(&self, f: &mut fmt::Formatter<'_>, value: &MachValue, with_type: bool) -> fmt::Result {
        match &value.kind {
            MachValueKind::Void => return Ok(()),
            MachValueKind::Global { symbol } => write!(f, "@{}", self.name(*symbol))?,
            MachValueKind::Reg { symbol } => write!(f, "%{}", self.name(*symbol))?,
            MachValueKind::Param { index, .. } => write!(f, "%{}", index)?,
            MachValueKind::U1(v) => return write!(f, "{}u1", u8::from(*v)),
            MachValueKind::U8(v) => return write!(f, "{}u8", v),
            MachValueKind::U16(v) => return write!(f, "{}u16", v),
            MachValueKind::U32(v) => return write!(f, "{}u32", v),
            MachValueKind::U64(v) => return write!(f, "{}", v),
            MachValueKind::I32(v) => return write!(f, "{}i32", v),
            MachValueKind::I64(v) => return write!(f, "{}", v),
            MachValueKind::F32(v) => return write!(f, "{}f32", v),
            MachValueKind::F64(v) => return write!(f, "{}f64", v),
            MachValueKind::NullPtr => write!(f, "null")?,
            MachValueKind::Undefined => write!(f, "undef")?,
        }
        if with_type {
            write!(f, " (")?;
            self.fmt_type(f, &value.ty, false)?;
            write!(f, ")")?;
        }
        Ok(())
    }

    fn fmt_fn(&self, f: &mut fmt::Formatter<'_>, fn_def: &FnDef, depth: usize) -> fmt::Result {
        indent(f, depth)?;
        if fn_def.kind == FnKind::RuntimeC {
            write!(f, "foreign ")?;
        }
        write!(f, "fn {}(", self.name(fn_def.symbol))?;
        let fn_ty = fn_def.ty.expect_fn();
        for (i, param) in fn_ty.params.iter().enumerate() {
            self.fmt_type(f, param, false)?;
            if i + 1 < fn_ty.params.len() {
                write!(f, ", ")?;
            }
        }
        write!(f, ") -> ")?;
        self.fmt_type(f, &fn_ty.ret, false)?;
        writeln!(f)?;
        if fn_def.kind == FnKind::RuntimeC {
            return Ok(());
        }
        indent(f, depth)?;
        writeln!(f, "{{")?;
        for &block_id in &fn_def.order {
            self.fmt_block(f, fn_def, block_id, depth + 4)?;
        }
        indent(f, depth)?;
        writeln!(f, "}}")
    }

    fn block_name(&self, fn_def: &FnDef, block: BlockId) -> &str {
        self.name(fn_def.blocks[block].symbol)
    }

    fn fmt_block(
        &self,
        f: &mut fmt::Formatter<'_>,
        fn_def: &FnDef,
        block_id: BlockId,
        depth: usize,
    ) -> fmt::Result {
        let block: &Block = &fn_def.blocks[block_id];
        indent(f, depth.saturating_sub(4))?;
        writeln!(f, "{}:", self.name(block.symbol))?;
        for instr in &block.statements {
            indent(f, depth)?;
            self.fmt_instr(f, fn_def, instr)?;
            writeln!(f)?;
        }
        indent(f, depth)?;
        match block
            .terminator
            .as_ref()
            .expect("emitted blocks always carry a terminator")
        {
            Terminator::Return(value) => {
                write!(f, "return ")?;
                self.fmt_value(f, value, true)?;
                writeln!(f)
            }
            Terminator::ReturnVoid => writeln!(f, "return void"),
            Terminator::Break(target) => {
                writeln!(f, "break {}", self.block_name(fn_def, *target))
            }
            Terminator::CondBreak {
                cond,
                true_block,
                false_block,
            } => {
                write!(f, "condbreak ")?;
                self.fmt_value(f, cond, false)?;
                writeln!(
                    f,
                    " [true: {}, false: {}]",
                    self.block_name(fn_def, *true_block),
                    self.block_name(fn_def, *false_block)
                )
            }
            Terminator::Switch {
                value,
                cases,
                else_block,
            } => {
                write!(f, "switch ")?;
                self.fmt_value(f, value, false)?;
                write!(f, " [")?;
                for (case_value, block) in cases {
                    write!(f, "{}: {}, ", case_value, self.block_name(fn_def, *block))?;
                }
                writeln!(f, "else: {}]", self.block_name(fn_def, *else_block))
            }
            Terminator::Unreachable => writeln!(f, "unreachable"),
        }
    }

    fn fmt_instr(&self, f: &mut fmt::Formatter<'_>, fn_def: &FnDef, instr: &MachInstr) -> fmt::Result {
        match instr {
            MachInstr::Gep {
                source,
                indices,
                dest,
            } => {
                self.fmt_dest(f, dest)?;
                write!(f, "gep")?;
                for (i, index) in indices.iter().enumerate() {
                    write!(f, " {}u32", index)?;
                    if i + 1 < indices.len() {
                        write!(f, ",")?;
                    }
                }
                write!(f, ", ")?;
                self.fmt_value(f, source, true)
            }
            MachInstr::BitCast { from, dest } | MachInstr::ZExt { from, dest } => {
                self.fmt_dest(f, dest)?;
                let op = if matches!(instr, MachInstr::BitCast { .. }) {
                    "bitcast"
                } else {
                    "zext"
                };
                write!(f, "{} ", op)?;
                self.fmt_value(f, from, true)?;
                write!(f, " => (")?;
                self.fmt_type(f, &dest.ty, false)?;
                write!(f, ")")
            }
            MachInstr::Load { source, dest } => {
                self.fmt_dest(f, dest)?;
                write!(f, "load ")?;
                self.fmt_value(f, source, true)
            }
            MachInstr::Store { value, dest } => {
                write!(f, "store ")?;
                self.fmt_value(f, value, true)?;
                write!(f, " ")?;
                self.fmt_value(f, dest, true)
            }
            MachInstr::MemCpy {
                dest,
                source,
                bytes,
            } => {
                write!(f, "memcpy ")?;
                self.fmt_value(f, dest, true)?;
                write!(f, " ")?;
                self.fmt_value(f, source, true)?;
                write!(f, " ")?;
                self.fmt_value(f, bytes, false)
            }
            MachInstr::MemSet { ptr, value, bytes } => {
                write!(f, "memset ")?;
                self.fmt_value(f, ptr, true)?;
                write!(f, " ")?;
                self.fmt_value(f, value, true)?;
                write!(f, " ")?;
                self.fmt_value(f, bytes, true)
            }
            MachInstr::InsertValue {
                aggregate,
                element,
                index,
                dest,
            } => {
                self.fmt_dest(f, dest)?;
                write!(f, "insert ")?;
                self.fmt_value(f, aggregate, true)?;
                write!(f, ", ")?;
                self.fmt_value(f, element, true)?;
                write!(f, ", {}", index)
            }
            MachInstr::ExtractValue {
                aggregate,
                index,
                dest,
            } => {
                self.fmt_dest(f, dest)?;
                write!(f, "extract ")?;
                self.fmt_value(f, aggregate, true)?;
                write!(f, ", {}", index)
            }
            MachInstr::BinOp {
                op,
                left,
                right,
                dest,
            } => {
                self.fmt_dest(f, dest)?;
                write!(f, "{} ", binop_name(*op))?;
                self.fmt_value(f, left, true)?;
                write!(f, " ")?;
                self.fmt_value(f, right, true)
            }
            MachInstr::UOp { op, operand, dest } => {
                self.fmt_dest(f, dest)?;
                write!(f, "{} ", uop_name(*op))?;
                self.fmt_value(f, operand, true)
            }
            MachInstr::Cmp {
                op,
                left,
                right,
                dest,
            } => {
                self.fmt_dest(f, dest)?;
                write!(f, "{} ", cmp_name(*op))?;
                self.fmt_value(f, left, true)?;
                write!(f, " ")?;
                self.fmt_value(f, right, true)
            }
            MachInstr::Phi { incoming, dest } => {
                self.fmt_dest(f, dest)?;
                write!(f, "phi [")?;
                for (i, (block, value)) in incoming.iter().enumerate() {
                    write!(f, "{}: ", self.block_name(fn_def, *block))?;
                    self.fmt_value(f, value, true)?;
                    if i + 1 < incoming.len() {
                        write!(f, ", ")?;
                    }
                }
                write!(f, "]")
            }
            MachInstr::Call { callee, args, dest, .. } => {
                if dest.is_void() {
                    write!(f, "call ")?;
                } else {
                    self.fmt_dest(f, dest)?;
                    write!(f, "call ")?;
                }
                self.fmt_value(f, callee, false)?;
                self.fmt_args(f, args)
            }
            MachInstr::CallIntrinsic {
                intrinsic,
                args,
                dest,
            } => {
                if dest.is_void() {
                    write!(f, "call ")?;
                } else {
                    self.fmt_dest(f, dest)?;
                    write!(f, "call ")?;
                }
                write!(f, "{} ", intrinsic.name())?;
                self.fmt_args(f, args)
            }
        }
    }

    fn fmt_dest(&self, f: &mut fmt::Formatter<'_>, dest: &MachValue) -> fmt::Result {
        self.fmt_value(f, dest, false)?;
        write!(f, " = ")
    }

    fn fmt_args(&self, f: &mut fmt::Formatter<'_>, args: &[MachValue]) -> fmt::Result {
        write!(f, "(")?;
        for (i, arg) in args.iter().enumerate() {
            self.fmt_value(f, arg, false)?;
            if i + 1 < args.len() {
                write!(f, ", ")?;
            }
        }
        write!(f, ")")
    }

    fn fmt_machine(&self, f: &mut fmt::Formatter<'_>, def: &MachDef) -> fmt::Result {
        writeln!(f, "machine {}", self.name(def.symbol))?;
        writeln!(f, "{{")?;
        indent(f, 4)?;
        writeln!(f, "{}", state_name(def.state_type))?;
        indent(f, 4)?;
        write!(f, "type: ")?;
        match &def.state_struct {
            Some(state) => self.fmt_type(f, state, true)?,
            None => self.fmt_type(f, &def.value_type, true)?,
        }
        writeln!(f)?;
        for fn_def in [&def.init_fn, &def.mk_fn, &def.update_fn]
            .into_iter()
            .flatten()
        {
            writeln!(f)?;
            self.fmt_fn(f, fn_def, 4)?;
        }
        writeln!(f, "}}")?;
        writeln!(f)
    }
}

fn state_name(state: StateType) -> &'static str {
    match state {
        StateType::Poly => "poly",
        StateType::Constant => "constant",
        StateType::Pointwise => "pointwise",
        StateType::Stateful => "stateful",
    }
}

fn binop_name(op: BinOp) -> &'static str {
    match op {
        BinOp::IAdd => "iadd",
        BinOp::ISub => "isub",
        BinOp::IMul => "imul",
        BinOp::IDiv => "idiv",
        BinOp::UAdd => "uadd",
        BinOp::USub => "usub",
        BinOp::UMul => "umul",
        BinOp::UDiv => "udiv",
        BinOp::FAdd => "fadd",
        BinOp::FSub => "fsub",
        BinOp::FMul => "fmul",
        BinOp::FDiv => "fdiv",
        BinOp::And => "and",
        BinOp::Or => "or",
        BinOp::Shl => "shl",
        BinOp::Shr => "shr",
    }
}

fn uop_name(op: UOp) -> &'static str {
    match op {
        UOp::IAbs => "iabs",
        UOp::UAbs => "uabs",
        UOp::FAbs => "fabs",
        UOp::ISgn => "isgn",
        UOp::USgn => "usgn",
        UOp::FSgn => "fsgn",
        UOp::IToI => "itoi",
        UOp::IToU => "itou",
        UOp::IToF => "itof",
        UOp::UToI => "utoi",
        UOp::FTrI => "ftri",
        UOp::FRnI => "frni",
        UOp::FToF => "ftof",
    }
}

fn cmp_name(op: CmpOp) -> &'static str {
    match op {
        CmpOp::Eq => "eq",
        CmpOp::Ne => "ne",
        CmpOp::Gt => "gt",
        CmpOp::Ge => "ge",
        CmpOp::Lt => "lt",
        CmpOp::Le => "le",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::intern::Intern;
    use crate::mach::ast::CallKind;
    use crate::mach::build::FnBuilder;

    #[test]
    fn test_function_print_shape() {
        let mut program = MachProgram::new(Intern::new(), &CompilerConfig::default());
        let pair_symbol = program.gen_symbol("Pair");
        let pair = MachType::strukt(pair_symbol, vec![MachType::U64, MachType::I64]);
        let symbol = program.gen_symbol("probe");
        let ty = MachType::func(MachType::I64, vec![MachType::ptr(pair)]);
        let mut f = FnDef::new(&mut program, symbol, ty);
        {
            let mut b = FnBuilder::new(&mut program, &mut f);
            let p = b.param(0);
            let slot = b.build_gep(&p, &[0, 1], "slot");
            let v = b.build_load(&slot, "val");
            b.build_return(v);
        }
        program.add_function(f);

        let text = program.to_string();
        assert!(text.contains("fn probe(Pair*) -> i64"));
        assert!(text.contains("entry:"));
        assert!(text.contains("%slot = gep 0u32, 1u32, %0 (Pair*)"));
        assert!(text.contains("%val = load %slot (i64*)"));
        assert!(text.contains("return %val (i64)"));
    }

    #[test]
    fn test_runtime_fns_print_as_foreign() {
        let program = MachProgram::new(Intern::new(), &CompilerConfig::default());
        let text = program.to_string();
        assert!(text.contains("foreign fn _necro_init_runtime() -> void"));
        assert!(text.contains("foreign fn _necro_sleep(u32) -> void"));
        assert!(text.contains("foreign fn _necro_from_alloc(u64) -> u64*"));
    }

    #[test]
    fn test_call_and_terminator_print() {
        let mut program = MachProgram::new(Intern::new(), &CompilerConfig::default());
        let symbol = program.gen_symbol("spin");
        let ty = MachType::func(MachType::Void, vec![]);
        let mut f = FnDef::new(&mut program, symbol, ty);
        {
            let sleep = program.runtime_value(crate::mach::runtime::RuntimeFn::Sleep);
            let mut b = FnBuilder::new(&mut program, &mut f);
            let looped = b.block_append("loop");
            b.build_break(looped);
            b.block_move_to(looped);
            b.build_call(&sleep, &[MachValue::u32(10)], CallKind::C, "");
            b.build_break(looped);
        }
        program.add_function(f);

        let text = program.to_string();
        assert!(text.contains("break loop"));
        assert!(text.contains("call @_necro_sleep(10u32)"));
    }
}

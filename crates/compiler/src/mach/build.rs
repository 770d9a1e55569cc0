//! Typed IR builders.
//!
//! A [`FnBuilder`] borrows the program and the function under construction,
//! appends instructions at the function's cursor block, and hands back the
//! produced register value. Every builder enforces its typing contract at
//! construction time; a violated contract is a compiler bug and panics
//! immediately rather than producing ill-typed IR.
//!
//! Contracts worth knowing:
//! - `build_gep` takes compile-time indices; the first index may step
//!   through a pointer (and must be the only one that does), subsequent
//!   indices select struct members and are bounds-checked.
//! - `build_call` checks argument count and types against the callee's
//!   function type; void returns produce a `Void` sentinel value.
//! - A block accepts at most one terminator; phis must be emitted at the
//!   top of their block.

use crate::mach::ast::{
    BinOp, Block, BlockId, CallKind, CmpOp, FnDef, MachInstr, MachProgram, MachValue,
    MachValueKind, PhiRef, Terminator, UOp,
};
use crate::mach::runtime::Intrinsic;
use crate::mach::types::{
    MachType, type_check, type_check_is_float, type_check_is_int,
};

/// Builder over a function under construction.
pub struct FnBuilder<'a> {
    pub program: &'a mut MachProgram,
    pub fn_def: &'a mut FnDef,
}

impl<'a> FnBuilder<'a> {
    pub fn new(program: &'a mut MachProgram, fn_def: &'a mut FnDef) -> Self {
        FnBuilder { program, fn_def }
    }

    fn current(&mut self) -> &mut Block {
        let cur = self
            .fn_def
            .current
            .expect("builder used on a function with no cursor block");
        &mut self.fn_def.blocks[cur]
    }

    fn current_id(&self) -> BlockId {
        self.fn_def
            .current
            .expect("builder used on a function with no cursor block")
    }

    fn push(&mut self, instr: MachInstr) {
        self.current().statements.push(instr);
    }

    fn set_terminator(&mut self, terminator: Terminator) {
        let block = self.current();
        assert!(
            block.terminator.is_none(),
            "block already has a terminator"
        );
        block.terminator = Some(terminator);
    }

    /// The value of the `index`-th parameter of the function being built.
    pub fn param(&self, index: usize) -> MachValue {
        self.fn_def.param_value(index)
    }

    //--------------------
    // Memory
    //--------------------

    /// Get-element-ptr with compile-time indices; yields a pointer to the
    /// selected element.
    pub fn build_gep(&mut self, source: &MachValue, indices: &[u32], name: &str) -> MachValue {
        let mut ty = source.ty.clone();
        for (i, &index) in indices.iter().enumerate() {
            ty = match &ty {
                MachType::Struct(s) => {
                    assert!(
                        (index as usize) < s.members.len(),
                        "gep index {} out of range for struct with {} members",
                        index,
                        s.members.len()
                    );
                    s.members[index as usize].clone()
                }
                MachType::Ptr(elem) => {
                    assert!(i == 0, "only the leading gep index may step through a pointer");
                    (**elem).clone()
                }
                MachType::Array { elem, .. } => (**elem).clone(),
                other => panic!("gep through non-aggregate type {:?}", other),
            };
        }
        let dest = self.program.value_reg(MachType::ptr(ty), name);
        self.push(MachInstr::Gep {
            source: source.clone(),
            indices: indices.to_vec(),
            dest: dest.clone(),
        });
        dest
    }

    pub fn build_bit_cast(&mut self, value: &MachValue, to_type: MachType) -> MachValue {
        let dest = self.program.value_reg(to_type, "cst");
        self.push(MachInstr::BitCast {
            from: value.clone(),
            dest: dest.clone(),
        });
        dest
    }

    pub fn build_zext(&mut self, value: &MachValue, to_type: MachType) -> MachValue {
        type_check_is_int(&value.ty);
        type_check_is_int(&to_type);
        let dest = self.program.value_reg(to_type, "zxt");
        self.push(MachInstr::ZExt {
            from: value.clone(),
            dest: dest.clone(),
        });
        dest
    }

    pub fn build_load(&mut self, source: &MachValue, name: &str) -> MachValue {
        assert!(
            matches!(
                source.kind,
                MachValueKind::Reg { .. } | MachValueKind::Param { .. } | MachValueKind::Global { .. }
            ),
            "load source must be a register, parameter or global"
        );
        let elem = source.ty.pointee().clone();
        let dest = self.program.value_reg(elem, name);
        self.push(MachInstr::Load {
            source: source.clone(),
            dest: dest.clone(),
        });
        dest
    }

    pub fn build_store(&mut self, value: &MachValue, dest: &MachValue) {
        type_check(&value.ty, dest.ty.pointee());
        self.push(MachInstr::Store {
            value: value.clone(),
            dest: dest.clone(),
        });
    }

    pub fn build_memcpy(&mut self, dest: &MachValue, source: &MachValue, bytes: &MachValue) {
        assert!(dest.ty.is_ptr(), "memcpy destination must be a pointer");
        assert!(source.ty.is_ptr(), "memcpy source must be a pointer");
        assert!(
            self.program.is_word_uint(&bytes.ty),
            "memcpy byte count must be a word-sized uint"
        );
        self.push(MachInstr::MemCpy {
            dest: dest.clone(),
            source: source.clone(),
            bytes: bytes.clone(),
        });
    }

    pub fn build_memset(&mut self, ptr: &MachValue, value: &MachValue, bytes: &MachValue) {
        assert!(ptr.ty.is_ptr(), "memset target must be a pointer");
        type_check(&value.ty, &MachType::U8);
        assert!(
            self.program.is_word_uint(&bytes.ty),
            "memset byte count must be a word-sized uint"
        );
        self.push(MachInstr::MemSet {
            ptr: ptr.clone(),
            value: value.clone(),
            bytes: bytes.clone(),
        });
    }

    pub fn build_insert_value(
        &mut self,
        aggregate: &MachValue,
        element: &MachValue,
        index: usize,
        name: &str,
    ) -> MachValue {
        let member_ty = aggregate_member_type(&aggregate.ty, index);
        type_check(&element.ty, &member_ty);
        let dest = self.program.value_reg(aggregate.ty.clone(), name);
        self.push(MachInstr::InsertValue {
            aggregate: aggregate.clone(),
            element: element.clone(),
            index,
            dest: dest.clone(),
        });
        dest
    }

    pub fn build_extract_value(
        &mut self,
        aggregate: &MachValue,
        index: usize,
        name: &str,
    ) -> MachValue {
        let member_ty = aggregate_member_type(&aggregate.ty, index);
        let dest = self.program.value_reg(member_ty, name);
        self.push(MachInstr::ExtractValue {
            aggregate: aggregate.clone(),
            index,
            dest: dest.clone(),
        });
        dest
    }

    //--------------------
    // Calls and arithmetic
    //--------------------

    pub fn build_call(
        &mut self,
        callee: &MachValue,
        args: &[MachValue],
        call_kind: CallKind,
        name: &str,
    ) -> MachValue {
        let fn_type = callee.ty.expect_fn();
        assert_eq!(
            fn_type.params.len(),
            args.len(),
            "call argument count mismatch"
        );
        for (param, arg) in fn_type.params.iter().zip(args.iter()) {
            type_check(param, &arg.ty);
        }
        let ret = fn_type.ret.clone();
        let dest = if matches!(ret, MachType::Void) {
            MachValue::void()
        } else {
            self.program.value_reg(ret, name)
        };
        self.push(MachInstr::Call {
            callee: callee.clone(),
            args: args.to_vec(),
            call_kind,
            dest: dest.clone(),
        });
        dest
    }

    pub fn build_call_intrinsic(
        &mut self,
        intrinsic: Intrinsic,
        args: &[MachValue],
        name: &str,
    ) -> MachValue {
        assert_eq!(
            intrinsic.arity(),
            args.len(),
            "intrinsic {} argument count mismatch",
            intrinsic.name()
        );
        for pair in args.windows(2) {
            type_check(&pair[0].ty, &pair[1].ty);
        }
        let ret = args[0].ty.clone();
        let dest = self.program.value_reg(ret, name);
        self.push(MachInstr::CallIntrinsic {
            intrinsic,
            args: args.to_vec(),
            dest: dest.clone(),
        });
        dest
    }

    pub fn build_binop(&mut self, op: BinOp, left: &MachValue, right: &MachValue) -> MachValue {
        type_check(&left.ty, &right.ty);
        let name = if op.is_float_op() {
            type_check_is_float(&left.ty);
            "fop"
        } else {
            type_check_is_int(&left.ty);
            "iop"
        };
        let dest = self.program.value_reg(left.ty.clone(), name);
        self.push(MachInstr::BinOp {
            op,
            left: left.clone(),
            right: right.clone(),
            dest: dest.clone(),
        });
        dest
    }

    pub fn build_uop(&mut self, op: UOp, operand: &MachValue) -> MachValue {
        let result_ty = match op {
            UOp::IAbs | UOp::ISgn | UOp::IToI | UOp::UToI | UOp::FTrI | UOp::FRnI => {
                self.program.word_int_type()
            }
            UOp::UAbs | UOp::USgn | UOp::IToU => self.program.word_uint_type(),
            UOp::FAbs | UOp::FSgn | UOp::IToF | UOp::FToF => self.program.word_float_type(),
        };
        match op {
            UOp::FAbs | UOp::FSgn | UOp::FTrI | UOp::FRnI | UOp::FToF => {
                type_check_is_float(&operand.ty)
            }
            _ => type_check_is_int(&operand.ty),
        }
        let dest = self.program.value_reg(result_ty, "uop");
        self.push(MachInstr::UOp {
            op,
            operand: operand.clone(),
            dest: dest.clone(),
        });
        dest
    }

    pub fn build_cmp(&mut self, op: CmpOp, left: &MachValue, right: &MachValue) -> MachValue {
        type_check(&left.ty, &right.ty);
        let dest = self.program.value_reg(MachType::U1, "cmp");
        self.push(MachInstr::Cmp {
            op,
            left: left.clone(),
            right: right.clone(),
            dest: dest.clone(),
        });
        dest
    }

    /// Emit a phi at the top of the current block. Incoming edges are added
    /// afterwards with [`FnBuilder::add_incoming`].
    pub fn build_phi(&mut self, ty: MachType, name: &str) -> (MachValue, PhiRef) {
        let block_id = self.current_id();
        {
            let block = self.current();
            assert!(
                block
                    .statements
                    .iter()
                    .all(|s| matches!(s, MachInstr::Phi { .. })),
                "phi must be emitted at the top of its block"
            );
        }
        let dest = self.program.value_reg(ty, name);
        let index = self.current().statements.len();
        self.push(MachInstr::Phi {
            incoming: Vec::new(),
            dest: dest.clone(),
        });
        (dest, PhiRef {
            block: block_id,
            index,
        })
    }

    pub fn add_incoming(&mut self, phi: PhiRef, block: BlockId, value: MachValue) {
        match &mut self.fn_def.blocks[phi.block].statements[phi.index] {
            MachInstr::Phi { incoming, dest } => {
                type_check(&dest.ty, &value.ty);
                incoming.push((block, value));
            }
            other => panic!("add_incoming on a non-phi statement: {:?}", other),
        }
    }

    //--------------------
    // Terminators
    //--------------------

    pub fn build_return(&mut self, value: MachValue) {
        type_check(&self.fn_def.ty.expect_fn().ret, &value.ty);
        self.set_terminator(Terminator::Return(value));
    }

    pub fn build_return_void(&mut self) {
        assert!(
            matches!(self.fn_def.ty.expect_fn().ret, MachType::Void),
            "return void from a non-void function"
        );
        self.set_terminator(Terminator::ReturnVoid);
    }

    pub fn build_break(&mut self, target: BlockId) {
        self.set_terminator(Terminator::Break(target));
    }

    pub fn build_cond_break(&mut self, cond: &MachValue, true_block: BlockId, false_block: BlockId) {
        type_check(&cond.ty, &MachType::U1);
        self.set_terminator(Terminator::CondBreak {
            cond: cond.clone(),
            true_block,
            false_block,
        });
    }

    pub fn build_switch(
        &mut self,
        value: &MachValue,
        cases: Vec<(u64, BlockId)>,
        else_block: BlockId,
    ) {
        assert!(
            self.program.is_word_uint(&value.ty),
            "switch scrutinee must be a word-sized uint"
        );
        self.set_terminator(Terminator::Switch {
            value: value.clone(),
            cases,
            else_block,
        });
    }

    pub fn build_unreachable(&mut self) {
        self.set_terminator(Terminator::Unreachable);
    }

    //--------------------
    // Block management
    //--------------------

    /// Attach a new block after the function's last block. The cursor does
    /// not move.
    pub fn block_append(&mut self, name: &str) -> BlockId {
        let symbol = self.program.gen_symbol(name);
        let id = self.fn_def.blocks.alloc(Block {
            symbol,
            statements: Vec::new(),
            terminator: None,
        });
        self.fn_def.order.push(id);
        id
    }

    /// Splice a new block in front of `target` in the textual order.
    pub fn block_insert_before(&mut self, name: &str, target: BlockId) -> BlockId {
        let symbol = self.program.gen_symbol(name);
        let id = self.fn_def.blocks.alloc(Block {
            symbol,
            statements: Vec::new(),
            terminator: None,
        });
        let position = self
            .fn_def
            .order
            .iter()
            .position(|&b| b == target)
            .expect("block to insert before is not in this function");
        self.fn_def.order.insert(position, id);
        id
    }

    /// Point the cursor at `block`.
    pub fn block_move_to(&mut self, block: BlockId) {
        assert!(
            self.fn_def.order.contains(&block),
            "cannot move the cursor to a block outside this function"
        );
        self.fn_def.current = Some(block);
    }
}

fn aggregate_member_type(ty: &MachType, index: usize) -> MachType {
    match ty {
        MachType::Struct(s) => {
            assert!(
                index < s.members.len(),
                "aggregate index {} out of range for struct with {} members",
                index,
                s.members.len()
            );
            s.members[index].clone()
        }
        MachType::Array { elem, len } => {
            assert!(index < *len, "aggregate index out of range for array");
            (**elem).clone()
        }
        other => panic!("insert/extract on non-aggregate type {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompilerConfig;
    use crate::intern::Intern;

    fn test_program() -> MachProgram {
        MachProgram::new(Intern::new(), &CompilerConfig::default())
    }

    fn unary_fn(program: &mut MachProgram, param: MachType, ret: MachType) -> FnDef {
        let symbol = program.gen_symbol("test_fn");
        FnDef::new(program, symbol, MachType::func(ret, vec![param]))
    }

    #[test]
    fn test_gep_walks_struct_members() {
        let mut program = test_program();
        let struct_symbol = program.gen_symbol("Pair");
        let pair = MachType::strukt(struct_symbol, vec![MachType::U64, MachType::I64]);
        let mut f = unary_fn(&mut program, MachType::ptr(pair), MachType::I64);
        let mut b = FnBuilder::new(&mut program, &mut f);
        let p = b.param(0);
        let second = b.build_gep(&p, &[0, 1], "slot");
        assert_eq!(second.ty, MachType::ptr(MachType::I64));
        let loaded = b.build_load(&second, "val");
        assert_eq!(loaded.ty, MachType::I64);
        b.build_return(loaded);
    }

    #[test]
    #[should_panic(expected = "leading gep index")]
    fn test_gep_rejects_late_pointer_deref() {
        let mut program = test_program();
        let struct_symbol = program.gen_symbol("Cell");
        let cell = MachType::strukt(
            struct_symbol,
            vec![MachType::ptr(MachType::U64)],
        );
        let mut f = unary_fn(&mut program, MachType::ptr(cell), MachType::U64);
        let mut b = FnBuilder::new(&mut program, &mut f);
        let p = b.param(0);
        // Second deref through the inner pointer is not a constant gep.
        b.build_gep(&p, &[0, 0, 0], "bad");
    }

    #[test]
    #[should_panic(expected = "argument count mismatch")]
    fn test_call_arity_checked() {
        let mut program = test_program();
        let callee_symbol = program.gen_symbol("callee");
        let callee_ty = MachType::func(MachType::U64, vec![MachType::U64, MachType::U64]);
        let callee = program.value_global(callee_symbol, callee_ty);
        let mut f = unary_fn(&mut program, MachType::U64, MachType::U64);
        let mut b = FnBuilder::new(&mut program, &mut f);
        let arg = b.param(0);
        b.build_call(&callee, &[arg], CallKind::Lang, "app");
    }

    #[test]
    fn test_void_call_produces_sentinel() {
        let mut program = test_program();
        let callee_symbol = program.gen_symbol("effect");
        let callee_ty = MachType::func(MachType::Void, vec![]);
        let callee = program.value_global(callee_symbol, callee_ty);
        let mut f = unary_fn(&mut program, MachType::U64, MachType::U64);
        let mut b = FnBuilder::new(&mut program, &mut f);
        let result = b.build_call(&callee, &[], CallKind::C, "");
        assert!(result.is_void());
    }

    #[test]
    #[should_panic(expected = "already has a terminator")]
    fn test_double_terminator_rejected() {
        let mut program = test_program();
        let mut f = unary_fn(&mut program, MachType::U64, MachType::U64);
        let mut b = FnBuilder::new(&mut program, &mut f);
        let v = b.param(0);
        b.build_return(v.clone());
        b.build_return(v);
    }

    #[test]
    #[should_panic(expected = "phi must be emitted at the top")]
    fn test_phi_not_at_top_rejected() {
        let mut program = test_program();
        let mut f = unary_fn(&mut program, MachType::ptr(MachType::U64), MachType::U64);
        let mut b = FnBuilder::new(&mut program, &mut f);
        let p = b.param(0);
        b.build_load(&p, "val");
        b.build_phi(MachType::U64, "phi");
    }

    #[test]
    fn test_phi_incoming_type_checked() {
        let mut program = test_program();
        let mut f = unary_fn(&mut program, MachType::U64, MachType::U64);
        let mut b = FnBuilder::new(&mut program, &mut f);
        let entry = b.fn_def.entry_block();
        let join = b.block_append("join");
        b.build_break(join);
        b.block_move_to(join);
        let (value, phi) = b.build_phi(MachType::U64, "phi");
        let incoming = b.param(0);
        b.add_incoming(phi, entry, incoming);
        b.build_return(value);
        let MachInstr::Phi { incoming, .. } = &b.fn_def.blocks[join].statements[0] else {
            panic!("expected phi");
        };
        assert_eq!(incoming.len(), 1);
    }

    #[test]
    #[should_panic(expected = "machine type mismatch")]
    fn test_store_type_checked() {
        let mut program = test_program();
        let mut f = unary_fn(&mut program, MachType::ptr(MachType::U64), MachType::U64);
        let mut b = FnBuilder::new(&mut program, &mut f);
        let p = b.param(0);
        let wrong = program_value_i64();
        b.build_store(&wrong, &p);
    }

    fn program_value_i64() -> MachValue {
        MachValue {
            kind: MachValueKind::I64(4),
            ty: MachType::I64,
        }
    }

    #[test]
    fn test_cmp_yields_u1() {
        let mut program = test_program();
        let mut f = unary_fn(&mut program, MachType::U64, MachType::U64);
        let mut b = FnBuilder::new(&mut program, &mut f);
        let x = b.param(0);
        let y = b.program.value_word_uint(1);
        let cmp = b.build_cmp(CmpOp::Eq, &x, &y);
        assert_eq!(cmp.ty, MachType::U1);
    }

    #[test]
    fn test_block_insert_before_keeps_order() {
        let mut program = test_program();
        let mut f = unary_fn(&mut program, MachType::U64, MachType::U64);
        let mut b = FnBuilder::new(&mut program, &mut f);
        let tail = b.block_append("tail");
        let middle = b.block_insert_before("middle", tail);
        let entry = b.fn_def.entry_block();
        assert_eq!(b.fn_def.order, vec![entry, middle, tail]);
    }
}

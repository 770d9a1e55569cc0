//! Pass 1: data layout lowering and machine shells.
//!
//! The first walk over Core does two jobs. Data declarations become machine
//! struct layouts and `_mkCon` constructor functions: a declaration whose
//! constructors are all nullary short-circuits to the word-sized uint with
//! each constructor a numeric literal; a single-constructor type is one
//! struct `[tag, field...]`; a sum type is a padded parent struct plus one
//! child struct per constructor, laid out identically and bit-cast to the
//! parent on construction. Bindings get an initial machine definition
//! (name, argument list, value/function types) whose state is discovered in
//! the next pass. Every name visited gets its machine symbol so later
//! passes can resolve references without touching Core again.

use tracing::debug;

use crate::core::{CoreAstKind, CoreId, CoreModule, NecroType, StateType};
use crate::mach::ast::{
    DefId, FnDef, MachDef, MachProgram, MachSymbolId, StructDef, capitalized,
};
use crate::mach::build::FnBuilder;
use crate::mach::error::MachError;
use crate::mach::types::MachType;

pub(crate) fn run(program: &mut MachProgram, module: &CoreModule) -> Result<(), MachError> {
    debug!("mach pass 1: data layout");
    for &top in &module.top {
        lower_node(program, module, top, None)?;
    }
    Ok(())
}

fn lower_node(
    program: &mut MachProgram,
    module: &CoreModule,
    id: CoreId,
    outer: Option<DefId>,
) -> Result<(), MachError> {
    match &module.nodes[id].kind {
        CoreAstKind::Lit(_) => Ok(()),
        CoreAstKind::Var { symbol } => {
            program.mach_symbol_for_core(module, *symbol);
            Ok(())
        }
        CoreAstKind::Bind { symbol, expr } => lower_bind(program, module, *symbol, *expr, outer),
        CoreAstKind::BindRec { .. } => Err(MachError::Unimplemented("recursive binding groups")),
        CoreAstKind::App { func, arg } => {
            lower_node(program, module, *func, outer)?;
            lower_node(program, module, *arg, outer)
        }
        CoreAstKind::Lam { arg, expr } => {
            program.mach_symbol_for_core(module, *arg);
            lower_node(program, module, *expr, outer)
        }
        CoreAstKind::Let { bind, expr } => {
            lower_node(program, module, *bind, outer)?;
            lower_node(program, module, *expr, outer)
        }
        CoreAstKind::Case { expr, alts, .. } => {
            lower_node(program, module, *expr, outer)?;
            for alt in alts {
                lower_node(program, module, alt.body, outer)?;
            }
            Ok(())
        }
        CoreAstKind::For { .. } => Err(MachError::Unimplemented("for loops")),
        CoreAstKind::DataDecl { symbol, cons } => lower_data_decl(program, module, *symbol, cons),
        CoreAstKind::DataCon { .. } => {
            unreachable!("data constructor outside a data declaration")
        }
    }
}

//--------------------
// Data declarations
//--------------------

fn con_symbol_of(module: &CoreModule, con: CoreId) -> crate::core::CoreSymbolId {
    match &module.nodes[con].kind {
        CoreAstKind::DataCon { symbol } => *symbol,
        other => unreachable!("data declaration constructor list holds {:?}", other),
    }
}

fn lower_data_decl(
    program: &mut MachProgram,
    module: &CoreModule,
    decl_symbol: crate::core::CoreSymbolId,
    cons: &[CoreId],
) -> Result<(), MachError> {
    // Primitive types are seeded by the base environment.
    if module.symbols[decl_symbol].is_primitive {
        return Ok(());
    }
    if let Some(existing) = program.mach_symbol_of_core(decl_symbol)
        && program.symbols[existing].is_primitive
    {
        return Ok(());
    }

    // Monomorphization must have erased every type variable; a residual
    // polymorphic declaration means the input is malformed.
    if module.symbols[decl_symbol].ty.is_polymorphic() {
        return Err(MachError::PolymorphicType(
            program.core_symbol_name(module, decl_symbol),
        ));
    }
    for &con in cons {
        let con_symbol = con_symbol_of(module, con);
        if module.symbols[con_symbol].ty.is_polymorphic() {
            return Err(MachError::PolymorphicType(
                program.core_symbol_name(module, con_symbol),
            ));
        }
    }

    let max_arity = cons
        .iter()
        .map(|&con| module.symbols[con_symbol_of(module, con)].ty.arity())
        .max()
        .unwrap_or(0);

    let decl_mach = program.mach_symbol_for_core(module, decl_symbol);

    // Enum short-circuit: the whole type is a word-sized uint and each
    // constructor is its own tag value.
    if max_arity == 0 {
        let uword = program.word_uint_type();
        program.symbols[decl_mach].mach_type = Some(uword.clone());
        for (con_num, &con) in cons.iter().enumerate() {
            let core_con = con_symbol_of(module, con);
            let mach_con = program.mach_symbol_for_core(module, core_con);
            let symbol = &mut program.symbols[mach_con];
            symbol.mach_type = Some(uword.clone());
            symbol.is_constructor = true;
            symbol.is_enum = true;
            symbol.con_num = con_num;
        }
        debug!(
            name = program.symbol_name(decl_mach),
            constructors = cons.len(),
            "lowered enum data declaration"
        );
        return Ok(());
    }

    let is_sum = cons.len() > 1;
    let parent_ty = if is_sum {
        // Sum parent: a tag word plus enough uword padding cells to hold
        // the widest variant's payload.
        let uword = program.word_uint_type();
        let members = vec![uword; max_arity + 1];
        let ty = MachType::strukt(decl_mach, members);
        program.add_struct(StructDef {
            symbol: decl_mach,
            ty: ty.clone(),
        });
        ty
    } else {
        let core_con = con_symbol_of(module, cons[0]);
        let members = con_member_types(program, module, core_con)?;
        let ty = MachType::strukt(decl_mach, members);
        program.add_struct(StructDef {
            symbol: decl_mach,
            ty: ty.clone(),
        });
        ty
    };

    // Child structs for sum variants, laid out like the single-constructor
    // case and linked to their parent.
    let mut con_struct_tys = Vec::with_capacity(cons.len());
    if is_sum {
        for &con in cons {
            let core_con = con_symbol_of(module, con);
            let name = program.core_symbol_name(module, core_con);
            let struct_symbol = program.named_symbol(&name);
            let members = con_member_types(program, module, core_con)?;
            let ty = MachType::variant_strukt(struct_symbol, members, decl_mach);
            program.add_struct(StructDef {
                symbol: struct_symbol,
                ty: ty.clone(),
            });
            con_struct_tys.push(ty);
        }
    } else {
        con_struct_tys.push(parent_ty.clone());
    }

    for (con_num, (&con, con_ty)) in cons.iter().zip(con_struct_tys.iter()).enumerate() {
        let core_con = con_symbol_of(module, con);
        lower_constructor(program, module, core_con, &parent_ty, con_ty, con_num)?;
    }
    Ok(())
}

/// Member types of a constructor's struct: the tag word followed by its
/// fields, pointer-wrapped where boxed.
fn con_member_types(
    program: &MachProgram,
    module: &CoreModule,
    core_con: crate::core::CoreSymbolId,
) -> Result<Vec<MachType>, MachError> {
    let mut members = vec![program.word_uint_type()];
    let mut ty = module.symbols[core_con].ty.strip_for_all();
    while let NecroType::Fun { arg, result } = ty {
        let field = program.mach_type_from_necro(module, arg)?;
        members.push(program.make_ptr_if_boxed(&field));
        ty = result.strip_for_all();
    }
    Ok(members)
}

/// Synthesize `_mkCon(con_ptr, arg0, ..., argN) -> parent_ptr`: store the
/// tag, store each argument into its slot, bit-cast to the parent layout
/// where the variant differs from it.
fn lower_constructor(
    program: &mut MachProgram,
    module: &CoreModule,
    core_con: crate::core::CoreSymbolId,
    parent_ty: &MachType,
    con_ty: &MachType,
    con_num: usize,
) -> Result<(), MachError> {
    let con_name = program.core_symbol_name(module, core_con);
    let arg_count = module.symbols[core_con].ty.arity();

    let parent_ptr = MachType::ptr(parent_ty.clone());
    let con_ptr = MachType::ptr(con_ty.clone());
    let field_tys: Vec<MachType> = con_ty
        .as_struct()
        .expect("constructor layout is a struct")
        .members[1..]
        .to_vec();

    let mut params = vec![con_ptr];
    params.extend(field_tys.iter().cloned());
    let mk_ty = MachType::func(parent_ptr.clone(), params);

    let mk_symbol = program.gen_symbol(&format!("_mk{}", con_name));
    {
        let symbol = &mut program.symbols[mk_symbol];
        symbol.necro_type = Some(module.symbols[core_con].ty.clone());
        symbol.state_type = StateType::Poly;
        symbol.is_constructor = true;
        symbol.con_num = con_num;
    }

    let mut mk_fn = FnDef::new(program, mk_symbol, mk_ty);
    {
        let mut b = FnBuilder::new(program, &mut mk_fn);
        let data_ptr = b.param(0);
        let tag_ptr = b.build_gep(&data_ptr, &[0, 0], "tag");
        let tag = b.program.value_word_uint(con_num as u64);
        b.build_store(&tag, &tag_ptr);
        for i in 0..arg_count {
            let param = b.param(i + 1);
            let slot_ptr = b.build_gep(&data_ptr, &[0, (i + 1) as u32], "slot");
            b.build_store(&param, &slot_ptr);
        }
        if crate::mach::types::type_is_eq(parent_ty, con_ty) {
            b.build_return(data_ptr);
        } else {
            let cast = b.build_bit_cast(&data_ptr, MachType::ptr(parent_ty.clone()));
            b.build_return(cast);
        }
    }
    program.add_function(mk_fn);

    // The constructor's machine identity is its _mk function.
    program.map_core_to_mach(core_con, mk_symbol);
    Ok(())
}

//--------------------
// Machine shells
//--------------------

fn lower_bind(
    program: &mut MachProgram,
    module: &CoreModule,
    bind_symbol: crate::core::CoreSymbolId,
    expr: CoreId,
    outer: Option<DefId>,
) -> Result<(), MachError> {
    if module.symbols[bind_symbol].is_primitive {
        return Ok(());
    }

    let mach_symbol = program.mach_symbol_for_core(module, bind_symbol);
    let mach_ty = program.mach_type_from_necro(module, &module.symbols[bind_symbol].ty)?;
    let def_id = create_initial_machine_def(
        program,
        module,
        mach_symbol,
        outer,
        mach_ty,
        module.symbols[bind_symbol].ty.clone(),
    );

    // Argument symbols, in lambda order.
    let mut arg_names = Vec::new();
    let mut cursor = expr;
    while let CoreAstKind::Lam { arg, expr: inner } = &module.nodes[cursor].kind {
        arg_names.push(program.mach_symbol_for_core(module, *arg));
        cursor = *inner;
    }
    program.machine_defs[def_id].arg_names = arg_names;

    lower_node(program, module, expr, Some(def_id))
}

/// Create a machine definition shell with its generated machine and state
/// names; members, functions and globals arrive in later passes.
pub(crate) fn create_initial_machine_def(
    program: &mut MachProgram,
    _module: &CoreModule,
    symbol: MachSymbolId,
    outer: Option<DefId>,
    mach_ty: MachType,
    necro_ty: NecroType,
) -> DefId {
    let source_name = program.symbol_name(symbol).to_string();
    let machine_base = format!("_{}Machine", capitalized(&source_name));
    let machine_name = program.gen_symbol(&machine_base);
    let state_base = format!("{}State", program.symbol_name(machine_name));
    let state_name = program.gen_symbol(&state_base);

    let (value_type, fn_type) = match &mach_ty {
        MachType::Fn(fn_ty) => {
            // Results land unboxed in the def's value type; uses re-wrap.
            let value = match &fn_ty.ret {
                MachType::Ptr(elem) => (**elem).clone(),
                other => other.clone(),
            };
            (value, Some(mach_ty.clone()))
        }
        other => (other.clone(), None),
    };

    let state_type = program.symbols[symbol].state_type;
    let def = MachDef {
        symbol,
        machine_name,
        state_name,
        state_struct: None,
        value_type,
        necro_value_type: Some(necro_ty),
        fn_type,
        arg_names: Vec::new(),
        members: Vec::new(),
        mk_fn: None,
        init_fn: None,
        update_fn: None,
        global_value: None,
        global_state: None,
        state_type,
        persistent_slot: None,
        outer,
    };
    program.add_machine_def(def)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::NecroBase;
    use crate::config::CompilerConfig;
    use crate::intern::Intern;
    use crate::mach::ast::{MachValueKind, SymbolBinding, Terminator};

    fn setup() -> (CoreModule, NecroBase, MachProgram) {
        let mut module = CoreModule::new();
        let mut intern = Intern::new();
        let base = NecroBase::new(&mut module, &mut intern);
        let mut program = MachProgram::new(intern, &CompilerConfig::default());
        base.install(&mut program, &module);
        (module, base, program)
    }

    #[test]
    fn test_enum_declaration_short_circuits() {
        let (module, base, mut program) = setup();
        run(&mut program, &module).unwrap();

        let bool_mach = program.mach_symbol_of_core(base.bool_type).unwrap();
        assert_eq!(
            program.symbols[bool_mach].mach_type,
            Some(program.word_uint_type())
        );
        // No struct rows for enums.
        assert!(program.structs.is_empty());

        let true_mach = program.mach_symbol_of_core(base.true_con).unwrap();
        let true_symbol = &program.symbols[true_mach];
        assert!(true_symbol.is_enum && true_symbol.is_constructor);
        assert_eq!(true_symbol.con_num, 1);
        let false_mach = program.mach_symbol_of_core(base.false_con).unwrap();
        assert_eq!(program.symbols[false_mach].con_num, 0);
    }

    #[test]
    fn test_single_constructor_record() {
        let (mut module, base, mut program) = setup();
        let int_ty = NecroType::con(base.int_type);
        let two_ints = module.type_symbol(&mut program.intern, "TwoInts");
        let con_ty = NecroType::fun_chain(&[int_ty.clone(), int_ty.clone()], NecroType::con(two_ints));
        let two_ints_con = module.symbol(&mut program.intern, "TwoInts", con_ty);
        let con_node = module.data_con(two_ints_con);
        let decl = module.data_decl(two_ints, vec![con_node]);
        module.push_top(decl);

        run(&mut program, &module).unwrap();

        // One struct: { tag:uword, a:i64, b:i64 }.
        assert_eq!(program.structs.len(), 1);
        let row = &program.structs[0];
        let members = &row.ty.as_struct().unwrap().members;
        assert_eq!(
            members.as_slice(),
            &[MachType::U64, MachType::I64, MachType::I64]
        );

        // The constructor maps to _mkTwoInts(ptr, a, b) -> ptr.
        let mk_symbol = program.mach_symbol_of_core(two_ints_con).unwrap();
        assert_eq!(program.symbol_name(mk_symbol), "_mkTwoInts");
        let SymbolBinding::Fn(mk_id) = program.symbols[mk_symbol].binding else {
            panic!("constructor must bind to its mk function");
        };
        let mk = &program.functions[mk_id];
        let fn_ty = mk.ty.expect_fn();
        assert_eq!(fn_ty.params.len(), 3);
        let entry = &mk.blocks[mk.entry_block()];
        // Tag store plus two field stores, geps interleaved.
        let stores = entry
            .statements
            .iter()
            .filter(|s| matches!(s, crate::mach::ast::MachInstr::Store { .. }))
            .count();
        assert_eq!(stores, 3);
        assert!(matches!(entry.terminator, Some(Terminator::Return(_))));
    }

    #[test]
    fn test_sum_type_layout() {
        let (mut module, base, mut program) = setup();
        let int_ty = NecroType::con(base.int_type);
        let maybe = module.type_symbol(&mut program.intern, "SomeOrNone");
        let none_con = module.symbol(&mut program.intern, "None", NecroType::con(maybe));
        let some_con = module.symbol(
            &mut program.intern,
            "Some",
            NecroType::fun_chain(&[int_ty.clone()], NecroType::con(maybe)),
        );
        let none_node = module.data_con(none_con);
        let some_node = module.data_con(some_con);
        let decl = module.data_decl(maybe, vec![none_node, some_node]);
        module.push_top(decl);

        run(&mut program, &module).unwrap();

        // Parent plus one child per constructor.
        assert_eq!(program.structs.len(), 3);
        let parent = &program.structs[0].ty;
        assert_eq!(
            parent.as_struct().unwrap().members.as_slice(),
            &[MachType::U64, MachType::U64]
        );
        let none_child = program.structs[1].ty.as_struct().unwrap();
        assert_eq!(none_child.members.len(), 1);
        let some_child = program.structs[2].ty.as_struct().unwrap();
        assert_eq!(
            some_child.members.as_slice(),
            &[MachType::U64, MachType::I64]
        );
        assert_eq!(some_child.sum_parent, Some(program.structs[0].symbol));

        // Constructor numbering follows declaration order.
        let none_mk = program.mach_symbol_of_core(none_con).unwrap();
        let some_mk = program.mach_symbol_of_core(some_con).unwrap();
        assert_eq!(program.symbols[none_mk].con_num, 0);
        assert_eq!(program.symbols[some_mk].con_num, 1);

        // _mkSome bit-casts its child pointer to the parent on return.
        let SymbolBinding::Fn(some_id) = program.symbols[some_mk].binding else {
            panic!("expected fn binding");
        };
        let some_fn = &program.functions[some_id];
        let entry = &some_fn.blocks[some_fn.entry_block()];
        assert!(entry
            .statements
            .iter()
            .any(|s| matches!(s, crate::mach::ast::MachInstr::BitCast { .. })));
    }

    #[test]
    fn test_polymorphic_declaration_is_an_error() {
        let (mut module, _base, mut program) = setup();
        let poly = module.symbol(
            &mut program.intern,
            "Wrap",
            NecroType::ForAll {
                var: 0,
                body: Box::new(NecroType::Var { id: 0 }),
            },
        );
        let con = module.symbol(&mut program.intern, "Wrap", NecroType::Var { id: 0 });
        let con_node = module.data_con(con);
        let decl = module.data_decl(poly, vec![con_node]);
        module.push_top(decl);

        let err = run(&mut program, &module).unwrap_err();
        assert!(matches!(err, MachError::PolymorphicType(_)));
    }

    #[test]
    fn test_bind_creates_machine_shell() {
        let (mut module, base, mut program) = setup();
        let int_ty = NecroType::con(base.int_type);
        let x = module.symbol(&mut program.intern, "x", int_ty);
        let body = module.lit(crate::core::CoreLit::Int(3));
        module.top_bind(x, &[], body);

        run(&mut program, &module).unwrap();

        let x_mach = program.mach_symbol_of_core(x).unwrap();
        let SymbolBinding::Def(def_id) = program.symbols[x_mach].binding else {
            panic!("binding should point at its machine def");
        };
        let def = &program.machine_defs[def_id];
        assert_eq!(program.symbol_name(def.machine_name), "_XMachine");
        assert_eq!(program.symbol_name(def.state_name), "_XMachineState");
        assert_eq!(def.value_type, MachType::I64);
        assert!(def.fn_type.is_none());
        assert!(def.members.is_empty());
    }

    #[test]
    fn test_for_loop_rejected() {
        let (mut module, base, mut program) = setup();
        let int_ty = NecroType::con(base.int_type);
        let x = module.symbol(&mut program.intern, "x", int_ty);
        let i = module.lit(crate::core::CoreLit::Int(0));
        let v = module.lit(crate::core::CoreLit::Int(0));
        let body = module.lit(crate::core::CoreLit::Int(1));
        let for_node = module.nodes.alloc(crate::core::CoreAst {
            kind: CoreAstKind::For {
                range_init: i,
                value_init: v,
                expr: body,
            },
        });
        let bind = module.bind(x, for_node);
        module.push_top(bind);

        assert_eq!(
            run(&mut program, &module),
            Err(MachError::Unimplemented("for loops"))
        );
    }

    #[test]
    fn test_runtime_call_produces_void_sentinel() {
        let (_module, _base, mut program) = setup();
        let symbol = program.gen_symbol("driver");
        let ty = MachType::func(MachType::Void, vec![]);
        let mut f = FnDef::new(&mut program, symbol, ty);
        let callee = program.runtime_value(crate::mach::runtime::RuntimeFn::InitRuntime);
        let mut b = FnBuilder::new(&mut program, &mut f);
        let result = b.build_call(&callee, &[], crate::mach::ast::CallKind::C, "");
        assert!(matches!(result.kind, MachValueKind::Void));
    }
}

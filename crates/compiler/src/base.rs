//! The primitive environment handed to the backend alongside a Core module.
//!
//! `NecroBase` owns the Core symbols the frontend treats as built in: the
//! primitive types (`Int`, `Float`, `Char`, `World`), the `Bool` data
//! declaration, runtime-backed functions and globals (`printInt`,
//! `mouseX`, `mouseY`), and the math primitives that lower to intrinsic
//! calls. [`NecroBase::install`] seeds the machine program's symbol table
//! with their machine types and bindings before the passes run.

use crate::core::{CoreModule, CoreSymbolId, NecroType};
use crate::intern::Intern;
use crate::mach::ast::{MachProgram, SymbolBinding};
use crate::mach::runtime::{Intrinsic, RuntimeFn};
use crate::mach::types::MachType;

/// The set of primitive symbols and their types.
#[derive(Debug)]
pub struct NecroBase {
    pub world_type: CoreSymbolId,
    pub int_type: CoreSymbolId,
    pub float_type: CoreSymbolId,
    pub char_type: CoreSymbolId,
    pub bool_type: CoreSymbolId,
    pub false_con: CoreSymbolId,
    pub true_con: CoreSymbolId,
    pub print_int: CoreSymbolId,
    pub mouse_x: CoreSymbolId,
    pub mouse_y: CoreSymbolId,
    /// Math primitives and the intrinsic each lowers to.
    pub intrinsics: Vec<(CoreSymbolId, Intrinsic)>,
}

impl NecroBase {
    /// Create the base symbols inside `module` and add the `Bool` data
    /// declaration to its top level.
    pub fn new(module: &mut CoreModule, intern: &mut Intern) -> NecroBase {
        let world_type = module.type_symbol(intern, "World");
        let int_type = module.type_symbol(intern, "Int");
        let float_type = module.type_symbol(intern, "Float");
        let char_type = module.type_symbol(intern, "Char");
        for ty in [world_type, int_type, float_type, char_type] {
            module.symbols[ty].is_primitive = true;
        }

        let bool_type = module.type_symbol(intern, "Bool");
        let bool_ty = NecroType::con(bool_type);
        let false_con = module.symbol(intern, "False", bool_ty.clone());
        let true_con = module.symbol(intern, "True", bool_ty.clone());
        let false_node = module.data_con(false_con);
        let true_node = module.data_con(true_con);
        let bool_decl = module.data_decl(bool_type, vec![false_node, true_node]);
        module.push_top(bool_decl);

        let int_ty = NecroType::con(int_type);
        let float_ty = NecroType::con(float_type);
        let world_ty = NecroType::con(world_type);

        let print_int = module.primitive_symbol(
            intern,
            "printInt",
            NecroType::fun_chain(&[int_ty.clone(), world_ty.clone()], world_ty.clone()),
        );
        let mouse_x = module.primitive_symbol(intern, "mouseX", int_ty.clone());
        let mouse_y = module.primitive_symbol(intern, "mouseY", int_ty.clone());

        let unary = NecroType::fun_chain(&[float_ty.clone()], float_ty.clone());
        let binary = NecroType::fun_chain(&[float_ty.clone(), float_ty.clone()], float_ty.clone());
        let ternary = NecroType::fun_chain(
            &[float_ty.clone(), float_ty.clone(), float_ty.clone()],
            float_ty.clone(),
        );
        let math: Vec<(&str, Intrinsic, NecroType)> = vec![
            ("sin", Intrinsic::Sin, unary.clone()),
            ("cos", Intrinsic::Cos, unary.clone()),
            ("exp", Intrinsic::Exp, unary.clone()),
            ("exp2", Intrinsic::Exp2, unary.clone()),
            ("log", Intrinsic::Log, unary.clone()),
            ("log10", Intrinsic::Log10, unary.clone()),
            ("log2", Intrinsic::Log2, unary.clone()),
            ("sqrt", Intrinsic::Sqrt, unary.clone()),
            ("floor", Intrinsic::Floor, unary.clone()),
            ("ceil", Intrinsic::Ceil, unary.clone()),
            ("fabs", Intrinsic::FAbs, unary.clone()),
            ("pow", Intrinsic::Pow, binary.clone()),
            ("fmin", Intrinsic::FMin, binary.clone()),
            ("fmax", Intrinsic::FMax, binary.clone()),
            ("copysign", Intrinsic::CpySgn, binary),
            ("fma", Intrinsic::Fma, ternary),
        ];
        let intrinsics = math
            .into_iter()
            .map(|(name, intrinsic, ty)| {
                (module.primitive_symbol(intern, name, ty), intrinsic)
            })
            .collect();

        NecroBase {
            world_type,
            int_type,
            float_type,
            char_type,
            bool_type,
            false_con,
            true_con,
            print_int,
            mouse_x,
            mouse_y,
            intrinsics,
        }
    }

    /// Seed `program` with machine types and bindings for every primitive.
    pub fn install(&self, program: &mut MachProgram, module: &CoreModule) {
        // Primitive types resolve to word-sized scalars: the world token
        // and characters travel as uints.
        let mappings = [
            (self.world_type, program.word_uint_type()),
            (self.int_type, program.word_int_type()),
            (self.float_type, program.word_float_type()),
            (self.char_type, program.word_uint_type()),
        ];
        for (core, ty) in mappings {
            let symbol = program.mach_symbol_for_core(module, core);
            program.symbols[symbol].mach_type = Some(ty);
            program.symbols[symbol].is_primitive = true;
        }

        // printInt threads the world token through _necro_print.
        let print_symbol = program.mach_symbol_for_core(module, self.print_int);
        let print_fn = program.runtime.fn_id(RuntimeFn::Print);
        let print_ty = program.functions[print_fn].ty.clone();
        program.symbols[print_symbol].mach_type = Some(print_ty);
        program.symbols[print_symbol].binding = SymbolBinding::Fn(print_fn);
        program.symbols[print_symbol].is_primitive = true;

        // Mouse position: runtime-owned global int cells.
        for core in [self.mouse_x, self.mouse_y] {
            let symbol = program.mach_symbol_for_core(module, core);
            let cell_ty = MachType::ptr(program.word_int_type());
            let global = program.value_global(symbol, cell_ty);
            program.symbols[symbol].binding = SymbolBinding::Value(global);
            program.symbols[symbol].is_primitive = true;
        }

        for &(core, intrinsic) in &self.intrinsics {
            let symbol = program.mach_symbol_for_core(module, core);
            let necro_ty = module.symbols[core].ty.clone();
            let fn_ty = program
                .mach_fn_type_from_necro(module, &necro_ty)
                .expect("primitive math types are monomorphic");
            program.symbols[symbol].mach_type = Some(fn_ty);
            program.symbols[symbol].intrinsic = Some(intrinsic);
            program.symbols[symbol].is_primitive = true;
        }
    }
}

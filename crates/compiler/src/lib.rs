//! Necro Compiler Backend
//!
//! Lowers the Necro language's monomorphized, lambda-lifted Core AST into
//! Mach, an LLVM-like abstract machine IR in which every source binding is
//! a stateful machine updated once per tick. The crate is the middle of a
//! longer pipeline: lexing, parsing, renaming, inference and
//! monomorphization happen upstream and hand over a [`core::CoreModule`];
//! translating the resulting [`mach::MachProgram`] to LLVM happens
//! downstream.
//!
//! # Usage
//!
//! ```rust,ignore
//! use necroc::{CompilerConfig, NecroBase, CoreModule, Intern};
//!
//! let mut module = CoreModule::new();
//! let mut intern = Intern::new();
//! let base = NecroBase::new(&mut module, &mut intern);
//! // ... frontend fills the module with monomorphic bindings ...
//! let program = necroc::compile_with_config(
//!     &module,
//!     &base,
//!     intern,
//!     &CompilerConfig::new().with_tick_ms(1),
//! )?;
//! println!("{}", program);
//! ```
//!
//! The whole compilation is a pure function from a valid Core module to a
//! verified machine program or a single [`MachError`]; no partial output
//! is ever produced.

pub mod arena;
pub mod base;
pub mod config;
pub mod core;
pub mod intern;
pub mod mach;

pub use crate::base::NecroBase;
pub use crate::config::{CompilerConfig, WordSize};
pub use crate::core::{
    CoreAlt, CoreAst, CoreLit, CoreModule, CorePattern, CoreSymbol, NecroType, StateType,
};
pub use crate::intern::{Intern, Symbol};
pub use crate::mach::{MachError, MachProgram, verify_program};

/// Lower a Core module to a verified machine program with defaults.
pub fn compile(
    module: &CoreModule,
    base: &NecroBase,
    intern: Intern,
) -> Result<MachProgram, MachError> {
    mach::program::compile(module, base, intern)
}

/// Lower a Core module to a verified machine program.
pub fn compile_with_config(
    module: &CoreModule,
    base: &NecroBase,
    intern: Intern,
    config: &CompilerConfig,
) -> Result<MachProgram, MachError> {
    mach::program::transform(module, base, intern, config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_module_still_produces_a_scheduler() {
        let mut module = CoreModule::new();
        let mut intern = Intern::new();
        let base = NecroBase::new(&mut module, &mut intern);
        let program = compile(&module, &base, intern).unwrap();
        assert!(program.necro_main.is_some());
        let text = program.to_string();
        assert!(text.contains("fn _necro_main() -> void"));
        assert!(text.contains("call @_necro_init_runtime()"));
        assert!(text.contains("call @_necro_sleep(10u32)"));
    }

    #[test]
    fn test_tick_interval_is_configurable() {
        let mut module = CoreModule::new();
        let mut intern = Intern::new();
        let base = NecroBase::new(&mut module, &mut intern);
        let config = CompilerConfig::new().with_tick_ms(2);
        let program = compile_with_config(&module, &base, intern, &config).unwrap();
        assert!(program.to_string().contains("call @_necro_sleep(2u32)"));
    }

    #[test]
    fn test_word_size_flows_into_layouts() {
        let mut module = CoreModule::new();
        let mut intern = Intern::new();
        let base = NecroBase::new(&mut module, &mut intern);
        let int_ty = NecroType::con(base.int_type);
        let x = module.symbol(&mut intern, "x", int_ty);
        let body = module.lit(CoreLit::Int(1));
        module.top_bind(x, &[], body);
        let config = CompilerConfig::new().with_word_size(WordSize::FourBytes);
        let program = compile_with_config(&module, &base, intern, &config).unwrap();
        let text = program.to_string();
        assert!(text.contains("fn _updateX() -> i32"));
        assert!(text.contains("@x (i32*)"));
    }

    #[test]
    fn test_recursive_binding_groups_rejected() {
        let mut module = CoreModule::new();
        let mut intern = Intern::new();
        let base = NecroBase::new(&mut module, &mut intern);
        let int_ty = NecroType::con(base.int_type);
        let x = module.symbol(&mut intern, "x", int_ty.clone());
        let body = module.lit(CoreLit::Int(1));
        let bind = module.bind(x, body);
        let group = module.nodes.alloc(crate::core::CoreAst {
            kind: crate::core::CoreAstKind::BindRec { binds: vec![bind] },
        });
        module.push_top(group);
        let err = compile(&module, &base, intern).unwrap_err();
        assert_eq!(err, MachError::Unimplemented("recursive binding groups"));
    }
}

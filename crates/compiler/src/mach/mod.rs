//! The Mach abstract machine backend.
//!
//! Mach is an LLVM-like, block-structured, typed IR specialized for
//! realtime reactive programs: every source binding lowers to a *machine*
//! with a persistent state record, a `mk` constructor, an `init`
//! initializer and a per-tick `update` function, all driven by a generated
//! `_necro_main` scheduler loop.
//!
//! # Pipeline
//!
//! A monomorphized, lambda-lifted Core module flows through three strictly
//! sequential passes plus main synthesis:
//!
//! 1. **Data layout** (`data`): algebraic data types become struct
//!    layouts and `_mkCon` constructor functions; bindings get machine
//!    shells.
//! 2. **State discovery** (`state`): each binding's body is walked to
//!    assign persistent slots for stateful sub-expressions, settle the
//!    machine's classification, and emit `mk`/`init`.
//! 3. **Update synthesis** (`lower`, `case`): bodies become three-address
//!    code over basic blocks in each machine's `_updateFoo`.
//! 4. **Main synthesis** (`program`): `_necro_main` boots the runtime,
//!    builds machine states, and runs the eager, statically ordered
//!    dataflow tick forever.
//!
//! The finished program is checked by `verify` and printable via
//! [`MachProgram`]'s `Display`.
//!
//! # Module structure
//!
//! - `types`: the machine type algebra and source-type translation
//! - `ast`: symbols, values, instructions, blocks, definitions, program
//! - `build`: typed IR builders over a function cursor
//! - `runtime`: the `_necro_*` call surface and intrinsic table
//! - `data`, `state`, `lower`, `case`: the passes
//! - `program`: driver and `_necro_main`
//! - `print`: textual form
//! - `verify`: structural checks
//! - `error`: the lowering error type

pub mod ast;
pub mod build;
mod case;
mod data;
pub mod error;
mod lower;
pub mod print;
pub mod program;
pub mod runtime;
mod state;
pub mod types;
pub mod verify;

pub use ast::{
    BinOp, Block, BlockId, CallKind, CmpOp, DefId, FnDef, FnId, FnKind, MachDef, MachInstr,
    MachProgram, MachSymbol, MachSymbolId, MachValue, MachValueKind, PhiRef, Slot, SlotOwner,
    StructDef, SymbolBinding, Terminator, UOp,
};
pub use build::FnBuilder;
pub use error::MachError;
pub use program::{compile, transform};
pub use runtime::{Intrinsic, MachRuntime, RuntimeFn};
pub use types::{FnType, MachType, StructType, type_check, type_is_eq};
pub use verify::verify_program;

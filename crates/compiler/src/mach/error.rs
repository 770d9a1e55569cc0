//! Mach lowering error types.
//!
//! Lowering is all-or-nothing: a pass either completes or the whole
//! compilation fails with one of these. There is no recovery inside a pass.
//!
//! Two failure classes deliberately do *not* show up here. Builder misuse
//! (storing through a non-pointer, emitting a second terminator, a phi
//! after non-phi statements) and structural type-check failures during IR
//! construction are compiler bugs, not properties of the input program, so
//! the builders panic with a diagnostic instead of returning an error.

use std::fmt;

/// Error type for Core-to-Mach lowering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MachError {
    /// A type that should have been monomorphized reached the backend.
    PolymorphicType(String),
    /// A name with no usable Mach binding (missing mach type, unresolved
    /// reference, malformed symbol use).
    UnresolvedSymbol(String),
    /// A call whose argument count disagrees with the callee's type.
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },
    /// A Core construct the lowering does not support yet.
    Unimplemented(&'static str),
    /// A structural invariant violated in the finished program.
    Verify(String),
}

impl fmt::Display for MachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachError::PolymorphicType(what) => {
                write!(f, "polymorphic type reached the machine backend: {}", what)
            }
            MachError::UnresolvedSymbol(name) => {
                write!(f, "unresolved machine symbol: {}", name)
            }
            MachError::ArityMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "call to {} expects {} arguments, found {}",
                name, expected, found
            ),
            MachError::Unimplemented(what) => write!(f, "not yet implemented: {}", what),
            MachError::Verify(what) => write!(f, "machine program verification failed: {}", what),
        }
    }
}

impl std::error::Error for MachError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_arity() {
        let err = MachError::ArityMismatch {
            name: "printInt".to_string(),
            expected: 2,
            found: 1,
        };
        assert_eq!(
            err.to_string(),
            "call to printInt expects 2 arguments, found 1"
        );
    }

    #[test]
    fn test_display_unimplemented() {
        assert!(
            MachError::Unimplemented("for loops")
                .to_string()
                .contains("for loops")
        );
    }
}

//! The Core AST consumed by the Mach lowering pipeline.
//!
//! Core is the frontend's typed intermediate form, handed to this crate
//! after renaming, inference, monomorphization, lambda lifting and state
//! analysis. The backend trusts its well-formedness: every name resolved,
//! every binding monomorphic, nested functions lifted to the top level
//! except where they legitimately close over state.
//!
//! Nodes live in a [`CoreModule`]-owned arena and reference each other by
//! [`CoreId`]; the builder methods on `CoreModule` are the API frontends
//! (and tests) use to assemble input programs.

use crate::arena::{Arena, Id};
use crate::intern::{Intern, Symbol};

pub type CoreId = Id<CoreAst>;
pub type CoreSymbolId = Id<CoreSymbol>;

/// Statefulness classification of a binding.
///
/// Upstream state analysis may pre-classify a binding; `Poly` means
/// "unresolved", and the state-discovery pass settles it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StateType {
    Poly,
    Constant,
    Pointwise,
    Stateful,
}

/// A source-level type, post-monomorphization.
///
/// By the time a type reaches this crate, every constructor should be fully
/// applied and every quantifier erased; `Var` and `ForAll` survive only in
/// malformed input and are rejected during translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NecroType {
    Con { symbol: CoreSymbolId },
    Fun { arg: Box<NecroType>, result: Box<NecroType> },
    Var { id: u32 },
    ForAll { var: u32, body: Box<NecroType> },
}

impl NecroType {
    pub fn con(symbol: CoreSymbolId) -> Self {
        NecroType::Con { symbol }
    }

    pub fn fun(arg: NecroType, result: NecroType) -> Self {
        NecroType::Fun {
            arg: Box::new(arg),
            result: Box::new(result),
        }
    }

    /// Build `a -> b -> ... -> r` from argument types and a result.
    pub fn fun_chain(args: &[NecroType], result: NecroType) -> Self {
        args.iter()
            .rev()
            .fold(result, |acc, a| NecroType::fun(a.clone(), acc))
    }

    /// Strip leading quantifiers.
    pub fn strip_for_all(&self) -> &NecroType {
        let mut ty = self;
        while let NecroType::ForAll { body, .. } = ty {
            ty = body;
        }
        ty
    }

    /// Number of arrows at the head of the type.
    pub fn arity(&self) -> usize {
        let mut ty = self.strip_for_all();
        let mut n = 0;
        while let NecroType::Fun { result, .. } = ty {
            n += 1;
            ty = result;
        }
        n
    }

    /// The type after consuming all leading arrows.
    pub fn result_type(&self) -> &NecroType {
        let mut ty = self.strip_for_all();
        while let NecroType::Fun { result, .. } = ty {
            ty = result;
        }
        ty
    }

    /// Whether any type variable or quantifier survives.
    ///
    /// Uniqueness/ownership attributes are not modeled here, so this is the
    /// "ignoring ownership" flavor of the check.
    pub fn is_polymorphic(&self) -> bool {
        match self {
            NecroType::Con { .. } => false,
            NecroType::Fun { arg, result } => arg.is_polymorphic() || result.is_polymorphic(),
            NecroType::Var { .. } | NecroType::ForAll { .. } => true,
        }
    }
}

/// A resolved Core-level name.
#[derive(Debug, Clone)]
pub struct CoreSymbol {
    pub name: Symbol,
    pub ty: NecroType,
    pub is_primitive: bool,
    /// Upstream state-analysis classification; `Poly` when unanalyzed.
    pub state_hint: StateType,
}

/// A literal constant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CoreLit {
    Int(i64),
    Float(f64),
    Char(char),
}

/// A case-alternative pattern.
#[derive(Debug, Clone)]
pub enum CorePattern {
    Wildcard,
    Var(CoreSymbolId),
    Con {
        symbol: CoreSymbolId,
        fields: Vec<CorePattern>,
    },
    Lit(CoreLit),
}

/// One alternative of a case expression.
#[derive(Debug, Clone)]
pub struct CoreAlt {
    pub pattern: CorePattern,
    pub body: CoreId,
}

/// A Core AST node.
#[derive(Debug, Clone)]
pub struct CoreAst {
    pub kind: CoreAstKind,
}

#[derive(Debug, Clone)]
pub enum CoreAstKind {
    Lit(CoreLit),
    Var {
        symbol: CoreSymbolId,
    },
    Bind {
        symbol: CoreSymbolId,
        expr: CoreId,
    },
    /// A mutually recursive binding group. Reserved; lowering rejects it.
    BindRec {
        binds: Vec<CoreId>,
    },
    App {
        func: CoreId,
        arg: CoreId,
    },
    Lam {
        arg: CoreSymbolId,
        expr: CoreId,
    },
    Let {
        bind: CoreId,
        expr: CoreId,
    },
    Case {
        expr: CoreId,
        alts: Vec<CoreAlt>,
        /// The type every alternative's body evaluates to.
        result_type: NecroType,
    },
    /// A sequence loop. Reserved; lowering rejects it.
    For {
        range_init: CoreId,
        value_init: CoreId,
        expr: CoreId,
    },
    DataDecl {
        symbol: CoreSymbolId,
        cons: Vec<CoreId>,
    },
    DataCon {
        symbol: CoreSymbolId,
    },
}

/// A complete Core module: symbol table, node arena, and the top-level
/// declarations in definition order.
#[derive(Debug, Default)]
pub struct CoreModule {
    pub symbols: Arena<CoreSymbol>,
    pub nodes: Arena<CoreAst>,
    pub top: Vec<CoreId>,
}

impl CoreModule {
    pub fn new() -> Self {
        CoreModule::default()
    }

    pub fn symbol(
        &mut self,
        intern: &mut Intern,
        name: &str,
        ty: NecroType,
    ) -> CoreSymbolId {
        let name = intern.intern(name);
        self.symbols.alloc(CoreSymbol {
            name,
            ty,
            is_primitive: false,
            state_hint: StateType::Poly,
        })
    }

    pub fn primitive_symbol(
        &mut self,
        intern: &mut Intern,
        name: &str,
        ty: NecroType,
    ) -> CoreSymbolId {
        let id = self.symbol(intern, name, ty);
        self.symbols[id].is_primitive = true;
        id
    }

    /// Create a type-constructor symbol whose type is itself (`Con T`).
    pub fn type_symbol(&mut self, intern: &mut Intern, name: &str) -> CoreSymbolId {
        let id = self.symbol(intern, name, NecroType::Var { id: 0 });
        self.symbols[id].ty = NecroType::con(id);
        id
    }

    fn node(&mut self, kind: CoreAstKind) -> CoreId {
        self.nodes.alloc(CoreAst { kind })
    }

    pub fn lit(&mut self, lit: CoreLit) -> CoreId {
        self.node(CoreAstKind::Lit(lit))
    }

    pub fn var(&mut self, symbol: CoreSymbolId) -> CoreId {
        self.node(CoreAstKind::Var { symbol })
    }

    pub fn app(&mut self, func: CoreId, arg: CoreId) -> CoreId {
        self.node(CoreAstKind::App { func, arg })
    }

    /// Apply `func` to `args` left to right.
    pub fn apps(&mut self, func: CoreId, args: &[CoreId]) -> CoreId {
        args.iter().fold(func, |f, &a| self.app(f, a))
    }

    pub fn lam(&mut self, arg: CoreSymbolId, expr: CoreId) -> CoreId {
        self.node(CoreAstKind::Lam { arg, expr })
    }

    pub fn let_(&mut self, bind: CoreId, expr: CoreId) -> CoreId {
        self.node(CoreAstKind::Let { bind, expr })
    }

    pub fn case(&mut self, expr: CoreId, alts: Vec<CoreAlt>, result_type: NecroType) -> CoreId {
        self.node(CoreAstKind::Case {
            expr,
            alts,
            result_type,
        })
    }

    pub fn bind(&mut self, symbol: CoreSymbolId, expr: CoreId) -> CoreId {
        self.node(CoreAstKind::Bind { symbol, expr })
    }

    pub fn data_con(&mut self, symbol: CoreSymbolId) -> CoreId {
        self.node(CoreAstKind::DataCon { symbol })
    }

    pub fn data_decl(&mut self, symbol: CoreSymbolId, cons: Vec<CoreId>) -> CoreId {
        self.node(CoreAstKind::DataDecl { symbol, cons })
    }

    /// Add a top-level declaration (a `Bind` or `DataDecl`).
    pub fn push_top(&mut self, decl: CoreId) {
        self.top.push(decl);
    }

    /// Build a binding `name = \arg0 ... argN -> body` and add it to the
    /// top level.
    pub fn top_bind(&mut self, symbol: CoreSymbolId, args: &[CoreSymbolId], body: CoreId) -> CoreId {
        let expr = args.iter().rev().fold(body, |e, &a| self.lam(a, e));
        let bind = self.bind(symbol, expr);
        self.push_top(bind);
        bind
    }

    /// Number of leading lambdas under a binding's expression.
    pub fn num_args(&self, bind_expr: CoreId) -> usize {
        let mut n = 0;
        let mut id = bind_expr;
        while let CoreAstKind::Lam { expr, .. } = &self.nodes[id].kind {
            n += 1;
            id = *expr;
        }
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fun_chain_arity() {
        let mut module = CoreModule::new();
        let mut intern = Intern::new();
        let int_sym = module.type_symbol(&mut intern, "Int");
        let int_ty = NecroType::con(int_sym);
        let ty = NecroType::fun_chain(&[int_ty.clone(), int_ty.clone()], int_ty.clone());
        assert_eq!(ty.arity(), 2);
        assert_eq!(ty.result_type(), &int_ty);
    }

    #[test]
    fn test_strip_for_all() {
        let inner = NecroType::Var { id: 3 };
        let ty = NecroType::ForAll {
            var: 3,
            body: Box::new(inner.clone()),
        };
        assert_eq!(ty.strip_for_all(), &inner);
        assert!(ty.is_polymorphic());
    }

    #[test]
    fn test_top_bind_counts_lambdas() {
        let mut module = CoreModule::new();
        let mut intern = Intern::new();
        let int_sym = module.type_symbol(&mut intern, "Int");
        let int_ty = NecroType::con(int_sym);
        let f = module.symbol(
            &mut intern,
            "f",
            NecroType::fun_chain(&[int_ty.clone()], int_ty.clone()),
        );
        let x = module.symbol(&mut intern, "x", int_ty);
        let body = module.var(x);
        let bind = module.top_bind(f, &[x], body);
        let CoreAstKind::Bind { expr, .. } = &module.nodes[bind].kind else {
            panic!("expected bind");
        };
        assert_eq!(module.num_args(*expr), 1);
    }
}

//! Expression handles and the raw term constructors.
//!
//! Each constructor is one native call followed by tracking of the result.
//! There is no typed expression hierarchy: sorts, constants and terms are
//! all [`Ast`] values, and the engine enforces sort discipline.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use smtguard_native::{NativeApi, RawAst, RawEngine, SortKind};

use crate::context::{Context, ContextInner, c_string};
use crate::error::{ObjectKind, SolverError};

/// A tracked expression, sort or declaration.
///
/// The owning context holds the reference count; an `Ast` is a cheap
/// identity that stays valid until the context is disposed.
#[derive(Clone)]
pub struct Ast {
    ctx: Weak<ContextInner>,
    raw: RawAst,
}

impl Ast {
    pub(crate) fn new(ctx: Weak<ContextInner>, raw: RawAst) -> Self {
        Self { ctx, raw }
    }

    pub fn raw(&self) -> RawAst {
        self.raw
    }

    /// The handle, provided `owner` is the context this expression belongs to.
    pub(crate) fn raw_for(&self, owner: &Weak<ContextInner>) -> Result<RawAst, SolverError> {
        if self.ctx.ptr_eq(owner) {
            Ok(self.raw)
        } else {
            Err(SolverError::Argument(
                "expression belongs to a different context".to_string(),
            ))
        }
    }

    fn owner(&self) -> Result<Rc<ContextInner>, SolverError> {
        self.ctx
            .upgrade()
            .ok_or(SolverError::UseAfterDispose(ObjectKind::Context))
    }

    /// Untracked sort handle; only valid while this expression is.
    fn sort_raw(&self, ctx: &ContextInner) -> Result<RawAst, SolverError> {
        let raw = self.raw;
        // SAFETY: `raw` is tracked by the live context.
        ctx.invoke(|api, engine| unsafe { api.sort_of(engine, raw) })
    }

    /// The sort of this expression, tracked.
    pub fn sort(&self) -> Result<Ast, SolverError> {
        let ctx = self.owner()?;
        let sort = self.sort_raw(&ctx)?;
        Ok(Ast::new(self.ctx.clone(), ctx.track(sort)?))
    }

    pub fn sort_kind(&self) -> Result<SortKind, SolverError> {
        let ctx = self.owner()?;
        let sort = self.sort_raw(&ctx)?;
        // SAFETY: the sort is kept alive by this expression.
        ctx.invoke(|api, engine| unsafe { api.sort_kind(engine, sort) })
    }

    /// Width of a bitvector expression.
    pub fn bv_width(&self) -> Result<u32, SolverError> {
        let ctx = self.owner()?;
        let sort = self.sort_raw(&ctx)?;
        // SAFETY: the sort is kept alive by this expression.
        let kind = ctx.invoke(|api, engine| unsafe { api.sort_kind(engine, sort) })?;
        if kind != SortKind::BitVec {
            return Err(SolverError::Argument(format!(
                "expected a bitvector, got sort {kind}"
            )));
        }
        // SAFETY: as above.
        ctx.invoke(|api, engine| unsafe { api.bv_size(engine, sort) })
    }

    pub fn is_numeral(&self) -> Result<bool, SolverError> {
        let ctx = self.owner()?;
        let raw = self.raw;
        // SAFETY: `raw` is tracked by the live context.
        ctx.invoke(|api, engine| unsafe { api.is_numeral(engine, raw) })
    }
}

impl PartialEq for Ast {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw && self.ctx.ptr_eq(&other.ctx)
    }
}

impl Eq for Ast {}

impl Hash for Ast {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl fmt::Display for Ast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = self.raw;
        // SAFETY: `raw` is tracked by the live context.
        let rendered = self
            .owner()
            .and_then(|ctx| ctx.invoke(|api, engine| unsafe { api.ast_to_string(engine, raw) }));
        match rendered {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str("<disposed>"),
        }
    }
}

impl fmt::Debug for Ast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ast({:#x})", self.raw.id())
    }
}

impl Context {
    fn build(
        &self,
        call: impl FnOnce(&dyn NativeApi, RawEngine) -> RawAst,
    ) -> Result<Ast, SolverError> {
        let inner = self.inner();
        let raw = inner.invoke(call)?;
        Ok(Ast::new(self.downgrade(), inner.track(raw)?))
    }

    fn arg(&self, ast: &Ast) -> Result<RawAst, SolverError> {
        ast.raw_for(&self.downgrade())
    }

    fn args(&self, asts: &[&Ast], op: &str) -> Result<Vec<RawAst>, SolverError> {
        if asts.is_empty() {
            return Err(SolverError::Argument(format!("{op} needs at least one operand")));
        }
        asts.iter().map(|a| self.arg(a)).collect()
    }

    fn same_width(&self, lhs: &Ast, rhs: &Ast) -> Result<(RawAst, RawAst), SolverError> {
        let (l, r) = (self.arg(lhs)?, self.arg(rhs)?);
        let (wl, wr) = (lhs.bv_width()?, rhs.bv_width()?);
        if wl != wr {
            return Err(SolverError::Argument(format!(
                "bitvector width mismatch: {wl} vs {wr}"
            )));
        }
        Ok((l, r))
    }

    // ---- sorts ----

    pub fn bool_sort(&self) -> Result<Ast, SolverError> {
        // SAFETY: engine liveness is checked by `invoke`.
        self.build(|api, engine| unsafe { api.mk_bool_sort(engine) })
    }

    pub fn int_sort(&self) -> Result<Ast, SolverError> {
        // SAFETY: engine liveness is checked by `invoke`.
        self.build(|api, engine| unsafe { api.mk_int_sort(engine) })
    }

    pub fn real_sort(&self) -> Result<Ast, SolverError> {
        // SAFETY: engine liveness is checked by `invoke`.
        self.build(|api, engine| unsafe { api.mk_real_sort(engine) })
    }

    pub fn bv_sort(&self, width: u32) -> Result<Ast, SolverError> {
        if width == 0 {
            return Err(SolverError::Argument("bitvector width must be positive".to_string()));
        }
        // SAFETY: engine liveness is checked by `invoke`.
        self.build(|api, engine| unsafe { api.mk_bv_sort(engine, width) })
    }

    // ---- constants and literals ----

    /// A named constant of `sort`.
    pub fn constant(&self, name: &str, sort: &Ast) -> Result<Ast, SolverError> {
        let name = c_string(name, "constant name")?;
        let sort = self.arg(sort)?;
        // SAFETY: `sort` is tracked by this context.
        self.build(|api, engine| unsafe { api.mk_const(engine, &name, sort) })
    }

    pub fn bool_const(&self, name: &str) -> Result<Ast, SolverError> {
        self.constant(name, &self.bool_sort()?)
    }

    pub fn int_const(&self, name: &str) -> Result<Ast, SolverError> {
        self.constant(name, &self.int_sort()?)
    }

    pub fn real_const(&self, name: &str) -> Result<Ast, SolverError> {
        self.constant(name, &self.real_sort()?)
    }

    pub fn bv_const(&self, name: &str, width: u32) -> Result<Ast, SolverError> {
        self.constant(name, &self.bv_sort(width)?)
    }

    /// A numeral of `sort` from its decimal text.
    pub fn numeral(&self, text: &str, sort: &Ast) -> Result<Ast, SolverError> {
        let text = c_string(text, "numeral")?;
        let sort = self.arg(sort)?;
        // SAFETY: `sort` is tracked by this context.
        self.build(|api, engine| unsafe { api.mk_numeral(engine, &text, sort) })
    }

    pub fn int(&self, value: i64) -> Result<Ast, SolverError> {
        self.numeral(&value.to_string(), &self.int_sort()?)
    }

    /// The real `num/den`.
    pub fn real(&self, num: i64, den: i64) -> Result<Ast, SolverError> {
        if den == 0 {
            return Err(SolverError::Argument("zero denominator".to_string()));
        }
        self.numeral(&format!("{num}/{den}"), &self.real_sort()?)
    }

    pub fn bv(&self, value: u64, width: u32) -> Result<Ast, SolverError> {
        self.numeral(&value.to_string(), &self.bv_sort(width)?)
    }

    pub fn bool_val(&self, value: bool) -> Result<Ast, SolverError> {
        // SAFETY: engine liveness is checked by `invoke`.
        self.build(|api, engine| unsafe { api.mk_bool(engine, value) })
    }

    // ---- terms ----

    pub fn eq(&self, lhs: &Ast, rhs: &Ast) -> Result<Ast, SolverError> {
        let (l, r) = (self.arg(lhs)?, self.arg(rhs)?);
        // SAFETY: both operands are tracked by this context.
        self.build(|api, engine| unsafe { api.mk_eq(engine, l, r) })
    }

    pub fn not(&self, arg: &Ast) -> Result<Ast, SolverError> {
        let a = self.arg(arg)?;
        // SAFETY: the operand is tracked by this context.
        self.build(|api, engine| unsafe { api.mk_not(engine, a) })
    }

    pub fn and(&self, args: &[&Ast]) -> Result<Ast, SolverError> {
        let raw = self.args(args, "and")?;
        // SAFETY: all operands are tracked by this context.
        self.build(|api, engine| unsafe { api.mk_and(engine, &raw) })
    }

    pub fn or(&self, args: &[&Ast]) -> Result<Ast, SolverError> {
        let raw = self.args(args, "or")?;
        // SAFETY: all operands are tracked by this context.
        self.build(|api, engine| unsafe { api.mk_or(engine, &raw) })
    }

    pub fn add(&self, args: &[&Ast]) -> Result<Ast, SolverError> {
        let raw = self.args(args, "+")?;
        // SAFETY: all operands are tracked by this context.
        self.build(|api, engine| unsafe { api.mk_add(engine, &raw) })
    }

    pub fn le(&self, lhs: &Ast, rhs: &Ast) -> Result<Ast, SolverError> {
        let (l, r) = (self.arg(lhs)?, self.arg(rhs)?);
        // SAFETY: both operands are tracked by this context.
        self.build(|api, engine| unsafe { api.mk_le(engine, l, r) })
    }

    pub fn lt(&self, lhs: &Ast, rhs: &Ast) -> Result<Ast, SolverError> {
        let (l, r) = (self.arg(lhs)?, self.arg(rhs)?);
        // SAFETY: both operands are tracked by this context.
        self.build(|api, engine| unsafe { api.mk_lt(engine, l, r) })
    }

    pub fn ge(&self, lhs: &Ast, rhs: &Ast) -> Result<Ast, SolverError> {
        let (l, r) = (self.arg(lhs)?, self.arg(rhs)?);
        // SAFETY: both operands are tracked by this context.
        self.build(|api, engine| unsafe { api.mk_ge(engine, l, r) })
    }

    /// Modular bitvector addition; operands must have equal width.
    pub fn bvadd(&self, lhs: &Ast, rhs: &Ast) -> Result<Ast, SolverError> {
        let (l, r) = self.same_width(lhs, rhs)?;
        // SAFETY: both operands are tracked by this context.
        self.build(|api, engine| unsafe { api.mk_bvadd(engine, l, r) })
    }

    /// Unsigned bitvector less-than; operands must have equal width.
    pub fn bvult(&self, lhs: &Ast, rhs: &Ast) -> Result<Ast, SolverError> {
        let (l, r) = self.same_width(lhs, rhs)?;
        // SAFETY: both operands are tracked by this context.
        self.build(|api, engine| unsafe { api.mk_bvult(engine, l, r) })
    }

    /// Universal quantification of `body` over the given constants.
    pub fn forall(&self, bound: &[&Ast], body: &Ast) -> Result<Ast, SolverError> {
        let vars = self.args(bound, "forall")?;
        let body = self.arg(body)?;
        // SAFETY: bound constants and body are tracked by this context.
        self.build(|api, engine| unsafe { api.mk_forall(engine, &vars, body) })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use smtguard_native::reference::ReferenceEngine;

    use super::*;

    fn ctx() -> Context {
        Context::with_defaults(Arc::new(ReferenceEngine::new())).unwrap()
    }

    #[test]
    fn constructors_render() {
        let ctx = ctx();
        let x = ctx.int_const("x").unwrap();
        let y = ctx.int_const("y").unwrap();
        let sum = ctx.add(&[&x, &y, &ctx.int(1).unwrap()]).unwrap();
        assert_eq!(sum.to_string(), "(+ x y 1)");
        let cmp = ctx.le(&sum, &ctx.int(-2).unwrap()).unwrap();
        assert_eq!(cmp.to_string(), "(<= (+ x y 1) (- 2))");
        let neg = ctx.not(&ctx.bool_val(true).unwrap()).unwrap();
        assert_eq!(neg.to_string(), "(not true)");
    }

    #[test]
    fn sort_introspection() {
        let ctx = ctx();
        let x = ctx.int_const("x").unwrap();
        let v = ctx.bv_const("v", 16).unwrap();
        assert_eq!(x.sort_kind().unwrap(), SortKind::Int);
        assert_eq!(x.sort().unwrap().to_string(), "Int");
        assert_eq!(v.bv_width().unwrap(), 16);
        assert!(matches!(x.bv_width(), Err(SolverError::Argument(_))));
        assert!(ctx.int(4).unwrap().is_numeral().unwrap());
        assert!(!x.is_numeral().unwrap());
    }

    #[test]
    fn bitvector_width_mismatch_is_argument_error() {
        let ctx = ctx();
        let a = ctx.bv_const("a", 8).unwrap();
        let b = ctx.bv_const("b", 16).unwrap();
        let err = ctx.bvadd(&a, &b).unwrap_err();
        assert_eq!(
            err,
            SolverError::Argument("bitvector width mismatch: 8 vs 16".to_string())
        );
        assert!(ctx.bvult(&a, &b).is_err());
        assert!(ctx.bvadd(&a, &ctx.bv(1, 8).unwrap()).is_ok());
    }

    #[test]
    fn sort_mismatch_is_native_error() {
        let ctx = ctx();
        let x = ctx.int_const("x").unwrap();
        let b = ctx.bool_const("b").unwrap();
        let err = ctx.eq(&x, &b).unwrap_err();
        assert!(matches!(err, SolverError::NativeOperation { .. }));
    }

    #[test]
    fn empty_operands_rejected() {
        let ctx = ctx();
        assert!(matches!(ctx.and(&[]), Err(SolverError::Argument(_))));
        assert!(matches!(ctx.real(1, 0), Err(SolverError::Argument(_))));
        assert!(matches!(ctx.bv_sort(0), Err(SolverError::Argument(_))));
        assert!(matches!(
            ctx.int_const("bad\0name"),
            Err(SolverError::Argument(_))
        ));
    }

    #[test]
    fn cross_context_operand_rejected() {
        let api = Arc::new(ReferenceEngine::new());
        let a = Context::with_defaults(api.clone()).unwrap();
        let b = Context::with_defaults(api).unwrap();
        let x = a.int_const("x").unwrap();
        let y = b.int_const("x").unwrap();
        assert!(matches!(b.eq(&x, &y), Err(SolverError::Argument(_))));
        assert_ne!(x, y);
    }

    #[test]
    fn equality_is_handle_identity() {
        let ctx = ctx();
        let x1 = ctx.int_const("x").unwrap();
        let x2 = ctx.int_const("x").unwrap();
        assert_eq!(x1, x2);
        let set: HashSet<Ast> = [x1, x2].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn display_after_dispose_uses_sentinel() {
        let ctx = ctx();
        let x = ctx.int_const("x").unwrap();
        ctx.dispose();
        assert_eq!(x.to_string(), "<disposed>");
        assert_eq!(
            ctx.int_const("y"),
            Err(SolverError::UseAfterDispose(ObjectKind::Context))
        );
    }
}

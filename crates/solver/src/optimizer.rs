//! Optimization context handle.

use std::fmt;

use smtguard_native::{NativeApi, RawAst, RawEngine, RawOptimize};

use crate::context::ChildRef;
use crate::error::SolverError;
use crate::model::Model;
use crate::result::CheckResult;
use crate::terms::Ast;

/// Index of an objective registered with [`Optimizer::maximize`] or
/// [`Optimizer::minimize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectiveId(pub u32);

/// An optimizing solver owned by a [`Context`](crate::Context).
///
/// Shares the lifecycle rules of [`Solver`](crate::Solver): mutations
/// invalidate the previous model, and the context's disposal disposes it.
pub struct Optimizer {
    child: ChildRef,
    raw: RawOptimize,
}

impl Optimizer {
    pub(crate) fn new(child: ChildRef, raw: RawOptimize) -> Self {
        Self { child, raw }
    }

    pub fn raw(&self) -> RawOptimize {
        self.raw
    }

    pub fn assert(&self, constraint: &Ast) -> Result<(), SolverError> {
        let c = self.child.arg(constraint)?;
        let raw = self.raw;
        // SAFETY: optimizer and constraint belong to the live engine.
        self.child
            .mutate(|api, engine| unsafe { api.optimize_assert(engine, raw, c) })
    }

    pub fn maximize(&self, term: &Ast) -> Result<ObjectiveId, SolverError> {
        let t = self.child.arg(term)?;
        let raw = self.raw;
        // SAFETY: optimizer and term belong to the live engine.
        self.child
            .mutate(|api, engine| unsafe { api.optimize_maximize(engine, raw, t) })
            .map(ObjectiveId)
    }

    pub fn minimize(&self, term: &Ast) -> Result<ObjectiveId, SolverError> {
        let t = self.child.arg(term)?;
        let raw = self.raw;
        // SAFETY: optimizer and term belong to the live engine.
        self.child
            .mutate(|api, engine| unsafe { api.optimize_minimize(engine, raw, t) })
            .map(ObjectiveId)
    }

    pub fn check(&self) -> Result<CheckResult, SolverError> {
        let raw = self.raw;
        // SAFETY: the optimizer belongs to the live engine.
        self.child
            .check(|api, engine| unsafe { api.optimize_check(engine, raw) })
    }

    pub fn model(&self) -> Result<Model, SolverError> {
        let raw = self.raw;
        // SAFETY: the optimizer belongs to the live engine.
        self.child
            .model(|api, engine| unsafe { api.optimize_get_model(engine, raw) })
    }

    pub fn push(&self) -> Result<(), SolverError> {
        let raw = self.raw;
        // SAFETY: the optimizer belongs to the live engine.
        self.child
            .mutate(|api, engine| unsafe { api.optimize_push(engine, raw) })
    }

    pub fn pop(&self) -> Result<(), SolverError> {
        let raw = self.raw;
        // SAFETY: the optimizer belongs to the live engine.
        self.child
            .mutate(|api, engine| unsafe { api.optimize_pop(engine, raw) })
    }

    /// Upper bound of an objective after a satisfiable check.
    pub fn upper(&self, objective: ObjectiveId) -> Result<Ast, SolverError> {
        let raw = self.raw;
        // SAFETY: the optimizer belongs to the live engine.
        self.bound(|api, engine| unsafe { api.optimize_upper(engine, raw, objective.0) })
    }

    /// Lower bound of an objective after a satisfiable check.
    pub fn lower(&self, objective: ObjectiveId) -> Result<Ast, SolverError> {
        let raw = self.raw;
        // SAFETY: the optimizer belongs to the live engine.
        self.bound(|api, engine| unsafe { api.optimize_lower(engine, raw, objective.0) })
    }

    fn bound(
        &self,
        fetch: impl FnOnce(&dyn NativeApi, RawEngine) -> RawAst,
    ) -> Result<Ast, SolverError> {
        match self.child.last_check() {
            Some(CheckResult::Satisfiable) => {}
            Some(result) => {
                return Err(SolverError::StateSequence(format!(
                    "cannot read objective bounds when status is {result}"
                )));
            }
            None => {
                return Err(SolverError::StateSequence(
                    "must check before reading objective bounds".to_string(),
                ));
            }
        }
        let value = self.child.query(fetch)?;
        self.child.track(value)
    }

    pub fn reason_unknown(&self) -> Result<String, SolverError> {
        let raw = self.raw;
        // SAFETY: the optimizer belongs to the live engine.
        self.child
            .query(|api, engine| unsafe { api.optimize_reason_unknown(engine, raw) })
    }

    pub fn last_check(&self) -> Option<CheckResult> {
        self.child.last_check()
    }

    /// Release the optimizer now. Idempotent.
    pub fn dispose(&self) {
        self.child.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.child.is_disposed()
    }
}

impl Drop for Optimizer {
    fn drop(&mut self) {
        self.child.dispose();
    }
}

impl fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Optimizer")
            .field("id", &self.child.id())
            .field("raw", &self.raw)
            .field("disposed", &self.is_disposed())
            .field("last_check", &self.last_check())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use smtguard_native::reference::{Fault, ReferenceEngine};

    use super::*;
    use crate::context::Context;
    use crate::error::ObjectKind;

    fn setup() -> (Arc<ReferenceEngine>, Context) {
        let engine = Arc::new(ReferenceEngine::new());
        let ctx = Context::with_defaults(engine.clone()).unwrap();
        (engine, ctx)
    }

    #[test]
    fn maximize_within_bounds() {
        let (_engine, ctx) = setup();
        let opt = ctx.optimizer().unwrap();
        let v = ctx.bv_const("v", 8).unwrap();
        opt.assert(&ctx.bvult(&v, &ctx.bv(10, 8).unwrap()).unwrap()).unwrap();
        let goal = opt.maximize(&v).unwrap();
        assert_eq!(goal, ObjectiveId(0));
        assert_eq!(opt.check().unwrap(), CheckResult::Satisfiable);
        assert_eq!(opt.upper(goal).unwrap().to_string(), "#x09");
        assert_eq!(opt.model().unwrap().bitvec_value(&v).unwrap(), 9);
    }

    #[test]
    fn minimize_within_bounds() {
        let (_engine, ctx) = setup();
        let opt = ctx.optimizer().unwrap();
        let v = ctx.bv_const("v", 8).unwrap();
        opt.assert(&ctx.bvult(&ctx.bv(2, 8).unwrap(), &v).unwrap()).unwrap();
        opt.assert(&ctx.bvult(&v, &ctx.bv(9, 8).unwrap()).unwrap()).unwrap();
        let goal = opt.minimize(&v).unwrap();
        assert_eq!(opt.check().unwrap(), CheckResult::Satisfiable);
        assert_eq!(opt.lower(goal).unwrap().to_string(), "#x03");
    }

    #[test]
    fn bounds_need_satisfiable_check() {
        let (_engine, ctx) = setup();
        let opt = ctx.optimizer().unwrap();
        let v = ctx.bv_const("v", 8).unwrap();
        let goal = opt.maximize(&v).unwrap();
        assert_eq!(
            opt.upper(goal).unwrap_err(),
            SolverError::StateSequence("must check before reading objective bounds".to_string())
        );
        opt.assert(&ctx.bool_val(false).unwrap()).unwrap();
        assert_eq!(opt.check().unwrap(), CheckResult::Unsatisfiable);
        assert!(matches!(opt.lower(goal), Err(SolverError::StateSequence(_))));
    }

    #[test]
    fn integer_objective_without_finite_domain_is_unknown() {
        let (_engine, ctx) = setup();
        let opt = ctx.optimizer().unwrap();
        let x = ctx.int_const("x").unwrap();
        opt.assert(&ctx.le(&x, &ctx.int(10).unwrap()).unwrap()).unwrap();
        let goal = opt.maximize(&x).unwrap();
        assert_eq!(opt.check().unwrap(), CheckResult::Unknown);
        assert_eq!(opt.reason_unknown().unwrap(), "incomplete search");
        assert!(matches!(opt.upper(goal), Err(SolverError::StateSequence(_))));
    }

    #[test]
    fn non_numeric_objective_is_native_error() {
        let (_engine, ctx) = setup();
        let opt = ctx.optimizer().unwrap();
        let p = ctx.bool_const("p").unwrap();
        assert!(matches!(
            opt.maximize(&p),
            Err(SolverError::NativeOperation { .. })
        ));
    }

    #[test]
    fn pop_without_push_is_native_error() {
        let (_engine, ctx) = setup();
        let opt = ctx.optimizer().unwrap();
        opt.push().unwrap();
        opt.pop().unwrap();
        assert!(matches!(opt.pop(), Err(SolverError::NativeOperation { .. })));
    }

    #[test]
    fn null_optimizer_is_construction_failure() {
        let (engine, ctx) = setup();
        engine.inject(Fault::NullOptimize);
        assert_eq!(
            ctx.optimizer().unwrap_err(),
            SolverError::ConstructionFailure("optimizer".to_string())
        );
    }

    #[test]
    fn objective_registration_invalidates_model() {
        let (_engine, ctx) = setup();
        let opt = ctx.optimizer().unwrap();
        let x = ctx.int_const("x").unwrap();
        opt.assert(&ctx.ge(&x, &ctx.int(1).unwrap()).unwrap()).unwrap();
        opt.check().unwrap();
        let model = opt.model().unwrap();
        opt.minimize(&x).unwrap();
        assert!(!model.is_valid());
    }

    #[test]
    fn dispose_then_use() {
        let (_engine, ctx) = setup();
        let opt = ctx.optimizer().unwrap();
        opt.dispose();
        opt.dispose();
        assert!(opt.is_disposed());
        assert_eq!(
            opt.check(),
            Err(SolverError::UseAfterDispose(ObjectKind::Optimizer))
        );
        assert_eq!(ctx.child_count(), 0);
    }
}
